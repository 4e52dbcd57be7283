//! Failure channels of the library: rejection reasons, faults raised from
//! continuation callbacks, and synchronous API errors.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// A textual explanation of rejection.
///
/// Values and reasons are distinct concepts, not two cases of the same sum:
/// continuations produce values, only rejection produces reasons. Clones
/// share the text; comparison is textual.
#[derive(Clone)]
pub struct Reason(Arc<str>);

impl Reason {
  /// Wrap a message
  pub fn new(msg: impl AsRef<str>) -> Self { Self(Arc::from(msg.as_ref())) }

  /// The message text
  pub fn as_str(&self) -> &str { &self.0 }

  /// Wrap in a [Result] that never succeeds, for easy short-circuiting out
  /// of a continuation callback
  pub fn fail<T>(self) -> EvResult<T> { Err(Box::new(self)) }
}

impl fmt::Display for Reason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}
impl fmt::Debug for Reason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Reason({})", self.0)
  }
}
impl PartialEq for Reason {
  fn eq(&self, other: &Self) -> bool { self.0 == other.0 }
}
impl Eq for Reason {}
impl From<&str> for Reason {
  fn from(msg: &str) -> Self { Self::new(msg) }
}
impl From<String> for Reason {
  fn from(msg: String) -> Self { Self::new(msg) }
}

/// An error raised from a continuation callback.
///
/// Faults never surface to the caller; the firing logic reduces them to a
/// [Reason] which rejects the downstream deferred. A fault that already is
/// a [Reason] travels verbatim, anything else is reduced to its display
/// text.
pub trait Fault: fmt::Display + Send {
  /// Casts this fault to [Any] so the firing logic can recover a typed
  /// [Reason]
  fn as_any(&self) -> &dyn Any;
}

/// A type-erased [Fault]
pub type FaultObj = Box<dyn Fault>;

/// Result of a continuation callback: a value for the resolution procedure
/// or a fault that rejects the downstream deferred
pub type EvResult<T> = Result<T, FaultObj>;

impl Fault for Reason {
  fn as_any(&self) -> &dyn Any { self }
}

impl From<Reason> for FaultObj {
  fn from(reason: Reason) -> Self { Box::new(reason) }
}

struct ErrFault<E>(E);
impl<E: Error + Send + 'static> Fault for ErrFault<E> {
  fn as_any(&self) -> &dyn Any { &self.0 }
}
impl<E: Error> fmt::Display for ErrFault<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}
impl<E: Error + Send + 'static> From<E> for FaultObj {
  fn from(err: E) -> Self { Box::new(ErrFault(err)) }
}

/// A [crate::Value] was asked for a type other than the one it holds.
/// Surfaced synchronously to the caller, unlike rejections.
#[derive(Clone, Debug)]
pub struct TypeMismatch {
  /// The type the caller asked for
  pub requested: &'static str,
  /// The type the cell actually holds
  pub held: &'static str,
}

impl fmt::Display for TypeMismatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "expected a value of type {}, found {}", self.requested, self.held)
  }
}
impl Error for TypeMismatch {}
