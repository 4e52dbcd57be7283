//! Type-erased shareable carrier for the values that travel along promise
//! chains.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use dyn_clone::DynClone;

use crate::error::TypeMismatch;

/// Functionality a [Value] needs from its payload. Payloads are never
/// mutated after construction, so sharing them across threads only requires
/// [Send] and [Sync]; [DynClone] backs the explicit [Value::deep_copy].
///
/// Implemented for every eligible type, no manual impls needed.
pub trait Payload: Any + DynClone + Send + Sync {
  /// Casts this payload to [Any] so that its original type can be recovered
  /// by downcasting
  fn as_any(&self) -> &dyn Any;
  /// Print the payload's type name, for diagnostics
  fn type_name(&self) -> &'static str;
}
dyn_clone::clone_trait_object!(Payload);

impl<T: Any + Clone + Send + Sync> Payload for T {
  fn as_any(&self) -> &dyn Any { self }
  fn type_name(&self) -> &'static str { type_name::<T>() }
}

/// Type tag reported by empty cells. An empty [Value] matches only this in
/// [Value::has_same_type].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nothing;

/// A type-erased, cheaply shareable carrier for any user value.
///
/// Copies share the payload without duplicating it; only the explicit
/// [Value::deep_copy] clones the data. Equality is identity of the
/// underlying storage, never structural comparison. The empty cell is a
/// valid, first-class state.
#[derive(Clone, Default)]
pub struct Value(Option<Arc<dyn Payload>>);

impl Value {
  /// Create an empty cell
  pub fn empty() -> Self { Self(None) }

  /// Wrap a value of any eligible type
  pub fn new(data: impl Payload) -> Self { Self(Some(Arc::new(data))) }

  /// Whether this cell holds no payload
  pub fn is_empty(&self) -> bool { self.0.is_none() }

  /// The runtime type tag of the payload. Empty cells report [Nothing].
  pub fn tag(&self) -> TypeId {
    match &self.0 {
      Some(p) => p.as_any().type_id(),
      None => TypeId::of::<Nothing>(),
    }
  }

  /// The name of the stored type, for diagnostics
  pub fn type_name(&self) -> &'static str {
    match &self.0 {
      Some(p) => p.type_name(),
      None => type_name::<Nothing>(),
    }
  }

  /// Whether the stored tag equals the supplied tag. Empty cells match only
  /// the [Nothing] tag.
  pub fn has_same_type(&self, tag: TypeId) -> bool { self.tag() == tag }

  /// Test the type of the payload without extracting it
  pub fn is<T: 'static>(&self) -> bool { self.tag() == TypeId::of::<T>() }

  /// Borrow the payload if it is of the specified type
  pub fn peek<T: 'static>(&self) -> Option<&T> {
    self.0.as_ref().and_then(|p| p.as_any().downcast_ref())
  }

  /// Extract a copy of the payload. Fails when the request does not match
  /// the stored tag; empty cells fail every request.
  pub fn get<T: Clone + 'static>(&self) -> Result<T, TypeMismatch> {
    (self.peek::<T>().cloned()).ok_or_else(|| TypeMismatch {
      requested: type_name::<T>(),
      held: self.type_name(),
    })
  }

  /// Produce a cell whose payload is a duplicate, not a shared reference
  pub fn deep_copy(&self) -> Self {
    Self(self.0.as_ref().map(|p| Arc::from(dyn_clone::clone_box(&**p))))
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (&self.0, &other.0) {
      (Some(l), Some(r)) => Arc::ptr_eq(l, r),
      (None, None) => true,
      _ => false,
    }
  }
}
impl Eq for Value {}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.0 {
      Some(p) => write!(f, "Value({})", p.type_name()),
      None => write!(f, "Value(empty)"),
    }
  }
}
