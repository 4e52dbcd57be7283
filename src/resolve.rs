//! The promise resolution procedure: routes a produced value to a
//! downstream deferred, adopting the state of the value when it is itself a
//! handle of this library.

use std::sync::Arc;

use crate::deferred::Deferred;
use crate::error::Reason;
use crate::promise::Promise;
use crate::value::Value;

/// Reason text a deferred is rejected with when it would adopt its own
/// state
pub const SELF_ADOPTION: &str = "cannot adopt own state";

/// Decide whether `down` fulfills with `x` or adopts the state of `x`.
///
/// When `x` wraps a [Promise], `down` mirrors that promise's eventual
/// outcome: a settled promise settles `down` right away, a pending one
/// gains a forwarding continuation. A promise is never allowed to adopt
/// itself; that settles `down` rejected instead. Any other value,
/// including an empty one, fulfills `down` directly.
///
/// Adoption chains resolve by iterated application, each link forwarding
/// through one continuation until a terminal state is reached. Only the
/// one-hop self-loop is detected; a longer adoption cycle keeps every
/// deferred on it pending and referenced forever, so don't build one.
pub(crate) fn resolve(down: &Arc<Deferred>, x: Value) {
  let adoptee = x.peek::<Promise>().map(|q| q.deferred().clone());
  match adoptee {
    Some(q) if Arc::ptr_eq(&q, down) => down.reject(Reason::new(SELF_ADOPTION)),
    Some(q) => q.adopted_by(down),
    None => down.fulfill(x),
  }
}
