//! The value-type handle users pass around. All copies share one
//! underlying deferred; copying is a refcount bump.

use std::fmt;
use std::sync::Arc;

use crate::deferred::{Deferred, OnFulfill, OnReject, State};
use crate::error::Reason;
use crate::pool::WorkerPool;
use crate::resolve::resolve;
use crate::value::Value;

/// One-shot settling closure handed to a producer; resolves the promise it
/// is bound to with the given value. Fulfilling with a value that wraps a
/// [Promise] adopts that promise's state instead, and a promise handed its
/// own handle settles rejected.
pub type SettleFulfill = Box<dyn FnOnce(Value) + Send>;

/// One-shot settling closure handed to a producer; rejects the promise it
/// is bound to with the given reason
pub type SettleReject = Box<dyn FnOnce(Reason) + Send>;

/// A shared-ownership handle to an eventually-known outcome: a value, or a
/// reason for failure.
///
/// All library operations are non-blocking. Settling and registration
/// execute briefly on the calling thread (state transitions and task
/// submissions only); user callbacks run on the worker pool, never on the
/// caller's stack, so a callback may freely operate on any promise
/// including its own downstream. There is no way to synchronously wait for
/// the outcome; attach a continuation instead.
#[derive(Clone)]
pub struct Promise(Arc<Deferred>);

impl Promise {
  /// Create a pending promise and synchronously invoke `producer` once
  /// with two settling closures bound to it. The producer eventually calls
  /// one of them, from any thread; whichever is called after the first
  /// settlement is a no-op.
  pub fn new(producer: impl FnOnce(SettleFulfill, SettleReject)) -> Self {
    Self::new_in(WorkerPool::global(), producer)
  }

  /// [Promise::new] over an explicit pool instead of the process-wide one
  pub fn new_in(
    pool: &WorkerPool,
    producer: impl FnOnce(SettleFulfill, SettleReject),
  ) -> Self {
    let meta = Arc::new(Deferred::new(pool.clone()));
    let on_fulfill: SettleFulfill = {
      let meta = meta.clone();
      Box::new(move |value| resolve(&meta, value))
    };
    let on_reject: SettleReject = {
      let meta = meta.clone();
      Box::new(move |reason| meta.reject(reason))
    };
    producer(on_fulfill, on_reject);
    Self(meta)
  }

  /// A promise that is already fulfilled with `value`
  pub fn fulfilled(value: Value) -> Self {
    Self::fulfilled_in(WorkerPool::global(), value)
  }

  /// [Promise::fulfilled] over an explicit pool
  pub fn fulfilled_in(pool: &WorkerPool, value: Value) -> Self {
    Self(Arc::new(Deferred::with_state(pool.clone(), State::Fulfilled(value))))
  }

  /// A promise that is already rejected with `reason`
  pub fn rejected(reason: Reason) -> Self {
    Self::rejected_in(WorkerPool::global(), reason)
  }

  /// [Promise::rejected] over an explicit pool
  pub fn rejected_in(pool: &WorkerPool, reason: Reason) -> Self {
    Self(Arc::new(Deferred::with_state(pool.clone(), State::Rejected(reason))))
  }

  /// Register continuation callbacks and return the handle of the
  /// downstream promise that receives their outcome.
  ///
  /// Either callback may be absent; an absent callback propagates the
  /// value or reason to the downstream verbatim. A present callback runs
  /// on the worker pool with the settled payload; its return value goes
  /// through the resolution procedure (so returning a promise chains it)
  /// and a fault or panic rejects the downstream.
  ///
  /// Callbacks registered before settlement are scheduled in registration
  /// order when the promise settles; callbacks registered after settlement
  /// are scheduled immediately. Scheduling order says nothing about
  /// completion order, the pool runs ready items in parallel.
  pub fn then(
    &self,
    on_fulfill: Option<OnFulfill>,
    on_reject: Option<OnReject>,
  ) -> Promise {
    Promise(self.0.then(on_fulfill, on_reject))
  }

  pub(crate) fn deferred(&self) -> &Arc<Deferred> { &self.0 }
}

impl PartialEq for Promise {
  fn eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}
impl Eq for Promise {}

impl fmt::Debug for Promise {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Promise({:p})", Arc::as_ptr(&self.0))
  }
}
