//! The deferred state machine: one-shot settlement, the continuation queue
//! and the firing of continuation callbacks on the worker pool.

use std::any::Any;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use trait_set::trait_set;

use crate::error::{EvResult, FaultObj, Reason};
use crate::pool::WorkerPool;
use crate::resolve::resolve;
use crate::value::Value;

trait_set! {
  /// Bound of callbacks over the value of a fulfilled deferred
  pub trait FulfillFn = FnOnce(Value) -> EvResult<Value> + Send + 'static;
  /// Bound of callbacks over the reason of a rejected deferred
  pub trait RejectFn = FnOnce(Reason) -> EvResult<Value> + Send + 'static;
}

/// A boxed callback invoked with the value of a fulfilled deferred
pub type OnFulfill = Box<dyn FulfillFn>;
/// A boxed callback invoked with the reason of a rejected deferred
pub type OnReject = Box<dyn RejectFn>;

/// A registered continuation: two optional callbacks and the downstream
/// deferred that receives the outcome of whichever one fires. The record is
/// consumed exactly once, either by the scheduling loop of the first
/// settling call or by the fast path of a post-settlement registration.
pub(crate) struct Continuation {
  on_fulfill: Option<OnFulfill>,
  on_reject: Option<OnReject>,
  downstream: Arc<Deferred>,
}

impl Continuation {
  /// A record with no callbacks. It propagates value and reason verbatim,
  /// which is exactly what adoption of a pending deferred needs.
  pub fn forward(downstream: Arc<Deferred>) -> Self {
    Self { on_fulfill: None, on_reject: None, downstream }
  }
}

/// State of a deferred. Pending is initial; the other two are terminal and
/// their payload is immutable forever.
pub(crate) enum State {
  Pending,
  Fulfilled(Value),
  Rejected(Reason),
}

struct Inner {
  state: State,
  /// Registration order; drained exactly once by the first settling call
  queue: Vec<Continuation>,
}

/// The shared object behind any number of [crate::Promise] handles. All
/// transitions are serialized by one mutex, held only across short
/// state-inspection and list-append sections; user callbacks run on the
/// worker pool, never under the mutex and never on the registering thread.
pub(crate) struct Deferred {
  pool: WorkerPool,
  inner: Mutex<Inner>,
}

impl Deferred {
  pub fn new(pool: WorkerPool) -> Self {
    Self::with_state(pool, State::Pending)
  }

  pub fn with_state(pool: WorkerPool, state: State) -> Self {
    Self { pool, inner: Mutex::new(Inner { state, queue: Vec::new() }) }
  }

  /// Transition to fulfilled and schedule every queued continuation, in
  /// registration order. No-op when already settled.
  ///
  /// Scheduling happens while the mutex is still held, so a concurrent
  /// submitter cannot interleave its own work items into the drained batch;
  /// execution happens later on worker threads.
  pub fn fulfill(self: &Arc<Self>, value: Value) {
    let mut g = self.inner.lock().unwrap();
    if !matches!(g.state, State::Pending) {
      return;
    }
    g.state = State::Fulfilled(value.clone());
    for c in mem::take(&mut g.queue) {
      let value = value.clone();
      self.pool.submit(move || fire_fulfill(c.on_fulfill, c.downstream, value));
    }
  }

  /// Transition to rejected and schedule every queued continuation, in
  /// registration order. No-op when already settled.
  pub fn reject(self: &Arc<Self>, reason: Reason) {
    let mut g = self.inner.lock().unwrap();
    if !matches!(g.state, State::Pending) {
      return;
    }
    g.state = State::Rejected(reason.clone());
    for c in mem::take(&mut g.queue) {
      let reason = reason.clone();
      self.pool.submit(move || fire_reject(c.on_reject, c.downstream, reason));
    }
  }

  /// Register a continuation and return the downstream deferred that will
  /// receive its outcome. Registrations on a settled deferred are scheduled
  /// immediately without traversing the queue.
  pub fn then(
    self: &Arc<Self>,
    on_fulfill: Option<OnFulfill>,
    on_reject: Option<OnReject>,
  ) -> Arc<Deferred> {
    let down = Arc::new(Deferred::new(self.pool.clone()));
    let mut g = self.inner.lock().unwrap();
    match &g.state {
      State::Pending => {
        let downstream = down.clone();
        g.queue.push(Continuation { on_fulfill, on_reject, downstream });
      },
      State::Fulfilled(value) => {
        let (value, down) = (value.clone(), down.clone());
        self.pool.submit(move || fire_fulfill(on_fulfill, down, value));
      },
      State::Rejected(reason) => {
        let (reason, down) = (reason.clone(), down.clone());
        self.pool.submit(move || fire_reject(on_reject, down, reason));
      },
    }
    down
  }

  /// Make `target` mirror this deferred's eventual outcome: settle it right
  /// away when this deferred is already settled, otherwise queue a
  /// forwarding record that settles it later.
  pub fn adopted_by(self: &Arc<Self>, target: &Arc<Deferred>) {
    let mut g = self.inner.lock().unwrap();
    match &g.state {
      State::Pending => g.queue.push(Continuation::forward(target.clone())),
      State::Fulfilled(value) => {
        let value = value.clone();
        // settle the adopter outside this deferred's lock; two deferreds
        // are never locked at once
        drop(g);
        target.fulfill(value);
      },
      State::Rejected(reason) => {
        let reason = reason.clone();
        drop(g);
        target.reject(reason);
      },
    }
  }
}

/// Run a fulfillment callback on a worker thread and route its outcome to
/// the downstream deferred. An absent callback propagates the value.
pub(crate) fn fire_fulfill(cb: Option<OnFulfill>, down: Arc<Deferred>, value: Value) {
  let cb = match cb {
    Some(cb) => cb,
    None => return down.fulfill(value),
  };
  match catch_unwind(AssertUnwindSafe(move || cb(value))) {
    Ok(Ok(x)) => resolve(&down, x),
    Ok(Err(fault)) => down.reject(fault_reason(fault)),
    Err(panic) => down.reject(panic_reason(panic)),
  }
}

/// Run a rejection callback on a worker thread and route its outcome to the
/// downstream deferred. An absent callback propagates the reason verbatim.
pub(crate) fn fire_reject(cb: Option<OnReject>, down: Arc<Deferred>, reason: Reason) {
  let cb = match cb {
    Some(cb) => cb,
    None => return down.reject(reason),
  };
  match catch_unwind(AssertUnwindSafe(move || cb(reason))) {
    Ok(Ok(x)) => resolve(&down, x),
    Ok(Err(fault)) => down.reject(fault_reason(fault)),
    Err(panic) => down.reject(panic_reason(panic)),
  }
}

/// A typed [Reason] travels verbatim, any other fault is reduced to its
/// display text
fn fault_reason(fault: FaultObj) -> Reason {
  match fault.as_any().downcast_ref::<Reason>() {
    Some(reason) => reason.clone(),
    None => Reason::new(fault.to_string()),
  }
}

/// Reduce a caught panic to a reason. [Reason] and string payloads keep
/// their text; anything undiagnosable becomes "unknown reason".
fn panic_reason(payload: Box<dyn Any + Send>) -> Reason {
  if let Some(reason) = payload.downcast_ref::<Reason>() {
    return reason.clone();
  }
  match payload.downcast::<String>() {
    Ok(msg) => Reason::new(*msg),
    Err(payload) => match payload.downcast::<&'static str>() {
      Ok(msg) => Reason::new(*msg),
      Err(_) => Reason::new("unknown reason"),
    },
  }
}

#[cfg(test)]
mod test {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::mpsc::channel;
  use std::sync::{Arc, Barrier};
  use std::thread;
  use std::time::Duration;

  use super::Deferred;
  use crate::error::Reason;
  use crate::pool::WorkerPool;
  use crate::value::Value;

  fn pending(pool: &WorkerPool) -> Arc<Deferred> {
    Arc::new(Deferred::new(pool.clone()))
  }

  /// Probe a deferred's eventual outcome through the absent-callback paths
  fn outcome(d: &Arc<Deferred>) -> Result<Value, Reason> {
    let (vtx, vrx) = channel();
    let rtx = vtx.clone();
    d.then(
      Some(Box::new(move |v| {
        vtx.send(Ok(v.clone())).unwrap();
        Ok(v)
      })),
      Some(Box::new(move |r| {
        rtx.send(Err(r.clone())).unwrap();
        r.fail()
      })),
    );
    vrx.recv_timeout(Duration::from_secs(5)).unwrap()
  }

  #[test]
  fn settling_calls_after_the_first_are_noops() {
    let pool = WorkerPool::new(2);
    let d = pending(&pool);
    let v = Value::new(1i64);
    d.fulfill(v.clone());
    d.fulfill(Value::new(2i64));
    d.reject(Reason::new("too late"));
    assert_eq!(outcome(&d).unwrap(), v);
  }

  #[test]
  fn concurrent_settlement_picks_exactly_one_winner() {
    let pool = WorkerPool::new(4);
    for _ in 0..1000 {
      let d = pending(&pool);
      let gate = Arc::new(Barrier::new(2));
      let left = {
        let (d, gate) = (d.clone(), gate.clone());
        thread::spawn(move || {
          gate.wait();
          d.fulfill(Value::new(1i64));
        })
      };
      let right = {
        let (d, gate) = (d.clone(), gate.clone());
        thread::spawn(move || {
          gate.wait();
          d.reject(Reason::new("lost the race"));
        })
      };
      left.join().unwrap();
      right.join().unwrap();
      let first = outcome(&d);
      let second = outcome(&d);
      match (&first, &second) {
        (Ok(a), Ok(b)) => assert_eq!(a, b),
        (Err(a), Err(b)) => assert_eq!(a, b),
        _ => panic!("the loser of the race must be a no-op"),
      }
    }
  }

  #[test]
  fn continuations_are_scheduled_in_registration_order() {
    // a single worker executes the queue in submission order, making the
    // scheduling order observable
    let pool = WorkerPool::new(1);
    let d = pending(&pool);
    let (tx, rx) = channel();
    for i in 0..20 {
      let tx = tx.clone();
      d.then(
        Some(Box::new(move |v| {
          tx.send(i).unwrap();
          Ok(v)
        })),
        None,
      );
    }
    d.fulfill(Value::empty());
    let order = (0..20).map(|_| rx.recv().unwrap()).collect::<Vec<_>>();
    assert_eq!(order, (0..20).collect::<Vec<_>>());
  }

  #[test]
  fn each_continuation_fires_at_most_once() {
    let pool = WorkerPool::new(2);
    let d = pending(&pool);
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = channel();
    let counter = calls.clone();
    d.then(
      Some(Box::new(move |v| {
        counter.fetch_add(1, Ordering::SeqCst);
        tx.send(()).unwrap();
        Ok(v)
      })),
      None,
    );
    d.fulfill(Value::empty());
    d.fulfill(Value::empty());
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(
      rx.recv_timeout(Duration::from_millis(300)).is_err(),
      "the callback may only fire once"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn registration_after_settlement_fires_immediately() {
    let pool = WorkerPool::new(2);
    let d = pending(&pool);
    d.reject(Reason::new("already over"));
    assert_eq!(outcome(&d).unwrap_err(), Reason::new("already over"));
  }

  #[test]
  fn panicking_callbacks_reject_the_downstream() {
    let pool = WorkerPool::new(2);
    let d = pending(&pool);
    let down = d.then(Some(Box::new(|_| panic!("torn wire"))), None);
    d.fulfill(Value::empty());
    assert_eq!(outcome(&down).unwrap_err(), Reason::new("torn wire"));
  }
}
