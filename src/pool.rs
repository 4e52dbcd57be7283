//! A fixed-size worker pool that executes submitted work items, FIFO per
//! producer. Every deferred in the process shares one lazily initialized
//! pool unless it was explicitly created over another one.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::spawn;

use once_cell::sync::Lazy;

/// Number of workers in the process-wide default pool
pub const DEFAULT_WORKERS: usize = 32;

/// A unit of work dispatched on a [WorkerPool]. The task owns all relevant
/// data, is safe to pass between threads and is executed only once.
pub trait Task: Send + 'static {
  /// Execute the task. At a minimum, this involves signaling some other
  /// thread, otherwise the task has no effect.
  fn run(self);
}

impl<F: FnOnce() + Send + 'static> Task for F {
  fn run(self) { self() }
}

/// Tasks of any concrete type end up boxed on one shared queue
type QueuedTask = Box<dyn FnOnce() + Send + 'static>;

struct PoolQueue {
  tasks: VecDeque<QueuedTask>,
  shutdown: bool,
}

struct PoolCore {
  queue: Mutex<PoolQueue>,
  nonempty: Condvar,
}

/// Set the shutdown flag when the last user handle is dropped. Workers hold
/// the core directly, so they don't keep the pool alive.
struct Shutter {
  core: Arc<PoolCore>,
}

impl Drop for Shutter {
  fn drop(&mut self) {
    let mut guard = self.core.queue.lock().unwrap();
    guard.shutdown = true;
    drop(guard);
    self.core.nonempty.notify_all();
  }
}

/// A fixed-size pool of worker threads over an unbounded FIFO queue.
///
/// Clones share the pool. When the last clone is dropped the workers are
/// woken; each completes the item it has in hand and exits, and items never
/// dequeued are dropped silently. A pool must therefore be kept alive for
/// the duration of any in-flight chain; deferreds hold a handle to the pool
/// they were created on, which takes care of this for promise chains.
#[derive(Clone)]
pub struct WorkerPool {
  handle: Arc<Shutter>,
}

impl WorkerPool {
  /// Spawn a pool with the given number of worker threads
  pub fn new(workers: usize) -> Self {
    let core = Arc::new(PoolCore {
      queue: Mutex::new(PoolQueue { tasks: VecDeque::new(), shutdown: false }),
      nonempty: Condvar::new(),
    });
    for _ in 0..workers {
      let core = core.clone();
      spawn(move || worker(core));
    }
    Self { handle: Arc::new(Shutter { core }) }
  }

  /// The process-wide shared pool, initialized on first use and torn down
  /// at process exit
  pub fn global() -> &'static WorkerPool { &GLOBAL }

  /// Append a work item to the queue and return immediately; a worker
  /// thread picks it up in submission order.
  pub fn submit(&self, task: impl Task) {
    let core = &self.handle.core;
    let mut guard = core.queue.lock().unwrap();
    guard.tasks.push_back(Box::new(move || task.run()));
    drop(guard);
    core.nonempty.notify_one();
  }
}

impl Default for WorkerPool {
  fn default() -> Self { Self::new(DEFAULT_WORKERS) }
}

static GLOBAL: Lazy<WorkerPool> = Lazy::new(WorkerPool::default);

fn worker(core: Arc<PoolCore>) {
  let mut guard = core.queue.lock().unwrap();
  loop {
    if guard.shutdown {
      break;
    }
    match guard.tasks.pop_front() {
      Some(task) => {
        drop(guard);
        task();
        guard = core.queue.lock().unwrap();
      },
      None => guard = core.nonempty.wait(guard).unwrap(),
    }
  }
}

#[cfg(test)]
mod test {
  use std::sync::mpsc::channel;
  use std::sync::{Arc, Barrier};
  use std::time::Duration;

  use super::WorkerPool;

  #[test]
  fn single_worker_runs_fifo() {
    let pool = WorkerPool::new(1);
    let (tx, rx) = channel();
    for i in 0..10 {
      let tx = tx.clone();
      pool.submit(move || tx.send(i).unwrap());
    }
    let order = (0..10).map(|_| rx.recv().unwrap()).collect::<Vec<_>>();
    assert_eq!(order, (0..10).collect::<Vec<_>>());
  }

  #[test]
  fn workers_run_concurrently() {
    let pool = WorkerPool::new(4);
    let barrier = Arc::new(Barrier::new(4));
    let (tx, rx) = channel();
    for _ in 0..4 {
      let (barrier, tx) = (barrier.clone(), tx.clone());
      // would deadlock unless all four tasks are in flight at once
      pool.submit(move || {
        barrier.wait();
        tx.send(()).unwrap();
      });
    }
    for _ in 0..4 {
      rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
  }

  #[test]
  fn dropping_the_pool_discards_queued_items() {
    let pool = WorkerPool::new(1);
    let (gate_tx, gate_rx) = channel::<()>();
    let (ran_tx, ran_rx) = channel();
    let (busy_tx, busy_rx) = channel();
    pool.submit(move || {
      busy_tx.send(()).unwrap();
      gate_rx.recv().unwrap();
    });
    busy_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    // queued behind the blocked worker, never dequeued
    pool.submit(move || ran_tx.send(()).unwrap());
    drop(pool);
    gate_tx.send(()).unwrap();
    let outcome = ran_rx.recv_timeout(Duration::from_millis(300));
    assert!(outcome.is_err(), "the queued item should have been dropped");
  }
}
