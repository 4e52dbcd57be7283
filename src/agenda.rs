//! Cooperative step runner: scripts a fixed chain of steps, each completed
//! by a background service that settles the step and wakes the runner.
//!
//! This is a standalone collaborator of the promise core with a much
//! simpler protocol. One thread drives the chain with [Agenda::run] and
//! sleeps between steps; services run anywhere, settle the current step
//! with [Agenda::resolve], [Agenda::reject] or [Agenda::finish], then call
//! [Agenda::wake].

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

/// Completion status of the step currently driven by [Agenda::run]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepState {
  /// The step's service has not reported back yet
  Pending,
  /// The step completed; the next step's `on_resolve` runs
  Resolved,
  /// The step failed; the next step's `on_reject` runs, then the chain
  /// ends
  Rejected,
  /// The chain is over; remaining steps are skipped
  Finished,
}

/// A step callback. It receives the agenda so that it can hand the handle
/// to whatever background service completes the step.
pub type StepFn = Arc<dyn Fn(&Agenda) + Send + Sync>;

#[derive(Clone)]
struct Step {
  on_resolve: Option<StepFn>,
  on_reject: Option<StepFn>,
}

struct Meta {
  state: Mutex<StepState>,
  wakeup: Condvar,
  init: Option<StepFn>,
  steps: Mutex<Vec<Step>>,
}

/// A cheap-copy shared handle to a chain of steps. Copies share the chain;
/// equality is identity. See the module docs for the protocol.
#[derive(Clone)]
pub struct Agenda(Arc<Meta>);

impl Agenda {
  /// A chain with no init step. It starts out resolved, so the first
  /// step's `on_resolve` runs as soon as [Agenda::run] is called.
  pub fn new() -> Self {
    Self(Arc::new(Meta {
      state: Mutex::new(StepState::Resolved),
      wakeup: Condvar::new(),
      init: None,
      steps: Mutex::new(Vec::new()),
    }))
  }

  /// A chain whose first step is `init`, invoked by [Agenda::run] before
  /// the chain proper
  pub fn with_init(init: impl Fn(&Agenda) + Send + Sync + 'static) -> Self {
    Self(Arc::new(Meta {
      state: Mutex::new(StepState::Pending),
      wakeup: Condvar::new(),
      init: Some(Arc::new(init)),
      steps: Mutex::new(Vec::new()),
    }))
  }

  /// Append a step. Either callback may be absent: an absent `on_resolve`
  /// finishes the chain, an absent `on_reject` skips straight to the end.
  /// Returns the same chain for easy call chaining.
  pub fn then(&self, on_resolve: Option<StepFn>, on_reject: Option<StepFn>) -> Agenda {
    self.0.steps.lock().unwrap().push(Step { on_resolve, on_reject });
    self.clone()
  }

  /// Drive the chain on the calling thread. Each step dispatches on the
  /// state its predecessor's service left behind; while a service works in
  /// the background the runner sleeps until [Agenda::wake]. Returns once
  /// the chain is finished.
  ///
  /// # Panics
  ///
  /// If a service wakes the runner without settling the step first.
  pub fn run(&self) {
    if let Some(init) = &self.0.init {
      self.set_state(StepState::Pending);
      init(self);
      self.wait_settled();
    }
    let steps = self.0.steps.lock().unwrap().clone();
    for step in steps {
      match self.state() {
        StepState::Pending =>
          panic!("the service woke the runner without settling the step"),
        StepState::Resolved => match &step.on_resolve {
          Some(cb) => {
            self.set_state(StepState::Pending);
            cb(self);
            self.wait_settled();
          },
          None => self.set_state(StepState::Finished),
        },
        StepState::Rejected => {
          if let Some(cb) = &step.on_reject {
            self.set_state(StepState::Pending);
            cb(self);
            self.wait_settled();
          }
          // a rejection handler is terminal, the chain ends after it
          self.set_state(StepState::Finished);
        },
        StepState::Finished => break,
      }
      if self.state() == StepState::Finished {
        break;
      }
    }
    self.set_state(StepState::Finished);
  }

  /// Report the current step as successfully completed. Call [Agenda::wake]
  /// afterwards.
  pub fn resolve(&self) { self.set_state(StepState::Resolved) }

  /// Report the current step as failed. Call [Agenda::wake] afterwards.
  pub fn reject(&self) { self.set_state(StepState::Rejected) }

  /// End the chain regardless of remaining steps. Call [Agenda::wake]
  /// afterwards.
  pub fn finish(&self) { self.set_state(StepState::Finished) }

  /// The state of the current step
  pub fn state(&self) -> StepState { *self.0.state.lock().unwrap() }

  /// Wake the runner blocked in [Agenda::run]. Settle the state first; a
  /// wakeup in the pending state is an error on the runner's thread.
  pub fn wake(&self) { self.0.wakeup.notify_all() }

  fn set_state(&self, next: StepState) {
    *self.0.state.lock().unwrap() = next;
  }

  fn wait_settled(&self) {
    let mut state = self.0.state.lock().unwrap();
    while *state == StepState::Pending {
      state = self.0.wakeup.wait(state).unwrap();
    }
  }
}

impl Default for Agenda {
  fn default() -> Self { Self::new() }
}

impl PartialEq for Agenda {
  fn eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}
impl Eq for Agenda {}

impl fmt::Debug for Agenda {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Agenda({:?})", self.state())
  }
}

#[cfg(test)]
mod test {
  use std::sync::mpsc::{channel, Sender};
  use std::sync::Arc;
  use std::thread;

  use super::{Agenda, StepFn, StepState};

  /// A step that logs its tag and completes through a background service
  fn logged_step(tag: &'static str, log: Sender<&'static str>) -> Option<StepFn> {
    Some(Arc::new(move |agenda: &Agenda| {
      log.send(tag).unwrap();
      let agenda = agenda.clone();
      thread::spawn(move || {
        agenda.resolve();
        agenda.wake();
      });
    }))
  }

  #[test]
  fn steps_run_in_order() {
    let (log, seen) = channel();
    let agenda = Agenda::with_init(|a: &Agenda| {
      let a = a.clone();
      thread::spawn(move || {
        a.resolve();
        a.wake();
      });
    });
    agenda
      .then(logged_step("connect", log.clone()), None)
      .then(logged_step("fetch", log.clone()), None)
      .then(logged_step("store", log.clone()), None)
      .run();
    drop(log);
    assert_eq!(seen.try_iter().collect::<Vec<_>>(), vec!["connect", "fetch", "store"]);
    assert_eq!(agenda.state(), StepState::Finished);
  }

  #[test]
  fn rejection_runs_the_handler_and_ends_the_chain() {
    let (log, seen) = channel();
    let agenda = Agenda::new();
    let fail_log = log.clone();
    agenda
      .then(
        Some(Arc::new(move |a: &Agenda| {
          fail_log.send("attempt").unwrap();
          let a = a.clone();
          thread::spawn(move || {
            a.reject();
            a.wake();
          });
        })),
        None,
      )
      .then(logged_step("skipped", log.clone()), {
        let log = log.clone();
        Some(Arc::new(move |a: &Agenda| {
          log.send("cleanup").unwrap();
          let a = a.clone();
          thread::spawn(move || {
            a.resolve();
            a.wake();
          });
        }))
      })
      .then(logged_step("unreachable", log.clone()), None)
      .run();
    drop(log);
    assert_eq!(seen.try_iter().collect::<Vec<_>>(), vec!["attempt", "cleanup"]);
  }

  #[test]
  fn finish_short_circuits() {
    let (log, seen) = channel();
    let agenda = Agenda::new();
    agenda
      .then(
        Some(Arc::new(|a: &Agenda| {
          let a = a.clone();
          thread::spawn(move || {
            a.finish();
            a.wake();
          });
        })),
        None,
      )
      .then(logged_step("never", log.clone()), None)
      .run();
    drop(log);
    assert_eq!(seen.try_iter().count(), 0);
    assert_eq!(agenda.state(), StepState::Finished);
  }

  #[test]
  fn absent_resolve_handler_finishes() {
    let agenda = Agenda::new().then(None, None);
    agenda.run();
    assert_eq!(agenda.state(), StepState::Finished);
  }
}
