#![deny(missing_docs)]
//! Eventual is a Promises/A+-style eventual-value library. A promise
//! carries an outcome (a value or a reason for failure) that becomes known
//! later; continuation callbacks registered with [Promise::then] run on a
//! shared worker pool, never on the caller's stack, so multi-step
//! asynchronous pipelines never block their producer threads.

pub mod agenda;
mod deferred;
pub mod error;
pub mod pool;
pub mod promise;
mod resolve;
pub mod value;

pub use agenda::{Agenda, StepFn, StepState};
pub use deferred::{FulfillFn, OnFulfill, OnReject, RejectFn};
pub use error::{EvResult, Fault, FaultObj, Reason, TypeMismatch};
pub use pool::{Task, WorkerPool, DEFAULT_WORKERS};
pub use promise::{Promise, SettleFulfill, SettleReject};
pub use resolve::SELF_ADOPTION;
pub use value::{Nothing, Payload, Value};
