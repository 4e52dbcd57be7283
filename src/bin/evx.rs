use std::process;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use eventual::{Agenda, Promise, Reason, StepFn, Value, WorkerPool};
use itertools::Itertools;

/// Demo driver for the eventual promise library
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// Scenario to run: promise, steps or all
  #[arg(short, long, default_value = "all")]
  pub scenario: String,
  /// Number of workers in the demo pool
  #[arg(short, long, default_value_t = 8)]
  pub workers: usize,
}

/// Roughly 40% of attempts fail, like the original's flaky services
fn flaky() -> bool {
  let nanos =
    (SystemTime::now().duration_since(UNIX_EPOCH)).expect("clock before epoch").subsec_nanos();
  nanos % 10 >= 6
}

/// A multi-step download pipeline as one promise chain. The decode stage is
/// flaky; the recovery stage turns its rejection into a printable outcome.
fn promise_pipeline(pool: &WorkerPool) {
  let stages = ["connect", "download", "decode", "write"];
  println!("promise pipeline: {}", stages.iter().join(", "));
  let (tx, rx) = channel();
  Promise::new_in(pool, |fulfill, _| {
    thread::spawn(move || {
      thread::sleep(Duration::from_millis(200));
      fulfill(Value::new("session-42".to_string()));
    });
  })
  .then(
    Some(Box::new(|v| {
      let session = v.get::<String>()?;
      println!("downloading on {session}");
      Ok(Value::new(vec![0xeeu8, 0xff, 0x1d]))
    })),
    None,
  )
  .then(
    Some(Box::new(|v| {
      let bytes = v.get::<Vec<u8>>()?;
      if flaky() {
        return Reason::new("checksum mismatch").fail();
      }
      Ok(Value::new(format!("{} bytes decoded", bytes.len())))
    })),
    None,
  )
  .then(
    Some(Box::new(move |v| {
      println!("write ok: {}", v.get::<String>()?);
      Ok(v)
    })),
    Some(Box::new(move |r| {
      println!("write skipped, decode failed: {r}");
      r.fail()
    })),
  )
  .then(
    Some(Box::new({
      let tx = tx.clone();
      move |v| {
        tx.send(()).unwrap();
        Ok(v)
      }
    })),
    Some(Box::new(move |r| {
      tx.send(()).unwrap();
      r.fail()
    })),
  );
  rx.recv_timeout(Duration::from_secs(5)).expect("the chain went nowhere");
}

/// A step whose service completes on the pool after a delay, sometimes
/// rejecting
fn job(pool: &WorkerPool, name: &'static str, reliable: bool) -> Option<StepFn> {
  let pool = pool.clone();
  Some(Arc::new(move |agenda: &Agenda| {
    println!("{name}");
    let agenda = agenda.clone();
    pool.submit(move || {
      thread::sleep(Duration::from_millis(100));
      if reliable || !flaky() {
        agenda.resolve();
      } else {
        agenda.reject();
      }
      agenda.wake();
    });
  }))
}

/// The original sample's ftp job chain on the cooperative step runner
fn step_pipeline(pool: &WorkerPool) {
  let cleanup: Option<StepFn> = Some(Arc::new(|agenda: &Agenda| {
    println!("cleaning up after a failed transfer");
    let agenda = agenda.clone();
    thread::spawn(move || {
      agenda.resolve();
      agenda.wake();
    });
  }));
  Agenda::new()
    .then(job(pool, "connect to ftp server", true), None)
    .then(job(pool, "download payload.zip", true), None)
    .then(job(pool, "decompress payload.zip", true), None)
    .then(job(pool, "decode payload", false), None)
    // a step's rejection handler catches the failure of the step before it
    .then(job(pool, "write payload to disk", false), cleanup.clone())
    .then(None, cleanup)
    .run();
  println!("step pipeline over");
}

fn main() {
  let args = Args::parse();
  let pool = WorkerPool::new(args.workers);
  match args.scenario.as_str() {
    "promise" => promise_pipeline(&pool),
    "steps" => step_pipeline(&pool),
    "all" => {
      promise_pipeline(&pool);
      step_pipeline(&pool);
    },
    other => {
      eprintln!("Unknown scenario {other}, expected promise, steps or all");
      process::exit(1);
    },
  }
}
