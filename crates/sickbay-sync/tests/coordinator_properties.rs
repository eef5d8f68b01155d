//! Ordering and rollback properties of queued optimistic mutations on a
//! single key.

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use proptest::prelude::*;
use sickbay_sync::{EntityKey, EventBus, LocalState, MutationCoordinator, Signal};
use uuid::Uuid;

#[derive(Default)]
struct Cells(Mutex<HashMap<EntityKey, u32>>);

impl LocalState<u32> for Cells {
  fn snapshot(&self, key: EntityKey) -> Option<u32> { self.0.lock().unwrap().get(&key).copied() }

  fn apply(&self, key: EntityKey, value: u32) { self.0.lock().unwrap().insert(key, value); }
}

struct Outcome {
  started:   Vec<usize>,
  value:     u32,
  commits:   usize,
  refetches: usize,
}

/// Begin one increment per entry of `succeeds`, then run them all at once,
/// spawned in reverse so the scheduler sees the newest first.
fn run_queue(succeeds: &[bool]) -> Outcome {
  let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
  rt.block_on(async {
    let bus = EventBus::new();
    let commits = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&commits);
    let _commits = bus.subscribe(Signal::PackedToggled, move || {
      c.fetch_add(1, Ordering::SeqCst);
    });
    let refetches = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&refetches);
    let _refetches = bus.subscribe(Signal::ProfilesChanged, move || {
      r.fetch_add(1, Ordering::SeqCst);
    });

    let coordinator = MutationCoordinator::new(bus, None);
    let key = EntityKey::Packed(Uuid::new_v4());
    let cells = Arc::new(Cells::default());
    cells.apply(key, 0);

    let attempts: Vec<_> = succeeds
      .iter()
      .map(|_| coordinator.begin(&cells, key, Signal::PackedToggled, |v| v + 1).unwrap())
      .collect();
    assert_eq!(cells.snapshot(key), Some(succeeds.len() as u32));

    let started = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = Vec::new();
    for (index, (attempt, ok)) in attempts.into_iter().zip(succeeds.iter().copied()).enumerate().rev() {
      let started = Arc::clone(&started);
      tasks.push(tokio::spawn(attempt.run(move || async move {
        started.lock().unwrap().push(index);
        tokio::task::yield_now().await;
        if ok { Ok(()) } else { Err("refused".to_owned()) }
      })));
    }
    for task in tasks {
      let _ = task.await.unwrap();
    }

    assert_eq!(coordinator.in_flight(key), 0);
    let started = started.lock().unwrap().clone();
    Outcome {
      started,
      value: cells.snapshot(key).unwrap(),
      commits: commits.load(Ordering::SeqCst),
      refetches: refetches.load(Ordering::SeqCst),
    }
  })
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  #[test]
  fn writes_start_in_ticket_order(succeeds in prop::collection::vec(any::<bool>(), 1..8)) {
    let outcome = run_queue(&succeeds);
    prop_assert_eq!(outcome.started, (0..succeeds.len()).collect::<Vec<_>>());
  }

  #[test]
  fn only_the_newest_attempt_decides_the_local_value(
    succeeds in prop::collection::vec(any::<bool>(), 1..8),
  ) {
    let n = succeeds.len() as u32;
    let outcome = run_queue(&succeeds);
    let expected = if *succeeds.last().unwrap() { n } else { n - 1 };
    prop_assert_eq!(outcome.value, expected);
  }

  #[test]
  fn every_commit_emits_and_a_masked_failure_resyncs_once(
    succeeds in prop::collection::vec(any::<bool>(), 1..8),
  ) {
    let outcome = run_queue(&succeeds);
    let commits = succeeds.iter().filter(|ok| **ok).count();
    let resync = match succeeds.as_slice() {
      [.., false, false] => 1,
      _ => 0,
    };
    prop_assert_eq!(outcome.commits, commits);
    prop_assert_eq!(outcome.refetches, resync);
  }
}
