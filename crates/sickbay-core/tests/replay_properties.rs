use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use sickbay_core::{
  aggregate::{active_case_series, compute_stats, order_events, project_current_status},
  status::{HealthStatus, StatusEvent},
};
use uuid::Uuid;

fn base() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() }

/// A subject universe of up to eight ids and a log over (mostly) those ids.
/// Timestamps are drawn from a small range so ties are common.
fn arb_world() -> impl Strategy<Value = (Vec<Uuid>, Vec<StatusEvent>)> {
  (1usize..8).prop_flat_map(|n| {
    let subjects: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
    let picks = subjects.clone();
    let events = prop::collection::vec(
      (0..n + 1, any::<bool>(), 0i64..(72 * 4)),
      0..40,
    )
    .prop_map(move |raw| {
      raw
        .into_iter()
        .enumerate()
        .map(|(i, (who, sick, quarter_hours))| StatusEvent {
          event_id:   Uuid::new_v4(),
          // Index `n` is a stranger outside the universe.
          subject_id: picks.get(who).copied().unwrap_or_else(Uuid::new_v4),
          status:     if sick { HealthStatus::Sick } else { HealthStatus::Healthy },
          timestamp:  base() + Duration::minutes(15 * quarter_hours),
          seq:        i as i64,
        })
        .collect::<Vec<_>>()
    });
    (Just(subjects), events)
  })
}

proptest! {
  #[test]
  fn buckets_partition_the_universe((subjects, events) in arb_world()) {
    let stats = compute_stats(&events, subjects.iter().copied());
    prop_assert_eq!(stats.total(), subjects.len());
  }

  #[test]
  fn recomputation_is_idempotent((subjects, events) in arb_world()) {
    let first = compute_stats(&events, subjects.iter().copied());
    let second = compute_stats(&events, subjects.iter().copied());
    prop_assert_eq!(first, second);
    prop_assert_eq!(active_case_series(&events, &Utc), active_case_series(&events, &Utc));
  }

  #[test]
  fn fetch_order_does_not_matter((subjects, events) in arb_world()) {
    let mut reversed = events.clone();
    reversed.reverse();
    prop_assert_eq!(
      compute_stats(&events, subjects.iter().copied()),
      compute_stats(&reversed, subjects.iter().copied())
    );
    prop_assert_eq!(active_case_series(&events, &Utc), active_case_series(&reversed, &Utc));
    prop_assert_eq!(project_current_status(&events), project_current_status(&reversed));
  }

  #[test]
  fn projection_matches_latest_event((_subjects, events) in arb_world()) {
    let projected = project_current_status(&events);
    let mut ordered = events.clone();
    order_events(&mut ordered);
    for (subject, status) in &projected {
      let latest = ordered.iter().rev().find(|e| e.subject_id == *subject).unwrap();
      prop_assert_eq!(latest.status, *status);
    }
  }

  #[test]
  fn series_days_strictly_increase((_subjects, events) in arb_world()) {
    let series = active_case_series(&events, &Utc);
    for pair in series.points.windows(2) {
      prop_assert!(pair[0].day < pair[1].day);
    }
    let sick = events.iter().filter(|e| e.status.is_sick()).count() as u64;
    let healthy = events.len() as u64 - sick;
    // Clamping only ever removes decrements, so the final count is the
    // naive sum plus one per recorded excursion.
    prop_assert_eq!(
      series.latest() + healthy,
      sick + series.anomalies.len() as u64
    );
  }
}
