//! Derived read models computed by replaying the status log.
//!
//! Nothing in this module is ever stored. Every function is pure and
//! deterministic: replaying the same log yields the same output, regardless
//! of the order the events were fetched in.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{HealthStatus, StatusEvent};

// ─── Ordering ────────────────────────────────────────────────────────────────

/// Sort events into replay order: timestamp, then insertion sequence.
pub fn order_events(events: &mut [StatusEvent]) { events.sort_by_key(StatusEvent::order_key); }

fn replay_order(events: &[StatusEvent]) -> Vec<&StatusEvent> {
  let mut ordered: Vec<&StatusEvent> = events.iter().collect();
  ordered.sort_by_key(|e| e.order_key());
  ordered
}

// ─── Population counts ───────────────────────────────────────────────────────

/// Three mutually exclusive buckets partitioning the subject universe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
  /// Latest event is `Sick`.
  pub currently_sick:          usize,
  /// At least one `Sick` event, latest event `Healthy`.
  pub recovered_at_least_once: usize,
  /// No `Sick` event at all (including subjects with no events).
  pub never_sick:              usize,
}

impl AggregateStats {
  pub fn total(&self) -> usize {
    self.currently_sick + self.recovered_at_least_once + self.never_sick
  }
}

#[derive(Default)]
struct History {
  latest:    Option<HealthStatus>,
  ever_sick: bool,
}

/// Bucket every subject in `subjects` by replaying `events`.
///
/// Events for subjects outside the universe are ignored, so the counts
/// always sum to the number of distinct subjects.
pub fn compute_stats(
  events: &[StatusEvent],
  subjects: impl IntoIterator<Item = Uuid>,
) -> AggregateStats {
  let universe: HashSet<Uuid> = subjects.into_iter().collect();
  let mut histories: HashMap<Uuid, History> = HashMap::new();

  for event in replay_order(events) {
    if !universe.contains(&event.subject_id) {
      continue;
    }
    let history = histories.entry(event.subject_id).or_default();
    history.latest = Some(event.status);
    history.ever_sick |= event.status.is_sick();
  }

  let mut stats = AggregateStats::default();
  for subject in &universe {
    match histories.get(subject) {
      Some(History { latest: Some(HealthStatus::Sick), .. }) => stats.currently_sick += 1,
      Some(History { ever_sick: true, .. }) => stats.recovered_at_least_once += 1,
      _ => stats.never_sick += 1,
    }
  }
  stats
}

/// The status each subject's latest event reports. Subjects without events
/// are absent from the map.
pub fn project_current_status(events: &[StatusEvent]) -> HashMap<Uuid, HealthStatus> {
  replay_order(events)
    .into_iter()
    .map(|e| (e.subject_id, e.status))
    .collect()
}

// ─── Active-case series ──────────────────────────────────────────────────────

/// Active case count at the end of one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActiveCount {
  pub day:    NaiveDate,
  pub active: u64,
}

/// A replay step the log could not explain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityAnomaly {
  /// A `Healthy` event arrived while the active counter was already zero;
  /// the counter was clamped instead of going negative.
  NegativeExcursion {
    event_id:   Uuid,
    subject_id: Uuid,
    timestamp:  DateTime<Utc>,
  },
}

/// Prefix-sum replay of the log: one point per distinct day touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCaseSeries {
  /// Strictly increasing by day.
  pub points:    Vec<DailyActiveCount>,
  pub anomalies: Vec<IntegrityAnomaly>,
}

impl ActiveCaseSeries {
  /// The most recent active count, or zero for an empty log.
  pub fn latest(&self) -> u64 { self.points.last().map_or(0, |p| p.active) }
}

/// Replay `events` into a daily active-case series, bucketing days in `tz`.
pub fn active_case_series<Tz: TimeZone>(events: &[StatusEvent], tz: &Tz) -> ActiveCaseSeries {
  let mut series = ActiveCaseSeries::default();
  let mut active: u64 = 0;

  for event in replay_order(events) {
    match event.status {
      HealthStatus::Sick => active += 1,
      HealthStatus::Healthy if active == 0 => {
        series.anomalies.push(IntegrityAnomaly::NegativeExcursion {
          event_id:   event.event_id,
          subject_id: event.subject_id,
          timestamp:  event.timestamp,
        });
      }
      HealthStatus::Healthy => active -= 1,
    }

    let day = event.timestamp.with_timezone(tz).date_naive();
    match series.points.last_mut() {
      Some(last) if last.day == day => last.active = active,
      _ => series.points.push(DailyActiveCount { day, active }),
    }
  }

  series
}

#[cfg(test)]
mod tests {
  use chrono::FixedOffset;

  use super::*;

  fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
  }

  fn event(subject_id: Uuid, status: HealthStatus, timestamp: DateTime<Utc>, seq: i64) -> StatusEvent {
    StatusEvent { event_id: Uuid::new_v4(), subject_id, status, timestamp, seq }
  }

  fn date(day: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, 1, day).unwrap() }

  #[test]
  fn sick_then_healthy_is_recovered() {
    let s1 = Uuid::new_v4();
    let log = vec![
      event(s1, HealthStatus::Sick, ts(1, 9), 1),
      event(s1, HealthStatus::Healthy, ts(3, 9), 2),
    ];

    let stats = compute_stats(&log, [s1]);
    assert_eq!(stats, AggregateStats { currently_sick: 0, recovered_at_least_once: 1, never_sick: 0 });

    let series = active_case_series(&log, &Utc);
    assert_eq!(series.points, vec![
      DailyActiveCount { day: date(1), active: 1 },
      DailyActiveCount { day: date(3), active: 0 },
    ]);
    assert!(series.anomalies.is_empty());
  }

  #[test]
  fn empty_log_puts_everyone_in_never_sick() {
    let subjects = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    let stats = compute_stats(&[], subjects);
    assert_eq!(stats.never_sick, 3);
    assert_eq!(stats.total(), 3);
    assert!(active_case_series(&[], &Utc).points.is_empty());
  }

  #[test]
  fn healthy_only_history_counts_as_never_sick() {
    let s1 = Uuid::new_v4();
    let log = vec![event(s1, HealthStatus::Healthy, ts(1, 9), 1)];
    assert_eq!(compute_stats(&log, [s1]).never_sick, 1);
  }

  #[test]
  fn events_outside_universe_are_ignored() {
    let known = Uuid::new_v4();
    let log = vec![event(Uuid::new_v4(), HealthStatus::Sick, ts(1, 9), 1)];
    let stats = compute_stats(&log, [known]);
    assert_eq!(stats, AggregateStats { never_sick: 1, ..Default::default() });
  }

  #[test]
  fn timestamp_ties_fall_back_to_sequence() {
    let s1 = Uuid::new_v4();
    // Same instant; the later sequence number wins regardless of slice order.
    let log = vec![
      event(s1, HealthStatus::Healthy, ts(2, 9), 8),
      event(s1, HealthStatus::Sick, ts(2, 9), 7),
    ];
    assert_eq!(project_current_status(&log)[&s1], HealthStatus::Healthy);
    assert_eq!(compute_stats(&log, [s1]).recovered_at_least_once, 1);
  }

  #[test]
  fn unsorted_input_replays_in_time_order() {
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let log = vec![
      event(b, HealthStatus::Healthy, ts(4, 9), 4),
      event(a, HealthStatus::Sick, ts(1, 9), 1),
      event(b, HealthStatus::Sick, ts(2, 9), 2),
      event(a, HealthStatus::Sick, ts(2, 10), 3),
    ];
    let series = active_case_series(&log, &Utc);
    assert_eq!(series.points, vec![
      DailyActiveCount { day: date(1), active: 1 },
      DailyActiveCount { day: date(2), active: 3 },
      DailyActiveCount { day: date(4), active: 2 },
    ]);
  }

  #[test]
  fn negative_excursion_is_clamped_and_reported() {
    let s1 = Uuid::new_v4();
    let stray = event(s1, HealthStatus::Healthy, ts(1, 9), 1);
    let log = vec![stray.clone(), event(s1, HealthStatus::Sick, ts(2, 9), 2)];

    let series = active_case_series(&log, &Utc);
    assert_eq!(series.points[0].active, 0);
    assert_eq!(series.latest(), 1);
    assert_eq!(series.anomalies, vec![IntegrityAnomaly::NegativeExcursion {
      event_id:   stray.event_id,
      subject_id: s1,
      timestamp:  stray.timestamp,
    }]);
  }

  #[test]
  fn day_buckets_follow_the_time_zone() {
    let s1 = Uuid::new_v4();
    // 23:00 UTC on the 1st is already the 2nd at UTC+2.
    let log = vec![event(s1, HealthStatus::Sick, ts(1, 23), 1)];
    let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
    assert_eq!(active_case_series(&log, &plus_two).points[0].day, date(2));
    assert_eq!(active_case_series(&log, &Utc).points[0].day, date(1));
  }
}
