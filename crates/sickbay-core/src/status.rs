//! Health status and the append-only status event log.
//!
//! A status event is an immutable record of a subject transitioning to
//! healthy or sick. Events are never updated or deleted; a subject's current
//! status is whatever their most recent event says.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── HealthStatus ────────────────────────────────────────────────────────────

/// Self-reported health of a subject.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
  #[default]
  Healthy,
  Sick,
}

impl HealthStatus {
  /// The status a toggle moves to.
  pub fn toggled(self) -> Self {
    match self {
      Self::Healthy => Self::Sick,
      Self::Sick => Self::Healthy,
    }
  }

  pub fn is_sick(self) -> bool { matches!(self, Self::Sick) }
}

// ─── StatusEvent ─────────────────────────────────────────────────────────────

/// One entry of the status log. Once written, no field is ever updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
  pub event_id:   Uuid,
  pub subject_id: Uuid,
  pub status:     HealthStatus,
  /// When the transition happened; assigned by the store unless backfilled.
  pub timestamp:  DateTime<Utc>,
  /// Store-assigned insertion sequence. Breaks timestamp ties so replays
  /// are deterministic.
  pub seq:        i64,
}

impl StatusEvent {
  /// The replay order key: timestamp first, insertion sequence second.
  pub fn order_key(&self) -> (DateTime<Utc>, i64) { (self.timestamp, self.seq) }
}

// ─── NewStatusEvent ──────────────────────────────────────────────────────────

/// Input to [`crate::store::HealthStore::append_status_event`].
/// `seq` is always assigned by the store.
#[derive(Debug, Clone)]
pub struct NewStatusEvent {
  pub subject_id: Uuid,
  pub status:     HealthStatus,
  /// Defaults to the store's clock when `None`.
  pub timestamp:  Option<DateTime<Utc>>,
}

impl NewStatusEvent {
  pub fn new(subject_id: Uuid, status: HealthStatus) -> Self {
    Self { subject_id, status, timestamp: None }
  }

  /// Record an event with an explicit timestamp (imports, backfills).
  pub fn at(subject_id: Uuid, status: HealthStatus, timestamp: DateTime<Utc>) -> Self {
    Self { subject_id, status, timestamp: Some(timestamp) }
  }
}
