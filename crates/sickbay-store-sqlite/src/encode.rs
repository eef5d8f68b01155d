//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with a fixed microsecond width
//! so that lexical order is chronological. UUIDs are stored as hyphenated
//! lowercase strings.

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use sickbay_core::{
  change::ProfileRow,
  profile::UserProfile,
  status::{HealthStatus, StatusEvent},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

/// The store's clock, truncated to the precision the columns keep.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> { s.map(decode_dt).transpose() }

// ─── HealthStatus ─────────────────────────────────────────────────────────────

pub fn encode_status(s: HealthStatus) -> &'static str { s.into() }

pub fn decode_status(s: &str) -> Result<HealthStatus> {
  s.parse().map_err(|_| Error::UnknownStatus(s.to_owned()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching the field order of [`RawProfile`].
pub const PROFILE_COLUMNS: &str = "subject_id, display_name, room_label, current_status,
   lunch_note, lunch_note_updated_at, dinner_note, dinner_note_updated_at,
   other_note, other_note_updated_at, packed, created_at";

/// Raw values read directly from a `profiles` row.
#[derive(Clone)]
pub struct RawProfile {
  pub subject_id:             String,
  pub display_name:           String,
  pub room_label:             String,
  pub current_status:         String,
  pub lunch_note:             Option<String>,
  pub lunch_note_updated_at:  Option<String>,
  pub dinner_note:            Option<String>,
  pub dinner_note_updated_at: Option<String>,
  pub other_note:             Option<String>,
  pub other_note_updated_at:  Option<String>,
  pub packed:                 bool,
  pub created_at:             String,
}

impl RawProfile {
  /// Read a row selected with [`PROFILE_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_id:             row.get(0)?,
      display_name:           row.get(1)?,
      room_label:             row.get(2)?,
      current_status:         row.get(3)?,
      lunch_note:             row.get(4)?,
      lunch_note_updated_at:  row.get(5)?,
      dinner_note:            row.get(6)?,
      dinner_note_updated_at: row.get(7)?,
      other_note:             row.get(8)?,
      other_note_updated_at:  row.get(9)?,
      packed:                 row.get(10)?,
      created_at:             row.get(11)?,
    })
  }

  pub fn into_row(self) -> Result<ProfileRow> {
    Ok(ProfileRow {
      subject_id:             decode_uuid(&self.subject_id)?,
      display_name:           self.display_name,
      room_label:             self.room_label,
      current_status:         decode_status(&self.current_status)?,
      lunch_note:             self.lunch_note,
      lunch_note_updated_at:  decode_opt_dt(self.lunch_note_updated_at.as_deref())?,
      dinner_note:            self.dinner_note,
      dinner_note_updated_at: decode_opt_dt(self.dinner_note_updated_at.as_deref())?,
      other_note:             self.other_note,
      other_note_updated_at:  decode_opt_dt(self.other_note_updated_at.as_deref())?,
      packed:                 self.packed,
      created_at:             decode_dt(&self.created_at)?,
    })
  }

  pub fn into_profile(self) -> Result<UserProfile> { Ok(self.into_row()?.into_profile()) }
}

/// Column list matching the field order of [`RawStatusEvent`].
pub const EVENT_COLUMNS: &str = "seq, event_id, subject_id, status, recorded_at";

/// Raw values read directly from a `status_events` row.
pub struct RawStatusEvent {
  pub seq:         i64,
  pub event_id:    String,
  pub subject_id:  String,
  pub status:      String,
  pub recorded_at: String,
}

impl RawStatusEvent {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      seq:         row.get(0)?,
      event_id:    row.get(1)?,
      subject_id:  row.get(2)?,
      status:      row.get(3)?,
      recorded_at: row.get(4)?,
    })
  }

  pub fn into_event(self) -> Result<StatusEvent> {
    Ok(StatusEvent {
      event_id:   decode_uuid(&self.event_id)?,
      subject_id: decode_uuid(&self.subject_id)?,
      status:     decode_status(&self.status)?,
      timestamp:  decode_dt(&self.recorded_at)?,
      seq:        self.seq,
    })
  }
}
