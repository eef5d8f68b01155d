//! Row-level change notifications and their typed decoding.
//!
//! The push channel delivers loosely-shaped JSON rows. They are validated
//! here, once, at the boundary: unknown tables and malformed rows are
//! rejected, extra columns are ignored.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
  Error, Result,
  profile::{MealNote, MealNotes, UserProfile},
  status::{HealthStatus, StatusEvent},
};

// ─── Raw notification ────────────────────────────────────────────────────────

/// The two watched tables.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Table {
  Profiles,
  StatusEvents,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Operation {
  Insert,
  Update,
  Delete,
}

/// A change notification exactly as the push channel delivers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
  pub table:     String,
  pub operation: Operation,
  /// The row after the change; absent for deletes.
  pub new_row:   Option<serde_json::Value>,
  /// The row before the change; present for deletes and, when the store
  /// keeps full row images, for updates.
  pub old_row:   Option<serde_json::Value>,
}

impl RawChange {
  pub fn insert(table: Table, new_row: serde_json::Value) -> Self {
    Self { table: table.to_string(), operation: Operation::Insert, new_row: Some(new_row), old_row: None }
  }

  pub fn update(table: Table, old_row: Option<serde_json::Value>, new_row: serde_json::Value) -> Self {
    Self { table: table.to_string(), operation: Operation::Update, new_row: Some(new_row), old_row }
  }

  pub fn delete(table: Table, old_row: serde_json::Value) -> Self {
    Self { table: table.to_string(), operation: Operation::Delete, new_row: None, old_row: Some(old_row) }
  }

  /// The table this notification claims to come from, if it is a watched one.
  pub fn table(&self) -> Result<Table> {
    self.table.parse().map_err(|_| Error::UnknownTable(self.table.clone()))
  }

  /// Validate and decode into a typed [`RowChange`].
  pub fn decode(&self) -> Result<RowChange> {
    Ok(match self.table()? {
      Table::Profiles => RowChange::Profile(Change::decode(Table::Profiles, self)?),
      Table::StatusEvents => RowChange::StatusEvent(Change::decode(Table::StatusEvents, self)?),
    })
  }
}

// ─── Typed notification ──────────────────────────────────────────────────────

/// A decoded change for rows of type `R`.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<R> {
  pub operation: Operation,
  pub new:       Option<R>,
  pub old:       Option<R>,
}

impl<R: DeserializeOwned> Change<R> {
  fn decode(table: Table, raw: &RawChange) -> Result<Self> {
    let new = decode_row(table, raw.new_row.as_ref())?;
    let old = decode_row(table, raw.old_row.as_ref())?;

    let missing = match raw.operation {
      Operation::Insert | Operation::Update if new.is_none() => Some("new"),
      Operation::Delete if old.is_none() => Some("old"),
      _ => None,
    };
    if let Some(side) = missing {
      return Err(Error::MissingRow {
        table: table.into(),
        operation: raw.operation.into(),
        side,
      });
    }

    Ok(Self { operation: raw.operation, new, old })
  }
}

fn decode_row<R: DeserializeOwned>(table: Table, value: Option<&serde_json::Value>) -> Result<Option<R>> {
  match value {
    None | Some(serde_json::Value::Null) => Ok(None),
    Some(v) => R::deserialize(v)
      .map(Some)
      .map_err(|source| Error::MalformedRow { table: table.into(), source }),
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
  Profile(Change<ProfileRow>),
  StatusEvent(Change<StatusEvent>),
}

// ─── Profile rows ────────────────────────────────────────────────────────────

/// The flat, column-shaped form of a profile as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
  pub subject_id:             Uuid,
  pub display_name:           String,
  pub room_label:             String,
  pub current_status:         HealthStatus,
  pub lunch_note:             Option<String>,
  pub lunch_note_updated_at:  Option<DateTime<Utc>>,
  pub dinner_note:            Option<String>,
  pub dinner_note_updated_at: Option<DateTime<Utc>>,
  pub other_note:             Option<String>,
  pub other_note_updated_at:  Option<DateTime<Utc>>,
  pub packed:                 bool,
  pub created_at:             DateTime<Utc>,
}

/// Mutable profile columns, for describing what an update touched.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum ProfileField {
  DisplayName,
  RoomLabel,
  CurrentStatus,
  LunchNote,
  DinnerNote,
  OtherNote,
  Packed,
}

impl ProfileRow {
  /// The set of fields that differ between `self` (before) and `after`.
  /// A note and its timestamp count as one field.
  pub fn changed_fields(&self, after: &ProfileRow) -> BTreeSet<ProfileField> {
    let mut changed = BTreeSet::new();
    let mut diff = |field, differs: bool| {
      if differs {
        changed.insert(field);
      }
    };
    diff(ProfileField::DisplayName, self.display_name != after.display_name);
    diff(ProfileField::RoomLabel, self.room_label != after.room_label);
    diff(ProfileField::CurrentStatus, self.current_status != after.current_status);
    diff(
      ProfileField::LunchNote,
      (&self.lunch_note, self.lunch_note_updated_at) != (&after.lunch_note, after.lunch_note_updated_at),
    );
    diff(
      ProfileField::DinnerNote,
      (&self.dinner_note, self.dinner_note_updated_at) != (&after.dinner_note, after.dinner_note_updated_at),
    );
    diff(
      ProfileField::OtherNote,
      (&self.other_note, self.other_note_updated_at) != (&after.other_note, after.other_note_updated_at),
    );
    diff(ProfileField::Packed, self.packed != after.packed);
    changed
  }

  /// Rebuild the domain profile. A note without a timestamp is dated at
  /// profile creation.
  pub fn into_profile(self) -> UserProfile {
    let note = |text: Option<String>, at: Option<DateTime<Utc>>| {
      text.map(|text| MealNote { text, updated_at: at.unwrap_or(self.created_at) })
    };
    let meals = MealNotes {
      lunch:  note(self.lunch_note, self.lunch_note_updated_at),
      dinner: note(self.dinner_note, self.dinner_note_updated_at),
      other:  note(self.other_note, self.other_note_updated_at),
    };
    UserProfile {
      subject_id: self.subject_id,
      display_name: self.display_name,
      room_label: self.room_label,
      current_status: self.current_status,
      meals,
      packed: self.packed,
      created_at: self.created_at,
    }
  }
}

impl From<&UserProfile> for ProfileRow {
  fn from(p: &UserProfile) -> Self {
    let text = |n: &Option<MealNote>| n.as_ref().map(|n| n.text.clone());
    let at = |n: &Option<MealNote>| n.as_ref().map(|n| n.updated_at);
    ProfileRow {
      subject_id:             p.subject_id,
      display_name:           p.display_name.clone(),
      room_label:             p.room_label.clone(),
      current_status:         p.current_status,
      lunch_note:             text(&p.meals.lunch),
      lunch_note_updated_at:  at(&p.meals.lunch),
      dinner_note:            text(&p.meals.dinner),
      dinner_note_updated_at: at(&p.meals.dinner),
      other_note:             text(&p.meals.other),
      other_note_updated_at:  at(&p.meals.other),
      packed:                 p.packed,
      created_at:             p.created_at,
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn row(packed: bool, lunch: Option<&str>) -> serde_json::Value {
    json!({
      "subject_id": "6f1c1d5e-0d3a-4c1e-9a43-0a4f7e2d9b10",
      "display_name": "Grace",
      "room_label": "2B",
      "current_status": "sick",
      "lunch_note": lunch,
      "lunch_note_updated_at": lunch.map(|_| "2024-01-02T08:00:00Z"),
      "packed": packed,
      "created_at": "2024-01-01T00:00:00Z",
      "some_future_column": 42,
    })
  }

  #[test]
  fn decodes_profile_update_and_ignores_extra_columns() {
    let raw = RawChange::update(Table::Profiles, Some(row(false, None)), row(true, None));
    let RowChange::Profile(change) = raw.decode().unwrap() else {
      panic!("expected a profile change");
    };
    let (old, new) = (change.old.unwrap(), change.new.unwrap());
    assert_eq!(old.changed_fields(&new), BTreeSet::from([ProfileField::Packed]));
  }

  #[test]
  fn note_edit_and_packed_flip_are_both_reported() {
    let old: ProfileRow = serde_json::from_value(row(false, None)).unwrap();
    let new: ProfileRow = serde_json::from_value(row(true, Some("no nuts"))).unwrap();
    assert_eq!(
      old.changed_fields(&new),
      BTreeSet::from([ProfileField::LunchNote, ProfileField::Packed])
    );
    assert!(old.changed_fields(&old).is_empty());
  }

  #[test]
  fn unknown_table_is_rejected() {
    let raw = RawChange {
      table:     "sessions".into(),
      operation: Operation::Insert,
      new_row:   Some(json!({})),
      old_row:   None,
    };
    assert!(matches!(raw.decode(), Err(Error::UnknownTable(t)) if t == "sessions"));
  }

  #[test]
  fn malformed_row_is_rejected() {
    let mut bad = row(true, None);
    bad["current_status"] = json!("contagious");
    let raw = RawChange::insert(Table::Profiles, bad);
    assert!(matches!(raw.decode(), Err(Error::MalformedRow { table: "profiles", .. })));
  }

  #[test]
  fn delete_without_old_row_is_rejected() {
    let raw = RawChange {
      table:     "status_events".into(),
      operation: Operation::Delete,
      new_row:   None,
      old_row:   None,
    };
    assert!(matches!(raw.decode(), Err(Error::MissingRow { side: "old", .. })));
  }

  #[test]
  fn profile_row_roundtrips_through_domain_type() {
    let row: ProfileRow = serde_json::from_value(row(true, Some("soup"))).unwrap();
    let profile = row.clone().into_profile();
    assert_eq!(profile.meals.lunch.as_ref().unwrap().text, "soup");
    assert_eq!(ProfileRow::from(&profile), row);
  }
}
