//! User profiles, the mutable, per-subject record.
//!
//! `current_status` is a denormalised copy of the latest status event for the
//! subject. The event log stays authoritative; see
//! [`crate::aggregate::project_current_status`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::HealthStatus;

// ─── Meal notes ──────────────────────────────────────────────────────────────

/// The three meal slots a resident can leave delivery notes for.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MealSlot {
  Lunch,
  Dinner,
  Other,
}

/// A free-text delivery note and when it last changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealNote {
  pub text:       String,
  pub updated_at: DateTime<Utc>,
}

impl MealNote {
  /// Coarse relative age used by the delivery list: "Today", "Yesterday",
  /// or "N days ago". Notes dated in the future read as "Today".
  pub fn age_label(&self, now: DateTime<Utc>) -> String {
    match (now - self.updated_at).num_days().max(0) {
      0 => "Today".to_owned(),
      1 => "Yesterday".to_owned(),
      n => format!("{n} days ago"),
    }
  }
}

/// Per-slot notes; `None` means the slot has no note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealNotes {
  pub lunch:  Option<MealNote>,
  pub dinner: Option<MealNote>,
  pub other:  Option<MealNote>,
}

impl MealNotes {
  pub fn get(&self, slot: MealSlot) -> Option<&MealNote> {
    match slot {
      MealSlot::Lunch => self.lunch.as_ref(),
      MealSlot::Dinner => self.dinner.as_ref(),
      MealSlot::Other => self.other.as_ref(),
    }
  }

  /// Apply a submitted note text for `slot` at time `now`.
  ///
  /// Empty or absent text clears the note. Unchanged text keeps its
  /// original timestamp.
  pub fn revise(&mut self, slot: MealSlot, text: Option<&str>, now: DateTime<Utc>) {
    let entry = match slot {
      MealSlot::Lunch => &mut self.lunch,
      MealSlot::Dinner => &mut self.dinner,
      MealSlot::Other => &mut self.other,
    };
    let text = text.map(str::trim).filter(|t| !t.is_empty());
    *entry = match (entry.take(), text) {
      (_, None) => None,
      (Some(existing), Some(t)) if existing.text == t => Some(existing),
      (_, Some(t)) => Some(MealNote { text: t.to_owned(), updated_at: now }),
    };
  }
}

// ─── UserProfile ─────────────────────────────────────────────────────────────

/// A resident's profile row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
  pub subject_id:     Uuid,
  pub display_name:   String,
  pub room_label:     String,
  /// Cached projection of the subject's latest status event.
  pub current_status: HealthStatus,
  pub meals:          MealNotes,
  /// Set by an operator once the subject's meals are packed.
  pub packed:         bool,
  pub created_at:     DateTime<Utc>,
}

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Input to [`crate::store::HealthStore::add_profile`].
#[derive(Debug, Clone)]
pub struct NewProfile {
  /// The identity supplied by the session provider.
  pub subject_id:   Uuid,
  pub display_name: String,
  pub room_label:   String,
}

/// The self-service settings form. Submitting it replaces every field;
/// an empty note clears that slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileForm {
  pub display_name: String,
  pub room_label:   String,
  pub lunch_note:   Option<String>,
  pub dinner_note:  Option<String>,
  pub other_note:   Option<String>,
}

impl ProfileForm {
  pub fn note(&self, slot: MealSlot) -> Option<&str> {
    match slot {
      MealSlot::Lunch => self.lunch_note.as_deref(),
      MealSlot::Dinner => self.dinner_note.as_deref(),
      MealSlot::Other => self.other_note.as_deref(),
    }
  }

  /// Produce the revised profile this form describes, as of `now`.
  pub fn apply_to(&self, profile: &UserProfile, now: DateTime<Utc>) -> UserProfile {
    let mut revised = profile.clone();
    revised.display_name = self.display_name.trim().to_owned();
    revised.room_label = self.room_label.trim().to_owned();
    for slot in [MealSlot::Lunch, MealSlot::Dinner, MealSlot::Other] {
      revised.meals.revise(slot, self.note(slot), now);
    }
    revised
  }
}
