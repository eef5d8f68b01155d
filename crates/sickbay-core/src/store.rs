//! The `HealthStore` and `PushChannel` traits.
//!
//! Both are implemented by storage backends (e.g. `sickbay-store-sqlite`).
//! The synchronisation layer depends on these abstractions, never on a
//! concrete backend.

use std::future::Future;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
  change::RawChange,
  profile::{NewProfile, ProfileForm, UserProfile},
  status::{HealthStatus, NewStatusEvent, StatusEvent},
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`HealthStore::list_profiles`]. Results are always ordered
/// by room label, then display name.
#[derive(Debug, Clone, Default)]
pub struct ProfileQuery {
  /// Restrict to profiles whose cached status matches.
  pub status: Option<HealthStatus>,
}

impl ProfileQuery {
  pub fn all() -> Self { Self::default() }

  /// The meal-delivery worklist query.
  pub fn sick() -> Self { Self { status: Some(HealthStatus::Sick) } }
}

// ─── Row store ───────────────────────────────────────────────────────────────

/// Abstraction over the external row store.
///
/// The status log is append-only: there is no operation that updates or
/// deletes a [`StatusEvent`].
///
/// All methods return `Send` futures so the trait can be used from
/// multi-threaded async runtimes.
pub trait HealthStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Profiles ──────────────────────────────────────────────────────────

  /// Create the profile row for a newly signed-up subject. New profiles
  /// start healthy and unpacked.
  fn add_profile(
    &self,
    input: NewProfile,
  ) -> impl Future<Output = Result<UserProfile, Self::Error>> + Send + '_;

  /// Retrieve a profile by subject id. Returns `None` if not found.
  fn get_profile(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Option<UserProfile>, Self::Error>> + Send + '_;

  fn list_profiles(
    &self,
    query: ProfileQuery,
  ) -> impl Future<Output = Result<Vec<UserProfile>, Self::Error>> + Send + '_;

  /// Overwrite the cached `current_status` of a profile.
  fn set_current_status(
    &self,
    subject_id: Uuid,
    status: HealthStatus,
  ) -> impl Future<Output = Result<UserProfile, Self::Error>> + Send + '_;

  fn set_packed(
    &self,
    subject_id: Uuid,
    packed: bool,
  ) -> impl Future<Output = Result<UserProfile, Self::Error>> + Send + '_;

  /// Apply the self-service settings form. Note timestamps are assigned by
  /// the store.
  fn update_profile(
    &self,
    subject_id: Uuid,
    form: ProfileForm,
  ) -> impl Future<Output = Result<UserProfile, Self::Error>> + Send + '_;

  /// Clear every packed flag as one atomic operation. Returns the number of
  /// rows that changed.
  fn reset_all_packed(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Status log (append-only) ──────────────────────────────────────────

  /// Append a status event. `seq` (and `timestamp`, unless supplied) are
  /// assigned by the store.
  fn append_status_event(
    &self,
    input: NewStatusEvent,
  ) -> impl Future<Output = Result<StatusEvent, Self::Error>> + Send + '_;

  /// The full log in replay order (timestamp, then sequence).
  fn list_status_events(
    &self,
  ) -> impl Future<Output = Result<Vec<StatusEvent>, Self::Error>> + Send + '_;
}

// ─── Push channel ────────────────────────────────────────────────────────────

/// A source of row-level change notifications for every watched table,
/// covering writes from any client.
///
/// Delivery is at-least-once; consumers must tolerate duplicates. A lagged
/// receiver has missed notifications and must resynchronise from the store.
pub trait PushChannel: Send + Sync {
  fn subscribe_changes(&self) -> broadcast::Receiver<RawChange>;
}
