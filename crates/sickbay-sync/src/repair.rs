//! Rebuilds each profile's cached `current_status` from the status log.

use std::sync::{Arc, Mutex, PoisonError};

use sickbay_core::{
  aggregate::project_current_status,
  status::HealthStatus,
  store::{HealthStore, ProfileQuery},
};
use uuid::Uuid;

use crate::{
  Error, Result,
  bus::Signal,
  coordinator::{EntityKey, LocalState, MutationCoordinator},
};

/// The cached status as last read, which a repair attempt applies to.
struct Cached(Mutex<HealthStatus>);

impl LocalState<HealthStatus> for Cached {
  fn snapshot(&self, _: EntityKey) -> Option<HealthStatus> {
    Some(*self.0.lock().unwrap_or_else(PoisonError::into_inner))
  }

  fn apply(&self, _: EntityKey, value: HealthStatus) {
    *self.0.lock().unwrap_or_else(PoisonError::into_inner) = value;
  }
}

/// Rewrite every profile whose cached status disagrees with the latest
/// event in the log. Subjects without events are healthy. Returns the ids
/// that were repaired.
///
/// Each rewrite takes the subject's turn on `coordinator`, behind any toggle
/// still in flight, and checks the drift again once it holds the turn. Only
/// the profile rows are written; the log is never touched.
pub async fn repair_status_projection<S: HealthStore>(
  store: &S,
  coordinator: &MutationCoordinator,
) -> Result<Vec<Uuid>> {
  let read = |e: S::Error| Error::Read { view: "status projection", source: Box::new(e) };
  let (profiles, events) =
    tokio::try_join!(store.list_profiles(ProfileQuery::all()), store.list_status_events())
      .map_err(read)?;

  let projected = project_current_status(&events);
  let mut repaired = Vec::new();
  for profile in profiles {
    let expected = projected.get(&profile.subject_id).copied().unwrap_or_default();
    if profile.current_status == expected {
      continue;
    }

    let subject_id = profile.subject_id;
    let cached = Arc::new(Cached(Mutex::new(profile.current_status)));
    let attempt = coordinator.begin(
      &cached,
      EntityKey::HealthStatus(subject_id),
      Signal::HealthStatusChanged,
      |_| expected,
    )?;
    let receipt = attempt.run(|| rewrite_if_drifted(store, subject_id)).await?;
    if receipt.output {
      repaired.push(subject_id);
    }
  }
  Ok(repaired)
}

/// Compare one subject against the log as it is now and rewrite it if they
/// still disagree.
async fn rewrite_if_drifted<S: HealthStore>(store: &S, subject_id: Uuid) -> Result<bool, S::Error> {
  let (profile, events) = tokio::try_join!(store.get_profile(subject_id), store.list_status_events())?;
  let Some(profile) = profile else { return Ok(false) };

  let expected = project_current_status(&events).get(&subject_id).copied().unwrap_or_default();
  if profile.current_status == expected {
    tracing::debug!(%subject_id, "drift resolved before repair");
    return Ok(false);
  }
  tracing::info!(
    %subject_id,
    cached = %profile.current_status,
    %expected,
    "repairing drifted status"
  );
  store.set_current_status(subject_id, expected).await?;
  Ok(true)
}
