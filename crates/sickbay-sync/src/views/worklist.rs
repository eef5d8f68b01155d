//! The meal-delivery worklist: every sick resident, ordered by room, with a
//! packed flag operators tick off.

use std::sync::{Arc, Mutex};

use sickbay_core::{
  profile::UserProfile,
  store::{HealthStore, ProfileQuery},
};
use uuid::Uuid;

use super::{Mount, SyncContext, ViewCore, ViewState, read_error, unmount};
use crate::{
  Error, Result,
  bus::{EventBus, Signal},
  coordinator::{EntityKey, LocalState, MutationCoordinator, MutationReceipt},
  feed::RowPatch,
  policy::ReconcilePolicy,
};

impl LocalState<bool> for ViewCore<Vec<UserProfile>> {
  fn snapshot(&self, key: EntityKey) -> Option<bool> {
    let EntityKey::Packed(subject_id) = key else { return None };
    self
      .lock()
      .ready()
      .and_then(|rows| rows.iter().find(|p| p.subject_id == subject_id))
      .map(|p| p.packed)
  }

  fn apply(&self, key: EntityKey, packed: bool) {
    let EntityKey::Packed(subject_id) = key else { return };
    if let ViewState::Ready(rows) = &mut *self.lock()
      && let Some(row) = rows.iter_mut().find(|p| p.subject_id == subject_id)
    {
      row.packed = packed;
    }
  }
}

pub struct WorklistView<S> {
  store:       Arc<S>,
  bus:         EventBus,
  coordinator: MutationCoordinator,
  core:        Arc<ViewCore<Vec<UserProfile>>>,
  mount:       Mutex<Mount>,
}

impl<S: HealthStore> WorklistView<S> {
  pub const NAME: &'static str = "worklist";

  pub fn policy() -> ReconcilePolicy {
    ReconcilePolicy::new()
      .refetch_on(Signal::HealthStatusChanged)
      .refetch_on(Signal::ProfilesChanged)
      .patch_on(Signal::PackedToggled)
  }

  pub fn mount(store: Arc<S>, ctx: &SyncContext) -> Self {
    let core: Arc<ViewCore<Vec<UserProfile>>> = Arc::new(ViewCore::new(Self::NAME, Arc::clone(&ctx.wake)));
    let mount = Mount::attach(&core, &Self::policy(), ctx, |core, patch| match *patch {
      RowPatch::Packed { subject_id, packed } => core.apply(EntityKey::Packed(subject_id), packed),
    });
    Self {
      store,
      bus: ctx.bus.clone(),
      coordinator: ctx.coordinator.clone(),
      core,
      mount: Mutex::new(mount),
    }
  }

  pub fn core(&self) -> &ViewCore<Vec<UserProfile>> { &self.core }

  pub fn state(&self) -> ViewState<Vec<UserProfile>> { self.core.state() }

  pub async fn refresh(&self) -> Result<()> {
    let loaded = self
      .store
      .list_profiles(ProfileQuery::sick())
      .await
      .map(ViewState::Ready)
      .map_err(read_error(Self::NAME));
    self.core.finish(loaded)
  }

  pub async fn reconcile(&self) -> Result<bool> {
    if !self.core.take_dirty() {
      return Ok(false);
    }
    self.refresh().await.map(|()| true)
  }

  /// Flip one row's packed flag optimistically.
  pub async fn toggle_packed(&self, subject_id: Uuid) -> Result<MutationReceipt<UserProfile>> {
    let attempt = self.coordinator.begin(
      &self.core,
      EntityKey::Packed(subject_id),
      Signal::PackedToggled,
      |packed: &bool| !packed,
    )?;
    let packed = *attempt.applied();
    attempt.run(|| self.store.set_packed(subject_id, packed)).await
  }

  /// Clear every packed flag in one store-side operation. Returns the
  /// number of rows that changed.
  pub async fn reset_all_packed(&self) -> Result<u64> {
    let cleared = self
      .store
      .reset_all_packed()
      .await
      .map_err(|e| Error::Write(Box::new(e)))?;
    self.bus.emit(Signal::ProfilesChanged);
    Ok(cleared)
  }

  pub fn unmount(&self) { unmount(&self.mount, &self.core); }
}
