//! The signed-in subject's own status, with the toggle that changes it.

use std::sync::{Arc, Mutex};

use sickbay_core::{
  profile::UserProfile,
  status::{HealthStatus, NewStatusEvent},
  store::HealthStore,
};
use uuid::Uuid;

use super::{Mount, SyncContext, ViewCore, ViewState, read_error, unmount};
use crate::{
  Error, Result,
  bus::Signal,
  coordinator::{EntityKey, LocalState, MutationCoordinator, MutationReceipt},
  policy::ReconcilePolicy,
  session::SessionProvider,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectStatus {
  pub subject_id: Uuid,
  pub status:     HealthStatus,
}

impl LocalState<HealthStatus> for ViewCore<SubjectStatus> {
  fn snapshot(&self, key: EntityKey) -> Option<HealthStatus> {
    let EntityKey::HealthStatus(subject_id) = key else { return None };
    self
      .lock()
      .ready()
      .filter(|s| s.subject_id == subject_id)
      .map(|s| s.status)
  }

  fn apply(&self, key: EntityKey, status: HealthStatus) {
    let EntityKey::HealthStatus(subject_id) = key else { return };
    if let ViewState::Ready(current) = &mut *self.lock()
      && current.subject_id == subject_id
    {
      current.status = status;
    }
  }
}

pub struct StatusView<S, P> {
  store:       Arc<S>,
  session:     Arc<P>,
  coordinator: MutationCoordinator,
  core:        Arc<ViewCore<SubjectStatus>>,
  mount:       Mutex<Mount>,
}

impl<S: HealthStore, P: SessionProvider> StatusView<S, P> {
  pub const NAME: &'static str = "status";

  pub fn policy() -> ReconcilePolicy { ReconcilePolicy::new().refetch_on(Signal::HealthStatusChanged) }

  pub fn mount(store: Arc<S>, session: Arc<P>, ctx: &SyncContext) -> Self {
    let core: Arc<ViewCore<SubjectStatus>> = Arc::new(ViewCore::new(Self::NAME, Arc::clone(&ctx.wake)));
    let mount = Mount::attach(&core, &Self::policy(), ctx, |_, _| {});
    Self { store, session, coordinator: ctx.coordinator.clone(), core, mount: Mutex::new(mount) }
  }

  pub fn core(&self) -> &ViewCore<SubjectStatus> { &self.core }

  pub fn state(&self) -> ViewState<SubjectStatus> { self.core.state() }

  /// Force a refetch on the next pass, e.g. after the session changed.
  pub fn invalidate(&self) { self.core.mark_dirty(); }

  pub async fn refresh(&self) -> Result<()> {
    let Some(subject_id) = self.session.current_subject() else {
      return self.core.finish(Ok(ViewState::Inert));
    };

    let loaded = match self.store.get_profile(subject_id).await {
      Ok(Some(profile)) => Ok(ViewState::Ready(SubjectStatus {
        subject_id,
        status: profile.current_status,
      })),
      Ok(None) => Err(Error::NotFound(subject_id)),
      Err(e) => Err(read_error(Self::NAME)(e)),
    };
    self.core.finish(loaded)
  }

  pub async fn reconcile(&self) -> Result<bool> {
    if !self.core.take_dirty() {
      return Ok(false);
    }
    self.refresh().await.map(|()| true)
  }

  /// Flip the signed-in subject's status.
  ///
  /// The profile row is the primary write and is rolled back on failure.
  /// The status event is appended afterwards; if that fails the toggle
  /// stands and the failure is reported on the receipt.
  pub async fn toggle(&self) -> Result<MutationReceipt<UserProfile>> {
    let subject_id = self.session.current_subject().ok_or(Error::NoSession)?;
    let attempt = self.coordinator.begin(
      &self.core,
      EntityKey::HealthStatus(subject_id),
      Signal::HealthStatusChanged,
      |status: &HealthStatus| status.toggled(),
    )?;
    let next = *attempt.applied();

    let store = &self.store;
    attempt
      .run_then(
        || store.set_current_status(subject_id, next),
        |_| store.append_status_event(NewStatusEvent::new(subject_id, next)),
      )
      .await
  }

  pub fn unmount(&self) { unmount(&self.mount, &self.core); }
}
