//! Population counts over every profile.

use std::sync::{Arc, Mutex};

use sickbay_core::{
  aggregate::{AggregateStats, compute_stats},
  store::{HealthStore, ProfileQuery},
};

use super::{Mount, SyncContext, ViewCore, ViewState, read_error, unmount};
use crate::{Result, bus::Signal, policy::ReconcilePolicy};

pub struct MetricsView<S> {
  store: Arc<S>,
  core:  Arc<ViewCore<AggregateStats>>,
  mount: Mutex<Mount>,
}

impl<S: HealthStore> MetricsView<S> {
  pub const NAME: &'static str = "metrics";

  pub fn policy() -> ReconcilePolicy {
    ReconcilePolicy::new()
      .refetch_on(Signal::HealthStatusChanged)
      .refetch_on(Signal::ProfilesChanged)
  }

  pub fn mount(store: Arc<S>, ctx: &SyncContext) -> Self {
    let core: Arc<ViewCore<AggregateStats>> = Arc::new(ViewCore::new(Self::NAME, Arc::clone(&ctx.wake)));
    let mount = Mount::attach(&core, &Self::policy(), ctx, |_, _| {});
    Self { store, core, mount: Mutex::new(mount) }
  }

  pub fn core(&self) -> &ViewCore<AggregateStats> { &self.core }

  pub fn state(&self) -> ViewState<AggregateStats> { self.core.state() }

  /// Recompute the counts from the full log and the current profile set.
  pub async fn refresh(&self) -> Result<()> {
    let loaded = tokio::try_join!(
      self.store.list_profiles(ProfileQuery::all()),
      self.store.list_status_events(),
    )
    .map(|(profiles, events)| {
      ViewState::Ready(compute_stats(&events, profiles.iter().map(|p| p.subject_id)))
    })
    .map_err(read_error(Self::NAME));
    self.core.finish(loaded)
  }

  /// Refetch if anything invalidated the view since the last pass.
  pub async fn reconcile(&self) -> Result<bool> {
    if !self.core.take_dirty() {
      return Ok(false);
    }
    self.refresh().await.map(|()| true)
  }

  pub fn unmount(&self) { unmount(&self.mount, &self.core); }
}
