//! The daily active-case series, replayed from the status log.

use std::sync::{Arc, Mutex};

use chrono::FixedOffset;
use sickbay_core::{
  aggregate::{ActiveCaseSeries, active_case_series},
  store::HealthStore,
};

use super::{Mount, SyncContext, ViewCore, ViewState, read_error, unmount};
use crate::{Result, bus::Signal, policy::ReconcilePolicy};

pub struct TrendView<S> {
  store:  Arc<S>,
  /// Days are bucketed in this zone.
  offset: FixedOffset,
  core:   Arc<ViewCore<ActiveCaseSeries>>,
  mount:  Mutex<Mount>,
}

impl<S: HealthStore> TrendView<S> {
  pub const NAME: &'static str = "trend";

  pub fn policy() -> ReconcilePolicy { ReconcilePolicy::new().refetch_on(Signal::HealthStatusChanged) }

  pub fn mount(store: Arc<S>, offset: FixedOffset, ctx: &SyncContext) -> Self {
    let core: Arc<ViewCore<ActiveCaseSeries>> = Arc::new(ViewCore::new(Self::NAME, Arc::clone(&ctx.wake)));
    let mount = Mount::attach(&core, &Self::policy(), ctx, |_, _| {});
    Self { store, offset, core, mount: Mutex::new(mount) }
  }

  pub fn core(&self) -> &ViewCore<ActiveCaseSeries> { &self.core }

  pub fn state(&self) -> ViewState<ActiveCaseSeries> { self.core.state() }

  pub async fn refresh(&self) -> Result<()> {
    let loaded = self
      .store
      .list_status_events()
      .await
      .map(|events| {
        let series = active_case_series(&events, &self.offset);
        if !series.anomalies.is_empty() {
          tracing::warn!(
            anomalies = series.anomalies.len(),
            "status log has recoveries without a matching sickness; counter clamped at zero"
          );
        }
        ViewState::Ready(series)
      })
      .map_err(read_error(Self::NAME));
    self.core.finish(loaded)
  }

  pub async fn reconcile(&self) -> Result<bool> {
    if !self.core.take_dirty() {
      return Ok(false);
    }
    self.refresh().await.map(|()| true)
  }

  pub fn unmount(&self) { unmount(&self.mount, &self.core); }
}
