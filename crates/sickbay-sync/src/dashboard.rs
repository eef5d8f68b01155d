//! The dashboard root scope.
//!
//! Owns the bus, the mutation coordinator, the attached feed and the four
//! mounted views. Nothing here is global: two dashboards over the same store
//! share only what the store's push channel tells them.

use std::{
  future::Future,
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use chrono::{FixedOffset, Offset as _, Utc};
use sickbay_core::{
  profile::{ProfileForm, UserProfile},
  store::{HealthStore, PushChannel},
};
use tokio::{
  sync::Notify,
  time::{Instant, Interval, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
  Error, Result,
  bus::{EventBus, Signal},
  coordinator::MutationCoordinator,
  feed::{ChangeFeedAdapter, FeedHandle, FeedStatus, StaleReason},
  repair::repair_status_projection,
  session::SessionProvider,
  views::{MetricsView, StatusView, SyncContext, TrendView, WorklistView},
};

#[derive(Debug, Clone, Copy)]
pub struct DashboardOptions {
  /// Bound on each remote write behind an optimistic mutation.
  pub write_timeout: Option<Duration>,
  /// Zone the trend series buckets days in.
  pub utc_offset:    FixedOffset,
}

impl Default for DashboardOptions {
  fn default() -> Self { Self { write_timeout: Some(Duration::from_secs(10)), utc_offset: Utc.fix() } }
}

/// What one reconcile pass did.
#[derive(Debug, Default)]
pub struct ReconcileReport {
  /// Views that refetched successfully.
  pub refreshed: Vec<&'static str>,
  /// Read failures, one per failed view.
  pub failed:    Vec<Error>,
}

impl ReconcileReport {
  pub fn is_idle(&self) -> bool { self.refreshed.is_empty() && self.failed.is_empty() }
}

pub struct Dashboard<S, P> {
  store:    Arc<S>,
  session:  Arc<P>,
  ctx:      SyncContext,
  adapter:  ChangeFeedAdapter,
  feed:     Mutex<Option<FeedHandle>>,
  metrics:  MetricsView<S>,
  trend:    TrendView<S>,
  worklist: WorklistView<S>,
  status:   StatusView<S, P>,
  closed:   AtomicBool,
}

impl<S, P> Dashboard<S, P>
where
  S: HealthStore + PushChannel + 'static,
  P: SessionProvider + 'static,
{
  /// Mount every view and attach the change feed.
  ///
  /// Views start dirty; the first [`Self::reconcile`] loads them. Must be
  /// called from within a tokio runtime.
  pub fn mount(store: Arc<S>, session: Arc<P>, options: DashboardOptions) -> Self {
    let bus = EventBus::new();
    let adapter = ChangeFeedAdapter::new(bus.clone());
    let ctx = SyncContext {
      bus:         bus.clone(),
      patches:     adapter.patches().clone(),
      coordinator: MutationCoordinator::new(bus, options.write_timeout),
      wake:        Arc::new(Notify::new()),
    };

    let metrics = MetricsView::mount(Arc::clone(&store), &ctx);
    let trend = TrendView::mount(Arc::clone(&store), options.utc_offset, &ctx);
    let worklist = WorklistView::mount(Arc::clone(&store), &ctx);
    let status = StatusView::mount(Arc::clone(&store), Arc::clone(&session), &ctx);

    // Attach only after every view is listening, so nothing is missed.
    let feed = adapter.attach(store.as_ref());

    tracing::info!(listeners = ctx.bus.listener_count(), "dashboard mounted");
    Self {
      store,
      session,
      ctx,
      adapter,
      feed: Mutex::new(Some(feed)),
      metrics,
      trend,
      worklist,
      status,
      closed: AtomicBool::new(false),
    }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn session(&self) -> &P { &self.session }

  pub fn metrics(&self) -> &MetricsView<S> { &self.metrics }

  pub fn trend(&self) -> &TrendView<S> { &self.trend }

  pub fn worklist(&self) -> &WorklistView<S> { &self.worklist }

  pub fn status(&self) -> &StatusView<S, P> { &self.status }

  pub fn bus(&self) -> &EventBus { &self.ctx.bus }

  pub fn coordinator(&self) -> &MutationCoordinator { &self.ctx.coordinator }

  // ── Reconciliation ────────────────────────────────────────────────────────

  /// Refetch every dirty view once.
  pub async fn reconcile(&self) -> ReconcileReport {
    let (metrics, trend, worklist, status) = tokio::join!(
      self.metrics.reconcile(),
      self.trend.reconcile(),
      self.worklist.reconcile(),
      self.status.reconcile(),
    );

    let mut report = ReconcileReport::default();
    for (view, outcome) in [
      (MetricsView::<S>::NAME, metrics),
      (TrendView::<S>::NAME, trend),
      (WorklistView::<S>::NAME, worklist),
      (StatusView::<S, P>::NAME, status),
    ] {
      match outcome {
        Ok(true) => report.refreshed.push(view),
        Ok(false) => {}
        Err(error) => report.failed.push(error),
      }
    }
    report
  }

  /// Resolves once some view went from clean to dirty since the last call.
  pub async fn invalidated(&self) { self.ctx.wake.notified().await }

  /// Keep the dashboard current until `shutdown` resolves.
  ///
  /// Reconciles whenever a view is invalidated, reattaches a stale feed, and
  /// with `poll` set also forces a [`Self::refresh`] that often, for changes
  /// the push channel cannot see. `on_pass` sees every reconcile report.
  pub async fn drive(
    &self,
    poll: Option<Duration>,
    shutdown: impl Future<Output = ()>,
    mut on_pass: impl FnMut(&ReconcileReport),
  ) {
    tokio::pin!(shutdown);
    let mut ticker = poll.map(|period| {
      let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      ticker
    });

    loop {
      if self.closed.load(Ordering::Acquire) {
        break;
      }
      if let FeedStatus::Stale { reason } = self.feed_status() {
        tracing::warn!(?reason, "change feed stale; reattaching");
        if let Err(error) = self.reattach() {
          tracing::warn!(%error, "failed to reattach change feed");
        }
      }

      let report = self.reconcile().await;
      if !report.is_idle() {
        tracing::debug!(
          refreshed = ?report.refreshed,
          failed = report.failed.len(),
          "reconciled"
        );
      }
      on_pass(&report);

      tokio::select! {
        () = &mut shutdown => break,
        () = self.invalidated() => {}
        () = tick(&mut ticker) => {
          self.refresh();
        }
      }
    }
  }

  // ── Actions ───────────────────────────────────────────────────────────────

  /// Ask every status-derived view to reload. Returns how many listeners
  /// were reached.
  pub fn refresh(&self) -> usize { self.ctx.bus.emit(Signal::HealthStatusChanged) }

  /// Submit the settings form for the signed-in subject.
  pub async fn update_profile(&self, form: ProfileForm) -> Result<UserProfile> {
    let subject_id = self.session.current_subject().ok_or(Error::NoSession)?;
    let profile = self
      .store
      .update_profile(subject_id, form)
      .await
      .map_err(|e| Error::Write(Box::new(e)))?;
    self.ctx.bus.emit(Signal::ProfilesChanged);
    Ok(profile)
  }

  /// Call after the session provider's subject changed.
  pub fn session_changed(&self) { self.status.invalidate(); }

  /// Rewrite cached statuses that drifted from the status log. Each rewrite
  /// waits behind any toggle of the same subject still in flight.
  pub async fn repair(&self) -> Result<Vec<Uuid>> {
    repair_status_projection(self.store.as_ref(), &self.ctx.coordinator).await
  }

  // ── Feed ──────────────────────────────────────────────────────────────────

  fn feed(&self) -> MutexGuard<'_, Option<FeedHandle>> {
    self.feed.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn feed_status(&self) -> FeedStatus {
    self
      .feed()
      .as_ref()
      .map_or(FeedStatus::Stale { reason: StaleReason::Detached }, FeedHandle::status)
  }

  /// Re-subscribe to the push channel and reload everything, since any
  /// notification sent while detached was missed.
  pub fn reattach(&self) -> Result<()> {
    if self.closed.load(Ordering::Acquire) {
      return Err(Error::ChannelDisconnect);
    }
    let handle = self.adapter.attach(self.store.as_ref());
    if let Some(old) = self.feed().replace(handle) {
      old.close();
    }
    self.adapter.resync();
    Ok(())
  }

  /// Unmount every view, close the feed and dispose the bus. Idempotent.
  pub fn shutdown(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    self.metrics.unmount();
    self.trend.unmount();
    self.worklist.unmount();
    self.status.unmount();
    if let Some(feed) = self.feed().take() {
      feed.close();
    }
    self.ctx.bus.dispose();
    tracing::info!("dashboard shut down");
  }
}

async fn tick(ticker: &mut Option<Interval>) {
  match ticker {
    Some(ticker) => {
      ticker.tick().await;
    }
    None => std::future::pending().await,
  }
}

impl<S, P> Drop for Dashboard<S, P> {
  fn drop(&mut self) {
    if !self.closed.swap(true, Ordering::AcqRel) {
      // Views and the feed release themselves when dropped.
      self.ctx.bus.dispose();
    }
  }
}
