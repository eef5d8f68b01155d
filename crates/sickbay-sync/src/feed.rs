//! The change-feed adapter: turns the store's row-level notifications into
//! bus signals and in-place row patches.
//!
//! Every notification is decoded once at the boundary. A notification that
//! can be absorbed as a patch is delivered to the registered patch consumers;
//! everything else becomes at most one emit per signal.

use std::{
  collections::BTreeSet,
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{
    Arc, Mutex, MutexGuard, PoisonError, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
};

use sickbay_core::{
  change::{Change, Operation, ProfileField, ProfileRow, RawChange, RowChange, Table},
  status::StatusEvent,
  store::PushChannel,
};
use tokio::{
  sync::{broadcast::error::RecvError, watch},
  task::JoinHandle,
};
use uuid::Uuid;

use crate::{Error, Result, bus::{EventBus, Signal}};

// ─── Patches ─────────────────────────────────────────────────────────────────

/// A change small enough to apply to already-loaded data in place.
///
/// Applying the same patch twice leaves the data as applying it once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPatch {
  Packed { subject_id: Uuid, packed: bool },
}

impl RowPatch {
  /// The signal a consumer registers under to receive this patch.
  pub fn signal(&self) -> Signal {
    match self {
      Self::Packed { .. } => Signal::PackedToggled,
    }
  }
}

type PatchFn = Arc<dyn Fn(&RowPatch) + Send + Sync>;

struct PatchConsumer {
  id:     u64,
  signal: Signal,
  apply:  PatchFn,
}

#[derive(Default)]
struct RegistryInner {
  consumers: Mutex<Vec<PatchConsumer>>,
  next_id:   AtomicU64,
}

impl RegistryInner {
  fn consumers(&self) -> MutexGuard<'_, Vec<PatchConsumer>> {
    self.consumers.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Consumers that absorb a signal by patching instead of refetching.
#[derive(Clone, Default)]
pub struct PatchRegistry {
  inner: Arc<RegistryInner>,
}

impl PatchRegistry {
  pub fn register(
    &self,
    signal: Signal,
    apply: impl Fn(&RowPatch) + Send + Sync + 'static,
  ) -> PatchRegistration {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    self.inner.consumers().push(PatchConsumer { id, signal, apply: Arc::new(apply) });
    PatchRegistration { registry: Arc::downgrade(&self.inner), id }
  }

  /// Hand `patch` to every consumer of its signal. Returns how many applied
  /// it; a consumer that panics is logged and skipped.
  pub fn deliver(&self, patch: &RowPatch) -> usize {
    let signal = patch.signal();
    let targets: Vec<(u64, PatchFn)> = self
      .inner
      .consumers()
      .iter()
      .filter(|c| c.signal == signal)
      .map(|c| (c.id, Arc::clone(&c.apply)))
      .collect();

    let mut applied = 0;
    for (id, apply) in &targets {
      match catch_unwind(AssertUnwindSafe(|| apply(patch))) {
        Ok(()) => applied += 1,
        Err(_) => tracing::error!(%signal, consumer = id, ?patch, "patch consumer panicked"),
      }
    }
    applied
  }

  pub fn consumer_count(&self) -> usize { self.inner.consumers().len() }
}

/// Ownership of one patch registration. Dropping it unregisters.
#[must_use = "dropping a PatchRegistration unregisters immediately"]
pub struct PatchRegistration {
  registry: Weak<RegistryInner>,
  id:       u64,
}

impl PatchRegistration {
  pub fn unregister(&self) -> bool {
    self.registry.upgrade().is_some_and(|registry| {
      let mut consumers = registry.consumers();
      let before = consumers.len();
      consumers.retain(|c| c.id != self.id);
      consumers.len() != before
    })
  }
}

impl Drop for PatchRegistration {
  fn drop(&mut self) { self.unregister(); }
}

// ─── Routing ─────────────────────────────────────────────────────────────────

/// What one notification turns into.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Route {
  /// Each signal is emitted once, however many fields changed.
  pub signals: BTreeSet<Signal>,
  pub patch:   Option<RowPatch>,
}

impl Route {
  fn emit(signals: impl IntoIterator<Item = Signal>) -> Self {
    Self { signals: signals.into_iter().collect(), patch: None }
  }

  pub fn is_empty(&self) -> bool { self.signals.is_empty() && self.patch.is_none() }
}

/// Signals that make every consumer of `table` reload from scratch.
pub fn refetch_signals(table: Table) -> &'static [Signal] {
  match table {
    Table::Profiles => &[Signal::ProfilesChanged, Signal::HealthStatusChanged],
    Table::StatusEvents => &[Signal::HealthStatusChanged],
  }
}

/// Decide what a raw notification means. Returns `None` for tables this
/// client does not watch.
pub fn route(raw: &RawChange) -> Option<Route> {
  let table = match raw.table() {
    Ok(table) => table,
    Err(error) => {
      tracing::debug!(%error, "ignoring change notification");
      return None;
    }
  };

  let route = match raw.decode() {
    Ok(RowChange::Profile(change)) => route_profile(change),
    Ok(RowChange::StatusEvent(change)) => route_status_event(change),
    Err(error) => {
      tracing::warn!(%table, %error, "undecodable change notification; refetching");
      Route::emit(refetch_signals(table).iter().copied())
    }
  };
  Some(route)
}

fn route_profile(change: Change<ProfileRow>) -> Route {
  if change.operation != Operation::Update {
    return Route::emit([Signal::ProfilesChanged]);
  }

  let (Some(old), Some(new)) = (change.old, change.new) else {
    // No before-image, so the changed columns are unknown.
    return Route::emit(refetch_signals(Table::Profiles).iter().copied());
  };

  let fields = old.changed_fields(&new);
  if fields.is_empty() {
    tracing::debug!(subject_id = %new.subject_id, "profile update changed nothing");
    return Route::default();
  }

  if fields.len() == 1 && fields.contains(&ProfileField::Packed) {
    return Route {
      signals: BTreeSet::from([Signal::PackedToggled]),
      patch:   Some(RowPatch::Packed { subject_id: new.subject_id, packed: new.packed }),
    };
  }

  let mut signals = BTreeSet::new();
  if fields.contains(&ProfileField::CurrentStatus) {
    signals.insert(Signal::HealthStatusChanged);
  }
  if fields.iter().any(|f| *f != ProfileField::CurrentStatus) {
    signals.insert(Signal::ProfilesChanged);
  }
  Route { signals, patch: None }
}

fn route_status_event(change: Change<StatusEvent>) -> Route {
  if change.operation != Operation::Insert {
    let operation: &'static str = change.operation.into();
    tracing::warn!(operation, "status log is append-only but a row was rewritten");
  }
  Route::emit([Signal::HealthStatusChanged])
}

// ─── Adapter ─────────────────────────────────────────────────────────────────

/// Why the feed stopped delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StaleReason {
  /// The push channel closed underneath us.
  Disconnected,
  /// The owner closed the handle.
  Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
  Live,
  Stale { reason: StaleReason },
}

/// Routes push notifications onto a bus and a patch registry.
#[derive(Clone)]
pub struct ChangeFeedAdapter {
  bus:     EventBus,
  patches: PatchRegistry,
}

impl ChangeFeedAdapter {
  pub fn new(bus: EventBus) -> Self { Self { bus, patches: PatchRegistry::default() } }

  pub fn patches(&self) -> &PatchRegistry { &self.patches }

  /// Route one notification and act on it.
  pub fn dispatch(&self, raw: &RawChange) {
    let Some(route) = route(raw) else { return };
    if let Some(patch) = &route.patch {
      let consumers = self.patches.deliver(patch);
      tracing::debug!(?patch, consumers, "patched");
    }
    for signal in route.signals {
      self.bus.emit(signal);
    }
  }

  /// Emit every full-refetch signal once. Used after notifications were
  /// missed.
  pub fn resync(&self) {
    let signals: BTreeSet<Signal> = [Table::Profiles, Table::StatusEvents]
      .into_iter()
      .flat_map(|t| refetch_signals(t).iter().copied())
      .collect();
    for signal in signals {
      self.bus.emit(signal);
    }
  }

  /// Start draining `channel` on a background task.
  ///
  /// Must be called from within a tokio runtime.
  pub fn attach<P: PushChannel + ?Sized>(&self, channel: &P) -> FeedHandle {
    let mut changes = channel.subscribe_changes();
    let (status_tx, status_rx) = watch::channel(FeedStatus::Live);
    let status_tx = Arc::new(status_tx);
    let closed = Arc::new(AtomicBool::new(false));

    let adapter = self.clone();
    let task_status = Arc::clone(&status_tx);
    let task_closed = Arc::clone(&closed);
    let task = tokio::spawn(async move {
      loop {
        match changes.recv().await {
          Ok(raw) => {
            if task_closed.load(Ordering::Acquire) {
              break;
            }
            adapter.dispatch(&raw);
          }
          Err(RecvError::Lagged(missed)) => {
            tracing::warn!(missed, "change feed lagged; resynchronising");
            if !task_closed.load(Ordering::Acquire) {
              adapter.resync();
            }
          }
          Err(RecvError::Closed) => {
            tracing::warn!("push channel closed; feed is stale");
            task_status.send_replace(FeedStatus::Stale { reason: StaleReason::Disconnected });
            break;
          }
        }
      }
    });

    tracing::info!("change feed attached");
    FeedHandle { task, status_tx, status_rx, closed }
  }
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Ownership of one attached feed. Dropping it closes the feed.
pub struct FeedHandle {
  task:      JoinHandle<()>,
  status_tx: Arc<watch::Sender<FeedStatus>>,
  status_rx: watch::Receiver<FeedStatus>,
  closed:    Arc<AtomicBool>,
}

impl FeedHandle {
  pub fn status(&self) -> FeedStatus { *self.status_rx.borrow() }

  /// A receiver that observes every status transition.
  pub fn watch(&self) -> watch::Receiver<FeedStatus> { self.status_rx.clone() }

  /// `Ok` while the feed is live.
  pub fn check(&self) -> Result<()> {
    match self.status() {
      FeedStatus::Live => Ok(()),
      FeedStatus::Stale { .. } => Err(Error::ChannelDisconnect),
    }
  }

  /// Stop delivering. No notification is dispatched after this returns.
  pub fn close(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    self.task.abort();
    self.status_tx.send_if_modified(|status| {
      if *status == FeedStatus::Live {
        *status = FeedStatus::Stale { reason: StaleReason::Detached };
        true
      } else {
        false
      }
    });
    tracing::info!("change feed closed");
  }
}

impl Drop for FeedHandle {
  fn drop(&mut self) { self.close(); }
}
