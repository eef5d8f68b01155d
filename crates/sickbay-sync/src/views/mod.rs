//! The dashboard's views and the machinery they share.
//!
//! A view holds its loaded data in a [`ViewCore`]. Mounting it subscribes
//! its full-refetch signals on the bus (each one only marks the view dirty)
//! and registers its patch signals with the feed's patch registry. Dirty
//! marks coalesce: however many signals arrive, the next reconcile pass
//! refetches the view once.

use std::sync::{
  Arc, Mutex, MutexGuard, PoisonError,
  atomic::{AtomicBool, AtomicU64, Ordering},
};

use tokio::sync::Notify;

use crate::{
  Error, Result,
  bus::{EventBus, Subscription},
  coordinator::MutationCoordinator,
  feed::{PatchRegistration, PatchRegistry, RowPatch},
  policy::ReconcilePolicy,
};

mod metrics;
mod status;
mod trend;
mod worklist;

pub use metrics::MetricsView;
pub use status::{StatusView, SubjectStatus};
pub use trend::TrendView;
pub use worklist::WorklistView;

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState<T> {
  Loading,
  Ready(T),
  /// The last load failed. Kept until the next invalidation.
  Failed(String),
  /// Nothing to show, e.g. no signed-in subject.
  Inert,
}

impl<T> ViewState<T> {
  pub fn ready(&self) -> Option<&T> {
    match self {
      Self::Ready(data) => Some(data),
      _ => None,
    }
  }

  pub fn is_loading(&self) -> bool { matches!(self, Self::Loading) }
}

/// Everything the views need from the dashboard root scope.
#[derive(Clone)]
pub struct SyncContext {
  pub bus:         EventBus,
  pub patches:     PatchRegistry,
  pub coordinator: MutationCoordinator,
  /// Woken whenever a view goes from clean to dirty.
  pub wake:        Arc<Notify>,
}

// ─── Core ────────────────────────────────────────────────────────────────────

/// Loaded data plus the bookkeeping shared by every view.
pub struct ViewCore<T> {
  name:       &'static str,
  state:      Mutex<ViewState<T>>,
  generation: AtomicU64,
  dirty:      AtomicBool,
  mounted:    AtomicBool,
  wake:       Arc<Notify>,
}

impl<T: Clone> ViewCore<T> {
  /// A mounted core that still needs its first load.
  pub(crate) fn new(name: &'static str, wake: Arc<Notify>) -> Self {
    Self {
      name,
      state: Mutex::new(ViewState::Loading),
      generation: AtomicU64::new(0),
      dirty: AtomicBool::new(true),
      mounted: AtomicBool::new(true),
      wake,
    }
  }

  pub fn name(&self) -> &'static str { self.name }

  pub fn state(&self) -> ViewState<T> { self.lock().clone() }

  /// Number of successful refetches so far.
  pub fn generation(&self) -> u64 { self.generation.load(Ordering::Acquire) }

  pub fn is_dirty(&self) -> bool { self.dirty.load(Ordering::Acquire) }

  pub fn is_mounted(&self) -> bool { self.mounted.load(Ordering::Acquire) }

  pub(crate) fn lock(&self) -> MutexGuard<'_, ViewState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn mark_dirty(&self) {
    if !self.dirty.swap(true, Ordering::AcqRel) {
      tracing::trace!(view = self.name, "marked dirty");
      self.wake.notify_one();
    }
  }

  /// Clear the dirty mark. Returns whether a refetch is due.
  pub(crate) fn take_dirty(&self) -> bool {
    self.is_mounted() && self.dirty.swap(false, Ordering::AcqRel)
  }

  /// Store the outcome of a refetch.
  pub(crate) fn finish(&self, loaded: Result<ViewState<T>>) -> Result<()> {
    match loaded {
      Ok(state) => {
        *self.lock() = state;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(view = self.name, generation, "refetched");
        Ok(())
      }
      Err(error) => {
        tracing::warn!(view = self.name, %error, "refetch failed");
        *self.lock() = ViewState::Failed(error.to_string());
        Err(error)
      }
    }
  }
}

/// Wrap a store error as a read failure of `view`.
pub(crate) fn read_error<E>(view: &'static str) -> impl FnOnce(E) -> Error
where
  E: std::error::Error + Send + Sync + 'static,
{
  move |e| Error::Read { view, source: Box::new(e) }
}

// ─── Mount ───────────────────────────────────────────────────────────────────

/// The bus subscriptions and patch registrations one mounted view owns.
pub(crate) struct Mount {
  subscriptions: Vec<Subscription>,
  patches:       Vec<PatchRegistration>,
}

impl Mount {
  /// Wire `core` up according to `policy`. `patch` is called for every
  /// patch delivered under one of the policy's patch signals.
  pub(crate) fn attach<T, F>(
    core:   &Arc<ViewCore<T>>,
    policy: &ReconcilePolicy,
    ctx:    &SyncContext,
    patch:  F,
  ) -> Self
  where
    T: Clone + Send + 'static,
    F: Fn(&ViewCore<T>, &RowPatch) + Clone + Send + Sync + 'static,
  {
    let subscriptions = policy
      .refetch_signals()
      .map(|signal| {
        let weak = Arc::downgrade(core);
        ctx.bus.subscribe(signal, move || {
          if let Some(core) = weak.upgrade() {
            core.mark_dirty();
          }
        })
      })
      .collect();

    let patches = policy
      .patch_signals()
      .map(|signal| {
        let weak = Arc::downgrade(core);
        let patch = patch.clone();
        ctx.patches.register(signal, move |p| {
          if let Some(core) = weak.upgrade() {
            patch(core.as_ref(), p);
          }
        })
      })
      .collect();

    tracing::debug!(view = core.name(), "mounted");
    Self { subscriptions, patches }
  }

  /// Release every registration. Safe to call more than once.
  pub(crate) fn release<T: Clone>(&mut self, core: &ViewCore<T>) {
    if !core.mounted.swap(false, Ordering::AcqRel) {
      return;
    }
    let released = self.subscriptions.len() + self.patches.len();
    self.subscriptions.clear();
    self.patches.clear();
    tracing::debug!(view = core.name(), released, "unmounted");
  }
}

/// Shared unmount for views holding their mount behind a mutex.
pub(crate) fn unmount<T: Clone>(mount: &Mutex<Mount>, core: &ViewCore<T>) {
  mount.lock().unwrap_or_else(PoisonError::into_inner).release(core);
}
