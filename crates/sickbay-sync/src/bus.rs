//! The local event bus: named invalidation pulses with no payload.
//!
//! Dispatch is synchronous and in-process. Each emit invokes every listener
//! registered for the signal at most once, in registration order. The bus is
//! an ordinary value owned by the dashboard root scope; there is no global
//! instance.

use std::{
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{
    Arc, Mutex, MutexGuard, PoisonError, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
};

// ─── Signal ──────────────────────────────────────────────────────────────────

/// The invalidation pulses views subscribe to.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  strum::Display,
  strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Signal {
  /// A status toggle happened somewhere.
  HealthStatusChanged,
  /// Profile rows were added, removed or edited.
  ProfilesChanged,
  /// A single packed flag flipped.
  PackedToggled,
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

type Callback = Arc<dyn Fn() + Send + Sync>;

struct Listener {
  id:       u64,
  signal:   Signal,
  callback: Callback,
}

#[derive(Default)]
struct BusInner {
  listeners: Mutex<Vec<Listener>>,
  next_id:   AtomicU64,
  disposed:  AtomicBool,
}

impl BusInner {
  fn listeners(&self) -> MutexGuard<'_, Vec<Listener>> {
    self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn is_registered(&self, id: u64) -> bool { self.listeners().iter().any(|l| l.id == id) }

  fn remove(&self, id: u64) -> bool {
    let mut listeners = self.listeners();
    let before = listeners.len();
    listeners.retain(|l| l.id != id);
    listeners.len() != before
  }
}

/// A cloneable handle to one bus. Clones share listeners.
#[derive(Clone, Default)]
pub struct EventBus {
  inner: Arc<BusInner>,
}

impl EventBus {
  pub fn new() -> Self { Self::default() }

  /// Register `callback` for `signal`. The registration lives until the
  /// returned [`Subscription`] is unsubscribed or dropped.
  pub fn subscribe(&self, signal: Signal, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

    if self.is_disposed() {
      tracing::warn!(%signal, "subscribe on a disposed bus; registration ignored");
    } else {
      self.inner.listeners().push(Listener { id, signal, callback: Arc::new(callback) });
    }

    Subscription { bus: Arc::downgrade(&self.inner), id, signal }
  }

  /// Invoke every listener of `signal` and return how many ran to
  /// completion.
  ///
  /// Listeners are snapshotted before dispatch, so a listener registered
  /// during an emit is not called by it. A listener removed during an emit
  /// is skipped if it has not run yet. A panicking listener is logged and
  /// does not stop delivery to the rest.
  pub fn emit(&self, signal: Signal) -> usize {
    if self.is_disposed() {
      tracing::debug!(%signal, "emit on a disposed bus");
      return 0;
    }

    let targets: Vec<(u64, Callback)> = self
      .inner
      .listeners()
      .iter()
      .filter(|l| l.signal == signal)
      .map(|l| (l.id, Arc::clone(&l.callback)))
      .collect();

    let mut delivered = 0;
    for (id, callback) in targets {
      if !self.inner.is_registered(id) {
        continue;
      }
      match catch_unwind(AssertUnwindSafe(|| callback())) {
        Ok(()) => delivered += 1,
        Err(_) => tracing::error!(%signal, listener = id, "bus listener panicked"),
      }
    }
    tracing::trace!(%signal, delivered, "emitted");
    delivered
  }

  /// Number of live registrations across all signals.
  pub fn listener_count(&self) -> usize { self.inner.listeners().len() }

  /// Drop every registration. Later emits are no-ops.
  pub fn dispose(&self) {
    self.inner.disposed.store(true, Ordering::Release);
    let dropped = std::mem::take(&mut *self.inner.listeners());
    tracing::debug!(listeners = dropped.len(), "event bus disposed");
  }

  pub fn is_disposed(&self) -> bool { self.inner.disposed.load(Ordering::Acquire) }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// Ownership of one bus registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
  bus:    Weak<BusInner>,
  id:     u64,
  signal: Signal,
}

impl Subscription {
  pub fn signal(&self) -> Signal { self.signal }

  /// Remove this registration. Returns whether it was still registered;
  /// calling it again is a no-op.
  pub fn unsubscribe(&self) -> bool {
    self.bus.upgrade().is_some_and(|bus| bus.remove(self.id))
  }
}

impl Drop for Subscription {
  fn drop(&mut self) { self.unsubscribe(); }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("id", &self.id)
      .field("signal", &self.signal)
      .finish()
  }
}
