//! The optimistic mutation coordinator.
//!
//! A mutation is applied to local state first, then written to the store.
//! If the write fails the local value is rolled back to the exact snapshot
//! taken when the mutation was applied. Writes of one [`EntityKey`] leave in
//! the order they were applied locally, so the store sees them in that order
//! too.
//!
//! ```text
//! begin:   snapshot + apply + ticket     (one short critical section)
//! run:     wait for turn -> write -> Committed | RolledBack -> next turn
//! ```

use std::{
  collections::{BTreeSet, HashMap},
  fmt,
  future::Future,
  sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
  time::Duration,
};

use tokio::sync::watch;
use uuid::Uuid;

use crate::{
  Error, Result,
  bus::{EventBus, Signal},
  error::BoxError,
};

// ─── Keys and targets ────────────────────────────────────────────────────────

/// The unit of optimistic state. Attempts on different keys never wait on
/// each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
  HealthStatus(Uuid),
  Packed(Uuid),
}

impl EntityKey {
  pub fn subject_id(&self) -> Uuid {
    match self {
      Self::HealthStatus(id) | Self::Packed(id) => *id,
    }
  }

  /// The signal that makes every view holding this key reload it from the
  /// store. Unlike a commit signal it is never absorbed as a patch.
  pub fn refetch_signal(&self) -> Signal {
    match self {
      Self::HealthStatus(_) => Signal::HealthStatusChanged,
      Self::Packed(_) => Signal::ProfilesChanged,
    }
  }
}

impl fmt::Display for EntityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::HealthStatus(id) => write!(f, "health_status/{id}"),
      Self::Packed(id) => write!(f, "packed/{id}"),
    }
  }
}

/// Local, already-loaded state that optimistic values are written into.
pub trait LocalState<V>: Send + Sync {
  /// The current local value for `key`, or `None` if it is not loaded.
  fn snapshot(&self, key: EntityKey) -> Option<V>;

  fn apply(&self, key: EntityKey, value: V);
}

// ─── Coordinator ─────────────────────────────────────────────────────────────

/// Bookkeeping for one key with attempts in flight.
struct Slot {
  next_ticket:      u64,
  in_flight:        BTreeSet<u64>,
  /// The ticket allowed to write: the oldest one still in flight.
  turn:             watch::Sender<u64>,
  /// A failed attempt left a later optimistic value in place. If every later
  /// attempt also fails, local state may disagree with the store.
  shadowed_failure: bool,
}

impl Slot {
  fn new() -> Self {
    let (turn, _) = watch::channel(0);
    Self { next_ticket: 0, in_flight: BTreeSet::new(), turn, shadowed_failure: false }
  }
}

struct CoordinatorInner {
  bus:           EventBus,
  write_timeout: Option<Duration>,
  slots:         Mutex<HashMap<EntityKey, Slot>>,
}

impl CoordinatorInner {
  fn slots(&self) -> MutexGuard<'_, HashMap<EntityKey, Slot>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[derive(Clone)]
pub struct MutationCoordinator {
  inner: Arc<CoordinatorInner>,
}

impl MutationCoordinator {
  /// `write_timeout` bounds each remote write; `None` waits forever.
  pub fn new(bus: EventBus, write_timeout: Option<Duration>) -> Self {
    Self {
      inner: Arc::new(CoordinatorInner { bus, write_timeout, slots: Mutex::new(HashMap::new()) }),
    }
  }

  /// Number of attempts on `key` that have not settled yet.
  pub fn in_flight(&self, key: EntityKey) -> usize {
    self.inner.slots().get(&key).map_or(0, |slot| slot.in_flight.len())
  }

  /// Apply `next(current)` to `target` for `key` and queue the attempt.
  ///
  /// The snapshot and the apply happen in one critical section, so a second
  /// attempt on the same key snapshots the first one's optimistic value.
  /// `commit` is emitted once the write succeeds.
  pub fn begin<V, S>(
    &self,
    target: &Arc<S>,
    key:    EntityKey,
    commit: Signal,
    next:   impl FnOnce(&V) -> V,
  ) -> Result<Attempt<V, S>>
  where
    V: Clone,
    S: LocalState<V>,
  {
    let mut slots = self.inner.slots();

    let previous = target.snapshot(key).ok_or(Error::NotLoaded(key))?;
    let applied = next(&previous);
    target.apply(key, applied.clone());

    let slot = slots.entry(key).or_insert_with(Slot::new);
    let ticket = slot.next_ticket;
    slot.next_ticket += 1;
    slot.in_flight.insert(ticket);
    let turn = slot.turn.subscribe();
    drop(slots);

    tracing::debug!(%key, ticket, "applied optimistically");
    Ok(Attempt {
      inner: Arc::clone(&self.inner),
      key,
      ticket,
      commit,
      target: Arc::downgrade(target),
      previous: Some(previous),
      applied,
      turn,
      phase: Phase::Pending,
    })
  }
}

// ─── Attempt ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Pending,
  Committed,
  Settled,
}

/// One applied, not yet settled mutation.
///
/// Dropping an attempt before its write finished rolls it back and hands the
/// turn to the next attempt on the key.
#[must_use = "an attempt that is never run is rolled back on drop"]
pub struct Attempt<V: Clone, S: LocalState<V>> {
  inner:    Arc<CoordinatorInner>,
  key:      EntityKey,
  ticket:   u64,
  commit:   Signal,
  target:   Weak<S>,
  previous: Option<V>,
  applied:  V,
  turn:     watch::Receiver<u64>,
  phase:    Phase,
}

/// The result of a committed mutation.
#[derive(Debug)]
pub struct MutationReceipt<T> {
  pub key:       EntityKey,
  /// What the primary write returned.
  pub output:    T,
  /// A failed follow-up write. It never rolls back the primary.
  pub secondary: Option<Error>,
}

impl<T> MutationReceipt<T> {
  pub fn is_clean(&self) -> bool { self.secondary.is_none() }
}

impl<V: Clone, S: LocalState<V>> Attempt<V, S> {
  pub fn key(&self) -> EntityKey { self.key }

  pub fn ticket(&self) -> u64 { self.ticket }

  /// The optimistic value now in local state.
  pub fn applied(&self) -> &V { &self.applied }

  /// The value a rollback restores.
  pub fn previous(&self) -> Option<&V> { self.previous.as_ref() }

  /// Write the mutation to the store.
  pub async fn run<T, E, W, Fut>(self, write: W) -> Result<MutationReceipt<T>>
  where
    W: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
  {
    self
      .run_then(write, |_| async { Ok::<(), BoxError>(()) })
      .await
  }

  /// Write the mutation, then run a best-effort follow-up write while still
  /// holding the key's turn. The commit signal is emitted after both.
  pub async fn run_then<T, E, W, Fut, U, E2, G, GFut>(
    mut self,
    write:     W,
    secondary: G,
  ) -> Result<MutationReceipt<T>>
  where
    W: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
    G: FnOnce(&T) -> GFut,
    GFut: Future<Output = Result<U, E2>>,
    E2: Into<BoxError>,
  {
    let key = self.key;
    if !self.wait_turn().await {
      self.settle(false);
      return Err(Error::Cancelled { key });
    }

    let limit = self.inner.write_timeout;
    let output = match within(limit, write()).await {
      Ok(Ok(output)) => output,
      Ok(Err(error)) => {
        let source: BoxError = error.into();
        tracing::warn!(%key, error = %source, "write failed; rolling back");
        self.settle(false);
        return Err(Error::PrimaryWrite { key, source });
      }
      Err(after) => {
        tracing::warn!(%key, ?after, "write timed out; rolling back");
        self.settle(false);
        return Err(Error::WriteTimedOut { key, after });
      }
    };
    self.phase = Phase::Committed;

    let failure: Option<BoxError> = match within(limit, secondary(&output)).await {
      Ok(Ok(_)) => None,
      Ok(Err(error)) => Some(error.into()),
      Err(after) => Some(format!("timed out after {after:?}").into()),
    };
    let secondary = failure.map(|source| {
      let error = Error::SecondaryWrite { key, source };
      tracing::warn!(%key, %error, "follow-up write failed; primary stands");
      error
    });

    self.settle(true);
    tracing::debug!(%key, ticket = self.ticket, "committed");
    Ok(MutationReceipt { key, output, secondary })
  }

  async fn wait_turn(&mut self) -> bool {
    let ticket = self.ticket;
    self.turn.wait_for(|turn| *turn == ticket).await.is_ok()
  }

  /// Leave the key's queue and hand the turn on.
  fn settle(&mut self, committed: bool) {
    if self.phase == Phase::Settled {
      return;
    }

    let inner = Arc::clone(&self.inner);
    let mut resync = false;
    {
      let mut slots = inner.slots();
      if let Some(slot) = slots.get_mut(&self.key) {
        slot.in_flight.remove(&self.ticket);
        let shadowed = slot.in_flight.range(self.ticket + 1..).next().is_some();

        if committed {
          slot.shadowed_failure = false;
        } else if shadowed {
          slot.shadowed_failure = true;
          tracing::debug!(key = %self.key, ticket = self.ticket, "rollback shadowed by a later attempt");
        } else {
          self.restore();
          resync = std::mem::take(&mut slot.shadowed_failure);
        }

        let next = slot.in_flight.first().copied().unwrap_or(slot.next_ticket);
        slot.turn.send_replace(next);
        if slot.in_flight.is_empty() {
          slots.remove(&self.key);
        }
      }
    }
    self.phase = Phase::Settled;

    if committed {
      inner.bus.emit(self.commit);
    } else if resync {
      // The store may still hold the value from before a shadowed failure;
      // ask the views to reload it.
      tracing::debug!(key = %self.key, "resynchronising after shadowed failures");
      inner.bus.emit(self.key.refetch_signal());
    }
  }

  fn restore(&mut self) {
    match (self.target.upgrade(), self.previous.take()) {
      (Some(target), Some(previous)) => {
        target.apply(self.key, previous);
        tracing::debug!(key = %self.key, ticket = self.ticket, "rolled back");
      }
      (None, _) => tracing::debug!(key = %self.key, "local state released; nothing to roll back"),
      (Some(_), None) => {}
    }
  }
}

impl<V: Clone, S: LocalState<V>> Drop for Attempt<V, S> {
  fn drop(&mut self) {
    match self.phase {
      Phase::Pending => {
        tracing::debug!(key = %self.key, ticket = self.ticket, "mutation cancelled; rolling back");
        self.settle(false);
      }
      Phase::Committed => self.settle(true),
      Phase::Settled => {}
    }
  }
}

async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Result<F::Output, Duration> {
  match limit {
    Some(after) => tokio::time::timeout(after, fut).await.map_err(|_| after),
    None => Ok(fut.await),
  }
}
