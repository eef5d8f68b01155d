//! A store wrapper that can fail, stall or replace its push channel on
//! demand, plus small helpers shared by the integration tests.

#![allow(dead_code)]

use std::{
  collections::HashSet,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  time::Duration,
};

use sickbay_core::{
  change::RawChange,
  profile::{NewProfile, ProfileForm, UserProfile},
  status::{HealthStatus, NewStatusEvent, StatusEvent},
  store::{HealthStore, ProfileQuery, PushChannel},
};
use sickbay_store_sqlite::SqliteStore;
use sickbay_sync::{EventBus, Signal, Subscription};
use tokio::sync::{Notify, Semaphore, broadcast};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FaultError {
  #[error("injected failure in {0}")]
  Injected(&'static str),

  #[error(transparent)]
  Store(#[from] sickbay_store_sqlite::Error),
}

pub struct FaultyStore {
  pub inner:     SqliteStore,
  failing:       Mutex<HashSet<&'static str>>,
  holding:       AtomicBool,
  gate:          Semaphore,
  /// Notified each time a write reaches the store.
  pub entered:   Notify,
  manual_feed:   AtomicBool,
  manual:        Mutex<Option<broadcast::Sender<RawChange>>>,
}

impl FaultyStore {
  pub async fn new() -> Arc<Self> {
    Arc::new(Self {
      inner:       SqliteStore::open_in_memory().await.expect("in-memory store"),
      failing:     Mutex::new(HashSet::new()),
      holding:     AtomicBool::new(false),
      gate:        Semaphore::new(0),
      entered:     Notify::new(),
      manual_feed: AtomicBool::new(false),
      manual:      Mutex::new(None),
    })
  }

  /// A store whose push channel is driven by the test instead of by writes.
  pub async fn with_manual_feed(capacity: usize) -> Arc<Self> {
    let store = Self::new().await;
    store.manual_feed.store(true, Ordering::SeqCst);
    *store.manual.lock().unwrap() = Some(broadcast::channel(capacity).0);
    store
  }

  pub fn fail(&self, op: &'static str) { self.failing.lock().unwrap().insert(op); }

  pub fn heal(&self, op: &'static str) { self.failing.lock().unwrap().remove(op); }

  /// Stall every write until [`Self::release`].
  pub fn hold(&self) { self.holding.store(true, Ordering::SeqCst); }

  pub fn release(&self, writes: usize) { self.gate.add_permits(writes); }

  pub fn inject(&self, change: RawChange) {
    let manual = self.manual.lock().unwrap();
    manual.as_ref().expect("manual feed").send(change).expect("feed subscriber");
  }

  /// Close the manual push channel.
  pub fn disconnect(&self) { self.manual.lock().unwrap().take(); }

  pub fn reconnect(&self, capacity: usize) {
    *self.manual.lock().unwrap() = Some(broadcast::channel(capacity).0);
  }

  async fn before_write(&self, op: &'static str) -> Result<(), FaultError> {
    self.entered.notify_one();
    if self.holding.load(Ordering::SeqCst) {
      self.gate.acquire().await.expect("gate open").forget();
    }
    self.check(op)
  }

  fn check(&self, op: &'static str) -> Result<(), FaultError> {
    if self.failing.lock().unwrap().contains(op) {
      return Err(FaultError::Injected(op));
    }
    Ok(())
  }
}

impl HealthStore for FaultyStore {
  type Error = FaultError;

  async fn add_profile(&self, input: NewProfile) -> Result<UserProfile, FaultError> {
    Ok(self.inner.add_profile(input).await?)
  }

  async fn get_profile(&self, subject_id: Uuid) -> Result<Option<UserProfile>, FaultError> {
    self.check("read")?;
    Ok(self.inner.get_profile(subject_id).await?)
  }

  async fn list_profiles(&self, query: ProfileQuery) -> Result<Vec<UserProfile>, FaultError> {
    self.check("read")?;
    Ok(self.inner.list_profiles(query).await?)
  }

  async fn set_current_status(
    &self,
    subject_id: Uuid,
    status: HealthStatus,
  ) -> Result<UserProfile, FaultError> {
    self.before_write("set_current_status").await?;
    Ok(self.inner.set_current_status(subject_id, status).await?)
  }

  async fn set_packed(&self, subject_id: Uuid, packed: bool) -> Result<UserProfile, FaultError> {
    self.before_write("set_packed").await?;
    Ok(self.inner.set_packed(subject_id, packed).await?)
  }

  async fn update_profile(&self, subject_id: Uuid, form: ProfileForm) -> Result<UserProfile, FaultError> {
    self.before_write("update_profile").await?;
    Ok(self.inner.update_profile(subject_id, form).await?)
  }

  async fn reset_all_packed(&self) -> Result<u64, FaultError> {
    self.before_write("reset_all_packed").await?;
    Ok(self.inner.reset_all_packed().await?)
  }

  async fn append_status_event(&self, input: NewStatusEvent) -> Result<StatusEvent, FaultError> {
    self.before_write("append_status_event").await?;
    Ok(self.inner.append_status_event(input).await?)
  }

  async fn list_status_events(&self) -> Result<Vec<StatusEvent>, FaultError> {
    self.check("read")?;
    Ok(self.inner.list_status_events().await?)
  }
}

impl PushChannel for FaultyStore {
  fn subscribe_changes(&self) -> broadcast::Receiver<RawChange> {
    if !self.manual_feed.load(Ordering::SeqCst) {
      return self.inner.subscribe_changes();
    }
    match self.manual.lock().unwrap().as_ref() {
      Some(tx) => tx.subscribe(),
      None => broadcast::channel(1).1,
    }
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

pub async fn resident(store: &FaultyStore, name: &str, room: &str) -> Uuid {
  let id = Uuid::new_v4();
  store
    .inner
    .add_profile(NewProfile { subject_id: id, display_name: name.into(), room_label: room.into() })
    .await
    .unwrap();
  id
}

/// Record a transition the way a client toggle would, bypassing the sync
/// layer.
pub async fn report(store: &FaultyStore, id: Uuid, status: HealthStatus) {
  store.inner.set_current_status(id, status).await.unwrap();
  store
    .inner
    .append_status_event(NewStatusEvent::new(id, status))
    .await
    .unwrap();
}

/// Poll `cond` until it holds, failing the test after a second.
pub async fn until(mut cond: impl FnMut() -> bool) {
  for _ in 0..200 {
    if cond() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  panic!("condition not reached in time");
}

/// Count emits of `signal` on `bus`.
pub fn count(bus: &EventBus, signal: Signal) -> (Arc<AtomicUsize>, Subscription) {
  let hits = Arc::new(AtomicUsize::new(0));
  let h = Arc::clone(&hits);
  let sub = bus.subscribe(signal, move || {
    h.fetch_add(1, Ordering::SeqCst);
  });
  (hits, sub)
}
