//! [`SqliteStore`], the SQLite implementation of [`HealthStore`] and
//! [`PushChannel`].

use std::path::Path;

use chrono::SubsecRound as _;
use rusqlite::{OptionalExtension as _, types::Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use sickbay_core::{
  change::{ProfileRow, RawChange, Table},
  profile::{NewProfile, ProfileForm, UserProfile},
  status::{HealthStatus, NewStatusEvent, StatusEvent},
  store::{HealthStore, ProfileQuery, PushChannel},
};

use crate::{
  encode::{
    EVENT_COLUMNS, PROFILE_COLUMNS, RawProfile, RawStatusEvent, encode_dt, encode_status,
    encode_uuid, now,
  },
  schema::SCHEMA,
  Error, Result,
};

/// Notifications buffered per subscriber before it is considered lagged.
const CHANGE_CAPACITY: usize = 1024;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A sickbay row store backed by a single SQLite file.
///
/// Every successful write publishes one [`RawChange`] per affected row on
/// the store's push channel. Cloning is cheap: the inner connection and the
/// channel are reference-counted, and clones share both.
#[derive(Clone)]
pub struct SqliteStore {
  conn:    tokio_rusqlite::Connection,
  changes: broadcast::Sender<RawChange>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
    let store = Self { conn, changes };
    store
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(store)
  }

  #[cfg(test)]
  pub(crate) fn connection(&self) -> &tokio_rusqlite::Connection { &self.conn }

  fn publish(&self, change: RawChange) {
    if self.changes.send(change).is_err() {
      tracing::trace!("change published with no subscribers");
    }
  }

  fn publish_profile_update(&self, old: RawProfile, new: RawProfile) -> Result<UserProfile> {
    let old = old.into_row()?;
    let new = new.into_row()?;
    self.publish(RawChange::update(
      Table::Profiles,
      Some(serde_json::to_value(&old)?),
      serde_json::to_value(&new)?,
    ));
    Ok(new.into_profile())
  }

  /// Run `UPDATE profiles SET {assignments}` for one subject inside a
  /// transaction, capturing the before and after row images.
  ///
  /// `?1` is bound to the subject id. `bind` derives the values for `?2`
  /// onwards from the row as read inside the same transaction.
  async fn rewrite_profile<F>(
    &self,
    subject_id:  Uuid,
    assignments: &'static str,
    bind:        F,
  ) -> Result<UserProfile>
  where
    F: FnOnce(RawProfile) -> Result<Vec<Value>> + Send + 'static,
  {
    let id_str = encode_uuid(subject_id);

    let images: Result<(RawProfile, RawProfile)> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let select = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE subject_id = ?1");

        let Some(old) = tx
          .query_row(&select, rusqlite::params![id_str], RawProfile::from_row)
          .optional()?
        else {
          return Ok(Err(Error::SubjectNotFound(subject_id)));
        };
        // Dropping `tx` uncommitted rolls back.
        let values = match bind(old.clone()) {
          Ok(values) => values,
          Err(error) => return Ok(Err(error)),
        };

        let mut params = vec![Value::Text(id_str.clone())];
        params.extend(values);
        tx.execute(
          &format!("UPDATE profiles SET {assignments} WHERE subject_id = ?1"),
          rusqlite::params_from_iter(params),
        )?;

        let new = tx.query_row(&select, rusqlite::params![id_str], RawProfile::from_row)?;
        tx.commit()?;
        Ok(Ok((old, new)))
      })
      .await?;

    let (old, new) = images?;
    self.publish_profile_update(old, new)
  }
}

fn opt_text(s: Option<String>) -> Value { s.map_or(Value::Null, Value::Text) }

// ─── HealthStore impl ────────────────────────────────────────────────────────

impl HealthStore for SqliteStore {
  type Error = Error;

  // ── Profiles ──────────────────────────────────────────────────────────────

  async fn add_profile(&self, input: NewProfile) -> Result<UserProfile> {
    let profile = UserProfile {
      subject_id:     input.subject_id,
      display_name:   input.display_name.trim().to_owned(),
      room_label:     input.room_label.trim().to_owned(),
      current_status: HealthStatus::Healthy,
      meals:          Default::default(),
      packed:         false,
      created_at:     now(),
    };

    let id_str     = encode_uuid(profile.subject_id);
    let name       = profile.display_name.clone();
    let room       = profile.room_label.clone();
    let status_str = encode_status(profile.current_status);
    let at_str     = encode_dt(profile.created_at);

    let inserted: bool = self
      .conn
      .call(move |conn| {
        let exists = conn
          .query_row(
            "SELECT 1 FROM profiles WHERE subject_id = ?1",
            rusqlite::params![id_str],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if exists {
          return Ok(false);
        }

        conn.execute(
          "INSERT INTO profiles (subject_id, display_name, room_label, current_status, packed, created_at)
           VALUES (?1, ?2, ?3, ?4, 0, ?5)",
          rusqlite::params![id_str, name, room, status_str, at_str],
        )?;
        Ok(true)
      })
      .await?;

    if !inserted {
      return Err(Error::DuplicateSubject(profile.subject_id));
    }

    self.publish(RawChange::insert(
      Table::Profiles,
      serde_json::to_value(ProfileRow::from(&profile))?,
    ));
    Ok(profile)
  }

  async fn get_profile(&self, subject_id: Uuid) -> Result<Option<UserProfile>> {
    let id_str = encode_uuid(subject_id);

    let raw: Option<RawProfile> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE subject_id = ?1"),
            rusqlite::params![id_str],
            RawProfile::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawProfile::into_profile).transpose()
  }

  async fn list_profiles(&self, query: ProfileQuery) -> Result<Vec<UserProfile>> {
    let status_str = query.status.map(encode_status);

    let raws: Vec<RawProfile> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {PROFILE_COLUMNS} FROM profiles
           WHERE ?1 IS NULL OR current_status = ?1
           ORDER BY room_label, display_name, subject_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![status_str], RawProfile::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawProfile::into_profile).collect()
  }

  async fn set_current_status(&self, subject_id: Uuid, status: HealthStatus) -> Result<UserProfile> {
    self
      .rewrite_profile(subject_id, "current_status = ?2", move |_| {
        Ok(vec![Value::Text(encode_status(status).to_owned())])
      })
      .await
  }

  async fn set_packed(&self, subject_id: Uuid, packed: bool) -> Result<UserProfile> {
    self
      .rewrite_profile(subject_id, "packed = ?2", move |_| Ok(vec![Value::Integer(i64::from(packed))]))
      .await
  }

  async fn update_profile(&self, subject_id: Uuid, form: ProfileForm) -> Result<UserProfile> {
    let at = now();
    let dt = |d: Option<chrono::DateTime<chrono::Utc>>| opt_text(d.map(encode_dt));
    self
      .rewrite_profile(
        subject_id,
        "display_name = ?2, room_label = ?3,
         lunch_note = ?4, lunch_note_updated_at = ?5,
         dinner_note = ?6, dinner_note_updated_at = ?7,
         other_note = ?8, other_note_updated_at = ?9",
        move |current| {
          let revised = ProfileRow::from(&form.apply_to(&current.into_profile()?, at));
          Ok(vec![
            Value::Text(revised.display_name),
            Value::Text(revised.room_label),
            opt_text(revised.lunch_note),
            dt(revised.lunch_note_updated_at),
            opt_text(revised.dinner_note),
            dt(revised.dinner_note_updated_at),
            opt_text(revised.other_note),
            dt(revised.other_note_updated_at),
          ])
        },
      )
      .await
  }

  async fn reset_all_packed(&self) -> Result<u64> {
    let images: Vec<(RawProfile, RawProfile)> = self
      .conn
      .call(|conn| {
        let tx = conn.transaction()?;
        let select_one = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE subject_id = ?1");

        let olds = {
          let mut stmt =
            tx.prepare(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE packed = 1"))?;
          stmt
            .query_map([], RawProfile::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.execute("UPDATE profiles SET packed = 0 WHERE packed = 1", [])?;

        let mut images = Vec::with_capacity(olds.len());
        for old in olds {
          let new = tx.query_row(&select_one, rusqlite::params![old.subject_id], RawProfile::from_row)?;
          images.push((old, new));
        }
        tx.commit()?;
        Ok(images)
      })
      .await?;

    // The reset is committed; a row that fails to decode loses only its
    // own notification.
    let count = images.len() as u64;
    for (old, new) in images {
      let subject_id = new.subject_id.clone();
      if let Err(error) = self.publish_profile_update(old, new) {
        tracing::warn!(%subject_id, %error, "cleared packed flag not published");
      }
    }
    tracing::info!(rows = count, "cleared packed flags");
    Ok(count)
  }

  // ── Status log ────────────────────────────────────────────────────────────

  async fn append_status_event(&self, input: NewStatusEvent) -> Result<StatusEvent> {
    let event_id  = Uuid::new_v4();
    let timestamp = input.timestamp.map_or_else(now, |t| t.trunc_subsecs(6));

    let event_str   = encode_uuid(event_id);
    let subject_str = encode_uuid(input.subject_id);
    let status_str  = encode_status(input.status);
    let at_str      = encode_dt(timestamp);

    let seq: Option<i64> = self
      .conn
      .call(move |conn| {
        let exists = conn
          .query_row(
            "SELECT 1 FROM profiles WHERE subject_id = ?1",
            rusqlite::params![subject_str],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if !exists {
          return Ok(None);
        }

        conn.execute(
          "INSERT INTO status_events (event_id, subject_id, status, recorded_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![event_str, subject_str, status_str, at_str],
        )?;
        Ok(Some(conn.last_insert_rowid()))
      })
      .await?;

    let seq = seq.ok_or(Error::SubjectNotFound(input.subject_id))?;
    let event = StatusEvent {
      event_id,
      subject_id: input.subject_id,
      status: input.status,
      timestamp,
      seq,
    };

    self.publish(RawChange::insert(Table::StatusEvents, serde_json::to_value(&event)?));
    Ok(event)
  }

  async fn list_status_events(&self) -> Result<Vec<StatusEvent>> {
    let raws: Vec<RawStatusEvent> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EVENT_COLUMNS} FROM status_events ORDER BY recorded_at, seq"
        ))?;
        let rows = stmt
          .query_map([], RawStatusEvent::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawStatusEvent::into_event).collect()
  }
}

// ─── PushChannel impl ────────────────────────────────────────────────────────

impl PushChannel for SqliteStore {
  fn subscribe_changes(&self) -> broadcast::Receiver<RawChange> { self.changes.subscribe() }
}
