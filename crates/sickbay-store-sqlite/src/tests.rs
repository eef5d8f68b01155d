//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, TimeZone, Utc};
use sickbay_core::{
  change::{Operation, ProfileField, RawChange, RowChange},
  profile::{MealSlot, NewProfile, ProfileForm},
  status::{HealthStatus, NewStatusEvent},
  store::{HealthStore, ProfileQuery, PushChannel},
};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn resident(s: &SqliteStore, name: &str, room: &str) -> Uuid {
  let id = Uuid::new_v4();
  s.add_profile(NewProfile {
    subject_id:   id,
    display_name: name.into(),
    room_label:   room.into(),
  })
  .await
  .unwrap();
  id
}

fn drain(rx: &mut broadcast::Receiver<RawChange>) -> Vec<RawChange> {
  std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

// ─── Profiles ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_get_profile() {
  let s = store().await;
  let id = resident(&s, " Ada ", "101").await;

  let fetched = s.get_profile(id).await.unwrap().unwrap();
  assert_eq!(fetched.display_name, "Ada");
  assert_eq!(fetched.current_status, HealthStatus::Healthy);
  assert!(!fetched.packed);
  assert!(fetched.meals.lunch.is_none());
}

#[tokio::test]
async fn get_profile_missing_returns_none() {
  let s = store().await;
  assert!(s.get_profile(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_profile_errors() {
  let s = store().await;
  let id = resident(&s, "Ada", "101").await;
  let err = s
    .add_profile(NewProfile { subject_id: id, display_name: "Ada".into(), room_label: "101".into() })
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::DuplicateSubject(d) if d == id));
}

#[tokio::test]
async fn list_profiles_orders_by_room_and_filters_status() {
  let s = store().await;
  let c = resident(&s, "Cy", "303").await;
  let a = resident(&s, "Al", "101").await;
  let b = resident(&s, "Bo", "202").await;
  s.set_current_status(c, HealthStatus::Sick).await.unwrap();
  s.set_current_status(a, HealthStatus::Sick).await.unwrap();

  let all: Vec<Uuid> = s
    .list_profiles(ProfileQuery::all())
    .await
    .unwrap()
    .into_iter()
    .map(|p| p.subject_id)
    .collect();
  assert_eq!(all, vec![a, b, c]);

  let sick: Vec<Uuid> = s
    .list_profiles(ProfileQuery::sick())
    .await
    .unwrap()
    .into_iter()
    .map(|p| p.subject_id)
    .collect();
  assert_eq!(sick, vec![a, c]);
}

#[tokio::test]
async fn writes_to_missing_subject_error() {
  let s = store().await;
  let ghost = Uuid::new_v4();
  assert!(matches!(
    s.set_packed(ghost, true).await.unwrap_err(),
    crate::Error::SubjectNotFound(id) if id == ghost
  ));
  assert!(matches!(
    s.append_status_event(NewStatusEvent::new(ghost, HealthStatus::Sick)).await.unwrap_err(),
    crate::Error::SubjectNotFound(_)
  ));
}

#[tokio::test]
async fn update_profile_stamps_only_changed_notes() {
  let s = store().await;
  let id = resident(&s, "Ada", "101").await;

  let form = ProfileForm {
    display_name: "Ada".into(),
    room_label:   "101".into(),
    lunch_note:   Some("soup".into()),
    dinner_note:  Some("rice".into()),
    other_note:   None,
  };
  let first = s.update_profile(id, form.clone()).await.unwrap();
  let lunch_at = first.meals.get(MealSlot::Lunch).unwrap().updated_at;

  let second = s
    .update_profile(id, ProfileForm { dinner_note: Some("noodles".into()), ..form })
    .await
    .unwrap();
  assert_eq!(second.meals.get(MealSlot::Lunch).unwrap().updated_at, lunch_at);
  assert_eq!(second.meals.get(MealSlot::Dinner).unwrap().text, "noodles");
  assert!(second.meals.other.is_none());

  // What we read back equals what the write returned.
  assert_eq!(s.get_profile(id).await.unwrap().unwrap(), second);
}

#[tokio::test]
async fn concurrent_updates_stamp_notes_against_the_row_they_replace() {
  let s = store().await;
  let id = resident(&s, "Ada", "101").await;
  let soup = ProfileForm {
    display_name: "Ada".into(),
    room_label:   "101".into(),
    lunch_note:   Some("soup".into()),
    ..Default::default()
  };
  let first = s.update_profile(id, soup.clone()).await.unwrap();
  let soup_at = first.meals.get(MealSlot::Lunch).unwrap().updated_at;
  tokio::time::sleep(std::time::Duration::from_millis(5)).await;

  // Whichever lands second sees the other's note as the current text, so the
  // final note is newer than the first one in either order.
  let broth = ProfileForm { lunch_note: Some("broth".into()), ..soup.clone() };
  let (a, b) = tokio::join!(s.update_profile(id, broth), s.update_profile(id, soup));
  a.unwrap();
  b.unwrap();

  let lunch = s.get_profile(id).await.unwrap().unwrap().meals.lunch.unwrap();
  assert!(lunch.updated_at > soup_at, "{} kept its stale timestamp", lunch.text);
}

#[tokio::test]
async fn reset_all_packed_clears_every_flag_at_once() {
  let s = store().await;
  let a = resident(&s, "Al", "101").await;
  let b = resident(&s, "Bo", "202").await;
  resident(&s, "Cy", "303").await;
  s.set_packed(a, true).await.unwrap();
  s.set_packed(b, true).await.unwrap();

  let mut rx = s.subscribe_changes();
  assert_eq!(s.reset_all_packed().await.unwrap(), 2);

  let profiles = s.list_profiles(ProfileQuery::all()).await.unwrap();
  assert!(profiles.iter().all(|p| !p.packed));

  // One row-level notification per row that actually changed.
  let changes = drain(&mut rx);
  assert_eq!(changes.len(), 2);
  assert!(changes.iter().all(|c| c.operation == Operation::Update));

  assert_eq!(s.reset_all_packed().await.unwrap(), 0);
}

#[tokio::test]
async fn reset_all_packed_survives_an_undecodable_row() {
  let s = store().await;
  let good = resident(&s, "Al", "101").await;
  let bad = resident(&s, "Bo", "202").await;
  s.set_packed(good, true).await.unwrap();
  s.set_packed(bad, true).await.unwrap();
  let bad_str = bad.to_string();
  s.connection()
    .call(move |conn| {
      Ok(conn.execute(
        "UPDATE profiles SET created_at = 'not a date' WHERE subject_id = ?1",
        rusqlite::params![bad_str],
      )?)
    })
    .await
    .unwrap();

  let mut rx = s.subscribe_changes();
  assert_eq!(s.reset_all_packed().await.unwrap(), 2);

  let changes = drain(&mut rx);
  assert_eq!(changes.len(), 1);
  assert!(!s.get_profile(good).await.unwrap().unwrap().packed);
  let still_packed: i64 = s
    .connection()
    .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM profiles WHERE packed = 1", [], |r| r.get(0))?))
    .await
    .unwrap();
  assert_eq!(still_packed, 0);
}

// ─── Status log ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn status_events_list_in_replay_order() {
  let s = store().await;
  let id = resident(&s, "Ada", "101").await;
  let t = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();

  let late = s
    .append_status_event(NewStatusEvent::at(id, HealthStatus::Healthy, t + Duration::days(2)))
    .await
    .unwrap();
  let tie_a = s
    .append_status_event(NewStatusEvent::at(id, HealthStatus::Sick, t))
    .await
    .unwrap();
  let tie_b = s
    .append_status_event(NewStatusEvent::at(id, HealthStatus::Healthy, t))
    .await
    .unwrap();
  assert!(tie_a.seq < tie_b.seq);

  let log = s.list_status_events().await.unwrap();
  let ids: Vec<Uuid> = log.iter().map(|e| e.event_id).collect();
  assert_eq!(ids, vec![tie_a.event_id, tie_b.event_id, late.event_id]);
  assert_eq!(log[2], late);
}

#[tokio::test]
async fn status_log_rejects_updates_and_deletes() {
  let s = store().await;
  let id = resident(&s, "Ada", "101").await;
  s.append_status_event(NewStatusEvent::new(id, HealthStatus::Sick))
    .await
    .unwrap();

  let update = s
    .connection()
    .call(|conn| Ok(conn.execute("UPDATE status_events SET status = 'healthy'", [])?))
    .await;
  assert!(update.is_err());

  let delete = s
    .connection()
    .call(|conn| Ok(conn.execute("DELETE FROM status_events", [])?))
    .await;
  assert!(delete.is_err());

  assert_eq!(s.list_status_events().await.unwrap().len(), 1);
}

// ─── Push channel ────────────────────────────────────────────────────────────

#[tokio::test]
async fn writes_publish_typed_row_changes() {
  let s = store().await;
  let mut rx = s.subscribe_changes();

  let id = resident(&s, "Ada", "101").await;
  s.set_packed(id, true).await.unwrap();
  s.append_status_event(NewStatusEvent::new(id, HealthStatus::Sick))
    .await
    .unwrap();

  let changes = drain(&mut rx);
  assert_eq!(changes.len(), 3);

  assert!(matches!(
    changes[0].decode().unwrap(),
    RowChange::Profile(c) if c.operation == Operation::Insert
  ));

  let RowChange::Profile(packed) = changes[1].decode().unwrap() else {
    panic!("expected a profile update");
  };
  let (old, new) = (packed.old.unwrap(), packed.new.unwrap());
  assert_eq!(
    old.changed_fields(&new).into_iter().collect::<Vec<_>>(),
    vec![ProfileField::Packed]
  );

  assert!(matches!(
    changes[2].decode().unwrap(),
    RowChange::StatusEvent(c) if c.new.as_ref().is_some_and(|e| e.subject_id == id)
  ));
}

#[tokio::test]
async fn clones_share_one_push_channel() {
  let s = store().await;
  let other_client = s.clone();
  let mut rx = s.subscribe_changes();

  resident(&other_client, "Bo", "202").await;
  assert_eq!(drain(&mut rx).len(), 1);
}
