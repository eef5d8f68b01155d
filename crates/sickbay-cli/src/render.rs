//! Plain-text rendering of view states.

use chrono::Utc;
use sickbay_core::{
  aggregate::{ActiveCaseSeries, AggregateStats, IntegrityAnomaly},
  profile::{MealSlot, UserProfile},
};
use sickbay_store_sqlite::SqliteStore;
use sickbay_sync::{Dashboard, StaticSession, SubjectStatus, ViewState};

const SLOTS: [MealSlot; 3] = [MealSlot::Lunch, MealSlot::Dinner, MealSlot::Other];

/// Print a non-ready state. Returns the data when it is ready.
fn ready<'a, T>(title: &str, state: &'a ViewState<T>) -> Option<&'a T> {
  match state {
    ViewState::Ready(data) => Some(data),
    ViewState::Loading => {
      println!("{title}: loading");
      None
    }
    ViewState::Failed(reason) => {
      println!("{title}: unavailable ({reason})");
      None
    }
    ViewState::Inert => {
      println!("{title}: not signed in");
      None
    }
  }
}

pub fn stats(state: &ViewState<AggregateStats>) {
  let Some(stats) = ready("stats", state) else { return };
  println!(
    "sick now: {}  recovered: {}  never sick: {}  ({} total)",
    stats.currently_sick,
    stats.recovered_at_least_once,
    stats.never_sick,
    stats.total()
  );
}

pub fn trend(state: &ViewState<ActiveCaseSeries>) {
  let Some(series) = ready("trend", state) else { return };
  if series.points.is_empty() {
    println!("trend: no reports yet");
  }
  for point in &series.points {
    println!("{}  {:>4}  {}", point.day, point.active, "#".repeat(point.active as usize));
  }
  for anomaly in &series.anomalies {
    match anomaly {
      IntegrityAnomaly::NegativeExcursion { subject_id, timestamp, .. } => {
        println!("  ! recovery for {subject_id} at {timestamp} with no active case");
      }
    }
  }
}

pub fn worklist(state: &ViewState<Vec<UserProfile>>) {
  let Some(rows) = ready("worklist", state) else { return };
  if rows.is_empty() {
    println!("worklist: nobody is sick");
    return;
  }
  let now = Utc::now();
  for row in rows {
    let mark = if row.packed { "[x]" } else { "[ ]" };
    println!("{mark} {:<6} {}  ({})", row.room_label, row.display_name, row.subject_id);
    for slot in SLOTS {
      if let Some(note) = row.meals.get(slot) {
        println!("      {slot}: {} ({})", note.text, note.age_label(now));
      }
    }
  }
}

pub fn status(state: &ViewState<SubjectStatus>) {
  let Some(own) = ready("status", state) else { return };
  println!("{}: {}", own.subject_id, own.status);
}

pub fn profile(profile: &UserProfile) {
  println!("{} in {} ({})", profile.display_name, profile.room_label, profile.current_status);
  let now = Utc::now();
  for slot in SLOTS {
    match profile.meals.get(slot) {
      Some(note) => println!("  {slot}: {} ({})", note.text, note.age_label(now)),
      None => println!("  {slot}: -"),
    }
  }
}

pub fn dashboard(board: &Dashboard<SqliteStore, StaticSession>) {
  println!("── {} ──", Utc::now().format("%Y-%m-%d %H:%M:%S"));
  stats(&board.metrics().state());
  status(&board.status().state());
  worklist(&board.worklist().state());
  trend(&board.trend().state());
}
