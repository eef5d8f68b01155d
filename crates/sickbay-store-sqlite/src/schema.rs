//! SQL schema for the sickbay SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS profiles (
    subject_id             TEXT PRIMARY KEY,
    display_name           TEXT NOT NULL,
    room_label             TEXT NOT NULL,
    current_status         TEXT NOT NULL DEFAULT 'healthy'
                           CHECK (current_status IN ('healthy', 'sick')),
    lunch_note             TEXT,
    lunch_note_updated_at  TEXT,
    dinner_note            TEXT,
    dinner_note_updated_at TEXT,
    other_note             TEXT,
    other_note_updated_at  TEXT,
    packed                 INTEGER NOT NULL DEFAULT 0,
    created_at             TEXT NOT NULL
);

-- The status log is strictly append-only; the triggers below reject any
-- UPDATE or DELETE. `seq` breaks ties between equal timestamps.
CREATE TABLE IF NOT EXISTS status_events (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id    TEXT NOT NULL UNIQUE,
    subject_id  TEXT NOT NULL REFERENCES profiles(subject_id),
    status      TEXT NOT NULL CHECK (status IN ('healthy', 'sick')),
    recorded_at TEXT NOT NULL   -- RFC 3339 UTC, fixed microsecond width
);

CREATE TRIGGER IF NOT EXISTS status_events_no_update
BEFORE UPDATE ON status_events
BEGIN
    SELECT RAISE(ABORT, 'status_events is append-only');
END;

CREATE TRIGGER IF NOT EXISTS status_events_no_delete
BEFORE DELETE ON status_events
BEGIN
    SELECT RAISE(ABORT, 'status_events is append-only');
END;

CREATE INDEX IF NOT EXISTS status_events_order_idx ON status_events(recorded_at, seq);
CREATE INDEX IF NOT EXISTS profiles_worklist_idx   ON profiles(current_status, room_label);

PRAGMA user_version = 1;
";
