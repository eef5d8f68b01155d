//! Error types for `sickbay-sync`.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::coordinator::EntityKey;

/// A store error with its concrete type erased.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// A view could not load its data. Surfaced as a failed view state and
  /// not retried until the next invalidation.
  #[error("failed to load {view}: {source}")]
  Read {
    view:   &'static str,
    #[source]
    source: BoxError,
  },

  /// The remote write behind an optimistic mutation failed; the local value
  /// has been rolled back.
  #[error("write for {key} failed: {source}")]
  PrimaryWrite {
    key:    EntityKey,
    #[source]
    source: BoxError,
  },

  #[error("write for {key} did not complete within {after:?}")]
  WriteTimedOut { key: EntityKey, after: Duration },

  #[error("mutation of {key} was cancelled")]
  Cancelled { key: EntityKey },

  /// A follow-up write after a committed mutation failed. Reported only;
  /// the primary write stands.
  #[error("follow-up write for {key} failed: {source}")]
  SecondaryWrite {
    key:    EntityKey,
    #[source]
    source: BoxError,
  },

  #[error("write failed: {0}")]
  Write(#[source] BoxError),

  #[error("push channel disconnected")]
  ChannelDisconnect,

  #[error("no local value loaded for {0}")]
  NotLoaded(EntityKey),

  #[error("no signed-in subject")]
  NoSession,

  #[error("profile {0} not found")]
  NotFound(Uuid),

  #[error("utc offset of {0} minutes is out of range")]
  InvalidOffset(i32),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
