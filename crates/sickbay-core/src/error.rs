//! Error types for `sickbay-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown table: {0:?}")]
  UnknownTable(String),

  #[error("unknown health status: {0:?}")]
  UnknownStatus(String),

  #[error("{table} {operation} notification is missing its {side} row")]
  MissingRow {
    table:     &'static str,
    operation: &'static str,
    side:      &'static str,
  },

  #[error("malformed {table} row: {source}")]
  MalformedRow {
    table:  &'static str,
    #[source]
    source: serde_json::Error,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
