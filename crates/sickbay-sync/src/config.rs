//! Client configuration, deserialised from a config file and environment.

use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;
use uuid::Uuid;

use crate::{Error, Result, dashboard::DashboardOptions};

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
  /// Path of the SQLite store. A leading `~` is expanded by the binary.
  #[serde(default = "default_store_path")]
  pub store_path:         String,
  /// The signed-in subject, if any. Without one the status view is inert.
  #[serde(default)]
  pub subject_id:         Option<Uuid>,
  /// Upper bound on one remote write; `0` disables the bound.
  #[serde(default = "default_write_timeout_ms")]
  pub write_timeout_ms:   u64,
  /// Offset from UTC used to bucket the trend series into days.
  #[serde(default)]
  pub utc_offset_minutes: i32,
}

fn default_store_path() -> String { "sickbay.db".to_string() }

fn default_write_timeout_ms() -> u64 { 10_000 }

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      store_path:         default_store_path(),
      subject_id:         None,
      write_timeout_ms:   default_write_timeout_ms(),
      utc_offset_minutes: 0,
    }
  }
}

impl ClientConfig {
  pub fn write_timeout(&self) -> Option<Duration> {
    (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
  }

  pub fn utc_offset(&self) -> Result<FixedOffset> {
    self
      .utc_offset_minutes
      .checked_mul(60)
      .and_then(FixedOffset::east_opt)
      .ok_or(Error::InvalidOffset(self.utc_offset_minutes))
  }

  pub fn dashboard_options(&self) -> Result<DashboardOptions> {
    Ok(DashboardOptions { write_timeout: self.write_timeout(), utc_offset: self.utc_offset()? })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_timeout_disables_the_bound() {
    let config = ClientConfig { write_timeout_ms: 0, ..Default::default() };
    assert_eq!(config.write_timeout(), None);
    assert_eq!(ClientConfig::default().write_timeout(), Some(Duration::from_secs(10)));
  }

  #[test]
  fn offset_is_validated() {
    let east = ClientConfig { utc_offset_minutes: 120, ..Default::default() };
    assert_eq!(east.utc_offset().unwrap().local_minus_utc(), 7200);

    let absurd = ClientConfig { utc_offset_minutes: 60 * 24, ..Default::default() };
    assert!(matches!(absurd.utc_offset(), Err(Error::InvalidOffset(1440))));
  }
}
