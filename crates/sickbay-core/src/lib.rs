//! Core types and trait definitions for the sickbay health dashboard.
//!
//! This crate is deliberately free of database and rendering code. It holds
//! the domain types, the boundary decoding of change notifications, and the
//! pure replay functions that derive every aggregate from the status log.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod aggregate;
pub mod change;
pub mod error;
pub mod profile;
pub mod status;
pub mod store;

pub use error::{Error, Result};
