//! Client-side state synchronisation for the sickbay dashboard.
//!
//! Several independently rendered views are kept consistent with the row
//! store by combining three inputs:
//!
//! - optimistic local mutations, applied immediately and rolled back when the
//!   remote write fails ([`coordinator`]);
//! - row-level change notifications from the store's push channel, routed to
//!   named invalidation signals or in-place patches ([`feed`]);
//! - aggregates recomputed from the raw status log on every refetch
//!   ([`views`]).
//!
//! The [`dashboard::Dashboard`] root scope owns one instance of each and is
//! the only place they are wired together.

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod dashboard;
pub mod error;
pub mod feed;
pub mod policy;
pub mod repair;
pub mod session;
pub mod views;

pub use bus::{EventBus, Signal, Subscription};
pub use config::ClientConfig;
pub use coordinator::{Attempt, EntityKey, LocalState, MutationCoordinator, MutationReceipt};
pub use dashboard::{Dashboard, DashboardOptions, ReconcileReport};
pub use error::{Error, Result};
pub use feed::{ChangeFeedAdapter, FeedHandle, FeedStatus, RowPatch, StaleReason};
pub use policy::{ReconcilePolicy, Strategy};
pub use repair::repair_status_projection;
pub use session::{SessionProvider, SharedSession, StaticSession};
pub use views::{
  MetricsView, StatusView, SubjectStatus, SyncContext, TrendView, ViewCore, ViewState, WorklistView,
};
