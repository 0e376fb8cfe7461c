//! Lifecycle of ephemeral sends.
//!
//! [`SendManager`] creates sends and grants claims against a
//! [`SendRepository`](ephemera_store::SendRepository). Every claim is a
//! single conditional write, so concurrent downloaders racing for the last
//! slot resolve to exactly one winner. The [`Sweeper`] retires expired and
//! exhausted sends and reclaims their blobs.

pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod password;
pub mod reclaim;
pub mod sweeper;

mod bounded;

pub use config::{LifecycleConfig, SendLimits};
pub use error::LifecycleError;
pub use manager::{Access, Claim, Download, SendManager, SendOptions, SendSummary};
pub use metrics::{LifecycleMetrics, MetricsSnapshot};
pub use reclaim::{ReclaimOutcome, Reclaimer};
pub use sweeper::{SweepReport, Sweeper, SweeperBuilder, SweeperConfig};
