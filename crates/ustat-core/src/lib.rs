//! Core domain logic for the usage tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Ledger: session counters, lifetime totals and their reconciliation
//! - Storage: the JSON document the totals are persisted to
//! - Activity: the inbound event format produced by the editor side
//! - Environment: git and OS facts reported by probes

pub mod activity;
pub mod environment;
pub mod format;
mod ledger;
pub mod store;
pub mod warning;

pub use activity::{ActivityError, ActivityEvent, ContentChange, SelectionRange};
pub use environment::EnvironmentSnapshot;
pub use ledger::{DEFAULT_BRANCH, LedgerView, Totals, UNKNOWN, UsageCounters, UsageLedger};
pub use store::{StatsStore, StoreError};
pub use warning::RepositoryWarningGate;
