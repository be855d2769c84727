//! Compensation log: cleanup actions recorded ahead of the remote calls they undo

pub mod log;
pub mod reconcile;
pub mod types;

pub use log::CompensationLog;
pub use reconcile::{ReconcileConfig, ReconcileReport};
pub use types::{Compensation, Owner, WalEntry, WAL_PREFIX};
