//! Shared test utilities for iam-steward
//!
//! This crate provides common test helpers that can be used from the
//! integration tests without circular dependencies.
//!
//! ## Modules
//!
//! - [`db`]: in-memory SQLite storage
//! - [`fixtures`]: fast retry configuration and input field maps
//! - [`storage`]: storage wrapper with injectable write failures
//! - [`fake_gcp`]: fake Google Cloud backend implementing the transport seam
//! - [`logging`]: tracing subscriber for tests

pub mod db;
pub mod fake_gcp;
pub mod fixtures;
pub mod logging;
pub mod storage;

// Re-export commonly used items
pub use db::{open_test_db, test_storage};
pub use fake_gcp::FakeGcp;
pub use fixtures::{fast_config, fields};
pub use logging::init_tracing;
pub use storage::FaultyStorage;
