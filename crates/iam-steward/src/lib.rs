//! iam-steward - provisioning engine for Google Cloud service accounts
//!
//! Creates, binds, rotates and tears down service accounts, IAM policy
//! bindings and keys, recording a compensating action ahead of every remote
//! mutation so nothing it provisions is leaked.

pub mod account;
pub mod config;
pub mod error;
pub mod gcp;
pub mod iam;
pub mod retry;
pub mod storage;
pub mod wal;

pub use error::{Error, Result};
