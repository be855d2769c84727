//! Account Lifecycle Manager

pub(crate) mod cleanup;
pub mod input;
mod locks;
pub mod manager;
pub mod secrets;
pub mod types;

pub use input::{parse_bindings, AccountInput};
pub use locks::AccountLocks;
pub use manager::{generate_account_id, AccountManager, Outcome};
pub use secrets::KeySecret;
pub use types::{
    binding_hash, AccountKind, BindingSet, ManagedAccount, SecretType, ServiceAccountId,
    TokenGenerator,
};
