//! Google Cloud HTTP plumbing

pub mod admin;
pub mod client;
pub mod transport;

pub use admin::{IamAdmin, ServiceAccount, ServiceAccountKey};
pub use client::{
    HttpTransport, Invalidate, StaticToken, TokenSource, TransportCache, TransportProvider,
};
pub use transport::{HttpMethod, HttpRequest, Transport};
