//! Resource location and IAM policy manipulation

pub mod dataset;
pub mod handle;
pub mod locator;
pub mod policy;
pub mod registry;
pub mod request;

pub use handle::PolicyHandle;
pub use locator::{ParsedResource, RelativeName, ServiceHint};
pub use policy::{service_account_member, Binding, Expr, Policy, PolicyDelta};
pub use registry::{PolicyShape, Registry, RestResource};
