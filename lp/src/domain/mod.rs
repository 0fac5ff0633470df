//! Domain types: accounts, identities and the cooldown policy

mod account;
mod identity;
mod mode;
mod policy;

pub use account::{Account, SharedAccount};
pub use identity::{ConnectionMetrics, FailureRecord, Identity, IdentityRecord, NO_IDENTITY};
pub use mode::LaunchMode;
pub use policy::DelayPolicy;
