//! Launchpool - throttled multi-account client launcher
//!
//! Launchpool logs many accounts into one shared client application. Accounts
//! are grouped by the network identity (VPN route) they may use, and each
//! identity's batch runs while that identity is connected. Three shared
//! resources bound every launch:
//!
//! - **Login slot**: exclusive use of the single shared credential file
//! - **Exe slot**: a fixed budget of concurrently running clients
//! - **Auth slot**: one authentication at a time, paced by the active
//!   identity's cooldown
//!
//! # Modules
//!
//! - [`grouping`] - Partition accounts into per-identity batches
//! - [`domain`] - Accounts, identities and the delay policy
//! - [`throttle`] - Counting slots and the authentication throttle
//! - [`lifecycle`] - Client stage machine and the per-account launcher
//! - [`orchestrator`] - The scheduling loop, focus rotation and run metrics
//! - [`collab`] - Dialer, credential staging and client process seams
//! - [`events`] - Broadcast event bus and JSONL event log
//! - [`store`] - Account and identity list files
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod collab;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod grouping;
pub mod lifecycle;
pub mod orchestrator;
pub mod store;
pub mod throttle;

// Re-export commonly used types
pub use config::Config;
pub use domain::{Account, DelayPolicy, Identity, IdentityRecord, LaunchMode, SharedAccount};
pub use error::{DialError, LaunchError, SlotKind};
pub use events::{AttemptOutcome, EventBus, EventEmitter, LaunchEvent};
pub use grouping::{IdentityGroup, LaunchBatch, accounts_by_identity, order_batches, split_by_identity};
pub use lifecycle::{Client, Launcher, RunStage};
pub use orchestrator::{Collaborators, LaunchOrchestrator, RunMetrics, RunReport};
pub use throttle::{AuthenticationThrottle, Slot};
