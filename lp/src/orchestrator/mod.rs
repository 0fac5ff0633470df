//! LaunchOrchestrator and the run-scoped services around it

mod core;
mod focus;
mod metrics;

pub use core::{Collaborators, LaunchOrchestrator, RunReport};
pub use focus::{FocusRotation, spawn_focus_rotation};
pub use metrics::{AccountTimeline, ConnectionOffsets, IdentityTimeline, LATEST_FILE, RunMetrics};
