//! ClientLifecycle - the per-account state machine and the launcher driving it
//!
//! [`RunStage::transition`] is a pure function over stages, [`effects`] maps
//! each stage to the side effects it triggers, and [`Launcher`] runs one task
//! per account applying both.

mod client;
mod effects;
mod launcher;
mod stage;

pub use client::{Client, ClientTimeline};
pub use effects::{Effect, effects};
pub use launcher::{AttemptRecord, LaunchContext, Launcher};
pub use stage::RunStage;
