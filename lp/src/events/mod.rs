//! Launch events
//!
//! ```text
//!   Launcher ──┐                      ┌── FocusRotation
//!              ├──► EventBus ─────────┼── EventLogger (events.jsonl)
//! Orchestrator ┘   (broadcast)        └── callers of run()
//! ```
//!
//! See [`LaunchEvent`] for the vocabulary.

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use logger::{EventLogger, read_run_events, spawn_event_logger};
pub use types::{AttemptOutcome, EventLogEntry, LaunchEvent};
