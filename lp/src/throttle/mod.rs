//! Counting slots and the authentication throttle built on them

mod auth;
mod slot;

pub use auth::{AuthTicket, AuthenticationThrottle};
pub use slot::{Slot, SlotPermit};
