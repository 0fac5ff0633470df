//! External collaborators
//!
//! Everything the scheduler drives but does not own: the network dialer, the
//! shared credential file and the client processes. Each seam is a trait with
//! a command/file backed adapter for real use and an in-memory double in
//! [`mock`].

mod client;
mod dialer;
pub mod mock;
mod staging;

pub use client::{ClientHost, ClientProcess, CommandClientHost};
pub use dialer::{CommandDialer, DialStatus, Dialer, connection_names, read_phonebook};
pub use staging::{CredentialStager, FileStager};
