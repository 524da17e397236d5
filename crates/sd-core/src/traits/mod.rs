//! Core trait definitions

mod executor;

pub use executor::{CommandOutput, RemoteExecutor, SharedExecutor, Transport};
