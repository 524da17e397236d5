//! SSH executors built on russh

mod client;
mod direct;
mod tunneled;

pub use client::Credentials;
pub use direct::DirectExecutor;
pub use tunneled::TunneledExecutor;
