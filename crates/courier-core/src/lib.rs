//! courier-core — shared types for the courier session registry.
//! All other courier crates depend on this one.

pub mod config;
pub mod connect;
pub mod message;
pub mod name;

pub use connect::{ConnectRequest, ConnectReturn, Credentials, DisconnectOptions};
pub use message::{CallbackAddress, QueueEntry};
pub use name::{SecretToken, SessionName};
