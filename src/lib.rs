//! voxlink: signaling session engine for a real-time voice calling
//! gateway. An authenticated session over one persistent message
//! channel, per-call state machines, and an orchestrator that keeps
//! concurrent calls consistent through drops, reconnects and
//! out-of-order events.

pub mod auth;
pub mod calls;
pub mod channel;
pub mod client;
pub mod config;
pub mod keepalive;
pub mod media;
pub mod transport;
pub mod types;
pub mod wire;

pub use auth::Credentials;
pub use calls::{Call, CallError, CallState};
pub use client::{Client, ClientError};
pub use config::ClientConfig;
