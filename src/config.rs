use crate::auth::Credentials;
use std::time::Duration;

/// Static configuration for a [`crate::client::Client`]. Session identity
/// (the gateway-issued session id) is runtime state on the client, not
/// configuration; tearing down a connection never resets these fields.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub gateway_url: String,
    pub credentials: Credentials,
    /// Bound on the reconnection window. Expiry is a hard failure: calls
    /// that dropped stay dropped.
    pub reconnect_timeout: Duration,
    /// Deadline imposed on gateway round-trips (answer, modify, login).
    pub reply_deadline: Duration,
    /// Delay between materializing a call and applying a queued
    /// push-notification action, so construction settles first.
    pub action_settle_delay: Duration,
}

impl ClientConfig {
    pub fn new(gateway_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            credentials,
            reconnect_timeout: Duration::from_secs(60),
            reply_deadline: Duration::from_secs(10),
            action_settle_delay: Duration::from_millis(1000),
        }
    }
}
