//! Login handshake: exchanges credentials for a session identifier.

use crate::channel::{ChannelError, SignalChannel};
use crate::wire::{LoginParams, LoginResult, SignalMethod, WireError, WireMessage};
use std::time::Duration;
use thiserror::Error;

pub(crate) const LOGIN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub enum Credentials {
    Password { login: String, password: String },
    Token { token: String },
}

impl Credentials {
    fn to_params(&self) -> LoginParams {
        match self {
            Self::Password { login, password } => LoginParams {
                login: Some(login.clone()),
                passwd: Some(password.clone()),
                login_token: None,
            },
            Self::Token { token } => LoginParams {
                login: None,
                passwd: None,
                login_token: Some(token.clone()),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login rejected by gateway: {0}")]
    Rejected(String),
    #[error("malformed login response: {0}")]
    InvalidResponse(WireError),
    #[error("channel error during login: {0}")]
    Channel(#[from] ChannelError),
}

/// Sends a `login` request and waits for the gateway-issued session id.
pub async fn login(
    channel: &SignalChannel,
    credentials: &Credentials,
) -> Result<String, AuthError> {
    let request = WireMessage::request(
        channel.next_id(),
        SignalMethod::Login,
        &credentials.to_params(),
    )
    .map_err(AuthError::InvalidResponse)?;

    let reply = channel.send_and_wait(request, Some(LOGIN_DEADLINE)).await?;
    let result: LoginResult = reply.parse_result().map_err(|e| match e {
        WireError::Gateway { code, message } => {
            AuthError::Rejected(format!("{code}: {message}"))
        }
        other => AuthError::InvalidResponse(other),
    })?;
    Ok(result.session_id)
}
