use super::state::InvalidTransition;
use crate::channel::ChannelError;
use crate::media::MediaError;
use crate::wire::{HoldState, WireError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call has no media session")]
    NoMediaSession,
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransition),
    #[error("media error: {0}")]
    Media(#[from] MediaError),
    #[error("signaling channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),
    #[error("gateway confirmed hold state '{got}', expected '{expected}'")]
    HoldStateMismatch { expected: HoldState, got: HoldState },
}
