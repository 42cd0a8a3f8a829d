use std::time::Duration;

use pmostation::{ProviderError, TrackId};
use thiserror::Error;

use crate::SessionKey;

#[derive(Debug, Error)]
pub enum SessionError {
    // Renvoyé par le registre quand la clé est déjà occupée
    #[error("Session already active for {0}")]
    AlreadyActive(SessionKey),

    #[error("No session for {0}")]
    NoSession(SessionKey),

    #[error("No playback history")]
    NoHistory,

    #[error("No track is currently playing")]
    NoTrack,

    #[error("Operation '{0}' is not allowed in state '{1}'")]
    InvalidState(&'static str, &'static str),

    #[error("Transport join not confirmed within {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Transport connection lost: {0}")]
    ConnectionLost(String),

    #[error("No playable stream for track {0}")]
    StreamFetch(TrackId),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl SessionError {
    pub fn invalid_state(op: &'static str, state: &'static str) -> Self {
        SessionError::InvalidState(op, state)
    }
}

/// Type Result spécialisé pour pmosession
pub type Result<T> = std::result::Result<T, SessionError>;
