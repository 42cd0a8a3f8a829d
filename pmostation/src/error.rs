//! Error types for station providers.

/// Errors surfaced by [`StationProvider`](crate::api::StationProvider)
/// implementations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Authentication rejected by provider")]
    Auth,

    #[error("Provider API error: {0}")]
    Api(String),

    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Station not found: {0}")]
    StationNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Type Result spécialisé pour pmostation
pub type Result<T> = std::result::Result<T, ProviderError>;
