//! The provider seam consumed by the playback engine.

use async_trait::async_trait;

use crate::error::Result;
use crate::track::{Credentials, StationId, Track, TrackId};

/// Async contract every concrete station catalog client implements.
///
/// All methods take the caller's [`Credentials`]; providers are expected to
/// be cheap to clone behind an `Arc` and safe to share across sessions.
#[async_trait]
pub trait StationProvider: Send + Sync {
    /// Fetch the next batch of tracks for a station.
    ///
    /// An empty batch means the station is exhausted from the provider's
    /// point of view; it is not an error.
    async fn station_tracks(
        &self,
        credentials: &Credentials,
        station: &StationId,
    ) -> Result<Vec<Track>>;

    /// Resolve a playable stream location for a track.
    ///
    /// `Ok(None)` means the provider has no playable resource for this track
    /// right now (expired grant, region restriction, ...); callers treat it
    /// the same as a resolution failure.
    async fn stream_url(
        &self,
        credentials: &Credentials,
        track: &TrackId,
    ) -> Result<Option<String>>;

    /// Report that playback of a track has started.
    ///
    /// Fire-and-forget from the engine's point of view: failures are logged,
    /// never propagated into playback control flow.
    async fn track_started(
        &self,
        credentials: &Credentials,
        station: &StationId,
        track: &TrackId,
    ) -> Result<()>;

    /// Rate a track positively. Returns whether the provider accepted it.
    async fn like_track(&self, credentials: &Credentials, track: &TrackId) -> Result<bool>;
}
