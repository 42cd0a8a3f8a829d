use std::fmt;

use serde::{Deserialize, Serialize};

/// Provider-scoped track identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub String);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-scoped station identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StationId(pub String);

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authentication context handed to every provider call.
///
/// Acquisition and refresh of these values is the business of the embedding
/// application; the playback engine only carries them through.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credentials {
    pub auth_token: String,
    pub user_id: String,
}

/// Immutable track descriptor as returned by a station catalog.
///
/// The playback engine never mutates a `Track`; display names are carried
/// verbatim from the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Cover-art reference (URL or provider key), when the catalog has one.
    pub art_url: Option<String>,
}

impl Track {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
    ) -> Self {
        Self {
            id: TrackId(id.into()),
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            art_url: None,
        }
    }

    pub fn with_art_url(mut self, url: impl Into<String>) -> Self {
        self.art_url = Some(url.into());
        self
    }

    /// "Artist - Title" label used in logs and notifications.
    pub fn display_label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}
