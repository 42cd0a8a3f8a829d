//! Presentation seam.
//!
//! The engine pushes display-worthy moments through this trait and never
//! depends on how they are rendered (chat embeds, SSE, a TUI, nothing).
//! Calls are infallible from the engine's point of view: a presenter that
//! fails internally logs and swallows, mirroring how event broadcasts drop
//! dead subscribers.

use async_trait::async_trait;
use pmostation::Track;

#[async_trait]
pub trait Presenter: Send + Sync {
    /// A track was selected and its stream is being resolved.
    async fn notify_loading(&self, track: &Track);

    /// Playback of a track was confirmed by the transport.
    async fn notify_now_playing(&self, track: &Track);

    /// A transient or fatal fault worth showing to the user.
    async fn notify_error(&self, message: &str);

    /// The session stopped playing (teardown or station exhaustion).
    async fn notify_stopped(&self);

    /// Pause/resume toggled; `is_playing` is the new transport state.
    async fn notify_controls(&self, is_playing: bool);
}
