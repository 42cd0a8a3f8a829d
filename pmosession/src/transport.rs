//! Backend-agnostic transport seam.
//!
//! The engine streams into whatever real-time transport the embedder wires
//! in (a voice gateway, a local pipeline, a test fake) through the traits
//! below. Higher layers must only interact with the transport through these
//! contracts so that session logic stays backend-neutral.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// Reference to the destination channel a session streams into.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelRef(pub String);

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Playback-lifecycle events emitted by a transport backend.
///
/// Emission may happen at any time, from any task or thread; delivery into
/// the owning session is the engine's problem, not the backend's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The current stream ended (natural completion or silent death; the
    /// session decides which from elapsed play time).
    TrackFinished,
    /// The backend reported a playback error for the current stream.
    TrackError(String),
    /// The underlying connection dropped.
    ConnectionLost,
}

/// Where a transport backend delivers its events.
///
/// Handed over at [`Transport::join`]; implementations treat it as an opaque
/// sink and never block in `emit`.
pub trait TransportEventSink: Send + Sync {
    fn emit(&self, event: TransportEvent);
}

/// Connection-level control for one joined channel.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Tear the connection down. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Re-establish signalling after a connection loss.
    ///
    /// The session bounds this with its reconnect grace window and escalates
    /// to a fatal teardown when it fails.
    async fn resignal(&self) -> Result<()>;
}

/// Player-level control for the single active stream of a session.
#[async_trait]
pub trait TransportPlayer: Send + Sync {
    /// Load and start playing a stream location, replacing the active one.
    async fn play(&self, uri: &str) -> Result<()>;

    /// Suspend the active stream without unloading it.
    async fn pause(&self) -> Result<()>;

    /// Resume a suspended stream.
    async fn unpause(&self) -> Result<()>;

    /// Stop and unload the active stream.
    async fn stop(&self) -> Result<()>;
}

/// The pair of handles a successful join yields.
///
/// A session owns exactly one of each for its whole life; both are released
/// together at teardown.
#[derive(Clone)]
pub struct TransportHandles {
    pub connection: Arc<dyn TransportConnection>,
    pub player: Arc<dyn TransportPlayer>,
}

/// Entry point into a transport backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Join a channel and return its control handles.
    ///
    /// Implementations resolve only once the transport is confirmed ready;
    /// the engine wraps the call in its connect timeout, so honest
    /// implementations simply await their backend.
    async fn join(
        &self,
        channel: &ChannelRef,
        events: Arc<dyn TransportEventSink>,
    ) -> Result<TransportHandles>;
}
