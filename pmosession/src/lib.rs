//! # PMOSession
//!
//! Per-session station playback orchestration.
//!
//! One [`PlaybackSession`] drives playback for one destination channel: it
//! owns a track queue and bounded history, consumes lifecycle events from a
//! real-time audio transport, pulls track batches from a
//! [`StationProvider`](pmostation::StationProvider), and recovers from
//! transient stream faults with bounded retries instead of dying silently.
//!
//! Sessions are created, fetched and destroyed through the
//! [`SessionRegistry`], which enforces at most one session per key.
//! The transport and presentation layers stay behind the traits in
//! [`transport`] and [`presenter`] so the engine never depends on a concrete
//! backend.

pub mod config;
pub mod errors;
pub mod presenter;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod session;
pub mod transport;

use std::fmt;

pub use config::SessionConfig;
pub use errors::{Result, SessionError};
pub use presenter::Presenter;
pub use queue::{PlayHistory, TrackQueue};
pub use recovery::{RecoveryDecision, RecoveryPolicy};
pub use registry::SessionRegistry;
pub use session::{PlaybackSession, SessionParams, SessionState, SessionStatus};
pub use transport::{
    ChannelRef, Transport, TransportConnection, TransportEvent, TransportEventSink,
    TransportHandles, TransportPlayer,
};

/// Key under which a session is registered (one per destination channel).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey(pub String);

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
