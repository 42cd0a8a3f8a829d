//! Process-wide session table.
//!
//! The registry is the lifecycle owner of every [`PlaybackSession`]:
//! sessions only come into existence through [`SessionRegistry::create`],
//! at most one per key, and are removed here when they die. The key is
//! reserved *before* the transport join so a concurrent create on the same
//! key is rejected during the join window.

use std::collections::HashMap;
use std::sync::Arc;

use pmostation::StationProvider;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use crate::SessionKey;
use crate::config::SessionConfig;
use crate::errors::{Result, SessionError};
use crate::presenter::Presenter;
use crate::session::{EventIntake, PlaybackSession, SessionParams, SessionSignals};
use crate::transport::Transport;

enum SessionSlot {
    /// Transport join in flight; reserves the key.
    Connecting,
    Active(Arc<PlaybackSession>),
}

pub struct SessionRegistry {
    transport: Arc<dyn Transport>,
    provider: Arc<dyn StationProvider>,
    config: SessionConfig,
    sessions: Mutex<HashMap<SessionKey, SessionSlot>>,
}

impl SessionRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        provider: Arc<dyn StationProvider>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            provider,
            config,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Open a session on `key`: reserve the key, join the transport within
    /// the connect timeout, then spawn the event loop and the first advance.
    ///
    /// Rejected with [`SessionError::AlreadyActive`] when the key is taken,
    /// including while another create is still joining.
    pub async fn create(
        self: &Arc<Self>,
        key: SessionKey,
        params: SessionParams,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Arc<PlaybackSession>> {
        {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(&key) {
                return Err(SessionError::AlreadyActive(key));
            }
            sessions.insert(key.clone(), SessionSlot::Connecting);
        }

        let signals = SessionSignals::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let intake = Arc::new(EventIntake::new(key.clone(), signals.clone(), events_tx));

        info!(session = %key, channel = %params.channel, "Joining transport");
        let joined = tokio::time::timeout(
            self.config.connect_timeout(),
            self.transport.join(&params.channel, intake),
        )
        .await;

        let handles = match joined {
            Ok(Ok(handles)) => handles,
            Ok(Err(err)) => {
                self.remove(&key).await;
                warn!(session = %key, error = %err, "Transport join failed");
                presenter.notify_error("Could not join the audio channel").await;
                return Err(SessionError::Transport(err));
            }
            Err(_) => {
                self.remove(&key).await;
                warn!(session = %key, "Transport join not confirmed in time");
                presenter
                    .notify_error("Timed out joining the audio channel")
                    .await;
                return Err(SessionError::ConnectionTimeout(self.config.connect_timeout()));
            }
        };

        let session = PlaybackSession::new(
            key.clone(),
            params,
            self.config.clone(),
            handles,
            Arc::clone(&self.provider),
            presenter,
            signals,
        );
        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(key.clone(), SessionSlot::Active(Arc::clone(&session)));
        }

        tokio::spawn(PlaybackSession::run(
            Arc::clone(&session),
            Arc::clone(self),
            events_rx,
        ));
        let starter = Arc::clone(&session);
        tokio::spawn(async move { starter.advance_to_next().await });

        info!(session = %key, "Session created");
        Ok(session)
    }

    pub async fn get(&self, key: &SessionKey) -> Option<Arc<PlaybackSession>> {
        match self.sessions.lock().await.get(key) {
            Some(SessionSlot::Active(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Delete the entry for `key`. No-op when absent.
    pub async fn remove(&self, key: &SessionKey) {
        self.sessions.lock().await.remove(key);
    }

    /// Remove `session`'s entry, but only if the slot still holds this very
    /// session — a later session under the same key is left alone.
    pub(crate) async fn remove_session(&self, session: &Arc<PlaybackSession>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(SessionSlot::Active(existing)) = sessions.get(session.key()) {
            if Arc::ptr_eq(existing, session) {
                sessions.remove(session.key());
            }
        }
    }

    /// Tear down and remove the session for `key`.
    pub async fn stop(&self, key: &SessionKey) -> Result<()> {
        let session = self
            .get(key)
            .await
            .ok_or_else(|| SessionError::NoSession(key.clone()))?;
        session.stop().await;
        self.remove_session(&session).await;
        Ok(())
    }

    /// Active session keys, in no particular order.
    pub async fn keys(&self) -> Vec<SessionKey> {
        self.sessions
            .lock()
            .await
            .iter()
            .filter_map(|(key, slot)| match slot {
                SessionSlot::Active(_) => Some(key.clone()),
                SessionSlot::Connecting => None,
            })
            .collect()
    }

    /// Tear down every active session (process shutdown path).
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<PlaybackSession>> = {
            let mut table = self.sessions.lock().await;
            table
                .drain()
                .filter_map(|(_, slot)| match slot {
                    SessionSlot::Active(session) => Some(session),
                    SessionSlot::Connecting => None,
                })
                .collect()
        };
        for session in sessions {
            session.stop().await;
        }
    }
}
