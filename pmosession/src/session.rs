//! Per-session playback state machine.
//!
//! A [`PlaybackSession`] reconciles three independent event sources — user
//! commands, transport playback-lifecycle events, and connectivity events —
//! into one consistent state. All state lives behind a single async mutex,
//! so command handlers and event handlers for one session never interleave;
//! independent sessions share nothing. Transport events flow through an
//! intake filter and an mpsc channel into a per-session event loop task.
//!
//! Two mechanisms keep duplicate transitions out:
//! - a `loading` flag, checked at event *arrival*, drops playback events
//!   emitted while an advance or retry is already in flight;
//! - a playback generation stamp, compared at event *processing*, drops
//!   events that were queued before a newer track started.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use pmostation::{Credentials, StationId, StationProvider, Track, TrackId};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::SessionKey;
use crate::config::SessionConfig;
use crate::errors::{Result, SessionError};
use crate::presenter::Presenter;
use crate::queue::{PlayHistory, TrackQueue};
use crate::recovery::{RecoveryDecision, RecoveryPolicy};
use crate::registry::SessionRegistry;
use crate::transport::{
    ChannelRef, TransportConnection, TransportEvent, TransportEventSink, TransportHandles,
    TransportPlayer,
};

/// Tracks shown by [`PlaybackSession::status`] as a queue preview.
const UPCOMING_PREVIEW: usize = 5;

/// Lifecycle states of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Session exists, nothing is playing.
    Idle,
    /// Transport join requested, awaiting confirmation.
    Connecting,
    /// A track is selected, its stream is being resolved and handed over.
    Loading,
    /// Transport is actively emitting audio.
    Playing,
    /// Track loaded but suspended; resumable without reload.
    Paused,
    /// A playback interruption was detected, a bounded retry is in flight.
    Recovering,
    /// Terminal. Transport released, session eligible for removal.
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::Connecting => "CONNECTING",
            SessionState::Loading => "LOADING",
            SessionState::Playing => "PLAYING",
            SessionState::Paused => "PAUSED",
            SessionState::Recovering => "RECOVERING",
            SessionState::Stopped => "STOPPED",
        }
    }
}

/// Everything needed to open a session on a channel.
#[derive(Clone, Debug)]
pub struct SessionParams {
    pub channel: ChannelRef,
    pub station: StationId,
    pub credentials: Credentials,
}

/// Point-in-time snapshot for status displays.
#[derive(Clone, Debug)]
pub struct SessionStatus {
    pub key: SessionKey,
    pub state: SessionState,
    pub current_track: Option<Track>,
    pub queue_len: usize,
    pub upcoming: Vec<Track>,
    pub history: Vec<Track>,
    pub retry_count: u32,
    pub station_drained: bool,
}

/// Shared atoms linking the session, its event intake and its timers.
#[derive(Clone)]
pub(crate) struct SessionSignals {
    pub(crate) loading: Arc<AtomicBool>,
    pub(crate) generation: Arc<AtomicU64>,
    pub(crate) cancel: CancellationToken,
}

impl SessionSignals {
    pub(crate) fn new() -> Self {
        Self {
            loading: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        }
    }
}

/// Transport event plus the playback generation current when it arrived.
pub(crate) struct StampedEvent {
    pub(crate) generation: u64,
    pub(crate) event: TransportEvent,
}

/// Arrival-side filter handed to the transport backend.
///
/// Runs on whatever task the backend emits from, so it must stay sync and
/// non-blocking: check the guard, stamp the generation, enqueue.
pub(crate) struct EventIntake {
    key: SessionKey,
    signals: SessionSignals,
    tx: mpsc::UnboundedSender<StampedEvent>,
}

impl EventIntake {
    pub(crate) fn new(
        key: SessionKey,
        signals: SessionSignals,
        tx: mpsc::UnboundedSender<StampedEvent>,
    ) -> Self {
        Self { key, signals, tx }
    }
}

impl TransportEventSink for EventIntake {
    fn emit(&self, event: TransportEvent) {
        // Connection events always pass; playback events are dropped while
        // exactly one advance/retry operation is trusted to be in flight.
        if self.signals.loading.load(Ordering::SeqCst)
            && !matches!(event, TransportEvent::ConnectionLost)
        {
            debug!(session = %self.key, ?event, "Transport event dropped, advance in flight");
            return;
        }
        let stamped = StampedEvent {
            generation: self.signals.generation.load(Ordering::SeqCst),
            event,
        };
        if self.tx.send(stamped).is_err() {
            debug!(session = %self.key, "Session event loop gone, dropping transport event");
        }
    }
}

struct SessionInner {
    state: SessionState,
    current_track: Option<Track>,
    queue: TrackQueue,
    history: PlayHistory,
    retry_count: u32,
    started_at: Option<Instant>,
    last_track_id: Option<TrackId>,
    /// The station returned an empty refill; session stays inert (but
    /// connected) until an explicit stop.
    station_drained: bool,
}

/// One playback context bound to one destination channel.
pub struct PlaybackSession {
    key: SessionKey,
    params: SessionParams,
    config: SessionConfig,
    policy: RecoveryPolicy,
    provider: Arc<dyn StationProvider>,
    presenter: Arc<dyn Presenter>,
    connection: Arc<dyn TransportConnection>,
    player: Arc<dyn TransportPlayer>,
    inner: Mutex<SessionInner>,
    signals: SessionSignals,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl PlaybackSession {
    pub(crate) fn new(
        key: SessionKey,
        params: SessionParams,
        config: SessionConfig,
        handles: TransportHandles,
        provider: Arc<dyn StationProvider>,
        presenter: Arc<dyn Presenter>,
        signals: SessionSignals,
    ) -> Arc<Self> {
        let policy = RecoveryPolicy::from_config(&config);
        let history = PlayHistory::new(config.history_limit);
        Arc::new(Self {
            key,
            params,
            config,
            policy,
            provider,
            presenter,
            connection: handles.connection,
            player: handles.player,
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                current_track: None,
                queue: TrackQueue::new(),
                history,
                retry_count: 0,
                started_at: None,
                last_track_id: None,
                station_drained: false,
            }),
            signals,
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub async fn status(&self) -> SessionStatus {
        let inner = self.inner.lock().await;
        SessionStatus {
            key: self.key.clone(),
            state: inner.state,
            current_track: inner.current_track.clone(),
            queue_len: inner.queue.len(),
            upcoming: inner.queue.upcoming(UPCOMING_PREVIEW),
            history: inner.history.snapshot(),
            retry_count: inner.retry_count,
            station_drained: inner.station_drained,
        }
    }

    // ---- Commands -------------------------------------------------------

    /// Resume a paused session.
    pub async fn play(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Paused => {
                self.player.unpause().await?;
                inner.state = SessionState::Playing;
                drop(inner);
                self.presenter.notify_controls(true).await;
                Ok(())
            }
            state => Err(SessionError::invalid_state("play", state.as_str())),
        }
    }

    /// Suspend playback without losing the loaded track.
    pub async fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Playing => {
                self.player.pause().await?;
                inner.state = SessionState::Paused;
                drop(inner);
                self.presenter.notify_controls(false).await;
                Ok(())
            }
            state => Err(SessionError::invalid_state("pause", state.as_str())),
        }
    }

    /// Tear the session down: stop the player, disconnect, drop the queue.
    ///
    /// Idempotent, and effective even while a retry or refill timer is
    /// pending — the cancellation token wins the race against every sleep.
    pub async fn stop(&self) {
        {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, SessionState::Stopped) {
                return;
            }
            inner.state = SessionState::Stopped;
            inner.queue.clear();
            inner.history.clear();
            inner.current_track = None;
            inner.started_at = None;
        }
        self.signals.cancel.cancel();
        info!(session = %self.key, "Stopping session");
        if let Err(err) = self.player.stop().await {
            debug!(session = %self.key, error = %err, "Player stop failed during teardown");
        }
        if let Err(err) = self.connection.disconnect().await {
            debug!(session = %self.key, error = %err, "Disconnect failed during teardown");
        }
        self.presenter.notify_stopped().await;
    }

    /// Skip to the next queued track, as if the transport had reported the
    /// current one finished.
    pub async fn next(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, SessionState::Stopped) {
                return Err(SessionError::invalid_state(
                    "next",
                    SessionState::Stopped.as_str(),
                ));
            }
            if inner.station_drained {
                debug!(session = %self.key, "Skip ignored, station is drained");
                return Ok(());
            }
            inner.retry_count = 0;
        }
        self.advance_to_next().await;
        Ok(())
    }

    /// Go back to the most recently played track.
    ///
    /// The interrupted current track is re-queued at the *front* of the
    /// queue, so it comes back once the restored track has run its course.
    pub async fn previous(&self) -> Result<()> {
        if !self.try_begin_loading() {
            return Err(SessionError::invalid_state("previous", "loading"));
        }
        let restored = {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, SessionState::Stopped) {
                self.end_loading();
                return Err(SessionError::invalid_state(
                    "previous",
                    SessionState::Stopped.as_str(),
                ));
            }
            match inner.history.pop() {
                None => {
                    self.end_loading();
                    return Err(SessionError::NoHistory);
                }
                Some(previous_track) => {
                    if let Some(current) = inner.current_track.take() {
                        inner.queue.enqueue_front(current);
                    }
                    inner.station_drained = false;
                    previous_track
                }
            }
        };
        info!(session = %self.key, track = %restored.id, "Stepping back to previous track");
        if let Err(err) = self.start_track(&restored).await {
            warn!(
                session = %self.key,
                track = %restored.id,
                error = %err,
                "Previous track failed to restart, advancing"
            );
            self.presenter
                .notify_error(&format!("Could not replay {}, skipping", restored.display_label()))
                .await;
            self.advance_body().await;
        }
        self.end_loading();
        Ok(())
    }

    /// Tag the current track as liked at the catalog.
    pub async fn like(&self) -> Result<bool> {
        let track = {
            let inner = self.inner.lock().await;
            inner.current_track.clone()
        }
        .ok_or(SessionError::NoTrack)?;
        let accepted = self
            .provider
            .like_track(&self.params.credentials, &track.id)
            .await?;
        info!(session = %self.key, track = %track.id, accepted, "Like sent to catalog");
        Ok(accepted)
    }

    // ---- Event loop -----------------------------------------------------

    /// Consume transport events until teardown. One task per session,
    /// spawned at creation by the registry.
    pub(crate) async fn run(
        session: Arc<PlaybackSession>,
        registry: Arc<SessionRegistry>,
        mut events: mpsc::UnboundedReceiver<StampedEvent>,
    ) {
        loop {
            tokio::select! {
                _ = session.signals.cancel.cancelled() => break,
                received = events.recv() => {
                    let Some(stamped) = received else { break };
                    match stamped.event {
                        TransportEvent::TrackFinished => {
                            session.handle_playback_end(stamped.generation, None).await;
                        }
                        TransportEvent::TrackError(detail) => {
                            session
                                .handle_playback_end(stamped.generation, Some(detail))
                                .await;
                        }
                        TransportEvent::ConnectionLost => {
                            if !session.handle_connection_lost().await {
                                break;
                            }
                        }
                    }
                }
            }
        }
        registry.remove_session(&session).await;
        debug!(session = %session.key, "Session event loop terminated");
    }

    /// The transport reported the current stream ended or failed.
    async fn handle_playback_end(&self, generation: u64, error: Option<String>) {
        if !self.try_begin_loading() {
            debug!(session = %self.key, "Playback-end event ignored, advance already in flight");
            return;
        }
        if generation != self.signals.generation.load(Ordering::SeqCst) {
            debug!(session = %self.key, "Stale playback-end event ignored");
            self.end_loading();
            return;
        }

        enum Plan {
            Retry(Track, u32),
            Advance,
            Ignore,
        }

        let plan = {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, SessionState::Stopped) {
                Plan::Ignore
            } else {
                let elapsed = inner.started_at.map(|t| t.elapsed());
                let decision = self.policy.classify(
                    elapsed,
                    inner.retry_count,
                    inner.current_track.is_some(),
                );
                match (decision, inner.current_track.clone()) {
                    (RecoveryDecision::RetrySame { attempt }, Some(track)) => {
                        inner.retry_count = attempt;
                        inner.state = SessionState::Recovering;
                        Plan::Retry(track, attempt)
                    }
                    _ => {
                        inner.retry_count = 0;
                        Plan::Advance
                    }
                }
            }
        };

        match plan {
            Plan::Ignore => {}
            Plan::Retry(track, attempt) => {
                warn!(
                    session = %self.key,
                    track = %track.id,
                    attempt,
                    max = self.policy.max_retries,
                    "Premature playback interruption, retrying same track"
                );
                if let Some(detail) = error.as_deref() {
                    self.presenter
                        .notify_error(&format!(
                            "Playback error on {} ({detail}), retrying",
                            track.display_label()
                        ))
                        .await;
                }
                if self.sleep_cancellable(self.policy.backoff).await && !self.is_terminal().await {
                    if let Err(err) = self.start_track(&track).await {
                        warn!(
                            session = %self.key,
                            track = %track.id,
                            error = %err,
                            "Retry could not restart track, advancing"
                        );
                        self.advance_body().await;
                    }
                }
            }
            Plan::Advance => {
                if let Some(detail) = error.as_deref() {
                    debug!(session = %self.key, detail, "Transport error treated as end of track");
                }
                self.advance_body().await;
            }
        }
        self.end_loading();
    }

    /// The transport connection dropped. Returns false when the session was
    /// destroyed (caller exits the event loop).
    async fn handle_connection_lost(&self) -> bool {
        if self.is_terminal().await {
            return true;
        }
        warn!(session = %self.key, "Transport connection lost, attempting to resignal");
        match tokio::time::timeout(self.config.reconnect_grace(), self.connection.resignal()).await
        {
            Ok(Ok(())) => {
                info!(session = %self.key, "Transport resignalled");
                true
            }
            Ok(Err(err)) => {
                self.fail_connection(&format!("resignalling failed: {err}")).await;
                false
            }
            Err(_) => {
                self.fail_connection("resignalling timed out").await;
                false
            }
        }
    }

    async fn fail_connection(&self, detail: &str) {
        error!(session = %self.key, detail, "Connection unrecoverable, destroying session");
        self.presenter
            .notify_error(&format!("Audio connection lost: {detail}"))
            .await;
        self.stop().await;
    }

    // ---- Advance / start ------------------------------------------------

    /// Guarded entry into the advance procedure. A second entrant while one
    /// is in flight is a duplicate trigger and skips.
    pub(crate) async fn advance_to_next(&self) {
        if !self.try_begin_loading() {
            debug!(session = %self.key, "Advance skipped, another advance in flight");
            return;
        }
        self.advance_body().await;
        self.end_loading();
    }

    /// Advance through the queue until a track starts, the station drains,
    /// or the session is torn down. Caller holds the loading guard.
    async fn advance_body(&self) {
        let mut refill_failures: u32 = 0;
        loop {
            if self.signals.cancel.is_cancelled() {
                return;
            }
            let next = {
                let mut inner = self.inner.lock().await;
                if matches!(inner.state, SessionState::Stopped) || inner.station_drained {
                    return;
                }
                match inner.queue.dequeue() {
                    Some(track) => {
                        if let Some(prev) = inner.current_track.take() {
                            inner.history.push(prev);
                        }
                        inner.state = SessionState::Loading;
                        Some(track)
                    }
                    None => None,
                }
            };

            match next {
                Some(track) => match self.start_track(&track).await {
                    Ok(()) => return,
                    Err(err) => {
                        warn!(
                            session = %self.key,
                            track = %track.id,
                            error = %err,
                            "Track failed to start, trying next in queue"
                        );
                        self.presenter
                            .notify_error(&format!(
                                "Could not play {}, skipping",
                                track.display_label()
                            ))
                            .await;
                        if !self.sleep_cancellable(self.policy.backoff).await {
                            return;
                        }
                    }
                },
                None => {
                    info!(session = %self.key, station = %self.params.station, "Queue empty, requesting refill");
                    match self
                        .provider
                        .station_tracks(&self.params.credentials, &self.params.station)
                        .await
                    {
                        Ok(batch) if !batch.is_empty() => {
                            debug!(session = %self.key, count = batch.len(), "Refill batch received");
                            refill_failures = 0;
                            {
                                let mut inner = self.inner.lock().await;
                                if matches!(inner.state, SessionState::Stopped) {
                                    return;
                                }
                                inner.queue.enqueue_many(batch);
                            }
                            if !self.sleep_cancellable(self.config.refill_delay()).await {
                                return;
                            }
                        }
                        Ok(_) => {
                            self.enter_drained().await;
                            return;
                        }
                        Err(err) => {
                            refill_failures += 1;
                            warn!(
                                session = %self.key,
                                error = %err,
                                attempt = refill_failures,
                                "Refill request failed"
                            );
                            if refill_failures >= self.policy.max_retries {
                                self.presenter
                                    .notify_error("Station is not answering, giving up")
                                    .await;
                                self.enter_drained().await;
                                return;
                            }
                            if !self.sleep_cancellable(self.policy.backoff).await {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Resolve and hand one track to the transport.
    async fn start_track(&self, track: &Track) -> Result<()> {
        self.presenter.notify_loading(track).await;
        self.spawn_started_feedback(track);

        let mut inner = self.inner.lock().await;
        if matches!(inner.state, SessionState::Stopped) {
            return Err(SessionError::invalid_state(
                "start",
                SessionState::Stopped.as_str(),
            ));
        }
        inner.state = SessionState::Loading;

        let url = match self
            .provider
            .stream_url(&self.params.credentials, &track.id)
            .await
        {
            Ok(Some(url)) => url,
            Ok(None) => return Err(SessionError::StreamFetch(track.id.clone())),
            Err(err) => {
                warn!(session = %self.key, track = %track.id, error = %err, "Stream resolution failed");
                return Err(SessionError::StreamFetch(track.id.clone()));
            }
        };

        self.player.play(&url).await?;

        // Replays of the same track keep their retry accounting; only a
        // confirmed start of a different track resets it.
        if inner.last_track_id.as_ref() != Some(&track.id) {
            inner.retry_count = 0;
        }
        inner.current_track = Some(track.clone());
        inner.started_at = Some(Instant::now());
        inner.last_track_id = Some(track.id.clone());
        inner.state = SessionState::Playing;
        drop(inner);

        self.signals.generation.fetch_add(1, Ordering::SeqCst);
        info!(session = %self.key, track = %track.id, title = track.title.as_str(), "Now playing");
        self.presenter.notify_now_playing(track).await;
        Ok(())
    }

    /// The station has nothing left. Keep the connection, park the session.
    async fn enter_drained(&self) {
        {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, SessionState::Stopped) {
                return;
            }
            inner.station_drained = true;
            if let Some(prev) = inner.current_track.take() {
                inner.history.push(prev);
            }
            inner.started_at = None;
            inner.state = SessionState::Idle;
        }
        info!(session = %self.key, station = %self.params.station, "Station exhausted, nothing left to play");
        self.presenter.notify_stopped().await;
    }

    /// Start-of-track feedback is best effort; never blocks playback.
    fn spawn_started_feedback(&self, track: &Track) {
        let provider = Arc::clone(&self.provider);
        let credentials = self.params.credentials.clone();
        let station = self.params.station.clone();
        let id = track.id.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            if let Err(err) = provider.track_started(&credentials, &station, &id).await {
                debug!(session = %key, track = %id, error = %err, "Track-started feedback failed");
            }
        });
    }

    // ---- Guards / timers ------------------------------------------------

    fn try_begin_loading(&self) -> bool {
        self.signals
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn end_loading(&self) {
        self.signals.loading.store(false, Ordering::SeqCst);
    }

    async fn is_terminal(&self) -> bool {
        matches!(self.inner.lock().await.state, SessionState::Stopped)
    }

    /// Sleep that loses to teardown. Returns false when cancelled.
    async fn sleep_cancellable(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.signals.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
