//! Integration tests for pmosession.
//!
//! Everything runs against scripted in-memory fakes for the transport, the
//! station provider and the presenter, on tokio's paused clock so backoff
//! and refill timers elapse deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pmosession::{
    ChannelRef, PlaybackSession, Presenter, SessionConfig, SessionError, SessionKey,
    SessionParams, SessionRegistry, SessionState, Transport, TransportConnection, TransportEvent,
    TransportEventSink, TransportHandles, TransportPlayer,
};
use pmostation::{Credentials, StationId, StationProvider, Track, TrackId};

// ---- Fakes ---------------------------------------------------------------

#[derive(Default)]
struct FakePlayer {
    plays: Mutex<Vec<String>>,
    pauses: AtomicUsize,
    unpauses: AtomicUsize,
    stops: AtomicUsize,
}

impl FakePlayer {
    fn play_count(&self) -> usize {
        self.plays.lock().unwrap().len()
    }

    fn played(&self) -> Vec<String> {
        self.plays.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportPlayer for FakePlayer {
    async fn play(&self, uri: &str) -> anyhow::Result<()> {
        self.plays.lock().unwrap().push(uri.to_string());
        Ok(())
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unpause(&self) -> anyhow::Result<()> {
        self.unpauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeConnection {
    disconnects: AtomicUsize,
    resignals: AtomicUsize,
    resignal_ok: AtomicBool,
}

#[async_trait]
impl TransportConnection for FakeConnection {
    async fn disconnect(&self) -> anyhow::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resignal(&self) -> anyhow::Result<()> {
        self.resignals.fetch_add(1, Ordering::SeqCst);
        if self.resignal_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("gateway refused resume"))
        }
    }
}

struct FakeTransport {
    player: Arc<FakePlayer>,
    connection: Arc<FakeConnection>,
    sink: Mutex<Option<Arc<dyn TransportEventSink>>>,
    hang_join: AtomicBool,
}

impl FakeTransport {
    fn new() -> Arc<Self> {
        let connection = Arc::new(FakeConnection::default());
        connection.resignal_ok.store(true, Ordering::SeqCst);
        Arc::new(Self {
            player: Arc::new(FakePlayer::default()),
            connection,
            sink: Mutex::new(None),
            hang_join: AtomicBool::new(false),
        })
    }

    fn emit(&self, event: TransportEvent) {
        let sink = self
            .sink
            .lock()
            .unwrap()
            .clone()
            .expect("transport was never joined");
        sink.emit(event);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn join(
        &self,
        _channel: &ChannelRef,
        events: Arc<dyn TransportEventSink>,
    ) -> anyhow::Result<TransportHandles> {
        if self.hang_join.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        *self.sink.lock().unwrap() = Some(events);
        Ok(TransportHandles {
            connection: self.connection.clone(),
            player: self.player.clone(),
        })
    }
}

#[derive(Default)]
struct ScriptedProvider {
    batches: Mutex<VecDeque<Vec<Track>>>,
    refill_calls: AtomicUsize,
    started: Mutex<Vec<TrackId>>,
    liked: Mutex<Vec<TrackId>>,
    unresolvable: Mutex<Vec<TrackId>>,
}

impl ScriptedProvider {
    fn with_batches(batches: Vec<Vec<Track>>) -> Arc<Self> {
        let provider = Self::default();
        *provider.batches.lock().unwrap() = batches.into_iter().collect();
        Arc::new(provider)
    }
}

#[async_trait]
impl StationProvider for ScriptedProvider {
    async fn station_tracks(
        &self,
        _credentials: &Credentials,
        _station: &StationId,
    ) -> pmostation::Result<Vec<Track>> {
        self.refill_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn stream_url(
        &self,
        _credentials: &Credentials,
        track: &TrackId,
    ) -> pmostation::Result<Option<String>> {
        if self.unresolvable.lock().unwrap().contains(track) {
            return Ok(None);
        }
        Ok(Some(format!("https://audio.example/{}", track.0)))
    }

    async fn track_started(
        &self,
        _credentials: &Credentials,
        _station: &StationId,
        track: &TrackId,
    ) -> pmostation::Result<()> {
        self.started.lock().unwrap().push(track.clone());
        Ok(())
    }

    async fn like_track(
        &self,
        _credentials: &Credentials,
        track: &TrackId,
    ) -> pmostation::Result<bool> {
        self.liked.lock().unwrap().push(track.clone());
        Ok(true)
    }
}

#[derive(Default)]
struct RecordingPresenter {
    entries: Mutex<Vec<String>>,
}

impl RecordingPresenter {
    fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn notify_loading(&self, track: &Track) {
        self.record(format!("loading:{}", track.id));
    }

    async fn notify_now_playing(&self, track: &Track) {
        self.record(format!("now:{}", track.id));
    }

    async fn notify_error(&self, message: &str) {
        self.record(format!("error:{message}"));
    }

    async fn notify_stopped(&self) {
        self.record("stopped".to_string());
    }

    async fn notify_controls(&self, is_playing: bool) {
        self.record(format!("controls:{is_playing}"));
    }
}

// ---- Harness -------------------------------------------------------------

struct Rig {
    registry: Arc<SessionRegistry>,
    transport: Arc<FakeTransport>,
    provider: Arc<ScriptedProvider>,
    presenter: Arc<RecordingPresenter>,
}

fn rig_with_batches(batches: Vec<Vec<Track>>) -> Rig {
    let transport = FakeTransport::new();
    let provider = ScriptedProvider::with_batches(batches);
    let presenter = Arc::new(RecordingPresenter::default());
    let registry = SessionRegistry::new(
        transport.clone(),
        provider.clone(),
        SessionConfig::default(),
    );
    Rig {
        registry,
        transport,
        provider,
        presenter,
    }
}

fn key() -> SessionKey {
    SessionKey("guild-1".to_string())
}

fn params() -> SessionParams {
    SessionParams {
        channel: ChannelRef("voice-1".to_string()),
        station: StationId("st-1".to_string()),
        credentials: Credentials {
            auth_token: "tok".to_string(),
            user_id: "u-1".to_string(),
        },
    }
}

fn track(id: &str) -> Track {
    Track::new(id, format!("Title {id}"), "Artist", "Album")
}

fn url_of(id: &str) -> String {
    format!("https://audio.example/{id}")
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn wait_for_state(session: &Arc<PlaybackSession>, want: SessionState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    loop {
        if session.status().await.state == want {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for state {want:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn create_playing(rig: &Rig) -> Arc<PlaybackSession> {
    let session = rig
        .registry
        .create(key(), params(), rig.presenter.clone())
        .await
        .expect("create session");
    let player = rig.transport.player.clone();
    wait_for("first track to start", move || player.play_count() >= 1).await;
    session
}

// ---- Tests ---------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn first_track_plays_after_refill() {
    let rig = rig_with_batches(vec![vec![track("a"), track("b")]]);
    let session = create_playing(&rig).await;

    assert_eq!(rig.transport.player.played(), vec![url_of("a")]);
    let status = session.status().await;
    assert_eq!(status.state, SessionState::Playing);
    assert_eq!(status.current_track.as_ref().unwrap().id.0, "a");
    assert_eq!(status.queue_len, 1);
    assert_eq!(status.retry_count, 0);

    // loading + now-playing reached the presenter, started-feedback the
    // catalog
    wait_for("start feedback", || {
        rig.provider.started.lock().unwrap().len() == 1
    })
    .await;
    let entries = rig.presenter.entries();
    assert!(entries.contains(&"loading:a".to_string()));
    assert!(entries.contains(&"now:a".to_string()));
}

#[tokio::test(start_paused = true)]
async fn premature_interruption_retries_then_advances() {
    // Queue = [A, B] behind current C: C fails immediately three times
    // (retry_count 0→1→2→3), the fourth interruption advances to A.
    let rig = rig_with_batches(vec![vec![track("c"), track("a"), track("b")]]);
    let session = create_playing(&rig).await;
    assert_eq!(rig.transport.player.played(), vec![url_of("c")]);

    for attempt in 1..=3u32 {
        rig.transport.emit(TransportEvent::TrackError("stream died".to_string()));
        let player = rig.transport.player.clone();
        let want = attempt as usize + 1;
        wait_for("retry replay", move || player.play_count() >= want).await;
        let status = session.status().await;
        assert_eq!(status.retry_count, attempt);
        assert_eq!(status.current_track.as_ref().unwrap().id.0, "c");
    }
    // three replays of the same track
    assert_eq!(
        rig.transport.player.played(),
        vec![url_of("c"), url_of("c"), url_of("c"), url_of("c")]
    );

    // retries exhausted: the next interruption advances to A
    rig.transport.emit(TransportEvent::TrackFinished);
    let player = rig.transport.player.clone();
    wait_for("advance to next track", move || player.play_count() >= 5).await;

    let status = session.status().await;
    assert_eq!(status.current_track.as_ref().unwrap().id.0, "a");
    assert_eq!(status.retry_count, 0);
    assert_eq!(status.queue_len, 1);
    assert_eq!(status.upcoming[0].id.0, "b");
    let history: Vec<_> = status.history.iter().map(|t| t.id.0.clone()).collect();
    assert_eq!(history, vec!["c"]);
}

#[tokio::test(start_paused = true)]
async fn natural_completion_advances_without_retry() {
    let rig = rig_with_batches(vec![vec![track("a"), track("b")]]);
    let session = create_playing(&rig).await;

    // past the minimum-play threshold this is a natural end
    tokio::time::sleep(Duration::from_secs(15)).await;
    rig.transport.emit(TransportEvent::TrackFinished);

    let player = rig.transport.player.clone();
    wait_for("next track", move || player.play_count() >= 2).await;
    let status = session.status().await;
    assert_eq!(status.current_track.as_ref().unwrap().id.0, "b");
    assert_eq!(status.retry_count, 0);
    assert_eq!(
        status.history.iter().map(|t| t.id.0.clone()).collect::<Vec<_>>(),
        vec!["a"]
    );
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_retry_timer() {
    let rig = rig_with_batches(vec![vec![track("a")]]);
    let session = create_playing(&rig).await;

    rig.transport.emit(TransportEvent::TrackError("hiccup".to_string()));
    wait_for_state(&session, SessionState::Recovering).await;

    rig.registry.stop(&key()).await.expect("stop session");
    assert!(rig.registry.get(&key()).await.is_none());

    // let the 3 s backoff window pass; the cancelled timer must not replay
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.transport.player.play_count(), 1);
    assert!(rig.transport.player.stops.load(Ordering::SeqCst) >= 1);
    assert!(rig.transport.connection.disconnects.load(Ordering::SeqCst) >= 1);
    assert_eq!(session.status().await.state, SessionState::Stopped);
    assert!(rig.presenter.entries().contains(&"stopped".to_string()));
}

#[tokio::test(start_paused = true)]
async fn provider_exhaustion_parks_the_session() {
    let rig = rig_with_batches(vec![vec![track("a")]]);
    let session = create_playing(&rig).await;

    tokio::time::sleep(Duration::from_secs(15)).await;
    rig.transport.emit(TransportEvent::TrackFinished);
    wait_for_state(&session, SessionState::Idle).await;

    let status = session.status().await;
    assert!(status.station_drained);
    assert!(status.current_track.is_none());
    assert!(rig.presenter.entries().contains(&"stopped".to_string()));

    // skip requests are inert while drained: no refill, no playback
    let refills_before = rig.provider.refill_calls.load(Ordering::SeqCst);
    session.next().await.expect("next while drained is accepted");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(rig.provider.refill_calls.load(Ordering::SeqCst), refills_before);
    assert_eq!(rig.transport.player.play_count(), 1);

    // the transport connection is still ours until an explicit stop
    assert_eq!(rig.transport.connection.disconnects.load(Ordering::SeqCst), 0);
    rig.registry.stop(&key()).await.expect("stop session");
    assert_eq!(rig.transport.connection.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_create_is_rejected() {
    let rig = rig_with_batches(vec![vec![track("a")]]);
    let _session = create_playing(&rig).await;

    let err = rig
        .registry
        .create(key(), params(), rig.presenter.clone())
        .await
        .expect_err("second create must be rejected");
    assert!(matches!(err, SessionError::AlreadyActive(_)));

    // remove is a no-op on absent keys
    rig.registry.remove(&SessionKey("guild-2".to_string())).await;
}

#[tokio::test(start_paused = true)]
async fn join_timeout_fails_create_and_frees_the_key() {
    let rig = rig_with_batches(vec![vec![track("a")]]);
    rig.transport.hang_join.store(true, Ordering::SeqCst);

    let err = rig
        .registry
        .create(key(), params(), rig.presenter.clone())
        .await
        .expect_err("join must time out");
    assert!(matches!(err, SessionError::ConnectionTimeout(_)));
    assert!(rig.registry.get(&key()).await.is_none());
    assert!(rig.registry.keys().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_roundtrip() {
    let rig = rig_with_batches(vec![vec![track("a")]]);
    let session = create_playing(&rig).await;

    session.pause().await.expect("pause");
    assert_eq!(session.status().await.state, SessionState::Paused);
    assert_eq!(rig.transport.player.pauses.load(Ordering::SeqCst), 1);
    assert!(matches!(
        session.pause().await,
        Err(SessionError::InvalidState(_, _))
    ));

    session.play().await.expect("resume");
    assert_eq!(session.status().await.state, SessionState::Playing);
    assert_eq!(rig.transport.player.unpauses.load(Ordering::SeqCst), 1);
    assert!(matches!(
        session.play().await,
        Err(SessionError::InvalidState(_, _))
    ));

    let entries = rig.presenter.entries();
    assert!(entries.contains(&"controls:false".to_string()));
    assert!(entries.contains(&"controls:true".to_string()));
}

#[tokio::test(start_paused = true)]
async fn previous_without_history_is_rejected_without_mutation() {
    let rig = rig_with_batches(vec![vec![track("a"), track("b")]]);
    let session = create_playing(&rig).await;

    let before = session.status().await;
    assert!(matches!(
        session.previous().await,
        Err(SessionError::NoHistory)
    ));
    let after = session.status().await;
    assert_eq!(after.current_track, before.current_track);
    assert_eq!(after.queue_len, before.queue_len);
    assert_eq!(after.state, SessionState::Playing);
}

#[tokio::test(start_paused = true)]
async fn previous_requeues_current_at_the_front() {
    let rig = rig_with_batches(vec![vec![track("a"), track("b")]]);
    let session = create_playing(&rig).await;

    // finish A naturally so B is current and A is in history
    tokio::time::sleep(Duration::from_secs(15)).await;
    rig.transport.emit(TransportEvent::TrackFinished);
    let player = rig.transport.player.clone();
    wait_for("advance to b", move || player.play_count() >= 2).await;

    session.previous().await.expect("previous");
    let status = session.status().await;
    assert_eq!(status.current_track.as_ref().unwrap().id.0, "a");
    // the interrupted track comes back right after the restored one
    assert_eq!(status.upcoming[0].id.0, "b");
    assert!(status.history.is_empty());
    assert_eq!(
        rig.transport.player.played(),
        vec![url_of("a"), url_of("b"), url_of("a")]
    );
}

#[tokio::test(start_paused = true)]
async fn unresolvable_track_is_skipped_at_queue_level() {
    let rig = rig_with_batches(vec![vec![track("a"), track("bad"), track("b")]]);
    let session = create_playing(&rig).await;
    rig.provider
        .unresolvable
        .lock()
        .unwrap()
        .push(TrackId("bad".to_string()));

    tokio::time::sleep(Duration::from_secs(15)).await;
    rig.transport.emit(TransportEvent::TrackFinished);

    // "bad" never reaches the player; B does, after the queue-level backoff
    let player = rig.transport.player.clone();
    wait_for("skip to b", move || player.play_count() >= 2).await;
    assert_eq!(rig.transport.player.played(), vec![url_of("a"), url_of("b")]);
    let status = session.status().await;
    assert_eq!(status.current_track.as_ref().unwrap().id.0, "b");
    // the per-track retry counter is untouched by queue-level retries
    assert_eq!(status.retry_count, 0);
    assert!(rig
        .presenter
        .entries()
        .iter()
        .any(|e| e.starts_with("error:") && e.contains("skipping")));
}

#[tokio::test(start_paused = true)]
async fn connection_loss_resignals_within_grace() {
    let rig = rig_with_batches(vec![vec![track("a")]]);
    let session = create_playing(&rig).await;

    rig.transport.emit(TransportEvent::ConnectionLost);
    let connection = rig.transport.connection.clone();
    wait_for("resignal attempt", move || {
        connection.resignals.load(Ordering::SeqCst) >= 1
    })
    .await;

    assert!(rig.registry.get(&key()).await.is_some());
    assert_eq!(session.status().await.state, SessionState::Playing);
}

#[tokio::test(start_paused = true)]
async fn unrecoverable_connection_loss_destroys_the_session() {
    let rig = rig_with_batches(vec![vec![track("a")]]);
    let session = create_playing(&rig).await;
    rig.transport.connection.resignal_ok.store(false, Ordering::SeqCst);

    rig.transport.emit(TransportEvent::ConnectionLost);
    wait_for_state(&session, SessionState::Stopped).await;

    // the event loop removes the registry entry on its way out
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while rig.registry.get(&key()).await.is_some() {
        if tokio::time::Instant::now() > deadline {
            panic!("session was not removed from the registry");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    assert!(rig.transport.connection.disconnects.load(Ordering::SeqCst) >= 1);
    let entries = rig.presenter.entries();
    assert!(entries.iter().any(|e| e.starts_with("error:")));
    assert!(entries.contains(&"stopped".to_string()));
}

#[tokio::test(start_paused = true)]
async fn like_tags_the_current_track() {
    let rig = rig_with_batches(vec![vec![track("a")]]);
    let session = create_playing(&rig).await;

    let accepted = session.like().await.expect("like");
    assert!(accepted);
    assert_eq!(
        rig.provider.liked.lock().unwrap().clone(),
        vec![TrackId("a".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_all_tears_down_every_session() {
    let rig = rig_with_batches(vec![vec![track("a")], vec![track("b")]]);
    let _session = create_playing(&rig).await;

    rig.registry.shutdown_all().await;
    assert!(rig.registry.keys().await.is_empty());
    assert!(rig.transport.connection.disconnects.load(Ordering::SeqCst) >= 1);
}
