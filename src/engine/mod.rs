//! The lyrics sync engine.
//!
//! One task owns every piece of derived state. Player reports, connect
//! results, finished fetches and position ticks are applied there in order,
//! and each change is published as an immutable [`Snapshot`].

pub mod connection;
pub mod events;
pub mod fetch;
pub mod position;
pub mod state;

use crate::config::Config;
use crate::lyrics::resolver::{self, RenderLine, Resolver};
use crate::lyrics::{LyricsProvider, ParsedLyrics};
use crate::player::{ConnectError, PlaybackSource, PlaybackState, SourceEvent};
use connection::{ConnectionPhase, ConnectionRetry, FailureAction};
use events::{Command, Event};
use fetch::FetchOrchestrator;
use position::{PositionTicker, PositionTracker};
use state::{Snapshot, TrackInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Cloneable control surface for a running [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Event>,
    snapshots: watch::Receiver<Snapshot>,
}

impl EngineHandle {
    pub async fn connect(&self) -> anyhow::Result<()> {
        self.command(Command::Connect).await
    }

    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.command(Command::Disconnect).await
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.command(Command::Shutdown).await
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    async fn command(&self, cmd: Command) -> anyhow::Result<()> {
        self.tx
            .send(Event::Command(cmd))
            .await
            .map_err(|_| anyhow::anyhow!("engine stopped"))
    }
}

pub struct Engine<S, P> {
    source: Arc<S>,
    resolver: Resolver,
    tracker: PositionTracker,
    ticker: PositionTicker,
    fetch: FetchOrchestrator<P>,
    connection: ConnectionRetry,
    connect_task: Option<JoinHandle<()>>,
    connect_ticket: u64,
    track: TrackInfo,
    rendered_from: Option<Arc<ParsedLyrics>>,
    render_lines: Arc<Vec<RenderLine>>,
    tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,
    source_rx: mpsc::Receiver<SourceEvent>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl<S: PlaybackSource, P: LyricsProvider> Engine<S, P> {
    pub fn new(cfg: &Config, source: Arc<S>, provider: Arc<P>) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel::<Event>(256);
        let (source_tx, source_rx) = mpsc::channel::<SourceEvent>(256);
        let (snapshot_tx, snapshots) = watch::channel(Snapshot::default());

        source.on_playback_state(source_tx);

        let engine = Self {
            connection: ConnectionRetry::from_config(source.name(), &cfg.connection),
            source,
            resolver: Resolver::from_config(&cfg.lyrics),
            tracker: PositionTracker::new(),
            ticker: PositionTicker::new(cfg.tracker.tick_interval()),
            fetch: FetchOrchestrator::new(provider, tx.clone(), cfg.lyrics.recent_cache_size),
            connect_task: None,
            connect_ticket: 0,
            track: TrackInfo::default(),
            rendered_from: None,
            render_lines: Arc::new(Vec::new()),
            tx: tx.clone(),
            rx,
            source_rx,
            snapshot_tx,
        };
        (engine, EngineHandle { tx, snapshots })
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                ev = self.rx.recv() => {
                    let Some(ev) = ev else { break };
                    if !self.handle_event(ev).await {
                        break;
                    }
                }
                Some(ev) = self.source_rx.recv() => self.handle_source(ev),
                _ = self.ticker.tick() => {}
            }
            self.publish();
        }

        self.teardown().await;
        self.publish();
        tracing::info!("engine stopped");
    }

    /// Returns false once the engine should stop.
    async fn handle_event(&mut self, ev: Event) -> bool {
        match ev {
            Event::Command(Command::Connect) => {
                if self.connection.is_terminal() {
                    if let Some(e) = self.connection.last_error() {
                        tracing::debug!("manual reconnect after: {e}");
                    }
                    self.connection.reset();
                }
                self.start_connect(Duration::ZERO);
            }
            Event::Command(Command::Disconnect) => self.teardown().await,
            Event::Command(Command::Shutdown) => return false,
            Event::Connected { ticket, .. } if ticket != self.connect_ticket => {
                tracing::debug!(ticket, "discarding stale connect result");
            }
            Event::Connected { result, .. } => {
                self.connect_task = None;
                match result {
                    Ok(()) => {
                        self.connection.on_success();
                        tracing::info!(source = self.source.name(), "connected");
                    }
                    Err(e) => self.handle_connect_failure(e),
                }
            }
            Event::LyricsFetched(done) => {
                if self.fetch.complete(done) {
                    self.sync_render_lines();
                }
            }
        }
        true
    }

    fn handle_source(&mut self, ev: SourceEvent) {
        // Nothing is attached after a teardown; a late report must not revive state.
        if self.connection.phase() == ConnectionPhase::Idle {
            tracing::debug!(source = self.source.name(), "ignoring report while detached");
            return;
        }
        match ev {
            SourceEvent::Playback(state) => self.apply_playback(state),
            SourceEvent::SessionLost(e) => {
                tracing::warn!(source = self.source.name(), "session lost: {e}");
                self.ticker.stop();
                self.handle_connect_failure(e);
            }
        }
    }

    fn apply_playback(&mut self, state: PlaybackState) {
        self.tracker.reset(&state, Instant::now());
        self.ticker.restart();

        self.track = TrackInfo {
            title: state.track_title.clone(),
            artist: state.artist_name.clone(),
            album: state.album_name.clone(),
        };

        self.fetch.request(
            &state.track_title,
            &state.artist_name,
            &state.album_name,
            state.duration_ms,
        );
        self.sync_render_lines();
    }

    fn start_connect(&mut self, delay: Duration) {
        if !self.connection.begin_attempt() {
            tracing::debug!("connect already in progress");
            return;
        }
        tracing::info!(
            source = self.source.name(),
            attempt = self.connection.attempt_count(),
            "connecting"
        );

        self.connect_ticket += 1;
        let ticket = self.connect_ticket;
        let source = self.source.clone();
        let tx = self.tx.clone();
        self.connect_task = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = source.connect().await;
            let _ = tx.send(Event::Connected { ticket, result }).await;
        }));
    }

    fn handle_connect_failure(&mut self, e: ConnectError) {
        match self.connection.on_failure(&e) {
            FailureAction::RetryAfter(delay) => {
                tracing::warn!(
                    source = self.source.name(),
                    "connection terminated, retrying in {}ms: {e}",
                    delay.as_millis()
                );
                self.start_connect(delay);
            }
            FailureAction::Report(msg) => {
                tracing::error!(source = self.source.name(), "{msg}");
            }
        }
    }

    /// Stop everything that could still write state and drop the session.
    async fn teardown(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        // Any connect result still queued now belongs to a dead attempt.
        self.connect_ticket += 1;
        self.source.disconnect().await;
        self.connection.reset();
        self.ticker.stop();
        self.tracker.clear();
        self.fetch.cancel();
    }

    fn sync_render_lines(&mut self) {
        let current = self.fetch.lyrics().cloned();
        let unchanged = match (&current, &self.rendered_from) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }
        self.render_lines = Arc::new(
            current
                .as_ref()
                .map(|l| self.resolver.render_lines(&l.lines))
                .unwrap_or_default(),
        );
        self.rendered_from = current;
    }

    fn publish(&self) {
        let position_ms = self.tracker.estimate(Instant::now());
        let duration_ms = self.tracker.duration_ms();
        let effective_position_ms = self.resolver.effective_position(position_ms, duration_ms);
        let active_index = resolver::active_index(&self.render_lines, effective_position_ms);

        self.snapshot_tx.send_replace(Snapshot {
            track: self.track.clone(),
            lyrics: self.fetch.lyrics().cloned(),
            render_lines: self.render_lines.clone(),
            loading: self.fetch.is_loading(),
            error: self.fetch.error().map(str::to_string),
            position_ms,
            effective_position_ms,
            duration_ms,
            is_playing: self.tracker.is_playing(),
            active_index,
            connection: self.connection.phase(),
            connection_error: self.connection.error_message().map(str::to_string),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lyrics::{LyricLine, LyricsError, LyricsRequest};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSource {
        results: Mutex<VecDeque<Result<(), ConnectError>>>,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        handler: Mutex<Option<mpsc::Sender<SourceEvent>>>,
        /// Issued a Disconnect from inside the next connect attempt.
        disconnect_during: Mutex<Option<EngineHandle>>,
    }

    impl FakeSource {
        fn scripted(results: Vec<Result<(), ConnectError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                ..Default::default()
            })
        }

        async fn emit(&self, ev: SourceEvent) {
            let tx = self.handler.lock().unwrap().clone().unwrap();
            tx.send(ev).await.unwrap();
        }
    }

    impl PlaybackSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn connect(&self) -> Result<(), ConnectError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let racing = self.disconnect_during.lock().unwrap().take();
            if let Some(handle) = racing {
                handle.disconnect().await.unwrap();
            }
            self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn on_playback_state(&self, handler: mpsc::Sender<SourceEvent>) {
            *self.handler.lock().unwrap() = Some(handler);
        }
    }

    struct FixedProvider {
        calls: AtomicUsize,
    }

    impl LyricsProvider for FixedProvider {
        async fn fetch(&self, _req: &LyricsRequest) -> Result<ParsedLyrics, LyricsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ParsedLyrics {
                lines: vec![
                    LyricLine::new(0, "A"),
                    LyricLine::new(5000, "B"),
                    LyricLine::new(7000, "C"),
                ],
                synced: true,
            })
        }
    }

    fn start(
        source: Arc<FakeSource>,
    ) -> (EngineHandle, Arc<FixedProvider>, JoinHandle<()>) {
        let provider = Arc::new(FixedProvider {
            calls: AtomicUsize::new(0),
        });
        let (engine, handle) = Engine::new(&Config::default(), source, provider.clone());
        let task = tokio::spawn(engine.run());
        (handle, provider, task)
    }

    fn playing(title: &str, position_ms: u64) -> SourceEvent {
        SourceEvent::Playback(PlaybackState {
            track_title: title.into(),
            artist_name: "Artist".into(),
            album_name: "Album".into(),
            duration_ms: 60_000,
            position_ms,
            is_paused: false,
        })
    }

    fn terminated() -> Result<(), ConnectError> {
        Err(ConnectError::Terminated("gone".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_end_terminal() {
        let source = FakeSource::scripted(vec![terminated(), terminated(), terminated()]);
        let (handle, _provider, task) = start(source.clone());
        let mut snaps = handle.subscribe();

        handle.connect().await.unwrap();
        let snap = snaps
            .wait_for(|s| s.connection == ConnectionPhase::Terminal)
            .await
            .unwrap()
            .clone();
        assert_eq!(source.connects.load(Ordering::SeqCst), 3);
        assert_eq!(
            snap.connection_error.as_deref(),
            Some("fake connection failed after 3 attempts")
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_resets() {
        let source = FakeSource::scripted(vec![terminated(), Ok(())]);
        let (handle, _provider, task) = start(source.clone());
        let mut snaps = handle.subscribe();

        handle.connect().await.unwrap();
        snaps
            .wait_for(|s| s.connection == ConnectionPhase::Connected)
            .await
            .unwrap();
        assert_eq!(source.connects.load(Ordering::SeqCst), 2);
        assert!(handle.snapshot().connection_error.is_none());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(source.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        let source =
            FakeSource::scripted(vec![Err(ConnectError::Unavailable("no socket".into()))]);
        let (handle, _provider, task) = start(source.clone());
        let mut snaps = handle.subscribe();

        handle.connect().await.unwrap();
        let snap = snaps
            .wait_for(|s| s.connection == ConnectionPhase::Failed)
            .await
            .unwrap()
            .clone();
        assert!(snap.connection_error.unwrap().contains("no socket"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.connects.load(Ordering::SeqCst), 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_drives_active_line() {
        let source = FakeSource::scripted(vec![Ok(())]);
        let (handle, provider, task) = start(source.clone());
        let mut snaps = handle.subscribe();

        handle.connect().await.unwrap();
        snaps
            .wait_for(|s| s.connection == ConnectionPhase::Connected)
            .await
            .unwrap();

        // 5000 + 1000 lead lands on "B"
        source.emit(playing("Song", 5000)).await;
        let snap = snaps
            .wait_for(|s| s.lyrics.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(snap.track.title, "Song");
        assert_eq!(snap.active_line().unwrap().display_text(), "B");

        // interpolation carries the position past "C" without new reports
        let snap = snaps
            .wait_for(|s| s.active_index == Some(2))
            .await
            .unwrap()
            .clone();
        assert!(snap.position_ms >= 6000);
        assert!(snap.is_playing);

        // seeking back re-anchors; the same track is not fetched again
        source.emit(playing("Song", 0)).await;
        snaps.wait_for(|s| s.active_index == Some(0)).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_session_reconnects() {
        let source = FakeSource::scripted(vec![Ok(()), Ok(())]);
        let (handle, _provider, task) = start(source.clone());
        let mut snaps = handle.subscribe();

        handle.connect().await.unwrap();
        snaps
            .wait_for(|s| s.connection == ConnectionPhase::Connected)
            .await
            .unwrap();

        source
            .emit(SourceEvent::SessionLost(ConnectError::Terminated("eof".into())))
            .await;
        // the retry is scheduled at once, so the engine goes straight back to connecting
        snaps
            .wait_for(|s| s.connection == ConnectionPhase::Connecting)
            .await
            .unwrap();
        snaps
            .wait_for(|s| s.connection == ConnectionPhase::Connected)
            .await
            .unwrap();
        assert_eq!(source.connects.load(Ordering::SeqCst), 2);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_drops_connect_result_in_flight() {
        let source = FakeSource::scripted(vec![Ok(()), terminated()]);
        let (handle, _provider, task) = start(source.clone());
        let mut snaps = handle.subscribe();

        handle.connect().await.unwrap();
        snaps
            .wait_for(|s| s.connection == ConnectionPhase::Connected)
            .await
            .unwrap();
        source.emit(playing("Song", 0)).await;
        snaps.wait_for(|s| s.is_playing).await.unwrap();

        // the retry is overtaken by a disconnect before its failure is applied
        *source.disconnect_during.lock().unwrap() = Some(handle.clone());
        source
            .emit(SourceEvent::SessionLost(ConnectError::Terminated("eof".into())))
            .await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.connects.load(Ordering::SeqCst), 2);
        let snap = handle.snapshot();
        assert_eq!(snap.connection, ConnectionPhase::Idle);
        assert!(snap.connection_error.is_none());
        assert!(!snap.is_playing);

        // no ticker and no pending retry: nothing is published any more
        snaps.borrow_and_update();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!snaps.has_changed().unwrap());

        // reports from the dropped session do not revive the engine
        source.emit(playing("Other", 0)).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        let snap = handle.snapshot();
        assert_eq!(snap.track.title, "Song");
        assert!(!snap.is_playing);
        assert_eq!(snap.connection, ConnectionPhase::Idle);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
