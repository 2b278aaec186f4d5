//! mpv as a playback source, over its JSON IPC socket.
//!
//! mpv reports properties one at a time; [`StateAssembler`] folds them into
//! whole [`PlaybackState`]s and only forwards the ones that matter (pause,
//! track, duration, seeks, drift).

use super::{ConnectError, PlaybackSource, PlaybackState, SourceEvent};
use serde_json::{Value, json};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, WriteHalf},
    net::UnixStream,
    sync::mpsc,
    task::JoinHandle,
};

const OBSERVED: [&str; 5] = ["time-pos", "duration", "pause", "metadata", "media-title"];

#[derive(Debug)]
struct Session {
    writer: WriteHalf<UnixStream>,
    reader: JoinHandle<()>,
}

#[derive(Debug)]
pub struct MpvSource {
    socket_path: PathBuf,
    resync_threshold: Duration,
    handler: Mutex<Option<mpsc::Sender<SourceEvent>>>,
    session: tokio::sync::Mutex<Option<Session>>,
    /// Bumped by every disconnect, under the session lock.
    generation: AtomicU64,
    request_id: AtomicU64,
}

impl MpvSource {
    pub fn new(socket_path: PathBuf, resync_threshold: Duration) -> Self {
        Self {
            socket_path,
            resync_threshold,
            handler: Mutex::new(None),
            session: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            request_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(cfg: &crate::config::PlayerConfig) -> Self {
        Self::new(
            cfg.ipc_socket.clone(),
            Duration::from_millis(cfg.resync_threshold_ms),
        )
    }

    fn handler(&self) -> Option<mpsc::Sender<SourceEvent>> {
        self.handler.lock().ok().and_then(|h| h.clone())
    }

    async fn command(&self, writer: &mut WriteHalf<UnixStream>, mut v: Value) -> io::Result<()> {
        // Tag requests so errors come back with an id on the IPC stream.
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        if let Value::Object(ref mut o) = v {
            o.insert("request_id".to_string(), Value::from(id));
        }
        let mut line = serde_json::to_vec(&v).map_err(io::Error::other)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await
    }
}

impl PlaybackSource for MpvSource {
    fn name(&self) -> &str {
        "mpv"
    }

    async fn connect(&self) -> Result<(), ConnectError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| classify(&self.socket_path, e))?;
        let (reader, mut writer) = tokio::io::split(stream);

        for (id, name) in OBSERVED.iter().enumerate() {
            self.command(&mut writer, json!({"command": ["observe_property", id + 1, name]}))
                .await
                .map_err(|e| classify(&self.socket_path, e))?;
        }

        let mut session = self.session.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            let _ = writer.shutdown().await;
            return Err(ConnectError::Terminated(
                "disconnected while connecting".to_string(),
            ));
        }

        let assembler = StateAssembler::new(self.resync_threshold);
        let reader = tokio::spawn(read_events_loop(reader, self.handler(), assembler));
        if let Some(old) = session.replace(Session { writer, reader }) {
            old.reader.abort();
        }
        tracing::info!(socket = %self.socket_path.display(), "attached to mpv");
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(mut old) = session.take() {
            old.reader.abort();
            let _ = old.writer.shutdown().await;
        }
    }

    fn on_playback_state(&self, handler: mpsc::Sender<SourceEvent>) {
        if let Ok(mut h) = self.handler.lock() {
            *h = Some(handler);
        }
    }
}

/// A refused or dropped socket means mpv ended our session; anything else
/// (no socket at all, permissions) will not fix itself by retrying.
fn classify(path: &std::path::Path, e: io::Error) -> ConnectError {
    match e.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ConnectError::Terminated(e.to_string()),
        io::ErrorKind::NotFound => {
            ConnectError::Unavailable(format!("no mpv IPC socket at {}", path.display()))
        }
        _ => ConnectError::Unavailable(e.to_string()),
    }
}

async fn read_events_loop(
    reader: tokio::io::ReadHalf<UnixStream>,
    handler: Option<mpsc::Sender<SourceEvent>>,
    mut assembler: StateAssembler,
) {
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Ok(v) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                if let Some(err) = v.get("error").and_then(Value::as_str)
                    && err != "success"
                {
                    tracing::debug!("mpv ipc error: {err}");
                }
                if let Some(state) = assembler.apply(&v, Instant::now())
                    && let Some(tx) = &handler
                    && tx.send(SourceEvent::Playback(state)).await.is_err()
                {
                    return;
                }
            }
            Ok(None) => break "mpv closed the IPC connection".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    if let Some(tx) = &handler {
        let _ = tx
            .send(SourceEvent::SessionLost(ConnectError::Terminated(reason)))
            .await;
    }
}

/// Builds whole playback states out of mpv's per-property events.
#[derive(Debug)]
struct StateAssembler {
    state: PlaybackState,
    metadata_title: String,
    media_title: String,
    resync_threshold: Duration,
    /// Position and time of the last forwarded state.
    last_sent: Option<(u64, Instant)>,
    force_next_position: bool,
}

impl StateAssembler {
    fn new(resync_threshold: Duration) -> Self {
        Self {
            // mpv reports pause=false on observe; until then treat as paused.
            state: PlaybackState {
                is_paused: true,
                ..Default::default()
            },
            metadata_title: String::new(),
            media_title: String::new(),
            resync_threshold,
            last_sent: None,
            force_next_position: false,
        }
    }

    /// Fold one IPC message in. Returns a state when it should be forwarded.
    fn apply(&mut self, v: &Value, now: Instant) -> Option<PlaybackState> {
        let changed = match v.get("event")?.as_str()? {
            "property-change" => {
                let data = v.get("data");
                match v.get("name")?.as_str()? {
                    "time-pos" => {
                        let pos = data.and_then(Value::as_f64).unwrap_or(0.0);
                        self.state.position_ms = secs_to_ms(pos);
                        self.position_jumped(now)
                    }
                    "duration" => {
                        let dur = secs_to_ms(data.and_then(Value::as_f64).unwrap_or(0.0));
                        replace(&mut self.state.duration_ms, dur)
                    }
                    "pause" => {
                        let paused = data.and_then(Value::as_bool).unwrap_or(false);
                        replace(&mut self.state.is_paused, paused)
                    }
                    "metadata" => self.apply_metadata(data),
                    "media-title" => {
                        self.media_title = data.and_then(Value::as_str).unwrap_or("").to_string();
                        self.refresh_title()
                    }
                    _ => false,
                }
            }
            "seek" | "playback-restart" | "file-loaded" => {
                self.force_next_position = true;
                false
            }
            "end-file" => {
                self.state.position_ms = 0;
                false
            }
            _ => false,
        };

        if !changed {
            return None;
        }
        self.last_sent = Some((self.state.position_ms, now));
        Some(self.state.clone())
    }

    /// True when time-pos is no longer where extrapolation says it should be.
    fn position_jumped(&mut self, now: Instant) -> bool {
        if std::mem::take(&mut self.force_next_position) {
            return true;
        }
        let Some((pos, at)) = self.last_sent else {
            return true;
        };
        let expected = if self.state.is_paused {
            pos
        } else {
            pos.saturating_add(now.saturating_duration_since(at).as_millis() as u64)
        };
        let drift = self.state.position_ms.abs_diff(expected);
        drift > self.resync_threshold.as_millis() as u64
    }

    fn apply_metadata(&mut self, data: Option<&Value>) -> bool {
        let field = |key: &str| -> String {
            data.and_then(Value::as_object)
                .and_then(|m| {
                    m.iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(key))
                        .and_then(|(_, v)| v.as_str())
                })
                .unwrap_or("")
                .trim()
                .to_string()
        };
        self.metadata_title = field("title");
        let artist = replace(&mut self.state.artist_name, field("artist"));
        let album = replace(&mut self.state.album_name, field("album"));
        let title = self.refresh_title();
        artist | album | title
    }

    fn refresh_title(&mut self) -> bool {
        let title = if self.metadata_title.is_empty() {
            self.media_title.clone()
        } else {
            self.metadata_title.clone()
        };
        replace(&mut self.state.track_title, title)
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0) as u64
    } else {
        0
    }
}

/// Store `new`, reporting whether it differed.
fn replace<T: PartialEq>(slot: &mut T, new: T) -> bool {
    if *slot == new {
        return false;
    }
    *slot = new;
    true
}
