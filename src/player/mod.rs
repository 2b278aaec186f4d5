//! Playback-control sources
//!
//! The engine only sees [`PlaybackSource`]; concrete players live behind it.

pub mod mpv;

use std::future::Future;
use tokio::sync::mpsc;

/// Full playback state as reported by the source. Always sent whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub track_title: String,
    pub artist_name: String,
    pub album_name: String,
    pub duration_ms: u64,
    pub position_ms: u64,
    pub is_paused: bool,
}

#[derive(Debug, Clone)]
pub enum SourceEvent {
    Playback(PlaybackState),
    /// An established session ended without us asking.
    SessionLost(ConnectError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The player ended our session (it quit, restarted, or dropped the socket).
    #[error("session terminated: {0}")]
    Terminated(String),
    #[error("player unavailable: {0}")]
    Unavailable(String),
}

impl ConnectError {
    /// Worth retrying automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectError::Terminated(_))
    }
}

pub trait PlaybackSource: Send + Sync + 'static {
    /// Human readable name used in status messages.
    fn name(&self) -> &str;

    fn connect(&self) -> impl Future<Output = Result<(), ConnectError>> + Send;

    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    /// Register where playback events go. Replaces any earlier handler.
    fn on_playback_state(&self, handler: mpsc::Sender<SourceEvent>);
}
