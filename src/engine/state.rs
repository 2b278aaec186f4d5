use super::connection::ConnectionPhase;
use crate::lyrics::ParsedLyrics;
use crate::lyrics::resolver::{self, RenderLine};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
}

impl TrackInfo {
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() { "Unknown title" } else { &self.title }
    }

    pub fn display_artist(&self) -> &str {
        if self.artist.trim().is_empty() { "Unknown artist" } else { &self.artist }
    }
}

/// Immutable view of the engine, published after every change.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub track: TrackInfo,
    pub lyrics: Option<Arc<ParsedLyrics>>,
    pub render_lines: Arc<Vec<RenderLine>>,
    pub loading: bool,
    pub error: Option<String>,
    pub position_ms: u64,
    pub effective_position_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
    pub active_index: Option<usize>,
    pub connection: ConnectionPhase,
    pub connection_error: Option<String>,
}

impl Snapshot {
    pub fn active_line(&self) -> Option<&RenderLine> {
        self.active_index.and_then(|i| self.render_lines.get(i))
    }

    pub fn progress(&self) -> f32 {
        resolver::progress_ratio(self.position_ms, self.duration_ms)
    }

    /// Status shown instead of lyrics, or None when lyrics are on screen.
    pub fn status_text(&self) -> Option<&str> {
        if let Some(err) = &self.connection_error {
            return Some(err);
        }
        if self.loading {
            return Some("Loading lyrics...");
        }
        if self.lyrics.is_some() {
            return None;
        }
        Some(self.error.as_deref().unwrap_or("No lyrics found"))
    }
}
