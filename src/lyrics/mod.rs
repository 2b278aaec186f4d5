//! Lyrics module for fetching and displaying synchronized lyrics
//!
//! This module provides:
//! - LRCLIB API client for fetching lyrics
//! - LRC format parser for synchronized lyrics
//! - Active-line resolution against a playback position

pub mod lrclib;
pub mod parser;
pub mod resolver;

use std::future::Future;

pub use lrclib::LrclibClient;
pub use parser::{LyricLine, parse_plain_text, parse_timed_text};

/// Parsed lyrics plus whether they carry real timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLyrics {
    pub lines: Vec<LyricLine>,
    pub synced: bool,
}

impl ParsedLyrics {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// One lookup against a lyrics provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricsRequest {
    pub track_name: String,
    pub artist_name: String,
    pub album_name: String,
    pub duration_secs: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum LyricsError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("lyrics provider returned HTTP {0}")]
    Status(u16),
    #[error("malformed lyrics response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl LyricsError {
    /// Short text suitable for showing in place of the lyrics.
    pub fn user_message(&self) -> String {
        match self {
            LyricsError::Status(code) => {
                format!("We couldn't find lyrics to this song... ({code})")
            }
            other => other.to_string(),
        }
    }
}

/// Source of lyrics for a track.
///
/// An empty result means "nothing found" and is not an error.
pub trait LyricsProvider: Send + Sync + 'static {
    fn fetch(
        &self,
        req: &LyricsRequest,
    ) -> impl Future<Output = Result<ParsedLyrics, LyricsError>> + Send;
}

/// Pick the payload to use: synced lyrics first, plain lyrics as fallback.
pub fn select_lyrics(
    synced: Option<&str>,
    plain: Option<&str>,
    plain_step_ms: u64,
) -> ParsedLyrics {
    if let Some(synced) = synced
        && !synced.trim().is_empty()
    {
        return ParsedLyrics {
            lines: parse_timed_text(synced),
            synced: true,
        };
    }
    if let Some(plain) = plain
        && !plain.trim().is_empty()
    {
        return ParsedLyrics {
            lines: parse_plain_text(plain, plain_step_ms),
            synced: false,
        };
    }
    ParsedLyrics::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_synced_lyrics() {
        let parsed = select_lyrics(Some("[00:01.00]a"), Some("plain"), 2000);
        assert!(parsed.synced);
        assert_eq!(parsed.lines, vec![LyricLine::new(1000, "a")]);
    }

    #[test]
    fn test_blank_synced_falls_back_to_plain() {
        let parsed = select_lyrics(Some("  \n"), Some("one\ntwo"), 2000);
        assert!(!parsed.synced);
        assert_eq!(
            parsed.lines,
            vec![LyricLine::new(0, "one"), LyricLine::new(2000, "two")]
        );
    }

    #[test]
    fn test_nothing_usable_is_empty_not_error() {
        assert!(select_lyrics(None, Some(""), 2000).is_empty());
        assert!(select_lyrics(None, None, 2000).is_empty());
    }

    #[test]
    fn test_status_error_message() {
        assert_eq!(
            LyricsError::Status(404).user_message(),
            "We couldn't find lyrics to this song... (404)"
        );
    }
}
