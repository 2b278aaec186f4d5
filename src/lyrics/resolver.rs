//! Active-line resolution
//!
//! Maps a playback position onto a parsed line sequence: which line is
//! highlighted and which blank lines stand for an instrumental break.

use super::LyricLine;

/// Shown in place of a blank line that marks an instrumental break.
pub const INTERLUDE_GLYPH: &str = "\u{266A}";

pub const DEFAULT_LEAD_OFFSET_MS: u64 = 1_000;
pub const DEFAULT_INTERLUDE_GAP_MS: u64 = 10_000;

/// A lyric line annotated for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderLine {
    pub line: LyricLine,
    pub is_interlude_marker: bool,
    pub is_selectable: bool,
}

impl RenderLine {
    pub fn display_text(&self) -> &str {
        if !self.line.is_blank() {
            &self.line.text
        } else if self.is_interlude_marker {
            INTERLUDE_GLYPH
        } else {
            ""
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolver {
    /// Added to the estimated position to hide scroll/highlight latency.
    pub lead_offset_ms: u64,
    /// A blank line followed by a longer gap than this becomes an interlude.
    pub interlude_gap_ms: u64,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            lead_offset_ms: DEFAULT_LEAD_OFFSET_MS,
            interlude_gap_ms: DEFAULT_INTERLUDE_GAP_MS,
        }
    }
}

impl Resolver {
    pub fn from_config(cfg: &crate::config::LyricsConfig) -> Self {
        Self {
            lead_offset_ms: cfg.lead_offset_ms,
            interlude_gap_ms: cfg.interlude_gap_ms,
        }
    }

    /// Annotate every line. The first and last lines never become interludes.
    pub fn render_lines(&self, lines: &[LyricLine]) -> Vec<RenderLine> {
        let last = lines.len().saturating_sub(1);
        lines
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                let blank = line.is_blank();
                let gap = lines
                    .get(idx + 1)
                    .map(|next| next.time_ms.saturating_sub(line.time_ms));
                let at_ends = idx == 0 || idx == last;
                let is_interlude_marker =
                    blank && !at_ends && gap.is_some_and(|g| g > self.interlude_gap_ms);
                RenderLine {
                    line: line.clone(),
                    is_interlude_marker,
                    is_selectable: !blank || is_interlude_marker,
                }
            })
            .collect()
    }

    /// Estimated position shifted by the lead offset.
    ///
    /// Clamped to the track duration once the duration is known (non-zero).
    /// A zero duration means "unknown" and deliberately leaves the position
    /// unclamped, so lines keep advancing for streams without a length.
    pub fn effective_position(&self, estimated_ms: u64, duration_ms: u64) -> u64 {
        let pos = estimated_ms.saturating_add(self.lead_offset_ms);
        if duration_ms > 0 { pos.min(duration_ms) } else { pos }
    }
}

/// Index of the line to highlight at `position_ms`, if any.
///
/// This is the last line that has started; when that line is not selectable
/// nothing is highlighted.
pub fn active_index(lines: &[RenderLine], position_ms: u64) -> Option<usize> {
    let started = lines.partition_point(|r| r.line.time_ms <= position_ms);
    let idx = started.checked_sub(1)?;
    lines[idx].is_selectable.then_some(idx)
}

/// Fraction of the track played, for progress bars.
pub fn progress_ratio(position_ms: u64, duration_ms: u64) -> f32 {
    let duration = duration_ms.max(1);
    let position = position_ms.min(duration);
    (position as f64 / duration as f64) as f32
}
