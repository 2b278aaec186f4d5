//! Timed-text parser
//!
//! Parses synchronized lyrics in LRC format:
//! [mm:ss.xx] Lyrics line here
//!
//! Example:
//! [00:12.34] Hello world
//! [00:15.00] Another line
//!
//! Anything that does not match the timestamp grammar (metadata tags,
//! stray prose, `mm:ss:xx` variants) is dropped rather than reported.

/// Default spacing between synthetic timestamps for untimed lyrics.
pub const PLAIN_STEP_MS: u64 = 2_000;

/// A single line of lyrics with timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    /// Timestamp in milliseconds from start
    pub time_ms: u64,
    /// The lyrics text, empty for instrumental gaps
    pub text: String,
}

impl LyricLine {
    pub fn new(time_ms: u64, text: impl Into<String>) -> Self {
        Self {
            time_ms,
            text: text.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Parse LRC formatted lyrics into lines sorted by timestamp.
///
/// Sorting is stable, so lines sharing a timestamp keep their input order.
pub fn parse_timed_text(raw: &str) -> Vec<LyricLine> {
    let mut lines: Vec<LyricLine> = raw.lines().filter_map(parse_timed_line).collect();
    lines.sort_by_key(|l| l.time_ms);
    lines
}

/// Turn untimed lyrics into lines spaced `step_ms` apart, skipping blank lines.
pub fn parse_plain_text(raw: &str, step_ms: u64) -> Vec<LyricLine> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| LyricLine::new((idx as u64).saturating_mul(step_ms), line))
        .collect()
}

/// Parse a timed line like `[00:12.34]Lyrics`
fn parse_timed_line(line: &str) -> Option<LyricLine> {
    let line = line.trim_end();
    if line.is_empty() || !line.starts_with('[') {
        return None;
    }

    let close = line.find(']')?;
    if close <= 1 {
        return None;
    }

    let time_ms = parse_timestamp(&line[1..close])?;
    let text = line[close + 1..].trim_start();
    Some(LyricLine::new(time_ms, text))
}

/// Parse timestamp string like "01:02.34" to milliseconds.
///
/// Only the first `:` separates minutes from seconds. The fraction is read as
/// hundredths: one digit is right-padded ("3" -> 30), extra digits are
/// truncated, and an unreadable fraction counts as zero.
fn parse_timestamp(s: &str) -> Option<u64> {
    let (min, rest) = s.split_once(':')?;
    let min = parse_digits(min)?;

    let mut parts = rest.split('.');
    let sec = parse_digits(parts.next()?)?;
    let hundredths = parts.next().map(parse_hundredths).unwrap_or(0);

    Some(
        min.saturating_mul(60_000)
            .saturating_add(sec.saturating_mul(1_000))
            .saturating_add(hundredths * 10),
    )
}

fn parse_hundredths(frac: &str) -> u64 {
    let mut digits: String = frac.chars().take(2).collect();
    while digits.len() < 2 {
        digits.push('0');
    }
    parse_digits(&digits).unwrap_or(0)
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Format milliseconds back into an LRC timestamp, e.g. `[01:02.30]`.
pub fn format_timestamp(time_ms: u64) -> String {
    let min = time_ms / 60_000;
    let sec = (time_ms % 60_000) / 1_000;
    let hundredths = (time_ms % 1_000) / 10;
    format!("[{:02}:{:02}.{:02}]", min, sec, hundredths)
}
