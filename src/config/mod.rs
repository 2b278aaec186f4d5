use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lyrics: LyricsConfig,
    pub tracker: TrackerConfig,
    pub connection: ConnectionConfig,
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LyricsConfig {
    /// LRCLIB API root, without the trailing `/get`.
    pub base_url: String,
    pub timeout_secs: u64,
    /// How far ahead of the estimated position lines are highlighted.
    pub lead_offset_ms: u64,
    /// Minimum gap after a blank line for it to show as an interlude.
    pub interlude_gap_ms: u64,
    /// Spacing for lyrics that come without timestamps.
    pub plain_step_ms: u64,
    /// Recently fetched tracks kept in memory (0 disables).
    pub recent_cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Position refresh interval.
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// mpv IPC socket (start mpv with `--input-ipc-server=<path>`)
    pub ipc_socket: PathBuf,
    /// Position drift tolerated before mpv's time-pos is re-reported.
    pub resync_threshold_ms: u64,
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            base_url: crate::lyrics::LrclibClient::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 12,
            lead_offset_ms: crate::lyrics::resolver::DEFAULT_LEAD_OFFSET_MS,
            interlude_gap_ms: crate::lyrics::resolver::DEFAULT_INTERLUDE_GAP_MS,
            plain_step_ms: crate::lyrics::parser::PLAIN_STEP_MS,
            recent_cache_size: 16,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { tick_ms: 120 }
    }
}

impl TrackerConfig {
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms.clamp(16, 1000))
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            ipc_socket: std::env::temp_dir().join("lyricsync-mpv.sock"),
            resync_threshold_ms: 1500,
        }
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let proj = ProjectDirs::from("dev", "lyricsync", "lyricsync")
        .context("ProjectDirs unavailable")?;
    Ok(proj.config_dir().join("config.toml"))
}

pub fn load(override_path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match override_path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if !path.exists() {
        let cfg = Config::default();
        write(&cfg, &path)?;
        return Ok(cfg);
    }

    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    parse(&raw).with_context(|| format!("parse {}", path.display()))
}

fn parse(raw: &str) -> anyhow::Result<Config> {
    Ok(toml::from_str::<Config>(raw)?)
}

fn write(cfg: &Config, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    let raw = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(path, raw).with_context(|| format!("write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let cfg = parse(
            r#"
[lyrics]
lead_offset_ms = 250

[connection]
max_attempts = 5
"#,
        )
        .unwrap();
        assert_eq!(cfg.lyrics.lead_offset_ms, 250);
        assert_eq!(cfg.lyrics.interlude_gap_ms, 10_000);
        assert_eq!(cfg.connection.max_attempts, 5);
        assert_eq!(cfg.connection.backoff_ms, 1000);
        assert_eq!(cfg.tracker.tick_ms, 120);
    }

    #[test]
    fn test_tick_interval_is_clamped() {
        let cfg = TrackerConfig { tick_ms: 0 };
        assert_eq!(cfg.tick_interval().as_millis(), 16);
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = std::env::temp_dir().join(format!("lyricsync-cfg-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = fs::remove_file(&path);

        let cfg = load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.lyrics.base_url, "https://lrclib.net/api");

        let again = load(Some(&path)).unwrap();
        assert_eq!(again.player.resync_threshold_ms, cfg.player.resync_threshold_ms);
        let _ = fs::remove_dir_all(&dir);
    }
}
