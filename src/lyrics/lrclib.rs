//! LRCLIB API client
//!
//! LRCLIB is a free lyrics API that provides synchronized (LRC format) lyrics.
//! API Documentation: https://lrclib.net/docs

use super::{LyricsError, LyricsProvider, LyricsRequest, ParsedLyrics};
use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

/// LRCLIB API response. Only the lyric payloads are read.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LrclibResponse {
    #[serde(rename = "plainLyrics")]
    pub plain_lyrics: Option<String>,
    #[serde(rename = "syncedLyrics")]
    pub synced_lyrics: Option<String>,
}

/// LRCLIB API client
#[derive(Debug, Clone)]
pub struct LrclibClient {
    client: reqwest::Client,
    base_url: String,
    plain_step_ms: u64,
}

impl LrclibClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://lrclib.net/api";
    const USER_AGENT: &'static str = concat!("lyricsync/", env!("CARGO_PKG_VERSION"));

    /// Create a new LRCLIB client
    pub fn new(base_url: &str, timeout: Duration, plain_step_ms: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(Self::USER_AGENT)
            .timeout(timeout)
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            plain_step_ms,
        })
    }

    pub fn from_config(cfg: &crate::config::LyricsConfig) -> anyhow::Result<Self> {
        Self::new(
            &cfg.base_url,
            Duration::from_secs(cfg.timeout_secs),
            cfg.plain_step_ms,
        )
    }

    fn get_url(&self, req: &LyricsRequest) -> String {
        format!(
            "{}/get?track_name={}&artist_name={}&album_name={}&duration={}",
            self.base_url,
            urlencoding::encode(&req.track_name),
            urlencoding::encode(&req.artist_name),
            urlencoding::encode(&req.album_name),
            req.duration_secs
        )
    }

    /// Get lyrics with exact match. Any non-2xx status is an error.
    pub async fn get(&self, req: &LyricsRequest) -> Result<LrclibResponse, LyricsError> {
        let response = self.client.get(self.get_url(req)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LyricsError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl LyricsProvider for LrclibClient {
    async fn fetch(&self, req: &LyricsRequest) -> Result<ParsedLyrics, LyricsError> {
        let response = self.get(req).await?;
        Ok(super::select_lyrics(
            response.synced_lyrics.as_deref(),
            response.plain_lyrics.as_deref(),
            self.plain_step_ms,
        ))
    }
}
