//! Lyrics fetch orchestration: one request per track, stale results dropped.

use super::events::Event;
use crate::lyrics::{LyricsError, LyricsProvider, LyricsRequest, ParsedLyrics};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identity of a lyrics lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchSignature {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_secs: u32,
}

impl FetchSignature {
    /// None for a blank title, which is never worth looking up.
    pub fn new(title: &str, artist: &str, album: &str, duration_ms: u64) -> Option<Self> {
        if title.trim().is_empty() {
            return None;
        }
        let duration_secs = u32::try_from(duration_ms / 1000).unwrap_or(u32::MAX).max(1);
        Some(Self {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            duration_secs,
        })
    }

    pub fn to_request(&self) -> LyricsRequest {
        LyricsRequest {
            track_name: self.title.clone(),
            artist_name: self.artist.clone(),
            album_name: self.album.clone(),
            duration_secs: self.duration_secs,
        }
    }
}

#[derive(Debug)]
pub struct FetchCompletion {
    ticket: u64,
    signature: FetchSignature,
    result: Result<ParsedLyrics, LyricsError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Blank title.
    Ignored,
    /// Served from memory; no network.
    Cached,
    /// Same lookup already running.
    InFlight,
    Started,
}

#[derive(Debug)]
struct InFlight {
    ticket: u64,
    signature: FetchSignature,
    handle: JoinHandle<()>,
}

pub struct FetchOrchestrator<P> {
    provider: Arc<P>,
    tx: mpsc::Sender<Event>,
    next_ticket: u64,
    in_flight: Option<InFlight>,
    /// Last successful lookup and its (possibly empty) result.
    settled: Option<(FetchSignature, Arc<ParsedLyrics>)>,
    recent: Option<LruCache<FetchSignature, Arc<ParsedLyrics>>>,
    loading: bool,
    error: Option<String>,
}

impl<P: LyricsProvider> FetchOrchestrator<P> {
    pub fn new(provider: Arc<P>, tx: mpsc::Sender<Event>, recent_cache_size: usize) -> Self {
        Self {
            provider,
            tx,
            next_ticket: 0,
            in_flight: None,
            settled: None,
            recent: NonZeroUsize::new(recent_cache_size).map(LruCache::new),
            loading: false,
            error: None,
        }
    }

    /// Current lyrics; None while loading, on error, or when nothing was found.
    pub fn lyrics(&self) -> Option<&Arc<ParsedLyrics>> {
        if self.loading {
            return None;
        }
        self.settled
            .as_ref()
            .map(|(_, lyrics)| lyrics)
            .filter(|lyrics| !lyrics.is_empty())
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn in_flight_signature(&self) -> Option<&FetchSignature> {
        self.in_flight.as_ref().map(|f| &f.signature)
    }

    pub fn last_success(&self) -> Option<&FetchSignature> {
        self.settled.as_ref().map(|(sig, _)| sig)
    }

    /// True when `signature` already has non-empty lyrics on hand.
    fn has_lyrics_for(&self, signature: &FetchSignature) -> bool {
        self.last_success() == Some(signature)
            && self.settled.as_ref().is_some_and(|(_, lyrics)| !lyrics.is_empty())
    }

    pub fn request(
        &mut self,
        title: &str,
        artist: &str,
        album: &str,
        duration_ms: u64,
    ) -> RequestOutcome {
        let Some(signature) = FetchSignature::new(title, artist, album, duration_ms) else {
            return RequestOutcome::Ignored;
        };

        // An empty result is not a cached one; looking again may find something.
        if self.has_lyrics_for(&signature) {
            // A fetch for some other track may have started since; it is stale now.
            self.cancel();
            return RequestOutcome::Cached;
        }

        if self.in_flight_signature() == Some(&signature) {
            return RequestOutcome::InFlight;
        }

        self.cancel();

        if let Some(hit) = self
            .recent
            .as_mut()
            .and_then(|c| c.get(&signature))
            .filter(|hit| !hit.is_empty())
            .cloned()
        {
            tracing::debug!(title = %signature.title, "lyrics served from memory");
            self.settled = Some((signature, hit));
            self.error = None;
            return RequestOutcome::Cached;
        }

        self.spawn(signature);
        RequestOutcome::Started
    }

    fn spawn(&mut self, signature: FetchSignature) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;

        self.loading = true;
        self.error = None;

        tracing::info!(
            title = %signature.title,
            artist = %signature.artist,
            duration = signature.duration_secs,
            "fetching lyrics"
        );

        let provider = self.provider.clone();
        let tx = self.tx.clone();
        let req = signature.to_request();
        let sig = signature.clone();
        let handle = tokio::spawn(async move {
            let result = provider.fetch(&req).await;
            let _ = tx
                .send(Event::LyricsFetched(FetchCompletion {
                    ticket,
                    signature: sig,
                    result,
                }))
                .await;
        });

        self.in_flight = Some(InFlight {
            ticket,
            signature,
            handle,
        });
    }

    /// Abort the running fetch, if any. Its result will never be applied.
    pub fn cancel(&mut self) {
        if let Some(stale) = self.in_flight.take() {
            tracing::debug!(title = %stale.signature.title, "cancelling lyrics fetch");
            stale.handle.abort();
        }
        self.loading = false;
    }

    /// Apply a finished fetch. Returns false for results that were superseded.
    pub fn complete(&mut self, done: FetchCompletion) -> bool {
        let current = self.in_flight.as_ref().map(|f| f.ticket);
        if current != Some(done.ticket) {
            tracing::debug!(title = %done.signature.title, "discarding stale lyrics result");
            return false;
        }
        self.in_flight = None;
        self.loading = false;

        match done.result {
            Ok(parsed) => {
                tracing::info!(
                    title = %done.signature.title,
                    lines = parsed.lines.len(),
                    synced = parsed.synced,
                    "lyrics loaded"
                );
                let parsed = Arc::new(parsed);
                if let Some(cache) = self.recent.as_mut() {
                    if parsed.is_empty() {
                        cache.pop(&done.signature);
                    } else {
                        cache.put(done.signature.clone(), parsed.clone());
                    }
                }
                self.settled = Some((done.signature, parsed));
                self.error = None;
            }
            Err(e) => {
                tracing::warn!(title = %done.signature.title, "lyrics fetch failed: {e}");
                if let Some(cache) = self.recent.as_mut() {
                    cache.pop(&done.signature);
                }
                self.settled = None;
                self.error = Some(e.user_message());
            }
        }
        true
    }
}
