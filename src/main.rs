mod config;
mod engine;
mod lyrics;
mod player;

use anyhow::Context;
use clap::{Parser, Subcommand};
use engine::Engine;
use engine::state::Snapshot;
use lyrics::parser::format_timestamp;
use lyrics::{LrclibClient, LyricsProvider, ParsedLyrics};
use player::mpv::MpvSource;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lyricsync", version, about = "Synchronized lyrics for whatever mpv is playing")]
struct Cli {
    /// Override config file path.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Follow mpv and print the active lyric line (default).
    Watch {
        /// mpv IPC socket, overrides the config.
        #[arg(long)]
        socket: Option<std::path::PathBuf>,
    },
    /// Fetch lyrics for a track and print them.
    Fetch {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        artist: String,
        #[arg(long, default_value = "")]
        album: String,
        /// Track length in seconds.
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
    /// Parse a local lyrics file and print it.
    Parse {
        path: std::path::PathBuf,
        /// Treat the file as untimed text.
        #[arg(long)]
        plain: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref()).context("load config")?;

    match cli.command.unwrap_or(Command::Watch { socket: None }) {
        Command::Watch { socket } => {
            if let Some(socket) = socket {
                cfg.player.ipc_socket = socket;
            }
            watch(&cfg).await?;
        }
        Command::Fetch {
            title,
            artist,
            album,
            duration,
        } => {
            let client = LrclibClient::from_config(&cfg.lyrics)?;
            let sig = engine::fetch::FetchSignature::new(
                &title,
                &artist,
                &album,
                duration.saturating_mul(1000),
            )
            .context("title must not be blank")?;
            match client.fetch(&sig.to_request()).await {
                Ok(lyrics) => print_lyrics(&lyrics),
                Err(e) => anyhow::bail!(e.user_message()),
            }
        }
        Command::Parse { path, plain } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            let lyrics = if plain {
                ParsedLyrics {
                    lines: lyrics::parse_plain_text(&raw, cfg.lyrics.plain_step_ms),
                    synced: false,
                }
            } else {
                ParsedLyrics {
                    lines: lyrics::parse_timed_text(&raw),
                    synced: true,
                }
            };
            print_lyrics(&lyrics);
        }
    }

    Ok(())
}

async fn watch(cfg: &config::Config) -> anyhow::Result<()> {
    let source = Arc::new(MpvSource::from_config(&cfg.player));
    let provider = Arc::new(LrclibClient::from_config(&cfg.lyrics)?);
    let (engine, handle) = Engine::new(cfg, source, provider);
    let task = tokio::spawn(engine.run());

    tracing::info!(socket = %cfg.player.ipc_socket.display(), "waiting for mpv");
    handle.connect().await?;

    let mut snapshots = handle.subscribe();
    let mut printer = Printer::default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = snapshots.borrow_and_update().clone();
                printer.show(&snap);
            }
        }
    }

    let _ = handle.shutdown().await;
    task.await.context("join engine")?;
    Ok(())
}

/// Prints only what changed since the last snapshot.
#[derive(Debug, Default)]
struct Printer {
    phase: Option<engine::connection::ConnectionPhase>,
    track: Option<(String, String)>,
    line: Option<usize>,
    status: Option<String>,
}

impl Printer {
    fn show(&mut self, snap: &Snapshot) {
        if self.phase != Some(snap.connection) {
            tracing::info!("player {}", snap.connection.label());
            self.phase = Some(snap.connection);
        }

        let track = (
            snap.track.display_title().to_string(),
            snap.track.display_artist().to_string(),
        );
        if !snap.track.title.is_empty() && self.track.as_ref() != Some(&track) {
            println!("\n== {} - {}", track.0, track.1);
            self.track = Some(track);
            self.line = None;
        }

        let status = snap.status_text().map(str::to_string);
        if status != self.status {
            if let Some(s) = &status {
                println!("   ({s})");
            }
            self.status = status;
        }

        if snap.active_index != self.line {
            if let Some(line) = snap.active_line() {
                println!(
                    "{} {:>3}% {}",
                    format_timestamp(line.line.time_ms),
                    (snap.progress() * 100.0).round() as u32,
                    line.display_text()
                );
            }
            self.line = snap.active_index;
        }
    }
}

fn print_lyrics(lyrics: &ParsedLyrics) {
    if lyrics.is_empty() {
        println!("No lyrics found");
        return;
    }
    for line in &lyrics.lines {
        if lyrics.synced {
            println!("{}{}", format_timestamp(line.time_ms), line.text);
        } else {
            println!("{}", line.text);
        }
    }
}
