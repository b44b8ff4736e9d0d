//! Chat Stream Replay - Transcript Debugger
//!
//! Feeds a recorded transcript of enqueue, chunk and cancel events through a
//! [`StreamSession`] and prints the assembled store state as JSON. Useful for
//! checking what a transport actually sent against what the UI would show.
//!
//! # Usage
//!
//! ```bash
//! # Replay a transcript file
//! chat-stream-replay demos/transcript.jsonl
//!
//! # From stdin, pretty-printed
//! cat capture.jsonl | chat-stream-replay - --pretty
//!
//! # Verbose logging (goes to stderr)
//! RUST_LOG=debug chat-stream-replay demos/transcript.jsonl
//! ```

mod config;
mod transcript;

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};

use chat_stream_core::{ChunkOutcome, MessageStore, SessionConfig, StoreState, StreamSession};

use config::{load_config, load_config_from_path, ConfigOverrides};
use transcript::{read_transcript, TranscriptEvent};

/// Replay a chat streaming transcript and print the assembled messages
#[derive(Parser, Debug)]
#[command(name = "chat-stream-replay")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Transcript file (JSON lines), or `-` for stdin
    #[arg(value_name = "FILE")]
    transcript: PathBuf,

    /// Configuration file path
    #[arg(short = 'c', long, env = "CHAT_STREAM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Pretty-print the output
    #[arg(short = 'p', long)]
    pretty: bool,

    /// Generation the session starts at
    #[arg(long, value_name = "N")]
    initial_generation: Option<u64>,

    /// Warn when more responses than this are tracked at once
    #[arg(long, value_name = "N")]
    warn_tracked: Option<usize>,

    /// Leave the stop button alone when a stale chunk is dropped
    #[arg(long)]
    keep_stop_on_reject: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CHAT_STREAM_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

/// Per-outcome counters
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
struct ReplayStats {
    events: usize,
    applied: usize,
    finalized: usize,
    rejected: usize,
    ignored: usize,
    cancelled: usize,
}

#[derive(Serialize)]
struct ReplayReport<'a> {
    stats: &'a ReplayStats,
    state: &'a StoreState,
}

/// Initialize logging on stderr so stdout stays machine-readable
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "chat_stream_replay={level},chat_stream_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
}

/// Run every event through a fresh session
fn replay(events: &[TranscriptEvent], config: SessionConfig) -> (ReplayStats, MessageStore) {
    let mut session = StreamSession::new(config, MessageStore::new());
    let mut stats = ReplayStats::default();

    for event in events {
        stats.events += 1;
        match event {
            TranscriptEvent::Enqueue { request_id } => {
                let (request_id, _handle) = session.enqueue(request_id.clone());
                debug!(request_id = %request_id, "Replayed enqueue");
            }
            TranscriptEvent::Chunk { chunk } => match session.receive_raw(chunk) {
                ChunkOutcome::Applied { .. } => stats.applied += 1,
                ChunkOutcome::Finalized { .. } => stats.finalized += 1,
                ChunkOutcome::Rejected { .. } => stats.rejected += 1,
                ChunkOutcome::Ignored(reason) => {
                    debug!(?reason, "Chunk ignored");
                    stats.ignored += 1;
                }
            },
            TranscriptEvent::Cancel { id } => {
                if session.cancel(id) {
                    stats.cancelled += 1;
                }
            }
        }
    }

    (stats, session.into_sink())
}

fn open_transcript(path: &Path) -> Result<Vec<TranscriptEvent>> {
    if path.as_os_str() == "-" {
        return read_transcript(io::stdin().lock());
    }
    let file =
        File::open(path).with_context(|| format!("Failed to open transcript: {path:?}"))?;
    read_transcript(BufReader::new(file))
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let mut config = match args.config {
        Some(ref path) => load_config_from_path(Some(path.clone()))
            .with_context(|| format!("Failed to load config: {path:?}"))?,
        None => load_config().context("Failed to load config")?,
    };

    let mut overrides = ConfigOverrides::new();
    if args.pretty {
        overrides = overrides.with_pretty(true);
    }
    if let Some(generation) = args.initial_generation {
        overrides = overrides.with_initial_generation(generation);
    }
    if let Some(threshold) = args.warn_tracked {
        overrides = overrides.with_warn_tracked_responses(threshold);
    }
    if args.keep_stop_on_reject {
        overrides = overrides.with_hide_stop_on_reject(false);
    }
    overrides
        .apply(&mut config)
        .context("Invalid command-line override")?;
    info!(
        source = %config.source(),
        path = ?config.config_file_path,
        "Configuration resolved"
    );

    let events = open_transcript(&args.transcript)?;
    info!(events = events.len(), "Transcript loaded");

    let (stats, store) = replay(&events, config.session_config());
    let report = ReplayReport {
        stats: &stats,
        state: store.state(),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if config.pretty {
        serde_json::to_writer_pretty(&mut out, &report)?;
    } else {
        serde_json::to_writer(&mut out, &report)?;
    }
    writeln!(out)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_stream_core::MessageId;
    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    const TRANSCRIPT: &str = r#"
# first turn streams, second is cancelled mid-way
{"event":"enqueue","request_id":"req-1"}
{"event":"chunk","chunk":{"partial_item":{"text":"Hel"},"streaming_metadata":{"id":"i1","response_id":"resp-1","cancellable":true}}}
{"event":"chunk","chunk":{"partial_item":{"text":"lo"},"streaming_metadata":{"id":"i1","response_id":"resp-1"}}}
{"event":"chunk","chunk":{"final_response":{"id":"resp-1"}}}
{"event":"enqueue","request_id":"req-2"}
{"event":"chunk","chunk":{"partial_item":{"text":"Wai"},"streaming_metadata":{"id":"j1","response_id":"resp-2"}}}
{"event":"cancel","id":"req-2"}
{"event":"chunk","chunk":{"partial_item":{"text":"t"},"streaming_metadata":{"id":"j1","response_id":"resp-2"}}}
{"event":"chunk","chunk":{"bogus":true}}
"#;

    #[test]
    fn test_replay_counts_outcomes() {
        let events = read_transcript(TRANSCRIPT.as_bytes()).unwrap();
        let (stats, store) = replay(&events, SessionConfig::default());

        assert_eq!(
            stats,
            ReplayStats {
                events: 9,
                applied: 3,
                finalized: 1,
                rejected: 1,
                ignored: 1,
                cancelled: 1,
            }
        );

        let state = store.state();
        assert_eq!(state.message(&MessageId::from("resp-1")).unwrap().text(), "Hello");
        let stopped = state.message(&MessageId::from("resp-2")).unwrap();
        assert!(stopped.stream_stopped);
        assert_eq!(stopped.text(), "Wai");
    }

    #[test]
    fn test_config_file_drives_replay() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[tracker]
warn_tracked_responses = 4

[session]
initial_generation = 10
hide_stop_on_reject = false
"#,
        )
        .unwrap();

        let mut config =
            config::load_config_with_env(Some(file.path().to_path_buf()), |_| None).unwrap();
        ConfigOverrides::new()
            .with_warn_tracked_responses(2)
            .apply(&mut config)
            .unwrap();
        assert_eq!(config.source(), config::ConfigSource::Cli);
        assert_eq!(config.session_config().initial_generation, 10);

        let events = read_transcript(
            r#"
{"event":"enqueue","request_id":"req-1"}
{"event":"chunk","chunk":{"partial_item":{"text":"x"},"streaming_metadata":{"id":"i1","response_id":"resp-1","cancellable":true}}}
{"event":"cancel","id":"resp-1"}
{"event":"chunk","chunk":{"partial_item":{"text":"y"},"streaming_metadata":{"id":"i1","response_id":"resp-1"}}}
"#
            .as_bytes(),
        )
        .unwrap();
        let (stats, store) = replay(&events, config.session_config());

        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(
            store.state().message(&MessageId::from("resp-1")).unwrap().text(),
            "x"
        );

        // Stale chunk dropped without the extra hide-stop action
        let (_, hiding) = replay(&events, SessionConfig::default());
        assert_eq!(store.dispatched() + 1, hiding.dispatched());
    }

    #[test]
    fn test_open_transcript_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(TRANSCRIPT.as_bytes()).unwrap();

        let events = open_transcript(file.path()).unwrap();
        assert_eq!(events.len(), 9);
    }

    #[test]
    fn test_missing_transcript_is_error() {
        let result = open_transcript(Path::new("/nonexistent/transcript.jsonl"));
        assert!(result.is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "chat-stream-replay",
            "t.jsonl",
            "--pretty",
            "--warn-tracked",
            "8",
        ]);
        assert_eq!(args.transcript, PathBuf::from("t.jsonl"));
        assert!(args.pretty);
        assert_eq!(args.warn_tracked, Some(8));
        assert!(args.initial_generation.is_none());
        assert!(!args.keep_stop_on_reject);
    }
}
