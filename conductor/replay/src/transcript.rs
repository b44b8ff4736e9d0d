//! Transcript Format
//!
//! One JSON object per line, tagged by `event`:
//!
//! ```text
//! {"event":"enqueue","request_id":"req-1"}
//! {"event":"chunk","chunk":{"partial_item":{"text":"Hi"},"streaming_metadata":{"id":"i1"}}}
//! {"event":"cancel","id":"req-1"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Chunks are kept as
//! raw JSON so malformed ones reach the session exactly as a transport would
//! deliver them.

use std::io::BufRead;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use chat_stream_core::MessageId;

/// One line of a transcript
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// The user sent a message
    Enqueue {
        #[serde(default)]
        request_id: Option<MessageId>,
    },
    /// The transport delivered a chunk
    Chunk { chunk: Value },
    /// The user pressed stop
    Cancel { id: MessageId },
}

/// Parse one line; `Ok(None)` for blank and comment lines
pub fn parse_line(line: &str) -> serde_json::Result<Option<TranscriptEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Read every event, skipping lines that do not parse
pub fn read_transcript(reader: impl BufRead) -> Result<Vec<TranscriptEvent>> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("Failed to read transcript line {line_no}"))?;
        match parse_line(&line) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(e) => warn!(line = line_no, error = %e, "Skipping malformed transcript line"),
        }
    }
    Ok(events)
}
