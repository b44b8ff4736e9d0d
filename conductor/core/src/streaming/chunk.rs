//! Wire Chunk Types
//!
//! The inbound contract with the transport. Field names are part of the wire
//! format and must not be renamed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::messages::MessageId;

// ============================================================================
// Payloads
// ============================================================================

/// One content item of a response (text, reasoning step, card, ...)
///
/// Only the fields the core and the reference store look at are typed; every
/// other field is carried through untouched in `extra`. Partial chunks carry
/// the same shape with any subset of fields present.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericItem {
    /// Item kind as understood by the rendering layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
    /// Text content (a delta when carried by a partial chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Remaining fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GenericItem {
    /// Create a text item
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            response_type: Some("text".to_string()),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

/// Streaming metadata attached to partial and complete item chunks
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingMetadata {
    /// Item id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Logical response id, when the transport already knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<MessageId>,
    /// Whether the user may cancel this response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellable: Option<bool>,
}

/// Side-channel response data carried alongside an item
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialResponse {
    /// Options merged into the response independently of item content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_options: Option<Map<String, Value>>,
}

/// Output section of a final response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageOutput {
    /// Assembled items in display order
    #[serde(default)]
    pub generic: Vec<GenericItem>,
}

/// The complete assembled response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Definitive response id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Response content
    #[serde(default)]
    pub output: MessageOutput,
    /// Remaining fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Chunks
// ============================================================================

/// A partially formed item plus its streaming metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialItemChunk {
    /// The partial item
    pub partial_item: GenericItem,
    /// Item and response identifiers
    #[serde(default)]
    pub streaming_metadata: StreamingMetadata,
    /// Optional side-channel response data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_response: Option<PartialResponse>,
}

/// A finished item plus its streaming metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompleteItemChunk {
    /// The complete item
    pub complete_item: GenericItem,
    /// Item and response identifiers
    #[serde(default)]
    pub streaming_metadata: StreamingMetadata,
    /// Optional side-channel response data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_response: Option<PartialResponse>,
}

/// The response terminator
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalResponseChunk {
    /// The full assembled response
    pub final_response: MessageResponse,
}

/// One inbound unit of an assistant response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Chunk {
    /// Partial item
    PartialItem(PartialItemChunk),
    /// Complete item
    CompleteItem(CompleteItemChunk),
    /// Final response
    FinalResponse(FinalResponseChunk),
}

/// Discriminant of a [`Chunk`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    /// Partial item
    PartialItem,
    /// Complete item
    CompleteItem,
    /// Final response
    FinalResponse,
}

impl ChunkKind {
    /// Wire field that identifies this kind
    #[must_use]
    pub fn field_name(self) -> &'static str {
        match self {
            Self::PartialItem => "partial_item",
            Self::CompleteItem => "complete_item",
            Self::FinalResponse => "final_response",
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Errors from validating a chunk at the transport boundary
#[derive(Debug, Error)]
pub enum ChunkError {
    /// The payload is not JSON at all
    #[error("chunk is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// No distinguishing field was present
    #[error("chunk has none of partial_item, complete_item or final_response")]
    UnrecognizedShape,

    /// The distinguishing field was present but the body did not match
    #[error("malformed {kind} chunk: {source}")]
    Malformed {
        /// Kind detected from the distinguishing field
        kind: ChunkKind,
        /// Underlying deserialization error
        source: serde_json::Error,
    },
}

impl Chunk {
    /// Validate a raw JSON value into a chunk
    ///
    /// The kind is detected from which distinguishing field is present
    /// (`partial_item`, then `complete_item`, then `final_response`) before the
    /// body is deserialized, so errors name the kind the producer intended.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::UnrecognizedShape`] when no distinguishing field is
    /// present and [`ChunkError::Malformed`] when the body does not match.
    pub fn from_value(value: Value) -> Result<Self, ChunkError> {
        let kind = Self::detect_kind(&value).ok_or(ChunkError::UnrecognizedShape)?;
        let malformed = |source| ChunkError::Malformed { kind, source };

        match kind {
            ChunkKind::PartialItem => serde_json::from_value(value)
                .map(Self::PartialItem)
                .map_err(malformed),
            ChunkKind::CompleteItem => serde_json::from_value(value)
                .map(Self::CompleteItem)
                .map_err(malformed),
            ChunkKind::FinalResponse => serde_json::from_value(value)
                .map(Self::FinalResponse)
                .map_err(malformed),
        }
    }

    /// Parse and validate a chunk from JSON text
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::InvalidJson`] for unparseable text, otherwise the
    /// same errors as [`Chunk::from_value`].
    pub fn from_json_str(json: &str) -> Result<Self, ChunkError> {
        let value: Value = serde_json::from_str(json).map_err(ChunkError::InvalidJson)?;
        Self::from_value(value)
    }

    fn detect_kind(value: &Value) -> Option<ChunkKind> {
        let object = value.as_object()?;
        [
            ChunkKind::PartialItem,
            ChunkKind::CompleteItem,
            ChunkKind::FinalResponse,
        ]
        .into_iter()
        .find(|kind| object.contains_key(kind.field_name()))
    }

    /// The kind of this chunk
    #[must_use]
    pub fn kind(&self) -> ChunkKind {
        match self {
            Self::PartialItem(_) => ChunkKind::PartialItem,
            Self::CompleteItem(_) => ChunkKind::CompleteItem,
            Self::FinalResponse(_) => ChunkKind::FinalResponse,
        }
    }

    /// Streaming metadata, for item chunks
    #[must_use]
    pub fn streaming_metadata(&self) -> Option<&StreamingMetadata> {
        match self {
            Self::PartialItem(chunk) => Some(&chunk.streaming_metadata),
            Self::CompleteItem(chunk) => Some(&chunk.streaming_metadata),
            Self::FinalResponse(_) => None,
        }
    }

    /// Side-channel message options, for item chunks that carry them
    #[must_use]
    pub fn message_options(&self) -> Option<&Map<String, Value>> {
        let partial_response = match self {
            Self::PartialItem(chunk) => chunk.partial_response.as_ref(),
            Self::CompleteItem(chunk) => chunk.partial_response.as_ref(),
            Self::FinalResponse(_) => None,
        };
        partial_response.and_then(|p| p.message_options.as_ref())
    }
}
