//! Chunk Classification
//!
//! Stateless: looks at one chunk and reports what it is and which ids it
//! carries. Knows nothing about earlier chunks of the same response.

use serde_json::{Map, Value};

use super::chunk::{Chunk, GenericItem, MessageResponse};
use crate::messages::MessageId;

/// Everything the coordinator needs from one chunk
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkContext {
    /// Logical response id (override, `response_id`, or final response `id`)
    pub message_id: Option<MessageId>,
    /// Partial or complete item payload
    pub item: Option<GenericItem>,
    /// Item id from `streaming_metadata.id`
    pub item_id: Option<MessageId>,
    /// `streaming_metadata.cancellable`
    pub cancellable: Option<bool>,
    /// `partial_response.message_options`
    pub message_options: Option<Map<String, Value>>,
    /// Final response payload
    pub response: Option<MessageResponse>,
    /// Chunk carried a partial item
    pub is_partial_item: bool,
    /// Chunk carried a complete item
    pub is_complete_item: bool,
    /// Chunk terminated the response
    pub is_final_response: bool,
}

impl ChunkContext {
    /// Whether classification found anything to act on
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.is_partial_item || self.is_complete_item || self.is_final_response
    }
}

/// Classify a chunk and extract its identifiers and payload
///
/// `provided_message_id` overrides whatever id the chunk carries; use it when
/// the caller already knows the owning response. Absent ids stay absent.
#[must_use]
pub fn resolve_chunk_context(chunk: &Chunk, provided_message_id: Option<&MessageId>) -> ChunkContext {
    let override_id = provided_message_id.cloned();

    match chunk {
        Chunk::PartialItem(partial) => ChunkContext {
            message_id: override_id.or_else(|| partial.streaming_metadata.response_id.clone()),
            item: Some(partial.partial_item.clone()),
            item_id: partial.streaming_metadata.id.clone(),
            cancellable: partial.streaming_metadata.cancellable,
            message_options: chunk.message_options().cloned(),
            is_partial_item: true,
            ..ChunkContext::default()
        },
        Chunk::CompleteItem(complete) => ChunkContext {
            message_id: override_id.or_else(|| complete.streaming_metadata.response_id.clone()),
            item: Some(complete.complete_item.clone()),
            item_id: complete.streaming_metadata.id.clone(),
            cancellable: complete.streaming_metadata.cancellable,
            message_options: chunk.message_options().cloned(),
            is_complete_item: true,
            ..ChunkContext::default()
        },
        Chunk::FinalResponse(final_chunk) => ChunkContext {
            message_id: override_id.or_else(|| final_chunk.final_response.id.clone()),
            response: Some(final_chunk.final_response.clone()),
            is_final_response: true,
            ..ChunkContext::default()
        },
    }
}

/// Classify an unvalidated JSON chunk
///
/// Malformed input yields a context with every flag false (keeping the
/// override id, if any) instead of an error.
#[must_use]
pub fn resolve_raw_chunk_context(
    value: &Value,
    provided_message_id: Option<&MessageId>,
) -> ChunkContext {
    match Chunk::from_value(value.clone()) {
        Ok(chunk) => resolve_chunk_context(&chunk, provided_message_id),
        Err(e) => {
            tracing::debug!(error = %e, "Unclassifiable chunk");
            ChunkContext {
                message_id: provided_message_id.cloned(),
                ..ChunkContext::default()
            }
        }
    }
}
