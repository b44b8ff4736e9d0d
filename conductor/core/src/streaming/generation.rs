//! Chunk Generation Validation
//!
//! When the user cancels a turn and sends a new request, chunks of the old
//! turn may still be in flight. Every message id is latched to the generation
//! that was current when it was first seen; a chunk whose message id was
//! latched under an older generation is stale.

use std::collections::HashMap;

use crate::messages::MessageId;

/// Message id → generation recorded at first sight
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageGenerations {
    recorded: HashMap<MessageId, u64>,
}

impl MessageGenerations {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation recorded for a message id
    #[must_use]
    pub fn get(&self, message_id: &MessageId) -> Option<u64> {
        self.recorded.get(message_id).copied()
    }

    /// Record a generation for a message id
    ///
    /// An existing record is kept; a message id never changes generation.
    /// Returns the generation in effect for the id.
    pub fn record(&mut self, message_id: MessageId, generation: u64) -> u64 {
        *self.recorded.entry(message_id).or_insert(generation)
    }

    /// Forget a message id
    pub fn remove(&mut self, message_id: &MessageId) -> Option<u64> {
        self.recorded.remove(message_id)
    }

    /// Number of recorded ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.recorded.len()
    }

    /// Check if nothing is recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty()
    }
}

/// Decide whether a chunk belongs to the live generation
///
/// - no message id: accepted
/// - first sight of the id: latched to `current_generation`, accepted
/// - latched to a different generation: `hide_stop_streaming` runs, rejected
pub fn validate_chunk_generation(
    message_id: Option<&MessageId>,
    generations: &mut MessageGenerations,
    current_generation: u64,
    hide_stop_streaming: impl FnOnce(),
) -> bool {
    let Some(message_id) = message_id else {
        return true;
    };

    let recorded = generations.record(message_id.clone(), current_generation);
    if recorded == current_generation {
        return true;
    }

    tracing::debug!(
        message_id = %message_id,
        recorded,
        current = current_generation,
        "Dropping chunk from superseded generation"
    );
    hide_stop_streaming();
    false
}
