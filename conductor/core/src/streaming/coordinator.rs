//! Inbound Streaming Coordinator
//!
//! Sits on top of the [`StreamingTracker`] and the shared
//! [`CancellationRegistry`]. It knows which response is "the stream in
//! flight" for queue purposes, keeps request and response ids aliased to the
//! same cancellation handle, and tears a response down exactly once.
//!
//! ```text
//!   not tracked ──mark_streaming──▶ streaming ──finalize──▶ finalized (queue advances)
//!                                        │
//!                                        └──────clear─────▶ cleared   (queue untouched)
//! ```
//!
//! Nothing here fails: unknown ids resolve to themselves and missing entries
//! turn cleanup into a no-op.

use super::generation::{validate_chunk_generation, MessageGenerations};
use super::tracker::StreamingTracker;
use crate::cancellation::CancellationRegistry;
use crate::messages::MessageId;
use crate::queue::QueuedRequest;

/// Stateful orchestrator for inbound response streams
pub struct InboundStreamingCoordinator {
    tracker: StreamingTracker,
    cancellations: CancellationRegistry,
    generations: MessageGenerations,
    move_to_next_queue_item: Box<dyn FnMut() + Send>,
    streaming_message_id: Option<MessageId>,
}

impl InboundStreamingCoordinator {
    /// Create a coordinator over a shared registry and a queue-advance callback
    pub fn new(
        cancellations: CancellationRegistry,
        move_to_next_queue_item: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            tracker: StreamingTracker::new(),
            cancellations,
            generations: MessageGenerations::new(),
            move_to_next_queue_item: Box::new(move_to_next_queue_item),
            streaming_message_id: None,
        }
    }

    /// Use an existing generation store instead of an empty one
    #[must_use]
    pub fn with_generations(mut self, generations: MessageGenerations) -> Self {
        self.generations = generations;
        self
    }

    /// The response currently considered in flight
    #[must_use]
    pub fn streaming_message_id(&self) -> Option<&MessageId> {
        self.streaming_message_id.as_ref()
    }

    /// The underlying tracker
    #[must_use]
    pub fn tracker(&self) -> &StreamingTracker {
        &self.tracker
    }

    /// The shared cancellation registry
    #[must_use]
    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    /// The generation store
    #[must_use]
    pub fn generations(&self) -> &MessageGenerations {
        &self.generations
    }

    /// Resolve an item id (or response id) to its response id
    #[must_use]
    pub fn resolve_response_id<'a>(&'a self, id: &'a MessageId) -> &'a MessageId {
        self.tracker.resolve_response_id(id)
    }

    /// Record that a chunk for `current` arrived
    ///
    /// The response id is `message_id`, falling back to the queued request id.
    /// A handle registered under `last_processed_message_id` is carried over to
    /// the response id, as is the request's own handle when the two ids
    /// differ. Returns the response id that was marked.
    pub fn mark_streaming(
        &mut self,
        current: &mut QueuedRequest,
        message_id: Option<&MessageId>,
        item_id: Option<&MessageId>,
        last_processed_message_id: Option<&MessageId>,
    ) -> MessageId {
        let response_id = message_id.unwrap_or(&current.request_id).clone();
        self.streaming_message_id = Some(response_id.clone());

        if let Some(last_processed) = last_processed_message_id {
            if self.cancellations.contains(last_processed) {
                self.cancellations.alias(&response_id, last_processed);
            }
        }

        current.is_streaming = true;

        if response_id != current.request_id {
            self.cancellations.alias(&response_id, &current.request_id);
        }

        let controller = self
            .cancellations
            .get(&response_id)
            .or_else(|| self.cancellations.get(&current.request_id));

        self.tracker.track(
            &response_id,
            Some(&current.request_id),
            controller.as_ref(),
            item_id,
        );

        tracing::trace!(
            response_id = %response_id,
            request_id = %current.request_id,
            item_id = item_id.map(tracing::field::display),
            "Marked streaming"
        );

        response_id
    }

    /// Complete a response normally
    ///
    /// `message_id` may be an item id or a response id. The queue advances only
    /// if the resolved response is the stream in flight, so repeated calls for
    /// the same response advance it at most once.
    pub fn finalize_streaming_message(&mut self, message_id: &MessageId) {
        let response_id = self.tracker.resolve_response_id(message_id).clone();

        if self.streaming_message_id.as_ref() == Some(&response_id) {
            tracing::debug!(response_id = %response_id, "Stream finalized, advancing queue");
            (self.move_to_next_queue_item)();
        }

        self.release(&response_id);
    }

    /// Tear down a response without advancing the queue
    ///
    /// Used for externally driven cancellation and cleanup.
    pub fn clear_streaming_response(&mut self, response_id: &MessageId) {
        let response_id = self.tracker.resolve_response_id(response_id).clone();
        tracing::debug!(response_id = %response_id, "Clearing streaming response");
        self.release(&response_id);
    }

    fn release(&mut self, response_id: &MessageId) {
        let entry = self.tracker.clear(response_id);
        self.cancellations.remove(response_id);

        if let Some(request_id) = entry.and_then(|e| e.request_id) {
            if &request_id != response_id {
                self.cancellations.remove(&request_id);

                // Entry tracked under the request id before the real response
                // id was known; it belongs to the same stream.
                let provisional = self
                    .tracker
                    .get_meta(&request_id)
                    .is_some_and(|e| e.request_id.as_ref() == Some(&request_id));
                if provisional {
                    self.tracker.clear(&request_id);
                }
            }
        }

        if self.streaming_message_id.as_ref() == Some(response_id) {
            self.streaming_message_id = None;
        }
    }

    /// Check a chunk against the coordinator's generation store
    ///
    /// See [`validate_chunk_generation`].
    pub fn validate_chunk_generation(
        &mut self,
        message_id: Option<&MessageId>,
        current_generation: u64,
        hide_stop_streaming: impl FnOnce(),
    ) -> bool {
        validate_chunk_generation(
            message_id,
            &mut self.generations,
            current_generation,
            hide_stop_streaming,
        )
    }
}

impl std::fmt::Debug for InboundStreamingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundStreamingCoordinator")
            .field("streaming_message_id", &self.streaming_message_id)
            .field("tracked", &self.tracker.len())
            .field("generations", &self.generations.len())
            .finish_non_exhaustive()
    }
}
