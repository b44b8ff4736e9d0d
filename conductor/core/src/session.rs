//! Stream Session
//!
//! Connects the pieces for one conversation: the request queue, the inbound
//! coordinator and the store. A host feeds transport chunks in with
//! [`StreamSession::receive_chunk`] and user cancellations with
//! [`StreamSession::cancel`]; everything else is derived.
//!
//! # Design Philosophy
//!
//! The session is synchronous and never fails. A stale, duplicate or
//! malformed chunk is reported through [`ChunkOutcome`] and otherwise
//! ignored, so one bad chunk cannot take the conversation down.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::cancellation::{CancelHandle, CancellationRegistry};
use crate::messages::{ActionSink, MessageId, StreamAction};
use crate::queue::{QueuedRequest, RequestQueue};
use crate::streaming::{
    resolve_chunk_context, resolve_raw_chunk_context, Chunk, ChunkContext,
    InboundStreamingCoordinator,
};

/// Tunables for a [`StreamSession`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Warn when more responses than this are tracked at once
    pub warn_tracked_responses: usize,
    /// Generation the queue starts at
    pub initial_generation: u64,
    /// Hide the stop-streaming affordance when a stale chunk is dropped
    pub hide_stop_on_reject: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            warn_tracked_responses: 64,
            initial_generation: 0,
            hide_stop_on_reject: true,
        }
    }
}

/// What happened to one inbound chunk
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Item content was dispatched for a response
    Applied {
        /// Response the chunk was attributed to
        message_id: MessageId,
    },
    /// The response completed
    Finalized {
        /// Response that completed
        message_id: MessageId,
    },
    /// The chunk belongs to a superseded generation
    Rejected {
        /// Stale response id
        message_id: MessageId,
    },
    /// Nothing actionable
    Ignored(IgnoreReason),
}

/// Why a chunk was ignored
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The chunk matched no known shape
    Unclassified,
    /// No request is queued to attribute the chunk to
    NoActiveRequest,
}

/// One conversation's inbound streaming state
pub struct StreamSession<S: ActionSink> {
    queue: RequestQueue,
    coordinator: InboundStreamingCoordinator,
    advance_rx: mpsc::UnboundedReceiver<()>,
    sink: S,
    config: SessionConfig,
}

impl<S: ActionSink> StreamSession<S> {
    /// Create a session dispatching into `sink`
    pub fn new(config: SessionConfig, sink: S) -> Self {
        let cancellations = CancellationRegistry::new();
        let (advance_tx, advance_rx) = mpsc::unbounded_channel();

        let coordinator = InboundStreamingCoordinator::new(cancellations.clone(), move || {
            // Send fails only after the receiver is dropped with the session.
            // Every signal sent while handling a chunk is drained before that
            // chunk returns, so none is left pending.
            let _ = advance_tx.send(());
        });

        Self {
            queue: RequestQueue::new(cancellations, config.initial_generation),
            coordinator,
            advance_rx,
            sink,
            config,
        }
    }

    /// Queue an outbound request; a random id is generated when none is given
    ///
    /// Returns the request id and its cancellation handle, which the transport
    /// should observe.
    pub fn enqueue(&mut self, request_id: Option<MessageId>) -> (MessageId, CancelHandle) {
        let request_id = request_id.unwrap_or_else(MessageId::generate);
        let handle = self.queue.enqueue(request_id.clone());
        (request_id, handle)
    }

    /// Handle one validated chunk
    pub fn receive_chunk(&mut self, chunk: &Chunk) -> ChunkOutcome {
        let context = resolve_chunk_context(chunk, None);
        self.apply(context)
    }

    /// Handle one unvalidated JSON chunk
    pub fn receive_raw(&mut self, value: &Value) -> ChunkOutcome {
        let context = resolve_raw_chunk_context(value, None);
        self.apply(context)
    }

    /// Cancel a request or response by any id it is known under
    ///
    /// Fires the cancellation handle and tears the response down without the
    /// normal completion path. Cancelling the request that is streaming also
    /// starts a new generation so chunks still in flight for it are dropped;
    /// a request still waiting in the queue is simply removed. Returns `true`
    /// if anything was cancelled.
    pub fn cancel(&mut self, id: &MessageId) -> bool {
        let mut response_id = self.coordinator.resolve_response_id(id).clone();
        // A request id that already streamed stands for its latest response
        if let Some(last) = self
            .queue
            .get(&response_id)
            .and_then(|request| request.last_response_id.clone())
        {
            response_id = last;
        }
        let request_id = self
            .coordinator
            .tracker()
            .get_meta(&response_id)
            .and_then(|entry| entry.request_id.clone())
            .unwrap_or_else(|| id.clone());

        let fired = self.coordinator.cancellations().cancel(&response_id);
        let (was_current, was_streaming) = match self.queue.current() {
            Some(current) if current.request_id == request_id => (true, current.is_streaming),
            _ => (false, false),
        };
        let queued = was_current || self.queue.get(&request_id).is_some();
        if !fired && !queued {
            tracing::debug!(id = %id, "Cancel for unknown id ignored");
            return false;
        }

        self.coordinator.clear_streaming_response(&response_id);
        if was_current {
            self.queue.move_to_next();
            self.coordinator.cancellations().remove(&request_id);
        } else {
            self.queue.remove(&request_id);
        }

        if !was_streaming {
            tracing::info!(request_id = %request_id, "Request cancelled before streaming");
            return true;
        }

        // Only the turn in flight is superseded
        self.queue.bump_generation();
        tracing::info!(
            response_id = %response_id,
            request_id = %request_id,
            "Stream cancelled"
        );
        self.sink.dispatch(StreamAction::StreamStopped {
            message_id: response_id,
        });
        true
    }

    fn apply(&mut self, context: ChunkContext) -> ChunkOutcome {
        if !context.is_actionable() {
            return ChunkOutcome::Ignored(IgnoreReason::Unclassified);
        }

        // Checked before validation latches the id
        let first_sight = context
            .message_id
            .as_ref()
            .is_some_and(|id| self.coordinator.generations().get(id).is_none());

        let generation = self.queue.current_generation();
        let mut hide_requested = false;
        let accepted = self.coordinator.validate_chunk_generation(
            context.message_id.as_ref(),
            generation,
            || hide_requested = true,
        );
        if hide_requested && self.config.hide_stop_on_reject {
            self.sink
                .dispatch(StreamAction::SetStopStreamingVisible { visible: false });
        }
        if let (false, Some(message_id)) = (accepted, context.message_id.as_ref()) {
            tracing::warn!(message_id = %message_id, generation, "Rejected stale chunk");
            return ChunkOutcome::Rejected {
                message_id: message_id.clone(),
            };
        }

        let outcome = if context.is_final_response {
            self.apply_final(context, first_sight)
        } else {
            self.apply_item(context)
        };

        self.drain_queue_signals();
        self.check_tracker_growth();
        outcome
    }

    fn apply_item(&mut self, context: ChunkContext) -> ChunkOutcome {
        let Some(current) = self.queue.current_mut() else {
            tracing::debug!(
                message_id = ?context.message_id,
                "Item chunk with no queued request"
            );
            return ChunkOutcome::Ignored(IgnoreReason::NoActiveRequest);
        };

        let last_processed = current
            .last_response_id
            .clone()
            .unwrap_or_else(|| current.request_id.clone());
        let response_id = self.coordinator.mark_streaming(
            current,
            context.message_id.as_ref(),
            context.item_id.as_ref(),
            Some(&last_processed),
        );
        current.last_response_id = Some(response_id.clone());

        if let Some(cancellable) = context.cancellable {
            self.sink.dispatch(StreamAction::SetStopStreamingVisible {
                visible: cancellable,
            });
        }

        if let Some(item) = context.item {
            let action = if context.is_partial_item {
                StreamAction::AddPartialItem {
                    message_id: response_id.clone(),
                    item_id: context.item_id,
                    item,
                }
            } else {
                StreamAction::AddCompleteItem {
                    message_id: response_id.clone(),
                    item_id: context.item_id,
                    item,
                }
            };
            self.sink.dispatch(action);
        }

        if let Some(options) = context.message_options {
            self.sink.dispatch(StreamAction::MergeMessageOptions {
                message_id: response_id.clone(),
                options,
            });
        }

        ChunkOutcome::Applied {
            message_id: response_id,
        }
    }

    fn apply_final(&mut self, context: ChunkContext, first_sight: bool) -> ChunkOutcome {
        // Items that streamed without a response id live under the request id
        let provisional = self
            .queue
            .current()
            .filter(|current| {
                current.is_streaming && Self::stream_id_of(current) == current.request_id
            })
            .map(|current| current.request_id.clone());

        let message_id = match (context.message_id, provisional) {
            (Some(final_id), Some(stream_id)) if first_sight && final_id != stream_id => {
                tracing::debug!(
                    final_id = %final_id,
                    stream_id = %stream_id,
                    "Final response reveals the response id; finalizing the provisional stream"
                );
                stream_id
            }
            (Some(id), _) => id,
            (None, _) => match self.queue.current().map(Self::stream_id_of) {
                Some(id) => id,
                None => return ChunkOutcome::Ignored(IgnoreReason::NoActiveRequest),
            },
        };
        let response_id = self.coordinator.resolve_response_id(&message_id).clone();

        self.sink.dispatch(StreamAction::FinalizeResponse {
            message_id: response_id.clone(),
            response: context.response.unwrap_or_default(),
        });
        if self.coordinator.streaming_message_id() == Some(&response_id) {
            self.sink
                .dispatch(StreamAction::SetStopStreamingVisible { visible: false });
        }
        self.coordinator.finalize_streaming_message(&message_id);

        ChunkOutcome::Finalized {
            message_id: response_id,
        }
    }

    fn stream_id_of(request: &QueuedRequest) -> MessageId {
        request
            .last_response_id
            .clone()
            .unwrap_or_else(|| request.request_id.clone())
    }

    fn drain_queue_signals(&mut self) {
        while self.advance_rx.try_recv().is_ok() {
            self.queue.move_to_next();
        }
    }

    fn check_tracker_growth(&self) {
        let tracked = self.coordinator.tracker().len();
        if tracked > self.config.warn_tracked_responses {
            tracing::warn!(
                tracked,
                limit = self.config.warn_tracked_responses,
                "Many responses still tracked; streams may not be finalizing"
            );
        }
    }

    /// The request queue
    #[must_use]
    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// The inbound coordinator
    #[must_use]
    pub fn coordinator(&self) -> &InboundStreamingCoordinator {
        &self.coordinator
    }

    /// The store actions are dispatched into
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the session, returning the store
    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageStore;
    use serde_json::json;

    fn id(s: &str) -> MessageId {
        MessageId::from(s)
    }

    fn chunk(value: Value) -> Chunk {
        Chunk::from_value(value).unwrap()
    }

    fn partial(response_id: &str, item_id: &str, text: &str) -> Chunk {
        chunk(json!({
            "partial_item": { "response_type": "text", "text": text },
            "streaming_metadata": { "id": item_id, "response_id": response_id, "cancellable": true }
        }))
    }

    fn session() -> StreamSession<MessageStore> {
        StreamSession::new(SessionConfig::default(), MessageStore::new())
    }

    #[test]
    fn test_streams_and_finalizes() {
        let mut session = session();
        session.enqueue(Some(id("req-1")));

        assert_eq!(
            session.receive_chunk(&partial("resp-1", "i1", "Hel")),
            ChunkOutcome::Applied {
                message_id: id("resp-1")
            }
        );
        session.receive_chunk(&partial("resp-1", "i1", "lo"));
        assert!(session.sink().state().stop_streaming_visible);
        assert!(session.queue().current().unwrap().is_streaming);

        let outcome = session.receive_chunk(&chunk(json!({ "final_response": { "id": "resp-1" } })));
        assert_eq!(
            outcome,
            ChunkOutcome::Finalized {
                message_id: id("resp-1")
            }
        );

        let message = session.sink().state().message(&id("resp-1")).unwrap();
        assert_eq!(message.text(), "Hello");
        assert!(message.is_complete);
        assert!(!session.sink().state().stop_streaming_visible);
        assert!(session.queue().is_empty());
        assert!(session.coordinator().cancellations().is_empty());
    }

    #[test]
    fn test_chunks_without_response_id_use_request_id() {
        let mut session = session();
        session.enqueue(Some(id("req-1")));

        let outcome = session.receive_chunk(&chunk(json!({
            "partial_item": { "text": "hi" },
            "streaming_metadata": { "id": "i1" }
        })));
        assert_eq!(
            outcome,
            ChunkOutcome::Applied {
                message_id: id("req-1")
            }
        );

        // Final response without an id finalizes the current stream
        session.receive_chunk(&chunk(json!({ "final_response": {} })));
        assert!(session.queue().is_empty());
        assert!(session.coordinator().streaming_message_id().is_none());
    }

    #[test]
    fn test_duplicate_final_advances_once() {
        let mut session = session();
        session.enqueue(Some(id("req-1")));
        session.enqueue(Some(id("req-2")));
        session.receive_chunk(&partial("resp-1", "i1", "a"));

        let done = chunk(json!({ "final_response": { "id": "resp-1" } }));
        session.receive_chunk(&done);
        session.receive_chunk(&done);

        assert_eq!(session.queue().len(), 1);
        assert_eq!(
            session.queue().current().unwrap().request_id,
            id("req-2")
        );
    }

    #[test]
    fn test_cancel_rejects_trailing_chunks() {
        let mut session = session();
        let (_, handle) = session.enqueue(Some(id("req-1")));
        session.receive_chunk(&partial("resp-1", "i1", "Hel"));

        assert!(session.cancel(&id("resp-1")));
        assert!(handle.is_cancelled());
        assert!(session.queue().is_empty());
        assert!(session.sink().state().message(&id("resp-1")).unwrap().stream_stopped);

        // Trailing chunk of the cancelled turn
        let outcome = session.receive_chunk(&partial("resp-1", "i1", "lo"));
        assert_eq!(
            outcome,
            ChunkOutcome::Rejected {
                message_id: id("resp-1")
            }
        );
        assert_eq!(
            session.sink().state().message(&id("resp-1")).unwrap().text(),
            "Hel"
        );

        // The next turn streams normally
        session.enqueue(Some(id("req-2")));
        assert_eq!(
            session.receive_chunk(&partial("resp-2", "j1", "new")),
            ChunkOutcome::Applied {
                message_id: id("resp-2")
            }
        );
    }

    #[test]
    fn test_cancel_by_item_id() {
        let mut session = session();
        let (_, handle) = session.enqueue(Some(id("req-1")));
        session.receive_chunk(&partial("resp-1", "item-1", "x"));

        assert!(session.cancel(&id("item-1")));
        assert!(handle.is_cancelled());
        assert!(session.coordinator().cancellations().is_empty());
    }

    #[test]
    fn test_cancel_queued_request_not_yet_streaming() {
        let mut session = session();
        session.enqueue(Some(id("req-1")));
        let (_, handle) = session.enqueue(Some(id("req-2")));

        assert!(session.cancel(&id("req-2")));
        assert!(handle.is_cancelled());
        assert_eq!(session.queue().len(), 1);
        assert_eq!(
            session.queue().current().unwrap().request_id,
            id("req-1")
        );
        assert_eq!(session.queue().current_generation(), 0);
        assert_eq!(session.sink().dispatched(), 0);
    }

    #[test]
    fn test_cancel_pending_keeps_streaming_request_live() {
        let mut session = session();
        session.enqueue(Some(id("req-1")));
        let (_, pending) = session.enqueue(Some(id("req-2")));
        session.receive_chunk(&partial("resp-1", "i1", "Hel"));

        assert!(session.cancel(&id("req-2")));
        assert!(pending.is_cancelled());
        assert_eq!(session.queue().current_generation(), 0);

        assert_eq!(
            session.receive_chunk(&partial("resp-1", "i1", "lo")),
            ChunkOutcome::Applied {
                message_id: id("resp-1")
            }
        );
        assert_eq!(
            session.receive_chunk(&chunk(json!({ "final_response": { "id": "resp-1" } }))),
            ChunkOutcome::Finalized {
                message_id: id("resp-1")
            }
        );

        let message = session.sink().state().message(&id("resp-1")).unwrap();
        assert_eq!(message.text(), "Hello");
        assert!(!message.stream_stopped);
        assert!(session.sink().state().message(&id("req-2")).is_none());
        assert!(session.queue().is_empty());
        assert!(session.coordinator().tracker().is_empty());
        assert!(session.coordinator().streaming_message_id().is_none());
    }

    #[test]
    fn test_final_response_carries_only_response_id() {
        let mut session = session();
        session.enqueue(Some(id("req-1")));
        session.enqueue(Some(id("req-2")));
        session.receive_chunk(&chunk(json!({
            "partial_item": { "text": "Hi" },
            "streaming_metadata": { "id": "i1" }
        })));

        let outcome = session.receive_chunk(&chunk(json!({
            "final_response": { "id": "resp-1" }
        })));
        assert_eq!(
            outcome,
            ChunkOutcome::Finalized {
                message_id: id("req-1")
            }
        );

        assert_eq!(session.queue().current().unwrap().request_id, id("req-2"));
        assert!(session.coordinator().streaming_message_id().is_none());
        assert!(session.coordinator().tracker().is_empty());

        // One message for the whole turn
        let state = session.sink().state();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].text(), "Hi");
        assert!(state.messages[0].is_complete);
    }

    #[test]
    fn test_duplicate_final_does_not_finalize_next_stream() {
        let mut session = session();
        session.enqueue(Some(id("req-1")));
        session.enqueue(Some(id("req-2")));
        session.receive_chunk(&partial("resp-1", "i1", "a"));
        session.receive_chunk(&chunk(json!({ "final_response": { "id": "resp-1" } })));

        // req-2 streams provisionally under its request id
        session.receive_chunk(&chunk(json!({
            "partial_item": { "text": "b" },
            "streaming_metadata": { "id": "j1" }
        })));
        session.receive_chunk(&chunk(json!({ "final_response": { "id": "resp-1" } })));

        assert_eq!(session.queue().current().unwrap().request_id, id("req-2"));
        assert_eq!(
            session.coordinator().streaming_message_id(),
            Some(&id("req-2"))
        );
    }

    #[test]
    fn test_cancel_unknown() {
        let mut session = session();
        assert!(!session.cancel(&id("ghost")));
        assert_eq!(session.queue().current_generation(), 0);
    }

    #[test]
    fn test_malformed_and_orphan_chunks_ignored() {
        let mut session = session();
        assert_eq!(
            session.receive_raw(&json!({ "bogus": true })),
            ChunkOutcome::Ignored(IgnoreReason::Unclassified)
        );
        assert_eq!(
            session.receive_chunk(&partial("resp-1", "i1", "x")),
            ChunkOutcome::Ignored(IgnoreReason::NoActiveRequest)
        );
        assert_eq!(session.sink().dispatched(), 0);
    }

    #[test]
    fn test_message_options_dispatched() {
        let mut session = session();
        session.enqueue(Some(id("req-1")));
        session.receive_raw(&json!({
            "complete_item": { "response_type": "text", "text": "done" },
            "streaming_metadata": { "id": "i1", "response_id": "resp-1" },
            "partial_response": { "message_options": { "feedback": { "is_on": true } } }
        }));

        let message = session.sink().state().message(&id("resp-1")).unwrap();
        assert_eq!(message.message_options["feedback"], json!({ "is_on": true }));
        assert!(message.items[0].is_complete);
    }

    #[test]
    fn test_recording_sink() {
        let mut session = StreamSession::new(SessionConfig::default(), Vec::<StreamAction>::new());
        session.enqueue(Some(id("req-1")));
        session.receive_chunk(&partial("resp-1", "i1", "x"));

        let actions = session.into_sink();
        assert_eq!(
            actions[0],
            StreamAction::SetStopStreamingVisible { visible: true }
        );
        assert!(matches!(actions[1], StreamAction::AddPartialItem { .. }));
    }
}
