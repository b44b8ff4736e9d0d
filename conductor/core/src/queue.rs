//! Request Queue
//!
//! Outbound requests waiting for, or currently receiving, a streamed response.
//! The queue owns the cancellation handle of every request it accepts and the
//! current conversation generation. Only the front request streams; the
//! coordinator signals when it is done and the queue moves on.

use std::collections::VecDeque;

use crate::cancellation::{CancelHandle, CancellationRegistry};
use crate::messages::MessageId;

/// One queued outbound request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedRequest {
    /// Id the request was sent with
    pub request_id: MessageId,
    /// Set once the first chunk for this request arrived
    pub is_streaming: bool,
    /// Last response id streamed under this request
    pub last_response_id: Option<MessageId>,
}

impl QueuedRequest {
    /// Create a request that has not started streaming
    pub fn new(request_id: impl Into<MessageId>) -> Self {
        Self {
            request_id: request_id.into(),
            is_streaming: false,
            last_response_id: None,
        }
    }
}

/// FIFO of in-flight requests
#[derive(Debug)]
pub struct RequestQueue {
    pending: VecDeque<QueuedRequest>,
    cancellations: CancellationRegistry,
    generation: u64,
}

impl RequestQueue {
    /// Create an empty queue sharing `cancellations`
    #[must_use]
    pub fn new(cancellations: CancellationRegistry, initial_generation: u64) -> Self {
        Self {
            pending: VecDeque::new(),
            cancellations,
            generation: initial_generation,
        }
    }

    /// Queue a request and register its cancellation handle
    pub fn enqueue(&mut self, request_id: MessageId) -> CancelHandle {
        let handle = CancelHandle::new();
        self.cancellations
            .register(request_id.clone(), handle.clone());
        tracing::info!(
            request_id = %request_id,
            depth = self.pending.len() + 1,
            "Request queued"
        );
        self.pending.push_back(QueuedRequest::new(request_id));
        handle
    }

    /// The request currently at the front
    #[must_use]
    pub fn current(&self) -> Option<&QueuedRequest> {
        self.pending.front()
    }

    /// Mutable access to the front request
    pub fn current_mut(&mut self) -> Option<&mut QueuedRequest> {
        self.pending.front_mut()
    }

    /// Drop the front request and return it
    pub fn move_to_next(&mut self) -> Option<QueuedRequest> {
        let finished = self.pending.pop_front();
        if let Some(ref request) = finished {
            tracing::debug!(
                request_id = %request.request_id,
                remaining = self.pending.len(),
                "Queue advanced"
            );
        }
        finished
    }

    /// Remove a request anywhere in the queue, dropping its cancellation handle
    pub fn remove(&mut self, request_id: &MessageId) -> Option<QueuedRequest> {
        let index = self
            .pending
            .iter()
            .position(|r| &r.request_id == request_id)?;
        self.cancellations.remove(request_id);
        self.pending.remove(index)
    }

    /// Find a queued request by id
    #[must_use]
    pub fn get(&self, request_id: &MessageId) -> Option<&QueuedRequest> {
        self.pending.iter().find(|r| &r.request_id == request_id)
    }

    /// Current conversation generation
    #[must_use]
    pub fn current_generation(&self) -> u64 {
        self.generation
    }

    /// Start a new generation, making chunks of earlier turns stale
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        tracing::debug!(generation = self.generation, "Generation advanced");
        self.generation
    }

    /// Number of queued requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
