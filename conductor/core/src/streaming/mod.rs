//! Streaming Coordination
//!
//! Turns a sequence of inbound chunks for one assistant turn into tracked,
//! cancellable response streams.
//!
//! # Architecture
//!
//! ```text
//!  transport ──Chunk──▶ classifier ──ChunkContext──▶ InboundStreamingCoordinator
//!                      (stateless)                    │        │
//!                                                     │        ├──▶ StreamingTracker
//!                                                     │        │    (response ⇄ item ids)
//!                                                     │        └──▶ CancellationRegistry
//!                                                     │             (request ⇄ response ids)
//!                                                     └──▶ move_to_next_queue_item()
//! ```
//!
//! # Features
//!
//! - **Identity resolution**: chunks tagged by item id, response id, or
//!   neither all land on the same logical response
//! - **Alias-safe cancellation**: a cancel issued with the request id or the
//!   response id reaches the same handle
//! - **Idempotent teardown**: finalize and clear may be repeated or arrive out
//!   of order
//! - **Generation latching**: chunks from a cancelled turn are dropped
//!
//! # Example
//!
//! ```
//! use chat_stream_core::cancellation::{CancelHandle, CancellationRegistry};
//! use chat_stream_core::queue::QueuedRequest;
//! use chat_stream_core::streaming::InboundStreamingCoordinator;
//! use chat_stream_core::MessageId;
//!
//! let registry = CancellationRegistry::new();
//! registry.register(MessageId::from("req-1"), CancelHandle::new());
//! let mut coordinator = InboundStreamingCoordinator::new(registry.clone(), || {});
//!
//! let mut current = QueuedRequest::new("req-1");
//! let resp = MessageId::from("resp-1");
//! coordinator.mark_streaming(&mut current, Some(&resp), None, None);
//! assert!(registry.contains(&resp));
//!
//! coordinator.finalize_streaming_message(&resp);
//! assert!(registry.is_empty());
//! ```

mod chunk;
mod classifier;
mod coordinator;
mod generation;
mod tracker;

pub use chunk::{
    Chunk, ChunkError, ChunkKind, CompleteItemChunk, FinalResponseChunk, GenericItem,
    MessageOutput, MessageResponse, PartialItemChunk, PartialResponse, StreamingMetadata,
};
pub use classifier::{resolve_chunk_context, resolve_raw_chunk_context, ChunkContext};
pub use coordinator::InboundStreamingCoordinator;
pub use generation::{validate_chunk_generation, MessageGenerations};
pub use tracker::{StreamingTracker, TrackingEntry};
