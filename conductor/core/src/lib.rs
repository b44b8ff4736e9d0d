//! Chat Stream Core - Inbound Streaming Coordination for Chat Clients
//!
//! This crate turns the chunks a chat backend streams for an assistant turn
//! into store actions, while keeping request ids, response ids and item ids
//! of the same turn connected. It has no transport and no UI of its own: a
//! host feeds chunks in and renders whatever the store holds.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Host / Transport                         │
//! │        enqueue(request)      chunk (JSON)       cancel(id)        │
//! └───────────────┬──────────────────┬──────────────────┬────────────┘
//!                 │                  │                  │
//! ┌───────────────┼──────────────────┼──────────────────┼────────────┐
//! │               ▼         STREAM SESSION              ▼            │
//! │  ┌──────────────┐  ┌──────────────────────────┐  ┌────────────┐  │
//! │  │ RequestQueue │◀─│ InboundStreaming         │─▶│Cancellation│  │
//! │  │ (generation) │  │ Coordinator              │  │ Registry   │  │
//! │  └──────────────┘  │  ├─ StreamingTracker     │  │ (aliases)  │  │
//! │                    │  └─ MessageGenerations   │  └────────────┘  │
//! │                    └────────────┬─────────────┘                  │
//! │                                 │ StreamAction                    │
//! └─────────────────────────────────┼────────────────────────────────┘
//!                                   ▼
//!                      ActionSink (e.g. MessageStore)
//! ```
//!
//! # Key Types
//!
//! - [`StreamSession`]: One conversation: queue, coordinator and store
//! - [`InboundStreamingCoordinator`]: Marks, finalizes and clears streams
//! - [`StreamingTracker`]: Response id to item id bookkeeping
//! - [`CancellationRegistry`]: Cancel handles reachable by request or response id
//! - [`Chunk`]: The three wire chunk shapes
//! - [`MessageStore`]: Reference store assembling messages from actions
//!
//! # Quick Start
//!
//! ```
//! use chat_stream_core::{MessageId, MessageStore, SessionConfig, StreamSession};
//! use serde_json::json;
//!
//! let mut session = StreamSession::new(SessionConfig::default(), MessageStore::new());
//! let (request_id, _handle) = session.enqueue(Some(MessageId::from("req-1")));
//!
//! session.receive_raw(&json!({
//!     "partial_item": { "response_type": "text", "text": "Hel" },
//!     "streaming_metadata": { "id": "item-1", "response_id": "resp-1" }
//! }));
//! session.receive_raw(&json!({
//!     "final_response": { "id": "resp-1", "output": { "generic": [{ "text": "Hello" }] } }
//! }));
//!
//! let message = session.sink().state().message(&MessageId::from("resp-1")).unwrap();
//! assert_eq!(message.text(), "Hello");
//! assert!(session.queue().get(&request_id).is_none());
//! ```
//!
//! # Module Overview
//!
//! - [`cancellation`]: Cancel handles and the alias-aware registry
//! - [`messages`]: Ids, store actions and the sink trait
//! - [`queue`]: Outbound request queue and conversation generation
//! - [`session`]: The per-conversation driver
//! - [`store`]: Reference in-memory message store
//! - [`streaming`]: Chunk model, classifier, tracker and coordinator

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancellation;
pub mod messages;
pub mod queue;
pub mod session;
pub mod store;
pub mod streaming;

// Re-exports for convenience
pub use cancellation::{CancelHandle, CancellationRegistry};
pub use messages::{ActionSink, MessageId, StreamAction};
pub use queue::{QueuedRequest, RequestQueue};
pub use session::{ChunkOutcome, IgnoreReason, SessionConfig, StreamSession};
pub use store::{AssembledItem, AssembledMessage, MessageStore, StoreState};

// Streaming exports
pub use streaming::{
    resolve_chunk_context, resolve_raw_chunk_context, validate_chunk_generation, Chunk,
    ChunkContext, ChunkError, ChunkKind, GenericItem, InboundStreamingCoordinator,
    MessageGenerations, MessageResponse, StreamingMetadata, StreamingTracker, TrackingEntry,
};
