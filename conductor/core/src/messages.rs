//! Store Actions
//!
//! Actions emitted by the streaming core towards the application store. These
//! are the only way the core communicates assembled content outward; the store
//! owns the reducer logic and the rendering layer reads from the store.
//!
//! # Design Philosophy
//!
//! The core never touches rendered state directly. It classifies chunks,
//! resolves which logical response they belong to, and then describes the
//! resulting change as a plain, serializable [`StreamAction`]. Any store that
//! implements [`ActionSink`] can consume them:
//!
//! - the in-memory [`MessageStore`](crate::store::MessageStore) shipped here
//! - a host application forwarding actions over IPC
//! - a plain `Vec<StreamAction>` in tests

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::streaming::{GenericItem, MessageResponse};

/// Identifier shared by requests, responses and streamed items
///
/// All three id spaces use the same type because the tracker accepts an item
/// id or a response id in the same position and resolves between them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a message ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random request ID
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("req_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Actions from the streaming core to the store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamAction {
    /// A partially formed item arrived for a response
    AddPartialItem {
        /// Response the item belongs to
        message_id: MessageId,
        /// Streamed item identifier, when the chunk carried one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<MessageId>,
        /// Partial item payload
        item: GenericItem,
    },

    /// A finished item arrived for a response
    AddCompleteItem {
        /// Response the item belongs to
        message_id: MessageId,
        /// Streamed item identifier, when the chunk carried one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<MessageId>,
        /// Complete item payload
        item: GenericItem,
    },

    /// Merge side-channel message options into a response
    MergeMessageOptions {
        /// Response receiving the options
        message_id: MessageId,
        /// Options to deep-merge
        options: Map<String, Value>,
    },

    /// Show or hide the stop-streaming affordance
    SetStopStreamingVisible {
        /// Whether the affordance is visible
        visible: bool,
    },

    /// A response was cancelled before it finished
    StreamStopped {
        /// Response that was stopped
        message_id: MessageId,
    },

    /// The final assembled response arrived
    FinalizeResponse {
        /// Response that completed
        message_id: MessageId,
        /// The full response
        response: MessageResponse,
    },
}

impl StreamAction {
    /// The response this action targets, if any
    #[must_use]
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::AddPartialItem { message_id, .. }
            | Self::AddCompleteItem { message_id, .. }
            | Self::MergeMessageOptions { message_id, .. }
            | Self::StreamStopped { message_id }
            | Self::FinalizeResponse { message_id, .. } => Some(message_id),
            Self::SetStopStreamingVisible { .. } => None,
        }
    }
}

/// Receiver of store actions (the `dispatch` half of a store)
pub trait ActionSink {
    /// Dispatch one action
    fn dispatch(&mut self, action: StreamAction);
}

impl ActionSink for Vec<StreamAction> {
    fn dispatch(&mut self, action: StreamAction) {
        self.push(action);
    }
}
