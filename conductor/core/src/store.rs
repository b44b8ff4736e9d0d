//! In-Memory Message Store
//!
//! A reference implementation of the store the core dispatches into. It
//! reduces [`StreamAction`]s into assembled messages the rendering layer can
//! read:
//!
//! - partial items append their text delta and merge their other fields
//! - complete items replace whatever was streamed for the same item id
//! - a final response replaces the items with its output (when non-empty)
//!   and freezes the message
//! - message options deep-merge

use serde::Serialize;
use serde_json::{Map, Value};

use crate::messages::{ActionSink, MessageId, StreamAction};
use crate::streaming::GenericItem;

/// One item of an assembled message
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AssembledItem {
    /// Streamed item id, if the transport supplied one
    pub item_id: Option<MessageId>,
    /// Item content accumulated so far
    pub item: GenericItem,
    /// Whether a complete item (or final response) arrived for it
    pub is_complete: bool,
}

/// A message as the rendering layer sees it
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssembledMessage {
    /// Response id
    pub id: MessageId,
    /// Items in arrival order
    pub items: Vec<AssembledItem>,
    /// Merged message options
    pub message_options: Map<String, Value>,
    /// A final response arrived
    pub is_complete: bool,
    /// The stream was cancelled
    pub stream_stopped: bool,
}

impl AssembledMessage {
    fn new(id: MessageId) -> Self {
        Self {
            id,
            items: Vec::new(),
            message_options: Map::new(),
            is_complete: false,
            stream_stopped: false,
        }
    }

    /// Concatenated text of all items
    #[must_use]
    pub fn text(&self) -> String {
        self.items
            .iter()
            .filter_map(|i| i.item.text.as_deref())
            .collect()
    }

    fn item_mut(&mut self, item_id: Option<&MessageId>) -> Option<&mut AssembledItem> {
        let item_id = item_id?;
        self.items
            .iter_mut()
            .find(|i| i.item_id.as_ref() == Some(item_id))
    }
}

/// Store snapshot (`getState`)
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StoreState {
    /// Messages in the order they were first seen
    pub messages: Vec<AssembledMessage>,
    /// Whether the stop-streaming affordance is shown
    pub stop_streaming_visible: bool,
}

impl StoreState {
    /// Look up a message by response id
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<&AssembledMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    fn message_mut(&mut self, id: &MessageId) -> &mut AssembledMessage {
        let index = match self.messages.iter().position(|m| &m.id == id) {
            Some(index) => index,
            None => {
                self.messages.push(AssembledMessage::new(id.clone()));
                self.messages.len() - 1
            }
        };
        &mut self.messages[index]
    }
}

/// Reference store: `dispatch` via [`ActionSink`], `getState` via [`MessageStore::state`]
#[derive(Clone, Debug, Default)]
pub struct MessageStore {
    state: StoreState,
    dispatched: u64,
}

impl MessageStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> &StoreState {
        &self.state
    }

    /// Number of actions reduced so far
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    fn reduce(&mut self, action: StreamAction) {
        match action {
            StreamAction::AddPartialItem {
                message_id,
                item_id,
                item,
            } => {
                let message = self.state.message_mut(&message_id);
                if message.is_complete {
                    tracing::debug!(message_id = %message_id, "Partial item after final response ignored");
                    return;
                }
                match message.item_mut(item_id.as_ref()) {
                    Some(existing) if existing.is_complete => {}
                    Some(existing) => apply_partial(&mut existing.item, item),
                    None => message.items.push(AssembledItem {
                        item_id,
                        item,
                        is_complete: false,
                    }),
                }
            }
            StreamAction::AddCompleteItem {
                message_id,
                item_id,
                item,
            } => {
                let message = self.state.message_mut(&message_id);
                if message.is_complete {
                    return;
                }
                match message.item_mut(item_id.as_ref()) {
                    Some(existing) => {
                        existing.item = item;
                        existing.is_complete = true;
                    }
                    None => message.items.push(AssembledItem {
                        item_id,
                        item,
                        is_complete: true,
                    }),
                }
            }
            StreamAction::MergeMessageOptions {
                message_id,
                options,
            } => {
                let message = self.state.message_mut(&message_id);
                deep_merge(&mut message.message_options, options);
            }
            StreamAction::SetStopStreamingVisible { visible } => {
                self.state.stop_streaming_visible = visible;
            }
            StreamAction::StreamStopped { message_id } => {
                self.state.message_mut(&message_id).stream_stopped = true;
                self.state.stop_streaming_visible = false;
            }
            StreamAction::FinalizeResponse {
                message_id,
                response,
            } => {
                let message = self.state.message_mut(&message_id);
                if !response.output.generic.is_empty() {
                    message.items = response
                        .output
                        .generic
                        .into_iter()
                        .map(|item| AssembledItem {
                            item_id: None,
                            item,
                            is_complete: true,
                        })
                        .collect();
                }
                for item in &mut message.items {
                    item.is_complete = true;
                }
                message.is_complete = true;
            }
        }
    }
}

impl ActionSink for MessageStore {
    fn dispatch(&mut self, action: StreamAction) {
        tracing::trace!(?action, "Dispatch");
        self.dispatched += 1;
        self.reduce(action);
    }
}

fn apply_partial(target: &mut GenericItem, delta: GenericItem) {
    if let Some(text) = delta.text {
        target.text.get_or_insert_with(String::new).push_str(&text);
    }
    if delta.response_type.is_some() {
        target.response_type = delta.response_type;
    }
    deep_merge(&mut target.extra, delta.extra);
}

/// Merge `patch` into `target`, recursing into nested objects
fn deep_merge(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Object(incoming) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => deep_merge(existing, incoming),
                _ => {
                    target.insert(key, Value::Object(incoming));
                }
            },
            value => {
                target.insert(key, value);
            }
        }
    }
}
