//! Streaming Tracker
//!
//! Identity resolution for in-flight responses. Chunks may name their stream
//! by item id, by response id, or by neither (falling back to the request id);
//! the tracker makes all three resolve to one logical response.

use std::collections::{HashMap, HashSet};

use crate::cancellation::CancelHandle;
use crate::messages::MessageId;

/// Accumulated metadata for one logical response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackingEntry {
    /// Originating request, first writer wins
    pub request_id: Option<MessageId>,
    /// Items streamed under this response
    pub item_ids: HashSet<MessageId>,
    /// Cancellation handle, first writer wins
    pub controller: Option<CancelHandle>,
}

/// Response id → entry, plus the reverse item id → response id index
#[derive(Debug, Default)]
pub struct StreamingTracker {
    entries: HashMap<MessageId, TrackingEntry>,
    item_index: HashMap<MessageId, MessageId>,
}

impl StreamingTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an item id to its owning response id
    ///
    /// Unknown ids are returned unchanged, so callers may pass either kind.
    #[must_use]
    pub fn resolve_response_id<'a>(&'a self, id: &'a MessageId) -> &'a MessageId {
        self.item_index.get(id).unwrap_or(id)
    }

    /// Create or update the entry for `response_id`
    ///
    /// `request_id` and `controller` are only written when the entry has none
    /// yet. `item_id` is always merged. An item previously indexed under a
    /// different response moves to this one.
    pub fn track(
        &mut self,
        response_id: &MessageId,
        request_id: Option<&MessageId>,
        controller: Option<&CancelHandle>,
        item_id: Option<&MessageId>,
    ) -> &TrackingEntry {
        if let Some(item_id) = item_id {
            let previous = self
                .item_index
                .insert(item_id.clone(), response_id.clone());
            if let Some(previous) = previous.filter(|p| p != response_id) {
                if let Some(entry) = self.entries.get_mut(&previous) {
                    entry.item_ids.remove(item_id);
                }
                tracing::debug!(
                    item_id = %item_id,
                    from = %previous,
                    to = %response_id,
                    "Item moved between responses"
                );
            }
        }

        let entry = self.entries.entry(response_id.clone()).or_insert_with(|| {
            tracing::debug!(response_id = %response_id, "Tracking response");
            TrackingEntry::default()
        });

        if entry.request_id.is_none() {
            entry.request_id = request_id.cloned();
        }
        if entry.controller.is_none() {
            entry.controller = controller.cloned();
        }
        if let Some(item_id) = item_id {
            entry.item_ids.insert(item_id.clone());
        }

        entry
    }

    /// Look up the entry for a response id
    #[must_use]
    pub fn get_meta(&self, response_id: &MessageId) -> Option<&TrackingEntry> {
        self.entries.get(response_id)
    }

    /// Remove an entry and its item ids from the reverse index
    ///
    /// Returns the removed entry; a second call for the same id returns `None`.
    pub fn clear(&mut self, response_id: &MessageId) -> Option<TrackingEntry> {
        let entry = self.entries.remove(response_id)?;
        for item_id in &entry.item_ids {
            self.item_index.remove(item_id);
        }
        tracing::debug!(
            response_id = %response_id,
            items = entry.item_ids.len(),
            "Response no longer tracked"
        );
        Some(entry)
    }

    /// Number of tracked responses
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MessageId {
        MessageId::from(s)
    }

    #[test]
    fn test_resolve_unknown_is_identity() {
        let tracker = StreamingTracker::new();
        let unknown = id("x");
        assert_eq!(tracker.resolve_response_id(&unknown), &unknown);
    }

    #[test]
    fn test_identity_resolution_invariance() {
        let mut tracker = StreamingTracker::new();
        let ctrl = CancelHandle::new();
        tracker.track(&id("R"), Some(&id("req")), Some(&ctrl), Some(&id("item")));

        assert_eq!(tracker.resolve_response_id(&id("item")), &id("R"));
        assert_eq!(tracker.resolve_response_id(&id("R")), &id("R"));

        tracker.clear(&id("R"));
        assert_eq!(tracker.resolve_response_id(&id("item")), &id("item"));
    }

    #[test]
    fn test_fill_once_semantics() {
        let mut tracker = StreamingTracker::new();
        let ctrl_a = CancelHandle::new();
        let ctrl_b = CancelHandle::new();

        tracker.track(&id("R"), Some(&id("reqA")), Some(&ctrl_a), None);
        tracker.track(&id("R"), Some(&id("reqB")), Some(&ctrl_b), Some(&id("i2")));

        let meta = tracker.get_meta(&id("R")).unwrap();
        assert_eq!(meta.request_id, Some(id("reqA")));
        assert_eq!(meta.controller, Some(ctrl_a));
        assert!(meta.item_ids.contains(&id("i2")));
    }

    #[test]
    fn test_absent_fields_filled_later() {
        let mut tracker = StreamingTracker::new();
        let ctrl = CancelHandle::new();

        tracker.track(&id("R"), None, None, None);
        let entry = tracker.track(&id("R"), Some(&id("req")), Some(&ctrl), None);

        assert_eq!(entry.request_id, Some(id("req")));
        assert_eq!(entry.controller, Some(ctrl));
    }

    #[test]
    fn test_track_is_idempotent() {
        let mut tracker = StreamingTracker::new();
        let ctrl = CancelHandle::new();

        for _ in 0..3 {
            tracker.track(&id("R"), Some(&id("req")), Some(&ctrl), Some(&id("i1")));
        }

        assert_eq!(tracker.len(), 1);
        let meta = tracker.get_meta(&id("R")).unwrap();
        assert_eq!(meta.item_ids.len(), 1);
    }

    #[test]
    fn test_clear_twice() {
        let mut tracker = StreamingTracker::new();
        tracker.track(&id("R"), Some(&id("req")), None, Some(&id("i1")));

        let removed = tracker.clear(&id("R")).unwrap();
        assert_eq!(removed.request_id, Some(id("req")));
        assert!(tracker.clear(&id("R")).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_clear_does_not_touch_other_responses() {
        let mut tracker = StreamingTracker::new();
        tracker.track(&id("A"), None, None, Some(&id("a1")));
        tracker.track(&id("B"), None, None, Some(&id("b1")));

        tracker.clear(&id("A"));

        assert_eq!(tracker.resolve_response_id(&id("b1")), &id("B"));
        assert!(tracker.get_meta(&id("B")).is_some());
        assert_eq!(tracker.resolve_response_id(&id("a1")), &id("a1"));
    }

    #[test]
    fn test_item_moves_between_responses() {
        let mut tracker = StreamingTracker::new();
        tracker.track(&id("req-1"), None, None, Some(&id("i1")));
        tracker.track(&id("resp-1"), None, None, Some(&id("i1")));

        assert_eq!(tracker.resolve_response_id(&id("i1")), &id("resp-1"));
        assert!(tracker.get_meta(&id("req-1")).unwrap().item_ids.is_empty());

        // Clearing the old owner must not unindex the moved item
        tracker.clear(&id("req-1"));
        assert_eq!(tracker.resolve_response_id(&id("i1")), &id("resp-1"));
    }
}
