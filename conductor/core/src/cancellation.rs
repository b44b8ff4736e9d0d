//! Cancellation Registry
//!
//! Maps request and response ids to the cancellation handle of the request
//! that produced them. A response id is usually discovered only after the
//! request started streaming, so the same handle has to be reachable under
//! both ids. Rather than storing the handle twice, the registry keeps an
//! alias table:
//!
//! ```text
//! handles:  req-1  -> CancelHandle#7
//! aliases:  resp-1 -> req-1
//! ```
//!
//! Removing a primary id also drops every alias pointing at it, so no alias can
//! outlive the handle it refers to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::messages::MessageId;

/// A cancellation handle for one outbound request
///
/// Clones share the same underlying token. Two handles compare equal only if
/// they are clones of the same handle.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    id: u64,
    token: CancellationToken,
}

impl CancelHandle {
    /// Create a fresh, uncancelled handle
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self {
            id: COUNTER.fetch_add(1, Ordering::SeqCst),
            token: CancellationToken::new(),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The underlying token, for transports that select on it
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for CancelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CancelHandle {}

#[derive(Debug, Default)]
struct RegistryInner {
    handles: HashMap<MessageId, CancelHandle>,
    aliases: HashMap<MessageId, MessageId>,
}

impl RegistryInner {
    fn primary_of<'a>(&'a self, id: &'a MessageId) -> Option<&'a MessageId> {
        if self.handles.contains_key(id) {
            return Some(id);
        }
        self.aliases.get(id)
    }
}

/// Shared id → cancellation handle table
///
/// Cloning the registry yields another handle onto the same table; the queue
/// owner and the coordinator hold clones of one registry.
#[derive(Clone, Debug, Default)]
pub struct CancellationRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl CancellationRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under a primary id
    ///
    /// An alias previously stored under the same id is replaced. Returns the
    /// handle previously registered as primary under this id, if any.
    pub fn register(&self, id: MessageId, handle: CancelHandle) -> Option<CancelHandle> {
        let mut inner = self.inner.write();
        inner.aliases.remove(&id);
        let previous = inner.handles.insert(id.clone(), handle);
        tracing::debug!(id = %id, "Cancellation handle registered");
        previous
    }

    /// Make the handle reachable through `target` also reachable through `alias`
    ///
    /// `target` may itself be an alias; the new alias points at its primary.
    /// Returns `false` when `target` resolves to nothing, or when `alias`
    /// already owns a primary handle of its own (which is left in place).
    pub fn alias(&self, alias: &MessageId, target: &MessageId) -> bool {
        let mut inner = self.inner.write();
        let Some(primary) = inner.primary_of(target).cloned() else {
            return false;
        };
        if &primary == alias {
            return true;
        }
        if inner.handles.contains_key(alias) {
            tracing::debug!(
                alias = %alias,
                target = %primary,
                "Alias id already owns a cancellation handle"
            );
            return false;
        }
        tracing::debug!(alias = %alias, target = %primary, "Cancellation alias registered");
        inner.aliases.insert(alias.clone(), primary);
        true
    }

    /// Look up the handle reachable through `id`
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<CancelHandle> {
        let inner = self.inner.read();
        let primary = inner.primary_of(id)?;
        inner.handles.get(primary).cloned()
    }

    /// Check whether a handle is reachable through `id`
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.get(id).is_some()
    }

    /// Remove `id` from the table
    ///
    /// Removing an alias leaves the primary in place. Removing a primary drops
    /// it together with every alias that points at it. Returns the handle that
    /// was reachable through `id`.
    pub fn remove(&self, id: &MessageId) -> Option<CancelHandle> {
        let mut inner = self.inner.write();

        if let Some(primary) = inner.aliases.remove(id) {
            return inner.handles.get(&primary).cloned();
        }

        let handle = inner.handles.remove(id)?;
        inner.aliases.retain(|_, target| *target != *id);
        tracing::debug!(id = %id, "Cancellation handle removed");
        Some(handle)
    }

    /// Cancel the handle reachable through `id`
    ///
    /// Returns `true` if a handle was found. The entry stays registered; the
    /// coordinator removes it when the response is cleared.
    pub fn cancel(&self, id: &MessageId) -> bool {
        match self.get(id) {
            Some(handle) => {
                handle.cancel();
                tracing::info!(id = %id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Number of ids (primaries and aliases) in the table
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.handles.len() + inner.aliases.len()
    }

    /// Check if the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MessageId {
        MessageId::from(s)
    }

    #[test]
    fn test_handle_clones_share_state() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert_eq!(handle, clone);
        assert_ne!(handle, CancelHandle::new());

        clone.cancel();
        assert!(handle.is_cancelled());
        assert!(handle.token().is_cancelled());
    }

    #[test]
    fn test_register_and_get() {
        let registry = CancellationRegistry::new();
        let handle = CancelHandle::new();

        assert!(registry.register(id("req-1"), handle.clone()).is_none());
        assert_eq!(registry.get(&id("req-1")), Some(handle));
        assert!(registry.get(&id("other")).is_none());
    }

    #[test]
    fn test_alias_reaches_same_handle() {
        let registry = CancellationRegistry::new();
        let handle = CancelHandle::new();
        registry.register(id("req-1"), handle.clone());

        assert!(registry.alias(&id("resp-1"), &id("req-1")));
        assert_eq!(registry.get(&id("resp-1")), Some(handle.clone()));

        assert!(registry.cancel(&id("resp-1")));
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_alias_of_alias_points_at_primary() {
        let registry = CancellationRegistry::new();
        let handle = CancelHandle::new();
        registry.register(id("req-1"), handle.clone());
        registry.alias(&id("resp-1"), &id("req-1"));
        registry.alias(&id("resp-2"), &id("resp-1"));

        // Dropping the middle alias does not orphan the last one
        registry.remove(&id("resp-1"));
        assert_eq!(registry.get(&id("resp-2")), Some(handle));
    }

    #[test]
    fn test_alias_to_unknown_target() {
        let registry = CancellationRegistry::new();
        assert!(!registry.alias(&id("resp-1"), &id("missing")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_alias_does_not_displace_primary() {
        let registry = CancellationRegistry::new();
        let first = CancelHandle::new();
        let second = CancelHandle::new();
        registry.register(id("a"), first.clone());
        registry.register(id("b"), second);

        assert!(!registry.alias(&id("a"), &id("b")));
        assert_eq!(registry.get(&id("a")), Some(first));
    }

    #[test]
    fn test_remove_alias_keeps_primary() {
        let registry = CancellationRegistry::new();
        let handle = CancelHandle::new();
        registry.register(id("req-1"), handle.clone());
        registry.alias(&id("resp-1"), &id("req-1"));

        assert_eq!(registry.remove(&id("resp-1")), Some(handle.clone()));
        assert!(!registry.contains(&id("resp-1")));
        assert_eq!(registry.get(&id("req-1")), Some(handle));
    }

    #[test]
    fn test_remove_primary_drops_aliases() {
        let registry = CancellationRegistry::new();
        registry.register(id("req-1"), CancelHandle::new());
        registry.alias(&id("resp-1"), &id("req-1"));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(&id("req-1")).is_some());
        assert!(!registry.contains(&id("resp-1")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let registry = CancellationRegistry::new();
        registry.register(id("req-1"), CancelHandle::new());
        assert!(registry.remove(&id("req-1")).is_some());
        assert!(registry.remove(&id("req-1")).is_none());
    }

    #[test]
    fn test_clones_share_table() {
        let registry = CancellationRegistry::new();
        let other = registry.clone();
        registry.register(id("req-1"), CancelHandle::new());
        assert!(other.contains(&id("req-1")));
    }

    #[test]
    fn test_cancel_unknown_id() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel(&id("nope")));
    }
}
