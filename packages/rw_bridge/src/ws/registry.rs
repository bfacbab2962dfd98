//! Writer-lease registry
//!
//! Maps a front-end connection to the persistent backend link it holds while
//! its writer lease is active. One entry per connection at most.

use backend_link::LinkHandle;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::BridgeError;

/// Identity of one front-end connection, assigned on accept
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide lease table, shared by every connection task
#[derive(Default)]
pub struct SessionRegistry {
    leases: RwLock<HashMap<SessionId, LinkHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail fast when `id` already holds a lease. Does not reserve the slot:
    /// a connection issues one request at a time, so nothing can bind for
    /// `id` between this check and the later [`bind`](Self::bind).
    pub async fn try_acquire(&self, id: SessionId) -> Result<(), BridgeError> {
        if self.leases.read().await.contains_key(&id) {
            return Err(BridgeError::LeaseAlreadyActive);
        }
        Ok(())
    }

    /// Record an acknowledged lease. An occupied slot is left untouched and
    /// the link is handed back so the caller can close it.
    pub async fn bind(&self, id: SessionId, link: LinkHandle) -> Result<(), LinkHandle> {
        use std::collections::hash_map::Entry;

        match self.leases.write().await.entry(id) {
            Entry::Occupied(_) => Err(link),
            Entry::Vacant(slot) => {
                slot.insert(link);
                Ok(())
            }
        }
    }

    pub async fn release(&self, id: SessionId) -> Option<LinkHandle> {
        self.leases.write().await.remove(&id)
    }

    pub async fn lookup(&self, id: SessionId) -> Option<LinkHandle> {
        self.leases.read().await.get(&id).cloned()
    }

    /// Number of active leases
    pub async fn len(&self) -> usize {
        self.leases.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.leases.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FakeBackend;
    use backend_link::BackendPool;

    async fn open_link(backend: &FakeBackend) -> LinkHandle {
        BackendPool::new(backend.link_config())
            .connect()
            .await
            .unwrap()
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();

        assert!(registry.is_empty().await);
        assert!(registry.try_acquire(id).await.is_ok());
        assert!(registry.lookup(id).await.is_none());
        assert!(registry.release(id).await.is_none());
    }

    #[tokio::test]
    async fn test_bind_lookup_release() {
        let backend = FakeBackend::start().await;
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        let link = open_link(&backend).await;
        let link_id = link.id();

        registry.bind(id, link).await.unwrap();
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.lookup(id).await.map(|l| l.id()), Some(link_id));
        // lookup does not remove
        assert_eq!(registry.len().await, 1);

        let released = registry.release(id).await.unwrap();
        assert_eq!(released.id(), link_id);
        assert!(registry.is_empty().await);
        assert!(registry.release(id).await.is_none());
        released.close().await;
    }

    #[tokio::test]
    async fn test_try_acquire_rejects_held_lease() {
        let backend = FakeBackend::start().await;
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.bind(id, open_link(&backend).await).await.unwrap();

        let err = registry.try_acquire(id).await.unwrap_err();
        assert!(matches!(err, BridgeError::LeaseAlreadyActive));

        // Other connections are unaffected
        assert!(registry.try_acquire(SessionId::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_bind_refuses_occupied_slot() {
        let backend = FakeBackend::start().await;
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        let first = open_link(&backend).await;
        let first_id = first.id();
        let second = open_link(&backend).await;
        let second_id = second.id();

        registry.bind(id, first).await.unwrap();
        let returned = registry.bind(id, second).await.unwrap_err();
        assert_eq!(returned.id(), second_id);
        assert_eq!(registry.lookup(id).await.map(|l| l.id()), Some(first_id));
        returned.close().await;
    }

    #[tokio::test]
    async fn test_leases_are_per_connection() {
        let backend = FakeBackend::start().await;
        let registry = SessionRegistry::new();
        let a = SessionId::new();
        let b = SessionId::new();

        registry.bind(a, open_link(&backend).await).await.unwrap();
        registry.bind(b, open_link(&backend).await).await.unwrap();
        assert_eq!(registry.len().await, 2);

        registry.release(a).await;
        assert!(registry.lookup(a).await.is_none());
        assert!(registry.lookup(b).await.is_some());
    }
}
