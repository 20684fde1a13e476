//! Pools keyed by account.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Connect, ConnectionPool, PoolConfig};

/// Account a pool belongs to: `user@host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerIdentity {
    /// Login name.
    pub username: String,
    /// Host, with `:port` when it is not the default.
    pub host: String,
}

impl ServerIdentity {
    /// Creates an identity.
    #[must_use]
    pub fn new(username: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            host: host.into(),
        }
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.host)
    }
}

/// Owns one [`ConnectionPool`] per [`ServerIdentity`].
pub struct PoolRegistry<C: Connect> {
    pools: Mutex<HashMap<ServerIdentity, ConnectionPool<C>>>,
    config: PoolConfig,
}

impl<C: Connect> PoolRegistry<C> {
    /// Creates an empty registry whose pools use `config`.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServerIdentity, ConnectionPool<C>>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the pool for `identity`, creating it with the connector from
    /// `make` and starting its reaper. Must be called within a Tokio runtime.
    pub fn get_or_create(
        &self,
        identity: &ServerIdentity,
        make: impl FnOnce() -> C,
    ) -> ConnectionPool<C> {
        let mut pools = self.lock();
        if let Some(pool) = pools.get(identity) {
            return pool.clone();
        }
        let pool = ConnectionPool::new(identity.to_string(), make(), self.config);
        pool.start_reaper();
        tracing::debug!(%identity, "created connection pool");
        pools.insert(identity.clone(), pool.clone());
        pool
    }

    /// Returns the pool for `identity`, if any.
    #[must_use]
    pub fn get(&self, identity: &ServerIdentity) -> Option<ConnectionPool<C>> {
        self.lock().get(identity).cloned()
    }

    /// Removes the pool for `identity` and disconnects its handles.
    pub fn remove(&self, identity: &ServerIdentity) -> Option<ConnectionPool<C>> {
        let pool = self.lock().remove(identity)?;
        pool.force_disconnect_all();
        tracing::debug!(%identity, "removed connection pool");
        Some(pool)
    }

    /// Moves the pool of `old` under `new`, e.g. after the user name of an
    /// account changed. Returns false if `old` has no pool or `new` already
    /// has one.
    pub fn rekey(&self, old: &ServerIdentity, new: ServerIdentity) -> bool {
        let mut pools = self.lock();
        if pools.contains_key(&new) {
            return false;
        }
        let Some(pool) = pools.remove(old) else {
            return false;
        };
        tracing::debug!(from = %old, to = %new, "re-keyed connection pool");
        pools.insert(new, pool);
        true
    }

    /// Puts every pool offline.
    pub fn close_all(&self) {
        let pools: Vec<_> = self.lock().values().cloned().collect();
        for pool in &pools {
            pool.set_offline(true);
        }
    }

    /// Identities with a pool.
    #[must_use]
    pub fn identities(&self) -> Vec<ServerIdentity> {
        self.lock().keys().cloned().collect()
    }

    /// Number of pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no pool exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<C: Connect> fmt::Debug for PoolRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.identities())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::connection::DisconnectSignal;
    use crate::pool::Poolable;

    struct Dummy(DisconnectSignal);

    impl Poolable for Dummy {
        fn is_connected(&self) -> bool {
            !self.0.is_triggered()
        }

        fn disconnect_signal(&self) -> DisconnectSignal {
            self.0.clone()
        }
    }

    struct DummyConnector;

    impl Connect for DummyConnector {
        type Handle = Dummy;

        async fn connect(&self) -> Result<Dummy> {
            Ok(Dummy(DisconnectSignal::new()))
        }
    }

    fn alice() -> ServerIdentity {
        ServerIdentity::new("alice", "mail.example.com")
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(alice().to_string(), "alice@mail.example.com");
    }

    #[tokio::test]
    async fn test_same_identity_same_pool() {
        let registry = PoolRegistry::new(PoolConfig::default());
        let first = registry.get_or_create(&alice(), || DummyConnector);
        let lease = first.acquire(None).await.unwrap().unwrap();

        let second = registry.get_or_create(&alice(), || unreachable!());
        assert_eq!(second.in_use_count(), 1);
        assert_eq!(registry.len(), 1);
        drop(lease);
    }

    #[tokio::test]
    async fn test_remove_disconnects() {
        let registry = PoolRegistry::new(PoolConfig::default());
        let pool = registry.get_or_create(&alice(), || DummyConnector);
        let lease = pool.acquire(None).await.unwrap().unwrap();

        assert!(registry.remove(&alice()).is_some());
        assert!(!lease.is_connected());
        assert!(registry.get(&alice()).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_rekey_moves_pool() {
        let registry = PoolRegistry::new(PoolConfig::default());
        registry.get_or_create(&alice(), || DummyConnector);
        let renamed = ServerIdentity::new("alice.smith", "mail.example.com");

        assert!(registry.rekey(&alice(), renamed.clone()));
        assert!(registry.get(&alice()).is_none());
        assert!(registry.get(&renamed).is_some());
        assert!(!registry.rekey(&alice(), renamed));
    }

    #[tokio::test]
    async fn test_close_all_takes_pools_offline() {
        let registry = PoolRegistry::new(PoolConfig::default());
        let pool = registry.get_or_create(&alice(), || DummyConnector);
        registry.close_all();
        assert!(pool.is_offline());
        assert!(pool.acquire(None).await.unwrap().is_none());
    }
}
