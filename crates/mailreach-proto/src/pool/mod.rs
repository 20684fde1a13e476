//! Connection pooling per server identity.
//!
//! A [`ConnectionPool`] keeps the handles opened for one account. Callers
//! [`acquire`](ConnectionPool::acquire) a [`Lease`], use the handle and drop
//! the lease to give it back. The pool:
//!
//! - prefers a free handle last used by the same owner, then one with no
//!   previous owner, then any free handle,
//! - opens a new connection only while fewer than `max_connections` handles
//!   are checked out, without holding its lock during the connect,
//! - answers `None` at capacity or while offline,
//! - closes free handles idle longer than the configured timeout.
//!
//! The capacity check and the registration of a new handle are separate
//! critical sections, so concurrent acquires may briefly overshoot the cap.

mod registry;

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::AbortHandle;
use tokio::time::Instant;

pub use registry::{PoolRegistry, ServerIdentity};

use crate::connection::DisconnectSignal;
use crate::imap::{ImapConnector, ImapHandle};
use crate::pop3::{Pop3Connector, Pop3Handle};
use crate::{Error, Result};

/// A handle the pool can keep.
pub trait Poolable: Send + 'static {
    /// Returns true while the handle can still talk to its server.
    fn is_connected(&self) -> bool;

    /// Signal that makes the handle drop its socket at its next operation.
    fn disconnect_signal(&self) -> DisconnectSignal;
}

/// Opens new handles for a pool.
pub trait Connect: Send + Sync + 'static {
    /// Handle type produced.
    type Handle: Poolable;

    /// Opens, secures and authenticates one connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Handle>> + Send;
}

impl<S> Poolable for ImapHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn is_connected(&self) -> bool {
        Self::is_connected(self)
    }

    fn disconnect_signal(&self) -> DisconnectSignal {
        Self::disconnect_signal(self)
    }
}

impl<S> Poolable for Pop3Handle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn is_connected(&self) -> bool {
        Self::is_connected(self)
    }

    fn disconnect_signal(&self) -> DisconnectSignal {
        Self::disconnect_signal(self)
    }
}

impl Connect for ImapConnector {
    type Handle = ImapHandle;

    async fn connect(&self) -> Result<ImapHandle> {
        self.open().await
    }
}

impl Connect for Pop3Connector {
    type Handle = Pop3Handle;

    async fn connect(&self) -> Result<Pop3Handle> {
        self.open().await
    }
}

/// Identifies the consumer a handle was last leased to (a mailbox view,
/// a fetch job, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerToken(u64);

impl OwnerToken {
    /// Wraps a consumer-chosen id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Most handles checked out at once.
    pub max_connections: usize,
    /// Free handles unused for longer than this are closed.
    pub idle_timeout: Duration,
    /// How often the reaper looks for idle handles.
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            idle_timeout: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

struct InUse {
    id: u64,
    signal: DisconnectSignal,
}

struct Idle<H> {
    id: u64,
    handle: H,
    last_used: Instant,
    last_owner: Option<OwnerToken>,
}

struct PoolState<H> {
    max_connections: usize,
    in_use: Vec<InUse>,
    free: Vec<Idle<H>>,
}

impl<H: Poolable> PoolState<H> {
    /// Picks a free handle: same owner, then ownerless, then the most
    /// recently released. Dead handles are dropped on the way.
    fn take_free(&mut self, owner: Option<OwnerToken>) -> Option<Idle<H>> {
        let before = self.free.len();
        self.free.retain(|idle| idle.handle.is_connected());
        if self.free.len() < before {
            tracing::debug!(dropped = before - self.free.len(), "discarded dead idle handles");
        }

        let index = owner
            .and_then(|owner| {
                self.free
                    .iter()
                    .position(|idle| idle.last_owner == Some(owner))
            })
            .or_else(|| self.free.iter().position(|idle| idle.last_owner.is_none()))
            .or_else(|| self.free.len().checked_sub(1))?;
        Some(self.free.remove(index))
    }

    fn total(&self) -> usize {
        self.in_use.len() + self.free.len()
    }
}

/// Bookkeeping shared by a pool, its leases and its reaper.
struct Slots<H> {
    name: String,
    state: Mutex<PoolState<H>>,
    offline: AtomicBool,
    next_id: AtomicU64,
    idle_timeout: Duration,
    sweep_interval: Duration,
    reaper: Mutex<Option<AbortHandle>>,
}

impl<H: Poolable> Slots<H> {
    fn lock(&self) -> MutexGuard<'_, PoolState<H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    fn release(&self, id: u64, handle: H, owner: Option<OwnerToken>) {
        let mut state = self.lock();
        let Some(pos) = state.in_use.iter().position(|record| record.id == id) else {
            tracing::debug!(pool = %self.name, id, "released handle was already written off");
            return;
        };
        state.in_use.swap_remove(pos);

        if self.is_offline() || !handle.is_connected() {
            tracing::debug!(pool = %self.name, id, "closing released handle");
            return;
        }
        if state.total() >= state.max_connections {
            tracing::debug!(
                pool = %self.name,
                id,
                max = state.max_connections,
                "over capacity, closing released handle"
            );
            return;
        }
        state.free.push(Idle {
            id,
            handle,
            last_used: Instant::now(),
            last_owner: owner,
        });
        while state.total() > state.max_connections && !state.free.is_empty() {
            state.free.remove(0);
        }
    }

    fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.free.len();
        state
            .free
            .retain(|idle| now.duration_since(idle.last_used) <= self.idle_timeout);
        let evicted = before - state.free.len();
        if evicted > 0 {
            tracing::debug!(pool = %self.name, evicted, "closed idle handles");
        }
        evicted
    }
}

impl<H> Drop for Slots<H> {
    fn drop(&mut self) {
        let reaper = self
            .reaper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reaper) = reaper {
            reaper.abort();
        }
    }
}

/// Handles for one server identity.
///
/// Cloning yields another reference to the same pool.
pub struct ConnectionPool<C: Connect> {
    connector: Arc<C>,
    slots: Arc<Slots<C::Handle>>,
}

impl<C: Connect> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<C: Connect> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.slots.lock();
        f.debug_struct("ConnectionPool")
            .field("name", &self.slots.name)
            .field("in_use", &state.in_use.len())
            .field("free", &state.free.len())
            .field("max_connections", &state.max_connections)
            .field("offline", &self.slots.is_offline())
            .finish_non_exhaustive()
    }
}

impl<C: Connect> ConnectionPool<C> {
    /// Creates an empty pool. `name` appears in log events.
    #[must_use]
    pub fn new(name: impl Into<String>, connector: C, config: PoolConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            slots: Arc::new(Slots {
                name: name.into(),
                state: Mutex::new(PoolState {
                    max_connections: config.max_connections,
                    in_use: Vec::new(),
                    free: Vec::new(),
                }),
                offline: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                idle_timeout: config.idle_timeout,
                sweep_interval: config.sweep_interval,
                reaper: Mutex::new(None),
            }),
        }
    }

    /// The connector used for new handles.
    #[must_use]
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Leases a handle, opening a new connection when none is free.
    ///
    /// Returns `Ok(None)` when the pool is offline or at capacity; the
    /// caller may retry later.
    ///
    /// # Errors
    ///
    /// Connection, TLS and authentication failures of a new connection.
    /// They are not retried.
    pub async fn acquire(&self, owner: Option<OwnerToken>) -> Result<Option<Lease<C::Handle>>> {
        if self.slots.is_offline() {
            return Ok(None);
        }
        {
            let mut state = self.slots.lock();
            if let Some(idle) = state.take_free(owner) {
                state.in_use.push(InUse {
                    id: idle.id,
                    signal: idle.handle.disconnect_signal(),
                });
                drop(state);
                tracing::debug!(pool = %self.slots.name, id = idle.id, "reusing idle handle");
                return Ok(Some(self.lease(idle.id, idle.handle, owner)));
            }
            if state.in_use.len() >= state.max_connections {
                tracing::debug!(pool = %self.slots.name, max = state.max_connections, "pool at capacity");
                return Ok(None);
            }
        }

        let handle = self.connector.connect().await?;
        if self.slots.is_offline() {
            tracing::debug!(pool = %self.slots.name, "went offline while connecting");
            return Ok(None);
        }
        let id = self.slots.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().in_use.push(InUse {
            id,
            signal: handle.disconnect_signal(),
        });
        tracing::debug!(pool = %self.slots.name, id, "opened new handle");
        Ok(Some(self.lease(id, handle, owner)))
    }

    /// Like [`acquire`](Self::acquire), but capacity exhaustion is an error.
    ///
    /// # Errors
    ///
    /// [`Error::CapacityExhausted`] instead of `None`, plus every error of
    /// `acquire`.
    pub async fn acquire_required(&self, owner: Option<OwnerToken>) -> Result<Lease<C::Handle>> {
        self.acquire(owner).await?.ok_or(Error::CapacityExhausted)
    }

    /// Returns a leased handle. Equivalent to dropping the lease.
    pub fn release(&self, lease: Lease<C::Handle>) {
        drop(lease);
    }

    /// Changes the connection cap. Excess handles are closed as they are
    /// released.
    pub fn set_max_connections(&self, max: usize) {
        self.slots.lock().max_connections = max;
    }

    /// Current connection cap.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.slots.lock().max_connections
    }

    /// Going offline disconnects every handle and refuses new leases.
    pub fn set_offline(&self, offline: bool) {
        let was = self.slots.offline.swap(offline, Ordering::AcqRel);
        if offline {
            self.force_disconnect_all();
        }
        if was != offline {
            tracing::info!(pool = %self.slots.name, offline, "pool availability changed");
        }
    }

    /// Returns true if the pool refuses new leases.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.slots.is_offline()
    }

    /// Returns true if an acquire could succeed without waiting for a
    /// release.
    #[must_use]
    pub fn has_free_handles(&self) -> bool {
        let state = self.slots.lock();
        state.in_use.len() < state.max_connections || !state.free.is_empty()
    }

    /// Number of handles checked out.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.slots.lock().in_use.len()
    }

    /// Number of idle handles.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.slots.lock().free.len()
    }

    /// Closes free handles and tells checked-out ones to drop their socket.
    pub fn force_disconnect_all(&self) {
        let free = {
            let mut state = self.slots.lock();
            for record in state.in_use.drain(..) {
                record.signal.trigger();
            }
            std::mem::take(&mut state.free)
        };
        if !free.is_empty() {
            tracing::debug!(pool = %self.slots.name, closed = free.len(), "closed idle handles");
        }
    }

    /// Closes free handles idle strictly longer than the idle timeout and
    /// returns how many were closed.
    pub fn sweep_idle(&self) -> usize {
        self.slots.sweep_idle()
    }

    /// Starts the periodic idle sweep. Must be called within a Tokio
    /// runtime; calling it again has no effect.
    pub fn start_reaper(&self) {
        let mut reaper = self.slots.reaper.lock().unwrap_or_else(PoisonError::into_inner);
        if reaper.is_some() {
            return;
        }
        let period = self.slots.sweep_interval;
        let slots = Arc::downgrade(&self.slots);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(slots) = slots.upgrade() else {
                    break;
                };
                slots.sweep_idle();
            }
        });
        *reaper = Some(task.abort_handle());
    }

    fn lease(&self, id: u64, handle: C::Handle, owner: Option<OwnerToken>) -> Lease<C::Handle> {
        Lease {
            handle: Some(handle),
            id,
            owner,
            slots: Arc::downgrade(&self.slots),
        }
    }
}

/// A handle checked out of a pool. Dropping it returns the handle.
pub struct Lease<H: Poolable> {
    handle: Option<H>,
    id: u64,
    owner: Option<OwnerToken>,
    slots: Weak<Slots<H>>,
}

impl<H: Poolable> Lease<H> {
    /// Owner the handle was leased to.
    #[must_use]
    pub const fn owner(&self) -> Option<OwnerToken> {
        self.owner
    }
}

impl<H: Poolable> Deref for Lease<H> {
    type Target = H;

    #[allow(clippy::expect_used)] // only taken in drop
    fn deref(&self) -> &H {
        self.handle.as_ref().expect("lease holds a handle until dropped")
    }
}

impl<H: Poolable> DerefMut for Lease<H> {
    #[allow(clippy::expect_used)] // only taken in drop
    fn deref_mut(&mut self) -> &mut H {
        self.handle.as_mut().expect("lease holds a handle until dropped")
    }
}

impl<H: Poolable> Drop for Lease<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take()
            && let Some(slots) = self.slots.upgrade()
        {
            slots.release(self.id, handle, self.owner);
        }
    }
}

impl<H: Poolable> std::fmt::Debug for Lease<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct FakeHandle {
        serial: usize,
        signal: DisconnectSignal,
    }

    impl Poolable for FakeHandle {
        fn is_connected(&self) -> bool {
            !self.signal.is_triggered()
        }

        fn disconnect_signal(&self) -> DisconnectSignal {
            self.signal.clone()
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        opened: Arc<AtomicUsize>,
        delay: Option<Duration>,
    }

    impl Connect for FakeConnector {
        type Handle = FakeHandle;

        async fn connect(&self) -> Result<FakeHandle> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let serial = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(FakeHandle {
                serial,
                signal: DisconnectSignal::new(),
            })
        }
    }

    fn pool(max: usize) -> (ConnectionPool<FakeConnector>, Arc<AtomicUsize>) {
        let connector = FakeConnector::default();
        let opened = connector.opened.clone();
        let config = PoolConfig {
            max_connections: max,
            ..PoolConfig::default()
        };
        (ConnectionPool::new("test@example.com", connector, config), opened)
    }

    #[tokio::test]
    async fn test_single_slot_pool() {
        let (pool, opened) = pool(1);
        let first = pool.acquire(None).await.unwrap();
        assert!(first.is_some());
        assert!(pool.acquire(None).await.unwrap().is_none());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert!(!pool.has_free_handles());
        assert!(matches!(
            pool.acquire_required(None).await,
            Err(Error::CapacityExhausted)
        ));
    }

    #[tokio::test]
    async fn test_released_handle_is_reused() {
        let (pool, opened) = pool(2);
        let lease = pool.acquire(None).await.unwrap().unwrap();
        let serial = lease.serial;
        pool.release(lease);
        assert_eq!(pool.free_count(), 1);

        let again = pool.acquire(None).await.unwrap().unwrap();
        assert_eq!(again.serial, serial);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.in_use_count(), 1);
    }

    #[tokio::test]
    async fn test_owner_affinity() {
        let alice = OwnerToken::new(1);
        let bob = OwnerToken::new(2);
        let (pool, _) = pool(3);
        let a = pool.acquire(Some(alice)).await.unwrap().unwrap();
        let b = pool.acquire(Some(bob)).await.unwrap().unwrap();
        let anon = pool.acquire(None).await.unwrap().unwrap();
        let (sa, sb, sn) = (a.serial, b.serial, anon.serial);
        drop(a);
        drop(b);
        drop(anon);

        assert_eq!(pool.acquire(Some(bob)).await.unwrap().unwrap().serial, sb);
        // Dropped lease went straight back; ownerless is preferred next.
        assert_eq!(pool.acquire(Some(OwnerToken::new(9))).await.unwrap().unwrap().serial, sn);
        assert_eq!(pool.acquire(Some(alice)).await.unwrap().unwrap().serial, sa);
    }

    #[tokio::test]
    async fn test_cap_reduction_drains_on_release() {
        let (pool, _) = pool(3);
        let leases = vec![
            pool.acquire(None).await.unwrap().unwrap(),
            pool.acquire(None).await.unwrap().unwrap(),
            pool.acquire(None).await.unwrap().unwrap(),
        ];
        pool.set_max_connections(1);
        assert_eq!(pool.in_use_count(), 3);
        drop(leases);
        assert!(pool.in_use_count() + pool.free_count() <= 1);
        assert_eq!(pool.free_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_handles_are_not_pooled() {
        let (pool, opened) = pool(2);
        let lease = pool.acquire(None).await.unwrap().unwrap();
        lease.disconnect_signal().trigger();
        drop(lease);
        assert_eq!(pool.free_count(), 0);

        let lease = pool.acquire(None).await.unwrap().unwrap();
        let signal = lease.disconnect_signal();
        drop(lease);
        assert_eq!(pool.free_count(), 1);
        signal.trigger();

        let fresh = pool.acquire(None).await.unwrap().unwrap();
        assert_eq!(fresh.serial, 3);
        assert_eq!(opened.load(Ordering::SeqCst), 3);
        assert_eq!(pool.free_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_stale_free_handles() {
        let (pool, _) = pool(3);
        let old = pool.acquire(None).await.unwrap().unwrap();
        let recent = pool.acquire(None).await.unwrap().unwrap();
        let busy = pool.acquire(None).await.unwrap().unwrap();

        drop(old);
        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        drop(recent);
        tokio::time::advance(Duration::from_secs(4 * 60)).await;

        // old: exactly 10 minutes idle, not strictly longer.
        assert_eq!(pool.sweep_idle(), 0);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(pool.sweep_idle(), 1);
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.in_use_count(), 1);
        drop(busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_runs_periodically() {
        let (pool, _) = pool(2);
        pool.start_reaper();
        drop(pool.acquire(None).await.unwrap().unwrap());
        assert_eq!(pool.free_count(), 1);

        // Sweeps at 5, 10 and 15 minutes; only the last sees > 10 minutes.
        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        assert_eq!(pool.free_count(), 1);
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(pool.free_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_may_overshoot() {
        let connector = FakeConnector {
            delay: Some(Duration::from_secs(1)),
            ..FakeConnector::default()
        };
        let config = PoolConfig {
            max_connections: 1,
            ..PoolConfig::default()
        };
        let pool = ConnectionPool::new("slow", connector, config);

        let (a, b) = tokio::join!(pool.acquire(None), pool.acquire(None));
        let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());
        assert_eq!(pool.in_use_count(), 2);

        drop(a);
        drop(b);
        assert!(pool.in_use_count() + pool.free_count() <= 1);
    }

    #[tokio::test]
    async fn test_offline_blocks_and_disconnects() {
        let (pool, _) = pool(2);
        let lease = pool.acquire(None).await.unwrap().unwrap();
        drop(pool.acquire(None).await.unwrap().unwrap());
        assert_eq!(pool.free_count(), 1);

        pool.set_offline(true);
        assert!(pool.is_offline());
        assert!(!lease.is_connected());
        assert_eq!(pool.free_count(), 0);
        assert!(pool.acquire(None).await.unwrap().is_none());
        drop(lease);
        assert_eq!(pool.free_count(), 0);

        pool.set_offline(false);
        assert!(pool.acquire(None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_force_disconnect_signals_leases() {
        let (pool, _) = pool(2);
        let lease = pool.acquire(None).await.unwrap().unwrap();
        pool.force_disconnect_all();
        assert!(!lease.is_connected());
        assert_eq!(pool.in_use_count(), 0);
        drop(lease);
        assert_eq!(pool.free_count(), 0);
    }
}
