//! Bounded pool of reusable connections
//!
//! The pool owns `capacity` slots. A slot either holds a live connection or is
//! empty; empty slots are filled through the [`Factory`] when they are handed
//! out. Connections are checked on the way out and replaced when they have
//! sat idle for longer than the idle timeout or have outlived the maximum
//! lifetime. On the way back in, a connection marked unhealthy is dropped and
//! its slot returned empty.
//!
//! # Example
//!
//! ```ignore
//! let pool = Pool::new(ChannelFactory::new(&config)?, config.pool.clone()).await?;
//!
//! let mut conn = pool.acquire().await?;
//! let mut stub = new_crypto_client(conn.clone());
//! if stub.encrypt_data(request).await.is_err() {
//!     conn.mark_unhealthy();
//! }
//! // Dropping the guard hands the slot back
//! ```

mod conn;

pub use conn::PooledConnection;

use crate::config::non_zero_millis;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info};

/// Creates connections for the pool
#[async_trait]
pub trait Factory: Send + Sync + 'static {
    /// Connection type handed out by the pool
    type Connection: Send + 'static;

    /// Open a new connection
    async fn create(&self) -> Result<Self::Connection>;
}

/// Pool sizing and eviction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections
    pub capacity: usize,

    /// Connections opened up front (clamped to `capacity`)
    pub initial: usize,

    /// Replace a connection idle for longer than this (0 = never)
    pub idle_timeout_ms: u64,

    /// Replace a connection older than this (0 = never)
    pub max_lifetime_ms: u64,

    /// Default wait for a free slot in `acquire` (0 = wait forever)
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            initial: 1,
            idle_timeout_ms: 0,
            max_lifetime_ms: 0,
            acquire_timeout_ms: 0,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.idle_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        non_zero_millis(self.max_lifetime_ms)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.acquire_timeout_ms)
    }
}

/// One position in the pool
struct Slot<C> {
    conn: Option<C>,
    created_at: Option<Instant>,
    last_used: Instant,
}

impl<C> Slot<C> {
    fn empty() -> Self {
        Self {
            conn: None,
            created_at: None,
            last_used: Instant::now(),
        }
    }

    fn ready(conn: C) -> Self {
        let now = Instant::now();
        Self {
            conn: Some(conn),
            created_at: Some(now),
            last_used: now,
        }
    }

    fn clear(&mut self) {
        self.conn = None;
        self.created_at = None;
    }
}

pub(crate) struct Shared<F: Factory> {
    factory: F,
    config: PoolConfig,
    capacity: usize,
    slots: Mutex<VecDeque<Slot<F::Connection>>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl<F: Factory> Shared<F> {
    /// Hand a slot back; dropped instead when the pool is closed
    ///
    /// `closed` is only flipped while `slots` is locked, so checking it under
    /// the same lock keeps a closed pool empty.
    fn put_back(&self, slot: Slot<F::Connection>) {
        let mut slots = self.slots.lock();
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        slots.push_back(slot);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Returns a slot taken off the queue if acquisition is abandoned midway
struct PendingSlot<'a, F: Factory> {
    shared: &'a Shared<F>,
    slot: Option<Slot<F::Connection>>,
}

impl<F: Factory> Drop for PendingSlot<'_, F> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.shared.put_back(slot);
        }
    }
}

/// Bounded pool of connections produced by a [`Factory`]
pub struct Pool<F: Factory> {
    shared: Arc<Shared<F>>,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: Factory> Pool<F> {
    /// Create a pool and open `config.initial` connections
    ///
    /// # Errors
    ///
    /// * `Error::InvalidConfig` - capacity is zero
    /// * any error from the factory while opening the initial connections
    pub async fn new(factory: F, config: PoolConfig) -> Result<Self> {
        let capacity = config.capacity;
        if capacity == 0 {
            return Err(Error::InvalidConfig(
                "pool capacity must be at least 1".to_string(),
            ));
        }
        let initial = config.initial.min(capacity);

        let mut slots = VecDeque::with_capacity(capacity);
        for _ in 0..initial {
            slots.push_back(Slot::ready(factory.create().await?));
        }
        for _ in initial..capacity {
            slots.push_back(Slot::empty());
        }

        debug!(capacity, initial, "Connection pool created");

        Ok(Self {
            shared: Arc::new(Shared {
                factory,
                config,
                capacity,
                slots: Mutex::new(slots),
                permits: Arc::new(Semaphore::new(capacity)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Take a connection, waiting at most the configured acquire timeout
    pub async fn acquire(&self) -> Result<PooledConnection<F>> {
        self.acquire_timeout(self.shared.config.acquire_timeout())
            .await
    }

    /// Take a connection, waiting at most `timeout` for a free slot
    ///
    /// # Errors
    ///
    /// * `Error::PoolClosed` - pool closed before or while waiting
    /// * `Error::PoolTimeout` - no slot freed up within `timeout`
    /// * any error from the factory when the slot had to be refilled
    pub async fn acquire_timeout(&self, timeout: Option<Duration>) -> Result<PooledConnection<F>> {
        if self.shared.is_closed() {
            return Err(Error::PoolClosed);
        }

        let wait = Arc::clone(&self.shared.permits).acquire_owned();
        let permit = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| Error::PoolTimeout)?,
            None => wait.await,
        }
        .map_err(|_| Error::PoolClosed)?;

        if self.shared.is_closed() {
            return Err(Error::PoolClosed);
        }

        let slot = self
            .shared
            .slots
            .lock()
            .pop_front()
            .unwrap_or_else(Slot::empty);
        let mut pending = PendingSlot {
            shared: &self.shared,
            slot: Some(slot),
        };

        let (conn, created_at) = {
            let slot = pending.slot.get_or_insert_with(Slot::empty);
            self.evict_stale(slot);

            match (slot.conn.take(), slot.created_at) {
                (Some(conn), Some(created_at)) => (conn, created_at),
                _ => {
                    // Slot goes back empty if the factory fails
                    let conn = self.shared.factory.create().await?;
                    debug!("Opened new pooled connection");
                    (conn, Instant::now())
                }
            }
        };
        pending.slot = None;

        Ok(PooledConnection::new(
            Arc::clone(&self.shared),
            conn,
            created_at,
            permit,
        ))
    }

    /// Drop the slot's connection if it is idle too long or too old
    fn evict_stale(&self, slot: &mut Slot<F::Connection>) {
        if slot.conn.is_none() {
            return;
        }
        let now = Instant::now();

        if let Some(idle) = self.shared.config.idle_timeout() {
            let idle_for = now.saturating_duration_since(slot.last_used);
            if idle_for > idle {
                debug!(idle_ms = idle_for.as_millis() as u64, "Evicting idle pooled connection");
                slot.clear();
                return;
            }
        }

        if let (Some(max), Some(created_at)) = (self.shared.config.max_lifetime(), slot.created_at) {
            let age = now.saturating_duration_since(created_at);
            if age > max {
                debug!(age_ms = age.as_millis() as u64, "Evicting expired pooled connection");
                slot.clear();
            }
        }
    }

    /// Close the pool and drop every idle connection
    ///
    /// Waiters are woken with `Error::PoolClosed`. Connections currently
    /// checked out are dropped when their guards are released.
    pub fn close(&self) {
        let drained = {
            let mut slots = self.shared.slots.lock();
            if self.shared.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *slots)
        };
        self.shared.permits.close();
        info!(
            dropped = drained.iter().filter(|s| s.conn.is_some()).count(),
            "Connection pool closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Maximum number of connections
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of slots that can be acquired right now
    pub fn available(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.shared.permits.available_permits()
    }
}

impl<F: Factory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("closed", &self.is_closed())
            .finish()
    }
}
