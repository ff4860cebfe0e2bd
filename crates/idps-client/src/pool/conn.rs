use super::{Factory, Shared, Slot};
use crate::{Error, Result};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tracing::warn;

/// Connection checked out of a [`Pool`](super::Pool)
///
/// Dereferences to the underlying connection. The slot goes back to the pool
/// when the guard is dropped or passed to [`release`](Self::release).
pub struct PooledConnection<F: Factory> {
    shared: Arc<Shared<F>>,
    conn: Option<F::Connection>,
    created_at: Instant,
    unhealthy: bool,
    // Released after the slot is back in the queue
    _permit: OwnedSemaphorePermit,
}

impl<F: Factory> PooledConnection<F> {
    pub(super) fn new(
        shared: Arc<Shared<F>>,
        conn: F::Connection,
        created_at: Instant,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            shared,
            conn: Some(conn),
            created_at,
            unhealthy: false,
            _permit: permit,
        }
    }

    /// Flag the connection as broken so the pool discards it on return
    pub fn mark_unhealthy(&mut self) {
        self.unhealthy = true;
    }

    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy
    }

    /// When the underlying connection was opened
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Hand the connection back to the pool
    ///
    /// # Errors
    ///
    /// * `Error::PoolClosed` - the pool was closed; the connection is dropped
    pub fn release(mut self) -> Result<()> {
        if self.shared.is_closed() {
            self.conn = None;
            return Err(Error::PoolClosed);
        }
        self.return_to_pool();
        Ok(())
    }

    fn return_to_pool(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        let slot = if self.unhealthy {
            warn!("Discarding unhealthy pooled connection");
            Slot::empty()
        } else {
            Slot {
                conn: Some(conn),
                created_at: Some(self.created_at),
                last_used: Instant::now(),
            }
        };
        self.shared.put_back(slot);
    }
}

impl<F: Factory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<F: Factory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<F: Factory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}

impl<F: Factory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("created_at", &self.created_at)
            .field("unhealthy", &self.unhealthy)
            .finish()
    }
}
