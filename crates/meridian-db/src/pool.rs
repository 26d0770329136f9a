//! Store handles with scoped leases.
//!
//! A `StoreHandle` wraps one backend together with a semaphore that bounds
//! concurrent use. Writers acquire a `StoreLease` per sub-batch; dropping the
//! lease releases the permit on every exit path. With the default capacity of
//! one, writes to the same store from different workers are serialised.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::error::{DbError, Result};
use crate::schema::StoreRole;
use crate::store::Store;

pub const DEFAULT_LEASE_CAPACITY: usize = 1;

#[derive(Clone)]
pub struct StoreHandle {
    role: StoreRole,
    store: Arc<dyn Store>,
    leases: Arc<Semaphore>,
    capacity: usize,
    unavailable: Arc<AtomicBool>,
}

impl StoreHandle {
    pub fn new(role: StoreRole, store: Arc<dyn Store>) -> Self {
        Self::with_capacity(role, store, DEFAULT_LEASE_CAPACITY)
    }

    pub fn with_capacity(role: StoreRole, store: Arc<dyn Store>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            role,
            store,
            leases: Arc::new(Semaphore::new(capacity)),
            capacity,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn role(&self) -> StoreRole {
        self.role
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// Wait for a lease. Fails only if the handle was marked unavailable.
    pub async fn acquire(&self) -> Result<StoreLease> {
        if !self.is_available() {
            return Err(DbError::Unavailable(format!("{} store marked unavailable", self.role)));
        }
        let permit = self
            .leases
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DbError::Unavailable(format!("{} store handle closed", self.role)))?;
        Ok(StoreLease {
            _permit: permit,
            store: self.store.clone(),
        })
    }

    /// Stop all further work against this store for the rest of the run.
    pub fn mark_unavailable(&self, reason: &str) {
        if !self.unavailable.swap(true, Ordering::SeqCst) {
            warn!(store = self.name(), role = %self.role, reason, "Store marked unavailable");
        }
    }

    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    /// Leases currently free; equals the capacity when nothing is in flight.
    pub fn free_leases(&self) -> usize {
        self.leases.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("role", &self.role)
            .field("store", &self.store.name())
            .field("available", &self.is_available())
            .finish()
    }
}

/// Scoped access to a store. The permit is returned when this is dropped.
pub struct StoreLease {
    _permit: OwnedSemaphorePermit,
    store: Arc<dyn Store>,
}

impl Deref for StoreLease {
    type Target = dyn Store;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

/// The two stores of a run, iterated uniformly.
#[derive(Debug, Clone)]
pub struct StoreSet {
    pub primary: StoreHandle,
    pub secondary: StoreHandle,
}

impl StoreSet {
    pub fn new(primary: Arc<dyn Store>, secondary: Arc<dyn Store>) -> Self {
        Self {
            primary: StoreHandle::new(StoreRole::Primary, primary),
            secondary: StoreHandle::new(StoreRole::Secondary, secondary),
        }
    }

    pub fn handles(&self) -> [&StoreHandle; 2] {
        [&self.primary, &self.secondary]
    }

    pub fn get(&self, role: StoreRole) -> &StoreHandle {
        match role {
            StoreRole::Primary   => &self.primary,
            StoreRole::Secondary => &self.secondary,
        }
    }

    /// Ping both stores, marking any that fail. Returns how many are usable.
    pub async fn ping_all(&self) -> usize {
        let mut usable = 0;
        for handle in self.handles() {
            match handle.store.ping().await {
                Ok(()) => {
                    info!(store = handle.name(), role = %handle.role(), "Store reachable");
                    usable += 1;
                }
                Err(e) => handle.mark_unavailable(&e.to_string()),
            }
        }
        usable
    }

    pub fn any_available(&self) -> bool {
        self.handles().iter().any(|h| h.is_available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_lease_released_on_drop() {
        let handle = StoreHandle::new(StoreRole::Primary, Arc::new(MemoryStore::new("m")));
        {
            let lease = handle.acquire().await.unwrap();
            assert_eq!(lease.name(), "m");
            assert_eq!(handle.free_leases(), 0);
        }
        assert_eq!(handle.free_leases(), 1);
    }

    #[tokio::test]
    async fn test_lease_released_on_error_path() {
        let handle = StoreHandle::new(StoreRole::Primary, Arc::new(MemoryStore::new("m")));

        async fn fails(h: &StoreHandle) -> Result<()> {
            let _lease = h.acquire().await?;
            Err(DbError::Constraint("boom".into()))
        }

        assert!(fails(&handle).await.is_err());
        assert_eq!(handle.free_leases(), handle.capacity());
    }

    #[tokio::test]
    async fn test_unavailable_handle_refuses_leases() {
        let handle = StoreHandle::new(StoreRole::Secondary, Arc::new(MemoryStore::new("m")));
        handle.mark_unavailable("test");
        assert!(handle.acquire().await.is_err());
        assert!(!handle.is_available());
    }
}
