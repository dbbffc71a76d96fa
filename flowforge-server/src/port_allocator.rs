//! The Port Allocator (§4.2): a purely in-memory free-port set, seeded from
//! the store at startup and cross-checked against the container runtime.
//!
//! Grounded on the teacher's in-memory cache backend shape (a single
//! `Mutex`-guarded collection behind a small typed API) — `gateway_caching`
//! itself was trimmed since response caching has no counterpart here, but
//! its "one lock around one collection" construction is the right shape for
//! this single-writer-at-a-time resource too.

use std::collections::HashSet;

use tokio::sync::Mutex;

use crate::api_error::ApiError;

pub struct PortAllocator {
    range_start: u16,
    range_end: u16,
    used: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(range_start: u16, range_end: u16) -> Self {
        Self {
            range_start,
            range_end,
            used: Mutex::new(HashSet::new()),
        }
    }

    /// Seeds the allocator with ports already recorded by the store or
    /// observed as published by any container on the daemon, managed or not
    /// (§4.2 step 1). Called once during reconciliation (§4.7).
    pub async fn seed(&self, used_ports: impl IntoIterator<Item = u16>) {
        let mut guard = self.used.lock().await;
        guard.extend(used_ports);
    }

    /// Returns the smallest unused port in `[rangeStart, rangeEnd]`, marking
    /// it used atomically so concurrent installs never collide (§4.2).
    pub async fn allocate(&self) -> Result<u16, ApiError> {
        let mut guard = self.used.lock().await;
        for port in self.range_start..=self.range_end {
            if !guard.contains(&port) {
                guard.insert(port);
                return Ok(port);
            }
        }
        Err(ApiError::NoPortAvailable)
    }

    pub async fn release(&self, port: u16) {
        let mut guard = self.used.lock().await;
        guard.remove(&port);
    }

    pub async fn is_used(&self, port: u16) -> bool {
        self.used.lock().await.contains(&port)
    }

    /// Atomically checks and marks `port` used in one lock acquisition, so
    /// two concurrent installs fixing the same host port can never both
    /// succeed (§4.2: "allocation/release must be atomic").
    pub async fn try_reserve(&self, port: u16) -> bool {
        let mut guard = self.used.lock().await;
        if guard.contains(&port) {
            false
        } else {
            guard.insert(port);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_the_smallest_free_port_in_range() {
        let allocator = PortAllocator::new(20000, 20002);
        assert_eq!(allocator.allocate().await.unwrap(), 20000);
        assert_eq!(allocator.allocate().await.unwrap(), 20001);
        assert_eq!(allocator.allocate().await.unwrap(), 20002);
        assert!(allocator.allocate().await.is_err());
    }

    #[tokio::test]
    async fn release_makes_a_port_available_again() {
        let allocator = PortAllocator::new(20000, 20000);
        let port = allocator.allocate().await.unwrap();
        allocator.release(port).await;
        assert_eq!(allocator.allocate().await.unwrap(), port);
    }

    #[tokio::test]
    async fn seeded_ports_are_treated_as_used() {
        let allocator = PortAllocator::new(20000, 20002);
        allocator.seed([20000, 20001]).await;
        assert_eq!(allocator.allocate().await.unwrap(), 20002);
    }

    #[tokio::test]
    async fn try_reserve_only_succeeds_once_for_the_same_port() {
        let allocator = PortAllocator::new(20000, 20002);
        assert!(allocator.try_reserve(20000).await);
        assert!(!allocator.try_reserve(20000).await);
        assert_eq!(allocator.allocate().await.unwrap(), 20001);
    }
}
