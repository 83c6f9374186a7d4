// src/lock.rs

//! Per-node lease manager
//!
//! Grants at-most-one-holder exclusive leases over a node identifier. A
//! lease is acquired once at the start of an introspection run and released
//! unconditionally when the run exits, success or failure. Acquisition
//! never queues: a second submission for a locked node fails fast, so
//! duplicate ramdisk retries cannot pile up behind a slow run.
//!
//! Leases expire after the configured introspection timeout, so a run that
//! died without releasing cannot wedge its node forever.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// An exclusive lease over one node identifier. Only the holder may mutate
/// the node's record or submit patches for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub node_id: String,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Held {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

/// In-process lock table keyed by node identifier.
pub struct LockManager {
    ttl: Duration,
    leases: Mutex<HashMap<String, Held>>,
}

impl LockManager {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(3600)),
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Try to acquire the lease for a node. Returns `None` when another
    /// holder has an unexpired lease; the caller must fail the request
    /// rather than wait.
    pub fn acquire(&self, node_id: &str) -> Option<Lease> {
        let now = Utc::now();
        let mut leases = self.leases.lock();

        if let Some(held) = leases.get(node_id) {
            if held.expires_at > now {
                debug!("Lease for node {} already held", node_id);
                return None;
            }
            warn!(
                "Lease for node {} expired at {}, taking it over",
                node_id, held.expires_at
            );
        }

        let held = Held {
            token: Uuid::new_v4(),
            expires_at: now + self.ttl,
        };
        let lease = Lease {
            node_id: node_id.to_string(),
            token: held.token,
            expires_at: held.expires_at,
        };
        leases.insert(node_id.to_string(), held);
        debug!("Acquired lease for node {}", node_id);
        Some(lease)
    }

    /// Acquire a lease wrapped in a guard that releases it when dropped,
    /// so unwinding out of the holder's scope still frees the node.
    pub fn acquire_guard(&self, node_id: &str) -> Option<LeaseGuard<'_>> {
        self.acquire(node_id).map(|lease| LeaseGuard {
            manager: self,
            lease,
        })
    }

    /// Release a lease. A no-op when the lease was already expired and
    /// taken over by someone else.
    pub fn release(&self, lease: &Lease) {
        let mut leases = self.leases.lock();
        if let Some(held) = leases.get(&lease.node_id)
            && held.token == lease.token
        {
            leases.remove(&lease.node_id);
            debug!("Released lease for node {}", lease.node_id);
        }
    }

    /// Check whether an unexpired lease is held for a node.
    pub fn is_held(&self, node_id: &str) -> bool {
        let leases = self.leases.lock();
        leases
            .get(node_id)
            .map(|held| held.expires_at > Utc::now())
            .unwrap_or(false)
    }

    /// Drop any lease for a node, regardless of holder. Used when a node is
    /// re-registered, which invalidates the previous session.
    pub fn clear(&self, node_id: &str) {
        if self.leases.lock().remove(node_id).is_some() {
            debug!("Cleared lease for node {}", node_id);
        }
    }
}

/// Holds a lease for a lexical scope. Dropping the guard releases the
/// lease, on both the success and the unwind path.
pub struct LeaseGuard<'a> {
    manager: &'a LockManager,
    lease: Lease,
}

impl LeaseGuard<'_> {
    pub fn lease(&self) -> &Lease {
        &self.lease
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.lease);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_acquire_and_release() {
        let locks = LockManager::new(StdDuration::from_secs(60));

        let lease = locks.acquire("node-1").unwrap();
        assert!(locks.is_held("node-1"));
        assert!(!locks.is_held("node-2"));

        locks.release(&lease);
        assert!(!locks.is_held("node-1"));
    }

    #[test]
    fn test_second_acquire_fails_fast() {
        let locks = LockManager::new(StdDuration::from_secs(60));

        let _lease = locks.acquire("node-1").unwrap();
        assert!(locks.acquire("node-1").is_none());
    }

    #[test]
    fn test_reacquire_after_release() {
        let locks = LockManager::new(StdDuration::from_secs(60));

        let lease = locks.acquire("node-1").unwrap();
        locks.release(&lease);
        assert!(locks.acquire("node-1").is_some());
    }

    #[test]
    fn test_expired_lease_taken_over() {
        let locks = LockManager::new(StdDuration::from_secs(0));

        let stale = locks.acquire("node-1").unwrap();
        // TTL of zero expires immediately; the next acquire wins.
        let fresh = locks.acquire("node-1").unwrap();
        assert_ne!(stale.token, fresh.token);

        // The stale holder's release must not free the new lease.
        locks.release(&stale);
        assert!(locks.leases.lock().contains_key("node-1"));
    }

    #[test]
    fn test_clear_drops_any_holder() {
        let locks = LockManager::new(StdDuration::from_secs(60));

        locks.acquire("node-1").unwrap();
        locks.clear("node-1");
        assert!(!locks.is_held("node-1"));
        assert!(locks.acquire("node-1").is_some());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let locks = LockManager::new(StdDuration::from_secs(60));

        {
            let guard = locks.acquire_guard("node-1").unwrap();
            assert_eq!(guard.lease().node_id, "node-1");
            assert!(locks.is_held("node-1"));
        }
        assert!(!locks.is_held("node-1"));
    }

    #[test]
    fn test_guard_releases_on_panic() {
        use std::sync::Arc;

        let locks = Arc::new(LockManager::new(StdDuration::from_secs(60)));
        let inner = Arc::clone(&locks);
        let result = std::thread::spawn(move || {
            let _guard = inner.acquire_guard("node-1").unwrap();
            panic!("holder died");
        })
        .join();

        assert!(result.is_err());
        assert!(!locks.is_held("node-1"));
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        use std::sync::Arc;

        let locks = Arc::new(LockManager::new(StdDuration::from_secs(60)));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            handles.push(std::thread::spawn(move || locks.acquire("node-1").is_some()));
        }

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
