//! Live capability connections keyed by (user, service).
//!
//! Shared across concurrently running tasks. Each key owns a `OnceCell`, so
//! establishment is single-flight per key while the map lock is only held
//! for the lookup itself. A failed establishment leaves the cell empty and
//! the next caller tries again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use taskpilot_core::CapabilityConnection;
use taskpilot_core::error::ConnectionError;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

type Key = (String, String);
type Slot = Arc<OnceCell<Arc<dyn CapabilityConnection>>>;

#[derive(Default)]
pub struct ConnectionPool {
    slots: Mutex<HashMap<Key, Slot>>,
}

fn key(user: &str, service: &str) -> Key {
    (user.to_string(), service.to_lowercase())
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pooled connection, establishing it with `connect` if absent.
    pub async fn get_or_connect<F, Fut>(
        &self,
        user: &str,
        service: &str,
        connect: F,
    ) -> Result<Arc<dyn CapabilityConnection>, ConnectionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn CapabilityConnection>, ConnectionError>>,
    {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(key(user, service)).or_default().clone()
        };

        let connection = slot
            .get_or_try_init(|| async move {
                debug!(user, service, "Establishing pooled connection");
                connect().await
            })
            .await?;
        Ok(connection.clone())
    }

    /// The pooled connection, if one is established.
    pub async fn get(&self, user: &str, service: &str) -> Option<Arc<dyn CapabilityConnection>> {
        let slots = self.slots.lock().await;
        slots.get(&key(user, service)).and_then(|s| s.get().cloned())
    }

    /// Drop a connection so the next request re-establishes it.
    pub async fn evict(&self, user: &str, service: &str) -> bool {
        self.slots.lock().await.remove(&key(user, service)).is_some()
    }

    /// Number of established connections.
    pub async fn len(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|s| s.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn connection(service: &str) -> Arc<dyn CapabilityConnection> {
        Arc::new(MockConnection::new(service, vec![]))
    }

    #[tokio::test]
    async fn concurrent_requests_connect_once() {
        let pool = Arc::new(ConnectionPool::new());
        let connects = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let connects = connects.clone();
            handles.push(tokio::spawn(async move {
                pool.get_or_connect("alice", "slack", || async move {
                    connects.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(connection("slack"))
                })
                .await
                .map(|c| c.service().to_string())
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "slack");
        }
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn keys_are_per_user_and_case_insensitive_service() {
        let pool = ConnectionPool::new();
        pool.get_or_connect("alice", "Slack", || async { Ok(connection("slack")) })
            .await
            .unwrap();
        assert!(pool.get("alice", "slack").await.is_some());
        assert!(pool.get("bob", "slack").await.is_none());

        pool.get_or_connect("bob", "slack", || async { Ok(connection("slack")) })
            .await
            .unwrap();
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn failed_connect_is_retried_next_time() {
        let pool = ConnectionPool::new();
        let err = pool
            .get_or_connect("alice", "slack", || async {
                Err(ConnectionError::EstablishFailed {
                    service: "slack".into(),
                    reason: "refused".into(),
                })
            })
            .await;
        assert!(err.is_err());
        assert!(pool.is_empty().await);

        pool.get_or_connect("alice", "slack", || async { Ok(connection("slack")) })
            .await
            .unwrap();
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn evict_forces_reconnect() {
        let pool = ConnectionPool::new();
        pool.get_or_connect("alice", "slack", || async { Ok(connection("slack")) })
            .await
            .unwrap();
        assert!(pool.evict("alice", "SLACK").await);
        assert!(pool.get("alice", "slack").await.is_none());
    }
}
