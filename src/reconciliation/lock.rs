//! Per-order mutual exclusion
//!
//! Every reconciliation or follow-up operation for an order runs inside the
//! order's lock. Different orders never contend.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Registry of per-order locks
#[derive(Clone, Default)]
pub struct OrderLocks {
    locks: Registry,
}

/// Exclusive hold on one order, released when dropped
pub struct OrderLockGuard {
    order_id: String,
    registry: Registry,
    lock: Arc<AsyncMutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `order_id`.
    ///
    /// Not reentrant: acquiring the same order twice from one task deadlocks.
    pub async fn acquire(&self, order_id: &str) -> OrderLockGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(order_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let mut guard = OrderLockGuard {
            order_id: order_id.to_string(),
            registry: self.locks.clone(),
            lock: lock.clone(),
            held: None,
        };
        guard.held = Some(lock.lock_owned().await);
        debug!(order_id = %order_id, "Order lock acquired");
        guard
    }

    /// Run `fut` while holding the lock for `order_id`.
    pub async fn with_order_lock<F, T>(&self, order_id: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire(order_id).await;
        fut.await
    }

    /// Number of orders with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OrderLockGuard {
    pub fn order_id(&self) -> &str {
        &self.order_id
    }
}

impl Drop for OrderLockGuard {
    fn drop(&mut self) {
        self.held.take();

        let mut locks = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        // Registry entry plus this guard: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            if let Some(existing) = locks.get(&self.order_id) {
                if Arc::ptr_eq(existing, &self.lock) {
                    locks.remove(&self.order_id);
                }
            }
        }
        debug!(order_id = %self.order_id, "Order lock released");
    }
}
