//! Per-record serialization of mutations

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::*;

/// Entries with no holder are pruned once the registry grows past this size
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of async mutexes, one per reconciliation key
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    inner: Arc<Mutex<HashMap<ReconciliationKey, Arc<AsyncMutex<()>>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Access is released when the
    /// guard is dropped.
    pub async fn acquire(&self, key: &ReconciliationKey) -> ReconciliationResult<OwnedMutexGuard<()>> {
        let mutex = {
            let mut map = self.inner.lock().map_err(|_| {
                ReconciliationError::UpstreamUnavailable("key lock registry poisoned".to_string())
            })?;

            if map.len() > PRUNE_THRESHOLD {
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }

            map.entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        Ok(mutex.lock_owned().await)
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyLocks::new();
        let key = ReconciliationKey::new("acme", NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());

        let guard = locks.acquire(&key).await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(20), locks.acquire(&key)).await;
        assert!(second.is_err());

        drop(guard);
        assert!(locks.acquire(&key).await.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyLocks::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let _a = locks.acquire(&ReconciliationKey::new("a", date)).await.unwrap();
        let b = tokio::time::timeout(
            Duration::from_millis(20),
            locks.acquire(&ReconciliationKey::new("b", date)),
        )
        .await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
