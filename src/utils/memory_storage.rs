//! In-memory storage implementation for testing

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::traits::*;
use crate::types::*;

/// In-memory storage implementation for testing and development
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Arc<RwLock<HashMap<ReconciliationKey, ReconciliationRecord>>>,
    unavailable: Arc<AtomicBool>,
    failing_writes: Arc<AtomicUsize>,
}

fn poisoned<T>(_: PoisonError<T>) -> ReconciliationError {
    ReconciliationError::UpstreamUnavailable("memory storage lock poisoned".to_string())
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        if let Ok(mut records) = self.records.write() {
            records.clear();
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every call fail with `UpstreamUnavailable` until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` writes fail with `UpstreamUnavailable`
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> ReconciliationResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReconciliationError::UpstreamUnavailable(
                "memory storage offline".to_string(),
            ));
        }
        Ok(())
    }

    fn check_write(&self) -> ReconciliationResult<()> {
        self.check_available()?;
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ReconciliationError::UpstreamUnavailable(
                "memory storage write failed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ReconciliationStorage for MemoryStorage {
    async fn get(&self, key: &ReconciliationKey) -> ReconciliationResult<Option<ReconciliationRecord>> {
        self.check_available()?;
        Ok(self.records.read().map_err(poisoned)?.get(key).cloned())
    }

    async fn insert(
        &self,
        record: &ReconciliationRecord,
    ) -> ReconciliationResult<ReconciliationRecord> {
        self.check_write()?;
        let key = record.key();
        let mut records = self.records.write().map_err(poisoned)?;

        if let Some(existing) = records.get(&key) {
            return Err(ReconciliationError::Conflict {
                key,
                expected: 0,
                found: Some(existing.version),
            });
        }

        let mut stored = record.clone();
        stored.version = 1;
        records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn put(
        &self,
        record: &ReconciliationRecord,
        expected_version: u64,
    ) -> ReconciliationResult<ReconciliationRecord> {
        self.check_write()?;
        let key = record.key();
        let mut records = self.records.write().map_err(poisoned)?;

        let found = records.get(&key).map(|existing| existing.version);
        if found != Some(expected_version) {
            return Err(ReconciliationError::Conflict {
                key,
                expected: expected_version,
                found,
            });
        }

        let mut stored = record.clone();
        stored.version = expected_version + 1;
        records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_by_date(&self, date: NaiveDate) -> ReconciliationResult<Vec<ReconciliationRecord>> {
        self.check_available()?;
        let records = self.records.read().map_err(poisoned)?;
        let mut filtered: Vec<ReconciliationRecord> = records
            .values()
            .filter(|record| record.date == date)
            .cloned()
            .collect();
        filtered.sort_by(|a, b| a.company_id.cmp(&b.company_id));
        Ok(filtered)
    }
}
