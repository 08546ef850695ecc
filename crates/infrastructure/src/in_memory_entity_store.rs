use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use taskward_application::{
    EntityRecord, EntityRecordReader, PersistenceTransaction, RecordFieldFilter, TrackedEntry,
    TransactionManager,
};
use taskward_core::{AppError, AppResult};
use taskward_domain::TrackedState;
use tokio::sync::RwLock;


type RecordKey = (String, String);

/// In-memory entity store implementation.
///
/// Transactions stage their writes and apply them under one write lock on
/// commit; a dropped or rolled back transaction leaves the store unchanged.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEntityStore {
    records: Arc<RwLock<BTreeMap<RecordKey, EntityRecord>>>,
}

impl InMemoryEntityStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[derive(Debug)]
struct InMemoryTransaction {
    records: Arc<RwLock<BTreeMap<RecordKey, EntityRecord>>>,
    staged: Vec<(TrackedState, EntityRecord)>,
}

fn record_key(record: &EntityRecord) -> RecordKey {
    (record.entity_type.clone(), record.entity_id.clone())
}

#[async_trait]
impl PersistenceTransaction for InMemoryTransaction {
    async fn write(&mut self, entries: &[TrackedEntry]) -> AppResult<()> {
        self.staged.extend(
            entries
                .iter()
                .filter(|entry| entry.state().is_pending_write())
                .map(|entry| (entry.state(), entry.to_record())),
        );
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let InMemoryTransaction { records, staged } = *self;
        let mut records = records.write().await;
        let mut next = records.clone();

        for (state, mut record) in staged {
            let key = record_key(&record);
            let stored = next.get(&key);
            let exists = stored.is_some();
            if let (TrackedState::Modified, Some(stored)) = (state, stored) {
                record.audit.keep_creation_from(&stored.audit);
            }
            match state {
                TrackedState::Added if exists => {
                    return Err(AppError::Conflict(format!(
                        "record '{}' of type '{}' already exists",
                        key.1, key.0
                    )));
                }
                TrackedState::Modified | TrackedState::Deleted if !exists => {
                    return Err(AppError::NotFound(format!(
                        "record '{}' of type '{}' does not exist",
                        key.1, key.0
                    )));
                }
                TrackedState::Deleted => {
                    next.remove(&key);
                }
                _ => {
                    next.insert(key, record);
                }
            }
        }

        *records = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for InMemoryEntityStore {
    async fn begin(&self) -> AppResult<Box<dyn PersistenceTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            records: Arc::clone(&self.records),
            staged: Vec::new(),
        }))
    }
}

#[async_trait]
impl EntityRecordReader for InMemoryEntityStore {
    async fn find_record(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> AppResult<Option<EntityRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(&(entity_type.to_owned(), entity_id.to_owned()))
            .cloned())
    }

    async fn list_records(
        &self,
        entity_type: &str,
        filters: &[RecordFieldFilter],
    ) -> AppResult<Vec<EntityRecord>> {
        let records = self.records.read().await;

        Ok(records
            .values()
            .filter(|record| record.entity_type == entity_type)
            .filter(|record| filters.iter().all(|filter| filter.matches(record)))
            .cloned()
            .collect())
    }
}
