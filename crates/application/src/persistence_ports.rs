use async_trait::async_trait;
use serde_json::Value;
use taskward_core::AppResult;
use taskward_domain::{AuditMetadata, Entity, TrackedState};

/// Entity tracked by a unit of work together with its change classification.
#[derive(Debug)]
pub struct TrackedEntry {
    entity: Box<dyn Entity>,
    state: TrackedState,
}

impl TrackedEntry {
    /// Creates a tracked entry.
    #[must_use]
    pub fn new(entity: Box<dyn Entity>, state: TrackedState) -> Self {
        Self { entity, state }
    }

    /// Returns the tracked entity.
    #[must_use]
    pub fn entity(&self) -> &dyn Entity {
        self.entity.as_ref()
    }

    /// Returns the tracked entity for in-place mutation.
    pub fn entity_mut(&mut self) -> &mut dyn Entity {
        self.entity.as_mut()
    }

    /// Returns the change classification.
    #[must_use]
    pub fn state(&self) -> TrackedState {
        self.state
    }

    /// Returns whether this entry refers to the same stored row as `other`.
    #[must_use]
    pub fn same_row(&self, other: &dyn Entity) -> bool {
        self.entity.entity_type() == other.entity_type()
            && self.entity.entity_id() == other.entity_id()
    }

    pub(crate) fn replace(&mut self, entity: Box<dyn Entity>, state: TrackedState) {
        self.entity = entity;
        self.state = state;
    }

    /// Returns the persisted form of the tracked entity.
    #[must_use]
    pub fn to_record(&self) -> EntityRecord {
        EntityRecord::from_entity(self.entity.as_ref())
    }
}

/// Storage-neutral row for one persisted entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Entity type label.
    pub entity_type: String,
    /// Entity identifier within the type.
    pub entity_id: String,
    /// Business state snapshot.
    pub data: Value,
    /// Provenance columns; unstamped for non-auditable types.
    pub audit: AuditMetadata,
}

impl EntityRecord {
    /// Captures the current persisted form of an entity.
    #[must_use]
    pub fn from_entity(entity: &dyn Entity) -> Self {
        Self {
            entity_type: entity.entity_type().to_owned(),
            entity_id: entity.entity_id(),
            data: entity.snapshot(),
            audit: entity.audit_metadata().cloned().unwrap_or_default(),
        }
    }
}

/// Exact-match filter on a top-level field of the record data.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFieldFilter {
    /// Field name inside the record data object.
    pub field_name: String,
    /// Expected field value (exact JSON equality).
    pub field_value: Value,
}

impl RecordFieldFilter {
    /// Creates a filter.
    #[must_use]
    pub fn new(field_name: impl Into<String>, field_value: Value) -> Self {
        Self {
            field_name: field_name.into(),
            field_value,
        }
    }

    /// Returns whether a record matches the filter.
    #[must_use]
    pub fn matches(&self, record: &EntityRecord) -> bool {
        record
            .data
            .as_object()
            .and_then(|data| data.get(self.field_name.as_str()))
            .map(|value| value == &self.field_value)
            .unwrap_or(false)
    }
}

/// One open persistence transaction.
///
/// Dropping a transaction without calling [`PersistenceTransaction::commit`]
/// must discard every write made through it.
#[async_trait]
pub trait PersistenceTransaction: Send {
    /// Writes tracked entries inside the transaction.
    async fn write(&mut self, entries: &[TrackedEntry]) -> AppResult<()>;

    /// Physically commits the transaction.
    async fn commit(self: Box<Self>) -> AppResult<()>;

    /// Rolls the transaction back.
    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

/// Port for opening persistence transactions.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Opens a new transaction.
    async fn begin(&self) -> AppResult<Box<dyn PersistenceTransaction>>;
}

/// Read port for persisted entity records.
#[async_trait]
pub trait EntityRecordReader: Send + Sync {
    /// Looks up a single record.
    async fn find_record(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> AppResult<Option<EntityRecord>>;

    /// Lists records of a type matching every filter, ordered by identifier.
    async fn list_records(
        &self,
        entity_type: &str,
        filters: &[RecordFieldFilter],
    ) -> AppResult<Vec<EntityRecord>>;
}
