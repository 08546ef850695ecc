use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use taskward_application::{
    EntityRecord, EntityRecordReader, PersistenceTransaction, RecordFieldFilter, TrackedEntry,
    TransactionManager,
};
use taskward_core::{AppError, AppResult, UserId};
use taskward_domain::{AuditMetadata, TrackedState};


/// PostgreSQL-backed entity store.
///
/// Each unit of work commits through one database transaction; dropping the
/// transaction without committing rolls it back.
#[derive(Clone)]
pub struct PostgresEntityStore {
    pool: PgPool,
}

impl PostgresEntityStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct EntityRecordRow {
    entity_type: String,
    entity_id: String,
    data: Value,
    created_by: Option<String>,
    created_at: Option<DateTime<Utc>>,
    last_modified_by: Option<String>,
    last_modified_at: Option<DateTime<Utc>>,
}

impl EntityRecordRow {
    fn into_record(self) -> AppResult<EntityRecord> {
        let audit = match (self.created_by, self.created_at) {
            (Some(created_by), Some(created_at)) => AuditMetadata::restored(
                UserId::new(created_by)?,
                created_at,
                self.last_modified_by.map(UserId::new).transpose()?,
                self.last_modified_at,
            ),
            _ => AuditMetadata::unstamped(),
        };

        Ok(EntityRecord {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            data: self.data,
            audit,
        })
    }
}

struct PostgresTransaction {
    transaction: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn insert(&mut self, record: &EntityRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO entity_records (
                entity_type,
                entity_id,
                data,
                created_by,
                created_at,
                last_modified_by,
                last_modified_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (entity_type, entity_id) DO NOTHING
            "#,
        )
        .bind(record.entity_type.as_str())
        .bind(record.entity_id.as_str())
        .bind(&record.data)
        .bind(record.audit.created_by().map(UserId::as_str))
        .bind(record.audit.created_at())
        .bind(record.audit.last_modified_by().map(UserId::as_str))
        .bind(record.audit.last_modified_at())
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to insert entity record: {error}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "record '{}' of type '{}' already exists",
                record.entity_id, record.entity_type
            )));
        }

        Ok(())
    }

    async fn update(&mut self, record: &EntityRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE entity_records
            SET data = $3,
                last_modified_by = $4,
                last_modified_at = $5
            WHERE entity_type = $1
                AND entity_id = $2
            "#,
        )
        .bind(record.entity_type.as_str())
        .bind(record.entity_id.as_str())
        .bind(&record.data)
        .bind(record.audit.last_modified_by().map(UserId::as_str))
        .bind(record.audit.last_modified_at())
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to update entity record: {error}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "record '{}' of type '{}' does not exist",
                record.entity_id, record.entity_type
            )));
        }

        Ok(())
    }

    async fn delete(&mut self, record: &EntityRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM entity_records
            WHERE entity_type = $1
                AND entity_id = $2
            "#,
        )
        .bind(record.entity_type.as_str())
        .bind(record.entity_id.as_str())
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to delete entity record: {error}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "record '{}' of type '{}' does not exist",
                record.entity_id, record.entity_type
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl PersistenceTransaction for PostgresTransaction {
    async fn write(&mut self, entries: &[TrackedEntry]) -> AppResult<()> {
        for entry in entries {
            let record = entry.to_record();
            match entry.state() {
                TrackedState::Added => self.insert(&record).await?,
                TrackedState::Modified => self.update(&record).await?,
                TrackedState::Deleted => self.delete(&record).await?,
                TrackedState::Unchanged => {}
            }
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit entity transaction: {error}"))
        })
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.transaction.rollback().await.map_err(|error| {
            AppError::Internal(format!("failed to roll back entity transaction: {error}"))
        })
    }
}

#[async_trait]
impl TransactionManager for PostgresEntityStore {
    async fn begin(&self) -> AppResult<Box<dyn PersistenceTransaction>> {
        let transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start entity transaction: {error}"))
        })?;

        Ok(Box::new(PostgresTransaction { transaction }))
    }
}

#[async_trait]
impl EntityRecordReader for PostgresEntityStore {
    async fn find_record(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> AppResult<Option<EntityRecord>> {
        let row = sqlx::query_as::<_, EntityRecordRow>(
            r#"
            SELECT
                entity_type,
                entity_id,
                data,
                created_by,
                created_at,
                last_modified_by,
                last_modified_at
            FROM entity_records
            WHERE entity_type = $1
                AND entity_id = $2
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find entity record: {error}")))?;

        row.map(EntityRecordRow::into_record).transpose()
    }

    async fn list_records(
        &self,
        entity_type: &str,
        filters: &[RecordFieldFilter],
    ) -> AppResult<Vec<EntityRecord>> {
        // scalar filter values only; jsonb containment is partial for nested values
        let containment: Map<String, Value> = filters
            .iter()
            .map(|filter| (filter.field_name.clone(), filter.field_value.clone()))
            .collect();

        let rows = sqlx::query_as::<_, EntityRecordRow>(
            r#"
            SELECT
                entity_type,
                entity_id,
                data,
                created_by,
                created_at,
                last_modified_by,
                last_modified_at
            FROM entity_records
            WHERE entity_type = $1
                AND data @> $2
            ORDER BY entity_id
            "#,
        )
        .bind(entity_type)
        .bind(Value::Object(containment))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list entity records: {error}")))?;

        rows.into_iter().map(EntityRecordRow::into_record).collect()
    }
}
