use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use taskward_application::{
    DispatchMode, DispatchScope, EntityRecordReader, LifecycleListener, RecordFieldFilter,
};
use taskward_core::{AppError, AppResult};
use taskward_domain::{LifecycleEvent, TodoItem, TodoList, TransitionKind};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Projection {
    counts: HashMap<Uuid, usize>,
    // lists touched by an in-transaction delivery; recounted from the store on read
    stale: HashSet<Uuid>,
}

/// In-memory projection of open item counts per list.
///
/// Post-commit deliveries adjust the counts directly. In-transaction
/// deliveries may still be rolled back, so they only mark the list stale and
/// the next [`ItemCountListener::count_for`] recounts it from committed rows.
/// The whole projection is rebuilt with [`ItemCountListener::rebuild`] when
/// the process starts.
#[derive(Clone)]
pub struct ItemCountListener {
    records: Arc<dyn EntityRecordReader>,
    projection: Arc<RwLock<Projection>>,
}

impl ItemCountListener {
    /// Creates an empty projection reading committed items from `records`.
    #[must_use]
    pub fn new(records: Arc<dyn EntityRecordReader>) -> Self {
        Self {
            records,
            projection: Arc::default(),
        }
    }

    /// Replaces the projection with counts read from persisted items.
    pub async fn rebuild(&self) -> AppResult<()> {
        let mut counts = HashMap::new();
        for record in self.records.list_records(TodoItem::ENTITY_TYPE, &[]).await? {
            let list_id = list_id_of(&record.data)?;
            *counts.entry(list_id).or_insert(0_usize) += 1;
        }

        *self.projection.write().await = Projection {
            counts,
            stale: HashSet::new(),
        };
        Ok(())
    }

    /// Returns the number of items currently held by a list.
    pub async fn count_for(&self, list_id: Uuid) -> AppResult<usize> {
        let mut projection = self.projection.write().await;
        if projection.stale.contains(&list_id) {
            let filters = [RecordFieldFilter::new("list_id", json!(list_id))];
            let count = self
                .records
                .list_records(TodoItem::ENTITY_TYPE, &filters)
                .await?
                .len();
            projection.stale.remove(&list_id);
            set_count(&mut projection.counts, list_id, count);
        }

        Ok(projection.counts.get(&list_id).copied().unwrap_or_default())
    }
}

fn set_count(counts: &mut HashMap<Uuid, usize>, list_id: Uuid, count: usize) {
    if count == 0 {
        counts.remove(&list_id);
    } else {
        counts.insert(list_id, count);
    }
}

fn list_id_of(data: &serde_json::Value) -> AppResult<Uuid> {
    data.get("list_id")
        .and_then(serde_json::Value::as_str)
        .and_then(|value| Uuid::parse_str(value).ok())
        .ok_or_else(|| AppError::Validation("item payload is missing a list_id".to_owned()))
}

fn affected_list(event: &LifecycleEvent) -> AppResult<Option<Uuid>> {
    match (event.entity_type(), event.transition()) {
        (TodoItem::ENTITY_TYPE, TransitionKind::Created | TransitionKind::Deleted) => {
            list_id_of(event.payload()).map(Some)
        }
        (TodoList::ENTITY_TYPE, TransitionKind::Deleted) => Uuid::parse_str(event.entity_id())
            .map(Some)
            .map_err(|error| {
                AppError::Validation(format!("invalid list id '{}': {error}", event.entity_id()))
            }),
        _ => Ok(None),
    }
}

#[async_trait]
impl LifecycleListener for ItemCountListener {
    fn name(&self) -> &str {
        "item-count"
    }

    async fn handle(&self, event: &LifecycleEvent, scope: &mut DispatchScope) -> AppResult<()> {
        let Some(list_id) = affected_list(event)? else {
            return Ok(());
        };
        let mut projection = self.projection.write().await;
        if scope.mode() == DispatchMode::InTransaction {
            projection.stale.insert(list_id);
            return Ok(());
        }
        if projection.stale.contains(&list_id) {
            return Ok(());
        }

        let current = projection.counts.get(&list_id).copied().unwrap_or_default();
        let next = match (event.entity_type(), event.transition()) {
            (TodoItem::ENTITY_TYPE, TransitionKind::Created) => current + 1,
            (TodoItem::ENTITY_TYPE, _) => current.saturating_sub(1),
            _ => 0,
        };
        set_count(&mut projection.counts, list_id, next);

        Ok(())
    }
}
