use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use taskward_core::{AppError, AppResult};
use taskward_domain::{Entity, PriorityLevel, TodoItem, TodoList, TransitionKind};
use uuid::Uuid;

use crate::persistence_ports::{EntityRecord, EntityRecordReader, RecordFieldFilter};
use crate::unit_of_work::{CommitReport, UnitOfWorkFactory};


/// Input payload for item create operations.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTodoItemInput {
    /// Owning list.
    pub list_id: Uuid,
    /// Item title.
    pub title: String,
    /// Optional note.
    pub note: Option<String>,
    /// Item priority.
    pub priority: PriorityLevel,
    /// Optional reminder.
    pub reminder: Option<DateTime<Utc>>,
}

/// Input payload for item update operations; every field is replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateTodoItemInput {
    /// Item title.
    pub title: String,
    /// Optional note.
    pub note: Option<String>,
    /// Item priority.
    pub priority: PriorityLevel,
    /// Optional reminder.
    pub reminder: Option<DateTime<Utc>>,
}

/// Application service for to-do lists and items.
///
/// Every mutation runs in its own unit of work and raises the matching
/// lifecycle event; the acting user comes from the configured provider.
#[derive(Clone)]
pub struct TodoService {
    units: UnitOfWorkFactory,
    records: Arc<dyn EntityRecordReader>,
}

impl TodoService {
    /// Creates a service from a unit of work factory and a record reader.
    #[must_use]
    pub fn new(units: UnitOfWorkFactory, records: Arc<dyn EntityRecordReader>) -> Self {
        Self { units, records }
    }

    /// Creates a list.
    pub async fn create_list(&self, title: &str, colour_code: &str) -> AppResult<TodoList> {
        let list = TodoList::new(title, colour_code)?;
        let list_id = list.entity_id();

        let mut unit = self.units.begin();
        unit.raise(&list, TransitionKind::Created)?;
        unit.track_added(list);
        let report = unit.commit().await?;

        restore_list(&report, list_id.as_str())
    }

    /// Renames a list.
    pub async fn rename_list(&self, list_id: Uuid, title: &str) -> AppResult<TodoList> {
        let mut list = self.require_list(list_id).await?;
        list.rename(title)?;

        let mut unit = self.units.begin();
        unit.raise(&list, TransitionKind::Updated)?;
        unit.track_modified(list);
        let report = unit.commit().await?;

        restore_list(&report, list_id.to_string().as_str())
    }

    /// Deletes a list together with its items.
    pub async fn delete_list(&self, list_id: Uuid) -> AppResult<()> {
        let list = self.require_list(list_id).await?;
        let items = self.list_items(list_id).await?;

        let mut unit = self.units.begin();
        for item in items {
            unit.raise(&item, TransitionKind::Deleted)?;
            unit.track_deleted(item);
        }
        unit.raise(&list, TransitionKind::Deleted)?;
        unit.track_deleted(list);
        unit.commit().await?;

        Ok(())
    }

    /// Returns a list by identifier.
    pub async fn find_list(&self, list_id: Uuid) -> AppResult<Option<TodoList>> {
        self.records
            .find_record(TodoList::ENTITY_TYPE, list_id.to_string().as_str())
            .await?
            .map(|record| TodoList::restore(record.data, record.audit))
            .transpose()
    }

    /// Returns every list ordered by identifier.
    pub async fn list_lists(&self) -> AppResult<Vec<TodoList>> {
        self.records
            .list_records(TodoList::ENTITY_TYPE, &[])
            .await?
            .into_iter()
            .map(|record| TodoList::restore(record.data, record.audit))
            .collect()
    }

    /// Creates an item in an existing list.
    pub async fn create_item(&self, input: CreateTodoItemInput) -> AppResult<TodoItem> {
        self.require_list(input.list_id).await?;

        let mut item = TodoItem::new(input.list_id, input.title)?;
        item.set_note(input.note);
        item.set_priority(input.priority);
        item.set_reminder(input.reminder);
        let item_id = item.entity_id();

        let mut unit = self.units.begin();
        unit.raise(&item, TransitionKind::Created)?;
        unit.track_added(item);
        let report = unit.commit().await?;

        restore_item(&report, item_id.as_str())
    }

    /// Replaces the editable fields of an item.
    pub async fn update_item(
        &self,
        item_id: Uuid,
        input: UpdateTodoItemInput,
    ) -> AppResult<TodoItem> {
        let mut item = self.require_item(item_id).await?;
        item.rename(input.title)?;
        item.set_note(input.note);
        item.set_priority(input.priority);
        item.set_reminder(input.reminder);

        let mut unit = self.units.begin();
        unit.raise(&item, TransitionKind::Updated)?;
        unit.track_modified(item);
        let report = unit.commit().await?;

        restore_item(&report, item_id.to_string().as_str())
    }

    /// Marks an item as done; completing a done item changes nothing.
    pub async fn complete_item(&self, item_id: Uuid) -> AppResult<TodoItem> {
        let mut item = self.require_item(item_id).await?;
        if !item.complete() {
            return Ok(item);
        }

        let mut unit = self.units.begin();
        unit.raise(&item, TransitionKind::Updated)?;
        unit.track_modified(item);
        let report = unit.commit().await?;

        restore_item(&report, item_id.to_string().as_str())
    }

    /// Deletes an item.
    pub async fn delete_item(&self, item_id: Uuid) -> AppResult<()> {
        let item = self.require_item(item_id).await?;

        let mut unit = self.units.begin();
        unit.raise(&item, TransitionKind::Deleted)?;
        unit.track_deleted(item);
        unit.commit().await?;

        Ok(())
    }

    /// Returns an item by identifier.
    pub async fn find_item(&self, item_id: Uuid) -> AppResult<Option<TodoItem>> {
        self.records
            .find_record(TodoItem::ENTITY_TYPE, item_id.to_string().as_str())
            .await?
            .map(|record| TodoItem::restore(record.data, record.audit))
            .transpose()
    }

    /// Returns the items of a list ordered by identifier.
    pub async fn list_items(&self, list_id: Uuid) -> AppResult<Vec<TodoItem>> {
        let filters = [RecordFieldFilter::new("list_id", json!(list_id))];
        self.records
            .list_records(TodoItem::ENTITY_TYPE, &filters)
            .await?
            .into_iter()
            .map(|record| TodoItem::restore(record.data, record.audit))
            .collect()
    }

    async fn require_list(&self, list_id: Uuid) -> AppResult<TodoList> {
        self.find_list(list_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("todo list '{list_id}' does not exist")))
    }

    async fn require_item(&self, item_id: Uuid) -> AppResult<TodoItem> {
        self.find_item(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("todo item '{item_id}' does not exist")))
    }
}

fn committed_record<'a>(
    report: &'a CommitReport,
    entity_type: &str,
    entity_id: &str,
) -> AppResult<&'a EntityRecord> {
    report.record(entity_type, entity_id).ok_or_else(|| {
        AppError::Internal(format!(
            "unit of work '{}' did not write '{entity_type}' '{entity_id}'",
            report.unit_id
        ))
    })
}

fn restore_list(report: &CommitReport, list_id: &str) -> AppResult<TodoList> {
    let record = committed_record(report, TodoList::ENTITY_TYPE, list_id)?;
    TodoList::restore(record.data.clone(), record.audit.clone())
}

fn restore_item(report: &CommitReport, item_id: &str) -> AppResult<TodoItem> {
    let record = committed_record(report, TodoItem::ENTITY_TYPE, item_id)?;
    TodoItem::restore(record.data.clone(), record.audit.clone())
}
