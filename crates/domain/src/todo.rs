use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use taskward_core::{AppError, AppResult, NonEmptyString};
use uuid::Uuid;

use crate::audit::{AuditMetadata, Entity};

const SUPPORTED_COLOURS: &[(&str, &str)] = &[
    ("#FFFFFF", "White"),
    ("#FF5733", "Red"),
    ("#FFC300", "Orange"),
    ("#FFFF66", "Yellow"),
    ("#CCFF99", "Green"),
    ("#6666FF", "Blue"),
    ("#9966CC", "Purple"),
    ("#999999", "Grey"),
];

/// Display colour of a to-do list, restricted to a fixed palette.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct Colour(&'static str);

impl Colour {
    /// Parses a hex colour code from the supported palette.
    pub fn from_code(code: &str) -> AppResult<Self> {
        let normalized = code.trim().to_ascii_uppercase();
        SUPPORTED_COLOURS
            .iter()
            .find(|(candidate, _)| *candidate == normalized)
            .map(|(candidate, _)| Self(*candidate))
            .ok_or_else(|| AppError::Validation(format!("colour '{code}' is not supported")))
    }

    /// Returns the default list colour.
    #[must_use]
    pub fn white() -> Self {
        Self("#FFFFFF")
    }

    /// Returns the hex colour code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.0
    }

    /// Returns the palette name for the colour.
    #[must_use]
    pub fn name(&self) -> &'static str {
        SUPPORTED_COLOURS
            .iter()
            .find(|(candidate, _)| *candidate == self.0)
            .map(|(_, name)| *name)
            .unwrap_or("Unknown")
    }

    /// Returns every supported colour.
    #[must_use]
    pub fn supported() -> Vec<Self> {
        SUPPORTED_COLOURS
            .iter()
            .map(|(code, _)| Self(*code))
            .collect()
    }
}

impl TryFrom<String> for Colour {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_code(value.as_str())
    }
}

impl<'de> Deserialize<'de> for Colour {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = String::deserialize(deserializer)?;
        Self::from_code(code.as_str()).map_err(serde::de::Error::custom)
    }
}

impl From<Colour> for String {
    fn from(value: Colour) -> Self {
        value.0.to_owned()
    }
}

/// Priority of a to-do item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    /// No priority assigned.
    #[default]
    None,
    /// Low priority.
    Low,
    /// Medium priority.
    Medium,
    /// High priority.
    High,
}

/// A named list grouping to-do items.
#[derive(Debug, Clone, PartialEq)]
pub struct TodoList {
    id: Uuid,
    title: NonEmptyString,
    colour: Colour,
    audit: AuditMetadata,
}

#[derive(Deserialize)]
struct TodoListState {
    id: Uuid,
    title: NonEmptyString,
    colour: Colour,
}

impl TodoList {
    /// Entity type label for lists.
    pub const ENTITY_TYPE: &'static str = "todo_list";

    /// Creates a new, not yet persisted list.
    pub fn new(title: impl Into<String>, colour_code: &str) -> AppResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            title: NonEmptyString::new(title)?,
            colour: Colour::from_code(colour_code)?,
            audit: AuditMetadata::unstamped(),
        })
    }

    /// Rebuilds a list from a persisted snapshot and its audit columns.
    pub fn restore(data: Value, audit: AuditMetadata) -> AppResult<Self> {
        let state: TodoListState = serde_json::from_value(data).map_err(|error| {
            AppError::Internal(format!("failed to decode persisted todo list: {error}"))
        })?;

        Ok(Self {
            id: state.id,
            title: state.title,
            colour: state.colour,
            audit,
        })
    }

    /// Returns the list identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the list title.
    #[must_use]
    pub fn title(&self) -> &NonEmptyString {
        &self.title
    }

    /// Returns the list colour.
    #[must_use]
    pub fn colour(&self) -> &Colour {
        &self.colour
    }

    /// Returns the list provenance.
    #[must_use]
    pub fn audit(&self) -> &AuditMetadata {
        &self.audit
    }

    /// Renames the list.
    pub fn rename(&mut self, title: impl Into<String>) -> AppResult<()> {
        self.title = NonEmptyString::new(title)?;
        Ok(())
    }

    /// Changes the list colour.
    pub fn recolour(&mut self, colour_code: &str) -> AppResult<()> {
        self.colour = Colour::from_code(colour_code)?;
        Ok(())
    }
}

impl Entity for TodoList {
    fn entity_type(&self) -> &'static str {
        Self::ENTITY_TYPE
    }

    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn snapshot(&self) -> Value {
        json!({
            "id": self.id,
            "title": self.title.as_str(),
            "colour": self.colour.code(),
        })
    }

    fn audit_metadata(&self) -> Option<&AuditMetadata> {
        Some(&self.audit)
    }

    fn audit_metadata_mut(&mut self) -> Option<&mut AuditMetadata> {
        Some(&mut self.audit)
    }
}

/// A single to-do entry belonging to a list.
#[derive(Debug, Clone, PartialEq)]
pub struct TodoItem {
    id: Uuid,
    list_id: Uuid,
    title: NonEmptyString,
    note: Option<String>,
    priority: PriorityLevel,
    reminder: Option<DateTime<Utc>>,
    done: bool,
    audit: AuditMetadata,
}

#[derive(Deserialize)]
struct TodoItemState {
    id: Uuid,
    list_id: Uuid,
    title: NonEmptyString,
    note: Option<String>,
    #[serde(default)]
    priority: PriorityLevel,
    reminder: Option<DateTime<Utc>>,
    #[serde(default)]
    done: bool,
}

impl TodoItem {
    /// Entity type label for items.
    pub const ENTITY_TYPE: &'static str = "todo_item";

    /// Creates a new, not yet persisted item in a list.
    pub fn new(list_id: Uuid, title: impl Into<String>) -> AppResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            list_id,
            title: NonEmptyString::new(title)?,
            note: None,
            priority: PriorityLevel::None,
            reminder: None,
            done: false,
            audit: AuditMetadata::unstamped(),
        })
    }

    /// Rebuilds an item from a persisted snapshot and its audit columns.
    pub fn restore(data: Value, audit: AuditMetadata) -> AppResult<Self> {
        let state: TodoItemState = serde_json::from_value(data).map_err(|error| {
            AppError::Internal(format!("failed to decode persisted todo item: {error}"))
        })?;

        Ok(Self {
            id: state.id,
            list_id: state.list_id,
            title: state.title,
            note: state.note,
            priority: state.priority,
            reminder: state.reminder,
            done: state.done,
            audit,
        })
    }

    /// Returns the item identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the owning list identifier.
    #[must_use]
    pub fn list_id(&self) -> Uuid {
        self.list_id
    }

    /// Returns the item title.
    #[must_use]
    pub fn title(&self) -> &NonEmptyString {
        &self.title
    }

    /// Returns the optional free-form note.
    #[must_use]
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Returns the item priority.
    #[must_use]
    pub fn priority(&self) -> PriorityLevel {
        self.priority
    }

    /// Returns the optional reminder instant.
    #[must_use]
    pub fn reminder(&self) -> Option<DateTime<Utc>> {
        self.reminder
    }

    /// Returns whether the item is done.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the item provenance.
    #[must_use]
    pub fn audit(&self) -> &AuditMetadata {
        &self.audit
    }

    /// Renames the item.
    pub fn rename(&mut self, title: impl Into<String>) -> AppResult<()> {
        self.title = NonEmptyString::new(title)?;
        Ok(())
    }

    /// Replaces the note; blank notes are cleared.
    pub fn set_note(&mut self, note: Option<String>) {
        self.note = note.filter(|value| !value.trim().is_empty());
    }

    /// Sets the priority.
    pub fn set_priority(&mut self, priority: PriorityLevel) {
        self.priority = priority;
    }

    /// Sets or clears the reminder.
    pub fn set_reminder(&mut self, reminder: Option<DateTime<Utc>>) {
        self.reminder = reminder;
    }

    /// Marks the item as done and returns whether the state changed.
    pub fn complete(&mut self) -> bool {
        if self.done {
            return false;
        }

        self.done = true;
        true
    }
}

impl Entity for TodoItem {
    fn entity_type(&self) -> &'static str {
        Self::ENTITY_TYPE
    }

    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn snapshot(&self) -> Value {
        json!({
            "id": self.id,
            "list_id": self.list_id,
            "title": self.title.as_str(),
            "note": self.note,
            "priority": self.priority,
            "reminder": self.reminder,
            "done": self.done,
        })
    }

    fn audit_metadata(&self) -> Option<&AuditMetadata> {
        Some(&self.audit)
    }

    fn audit_metadata_mut(&mut self) -> Option<&mut AuditMetadata> {
        Some(&mut self.audit)
    }
}
