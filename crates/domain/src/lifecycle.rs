use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskward_core::{AppError, AppResult, NonEmptyString};
use uuid::Uuid;

use crate::audit::{Entity, TrackedState};

/// Lifecycle transition reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// The entity was created.
    Created,
    /// The entity was updated.
    Updated,
    /// The entity was deleted.
    Deleted,
}

impl TransitionKind {
    /// Returns a stable storage value for the transition.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    /// Maps a tracked persistence state to the transition it represents.
    #[must_use]
    pub fn from_tracked_state(state: TrackedState) -> Option<Self> {
        match state {
            TrackedState::Added => Some(Self::Created),
            TrackedState::Modified => Some(Self::Updated),
            TrackedState::Deleted => Some(Self::Deleted),
            TrackedState::Unchanged => None,
        }
    }
}

impl FromStr for TransitionKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            _ => Err(AppError::Validation(format!(
                "unknown transition kind '{value}'"
            ))),
        }
    }
}

/// Immutable record of one entity state transition.
///
/// The payload is owned by the event, so mutating the entity after the event
/// was queued does not change what listeners observe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    event_id: Uuid,
    entity_type: NonEmptyString,
    entity_id: NonEmptyString,
    transition: TransitionKind,
    payload: Value,
    raised_at: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Creates a validated lifecycle event.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        transition: TransitionKind,
        payload: Value,
        raised_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            entity_type: NonEmptyString::new(entity_type)?,
            entity_id: NonEmptyString::new(entity_id)?,
            transition,
            payload,
            raised_at,
        })
    }

    /// Creates an event carrying the current snapshot of an entity.
    pub fn for_entity(
        entity: &dyn Entity,
        transition: TransitionKind,
        raised_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        Self::new(
            entity.entity_type(),
            entity.entity_id(),
            transition,
            entity.snapshot(),
            raised_at,
        )
    }

    /// Returns the unique event identifier.
    #[must_use]
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Returns the entity type label.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.entity_type.as_str()
    }

    /// Returns the entity identifier.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        self.entity_id.as_str()
    }

    /// Returns the transition kind.
    #[must_use]
    pub fn transition(&self) -> TransitionKind {
        self.transition
    }

    /// Returns the event payload.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns when the event was raised.
    #[must_use]
    pub fn raised_at(&self) -> DateTime<Utc> {
        self.raised_at
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::{LifecycleEvent, TransitionKind};
    use crate::TodoList;

    #[test]
    fn event_payload_is_detached_from_entity() {
        let Ok(mut list) = TodoList::new("Groceries", "#FFFFFF") else {
            panic!("list should be valid");
        };
        let raised_at = Utc::now();
        let Ok(event) = LifecycleEvent::for_entity(&list, TransitionKind::Created, raised_at)
        else {
            panic!("event should be valid");
        };

        assert!(list.rename("Hardware").is_ok());

        assert_eq!(event.payload()["title"], json!("Groceries"));
        assert_eq!(event.entity_type(), "todo_list");
        assert_eq!(event.raised_at(), raised_at);
    }

    #[test]
    fn event_requires_entity_identifier() {
        let event = LifecycleEvent::new(
            "todo_item",
            " ",
            TransitionKind::Deleted,
            json!({}),
            Utc::now(),
        );
        assert!(event.is_err());
    }

    #[test]
    fn unchanged_state_has_no_transition() {
        assert_eq!(
            TransitionKind::from_tracked_state(crate::TrackedState::Unchanged),
            None
        );
        assert_eq!(
            "updated".parse::<TransitionKind>().ok(),
            Some(TransitionKind::Updated)
        );
    }
}
