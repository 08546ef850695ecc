use std::fmt::Debug;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskward_core::{AppError, UserId};

/// One actor/time pair recorded on an auditable entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    /// Actor that performed the write.
    pub by: UserId,
    /// Instant of the write.
    pub at: DateTime<Utc>,
}

/// Creation and modification provenance carried by auditable entities.
///
/// Creation counts as the first modification, so once an entity has been
/// created both stamps are present and the modification stamp is never
/// earlier than the creation stamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMetadata {
    created: Option<AuditStamp>,
    last_modified: Option<AuditStamp>,
}

impl AuditMetadata {
    /// Returns metadata for an entity that has never been persisted.
    #[must_use]
    pub fn unstamped() -> Self {
        Self::default()
    }

    /// Rebuilds metadata from persisted columns.
    #[must_use]
    pub fn restored(
        created_by: UserId,
        created_at: DateTime<Utc>,
        last_modified_by: Option<UserId>,
        last_modified_at: Option<DateTime<Utc>>,
    ) -> Self {
        let last_modified = match (last_modified_by, last_modified_at) {
            (Some(by), Some(at)) => Some(AuditStamp { by, at }),
            _ => None,
        };

        Self {
            created: Some(AuditStamp {
                by: created_by,
                at: created_at,
            }),
            last_modified,
        }
    }

    /// Stamps creation and the first modification with the same actor and time.
    pub fn mark_created(&mut self, actor: &UserId, now: DateTime<Utc>) {
        let stamp = AuditStamp {
            by: actor.clone(),
            at: now,
        };
        self.created = Some(stamp.clone());
        self.last_modified = Some(stamp);
    }

    /// Stamps a modification, leaving the creation stamp untouched.
    pub fn mark_modified(&mut self, actor: &UserId, now: DateTime<Utc>) {
        // a lagging clock must not move the modification before creation
        let at = match &self.created {
            Some(created) if now < created.at => created.at,
            _ => now,
        };

        self.last_modified = Some(AuditStamp {
            by: actor.clone(),
            at,
        });
    }

    /// Adopts the creation stamp of the stored row, which is never overwritten.
    ///
    /// The modification stamp is taken from `stored` only when this metadata
    /// has none, and is clamped so it never precedes creation.
    pub fn keep_creation_from(&mut self, stored: &AuditMetadata) {
        let Some(created) = stored.created.clone() else {
            return;
        };

        if self.last_modified.is_none() {
            self.last_modified = stored.last_modified.clone();
        }
        if let Some(last_modified) = self.last_modified.as_mut()
            && last_modified.at < created.at
        {
            last_modified.at = created.at;
        }
        self.created = Some(created);
    }

    /// Returns the creating actor, if the entity was ever persisted.
    #[must_use]
    pub fn created_by(&self) -> Option<&UserId> {
        self.created.as_ref().map(|stamp| &stamp.by)
    }

    /// Returns the creation instant, if the entity was ever persisted.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created.as_ref().map(|stamp| stamp.at)
    }

    /// Returns the actor of the latest modification.
    #[must_use]
    pub fn last_modified_by(&self) -> Option<&UserId> {
        self.last_modified.as_ref().map(|stamp| &stamp.by)
    }

    /// Returns the instant of the latest modification.
    #[must_use]
    pub fn last_modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified.as_ref().map(|stamp| stamp.at)
    }

    /// Returns whether the entity has been stamped as created.
    #[must_use]
    pub fn is_stamped(&self) -> bool {
        self.created.is_some()
    }
}

/// Change classification supplied by the persistence layer for a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedState {
    /// The entity is new and will be inserted.
    Added,
    /// The entity exists and will be updated.
    Modified,
    /// The entity exists and will be removed.
    Deleted,
    /// The entity is tracked but carries no pending change.
    Unchanged,
}

impl TrackedState {
    /// Returns a stable storage value for the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Unchanged => "unchanged",
        }
    }

    /// Returns whether the state requires a physical write.
    #[must_use]
    pub fn is_pending_write(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl FromStr for TrackedState {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "added" => Ok(Self::Added),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            "unchanged" => Ok(Self::Unchanged),
            _ => Err(AppError::Validation(format!(
                "unknown tracked state '{value}'"
            ))),
        }
    }
}

/// Persisted record that can be tracked by a unit of work.
pub trait Entity: Debug + Send + Sync {
    /// Stable type label used for storage and listener routing.
    fn entity_type(&self) -> &'static str;

    /// Stable identifier within the entity type.
    fn entity_id(&self) -> String;

    /// Returns a by-value copy of the persisted business state.
    fn snapshot(&self) -> Value;

    /// Returns audit metadata when the type supports provenance tracking.
    fn audit_metadata(&self) -> Option<&AuditMetadata> {
        None
    }

    /// Returns mutable audit metadata when the type supports provenance tracking.
    fn audit_metadata_mut(&mut self) -> Option<&mut AuditMetadata> {
        None
    }
}
