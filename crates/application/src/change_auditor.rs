use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskward_core::UserId;
use taskward_domain::TrackedState;
use tracing::debug;

use crate::audit_ports::{Clock, CurrentUserProvider};
use crate::persistence_ports::TrackedEntry;

/// Actor and instant shared by every entity stamped in one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditContext {
    /// Actor recorded on stamped entities.
    pub actor: UserId,
    /// Instant recorded on stamped entities.
    pub now: DateTime<Utc>,
}

/// Counts produced by one stamping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StampSummary {
    /// Entities stamped as created.
    pub added: usize,
    /// Entities stamped as modified.
    pub modified: usize,
    /// Entities left untouched (deleted, unchanged or not auditable).
    pub skipped: usize,
}

impl StampSummary {
    /// Adds the counts of a later stamping pass.
    pub fn merge(&mut self, other: Self) {
        self.added += other.added;
        self.modified += other.modified;
        self.skipped += other.skipped;
    }
}

/// Stamps audit fields on tracked entities according to their state.
///
/// Added entities receive both the creation and the modification stamp,
/// modified entities only the modification stamp. Deleted and unchanged
/// entities, and entities whose type is not auditable, are left as is.
pub fn stamp_audit_fields(
    entries: &mut [TrackedEntry],
    actor: &UserId,
    now: DateTime<Utc>,
) -> StampSummary {
    let mut summary = StampSummary::default();

    for entry in entries.iter_mut() {
        let state = entry.state();
        let Some(audit) = entry.entity_mut().audit_metadata_mut() else {
            summary.skipped += 1;
            continue;
        };

        match state {
            TrackedState::Added => {
                audit.mark_created(actor, now);
                summary.added += 1;
            }
            TrackedState::Modified => {
                audit.mark_modified(actor, now);
                summary.modified += 1;
            }
            TrackedState::Deleted | TrackedState::Unchanged => summary.skipped += 1,
        }
    }

    summary
}

/// Pre-commit hook resolving the actor and time for a commit.
#[derive(Clone)]
pub struct ChangeAuditor {
    clock: Arc<dyn Clock>,
    current_user: Arc<dyn CurrentUserProvider>,
    system_actor: UserId,
}

impl ChangeAuditor {
    /// Creates an auditor that falls back to [`UserId::system`] without a user.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, current_user: Arc<dyn CurrentUserProvider>) -> Self {
        Self {
            clock,
            current_user,
            system_actor: UserId::system(),
        }
    }

    /// Overrides the actor recorded when no user is authenticated.
    #[must_use]
    pub fn with_system_actor(mut self, system_actor: UserId) -> Self {
        self.system_actor = system_actor;
        self
    }

    /// Reads the clock alone, for timestamps outside a commit.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Reads the clock and the current user exactly once.
    #[must_use]
    pub fn capture(&self) -> AuditContext {
        let actor = self
            .current_user
            .current_user()
            .unwrap_or_else(|| self.system_actor.clone());

        AuditContext {
            actor,
            now: self.clock.now(),
        }
    }

    /// Stamps entries with a freshly captured context and returns it.
    pub fn stamp(&self, entries: &mut [TrackedEntry]) -> (AuditContext, StampSummary) {
        let context = self.capture();
        let summary = Self::stamp_with(&context, entries);
        (context, summary)
    }

    /// Stamps entries with an already captured context.
    pub fn stamp_with(context: &AuditContext, entries: &mut [TrackedEntry]) -> StampSummary {
        let summary = stamp_audit_fields(entries, &context.actor, context.now);
        debug!(
            actor = %context.actor,
            added = summary.added,
            modified = summary.modified,
            skipped = summary.skipped,
            "stamped audit fields"
        );
        summary
    }
}
