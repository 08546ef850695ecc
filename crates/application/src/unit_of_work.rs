use std::sync::Arc;

use taskward_core::{AppError, AppResult, UserId};
use taskward_domain::{Entity, LifecycleEvent, TrackedState, TransitionKind};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::change_auditor::{AuditContext, ChangeAuditor, StampSummary};
use crate::event_notifier::{
    CommittedEvents, DispatchMode, DispatchReport, DispatchScope, EventNotifier,
};
use crate::persistence_ports::{
    EntityRecord, PersistenceTransaction, TrackedEntry, TransactionManager,
};

#[cfg(test)]
mod tests;

/// Deployment settings for units of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWorkConfig {
    /// When lifecycle events are delivered relative to the commit.
    pub dispatch_mode: DispatchMode,
    /// Actor recorded when no user is authenticated.
    pub system_actor: UserId,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            dispatch_mode: DispatchMode::PostCommit,
            system_actor: UserId::system(),
        }
    }
}

/// Position of a unit of work in its commit protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitOfWorkState {
    /// Accepting tracked entities and events.
    Open,
    /// Audit fields are being stamped.
    Stamping,
    /// Writes are being flushed inside the transaction.
    Committing,
    /// Events are being delivered inside the transaction.
    DispatchingInTransaction,
    /// The transaction physically committed.
    Committed,
    /// Events are being delivered after the commit.
    DispatchingPostCommit,
    /// Committed and every queued event was handed to its listeners.
    Dispatched,
    /// Rolled back or discarded; no event was delivered after commit.
    Aborted,
}

impl UnitOfWorkState {
    /// Returns a stable label for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Stamping => "stamping",
            Self::Committing => "committing",
            Self::DispatchingInTransaction => "dispatching_in_transaction",
            Self::Committed => "committed",
            Self::DispatchingPostCommit => "dispatching_post_commit",
            Self::Dispatched => "dispatched",
            Self::Aborted => "aborted",
        }
    }

    /// Returns whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dispatched | Self::Aborted)
    }

    /// Returns whether `next` may follow this state under `mode`.
    #[must_use]
    pub fn can_transition_to(self, next: Self, mode: DispatchMode) -> bool {
        let in_transaction = mode == DispatchMode::InTransaction;

        match (self, next) {
            (
                Self::Open | Self::Stamping | Self::Committing | Self::DispatchingInTransaction,
                Self::Aborted,
            ) => true,
            (Self::Open, Self::Stamping) | (Self::Stamping, Self::Committing) => true,
            (Self::Committing, Self::DispatchingInTransaction) => in_transaction,
            (Self::DispatchingInTransaction, Self::Committed) => in_transaction,
            (Self::Committing, Self::Committed) => !in_transaction,
            (Self::Committed, Self::DispatchingPostCommit) => !in_transaction,
            (Self::Committed, Self::Dispatched) => in_transaction,
            (Self::DispatchingPostCommit, Self::Dispatched) => true,
            _ => false,
        }
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitReport {
    /// Unit of work identifier.
    pub unit_id: Uuid,
    /// Final state, always [`UnitOfWorkState::Dispatched`].
    pub state: UnitOfWorkState,
    /// Actor and instant stamped on every entity of the commit.
    pub context: AuditContext,
    /// Stamping counts, including writes staged by in-transaction listeners.
    pub stamped: StampSummary,
    /// Persisted form of every added or modified entity.
    pub written: Vec<EntityRecord>,
    /// Number of deleted entities.
    pub deleted: usize,
    /// Listener delivery outcome.
    pub dispatch: DispatchReport,
}

impl CommitReport {
    /// Returns the written record for an entity, if it was part of the commit.
    #[must_use]
    pub fn record(&self, entity_type: &str, entity_id: &str) -> Option<&EntityRecord> {
        self.written
            .iter()
            .find(|record| record.entity_type == entity_type && record.entity_id == entity_id)
    }
}

/// A unit of work that rolled back or was discarded.
#[derive(Debug, Error)]
#[error("unit of work '{unit_id}' aborted: {cause}")]
pub struct AbortedUnitOfWork {
    unit_id: Uuid,
    discarded_entries: usize,
    discarded_events: usize,
    #[source]
    cause: AppError,
}

impl AbortedUnitOfWork {
    /// Returns the unit of work identifier.
    #[must_use]
    pub fn unit_id(&self) -> Uuid {
        self.unit_id
    }

    /// Returns the final state, always [`UnitOfWorkState::Aborted`].
    #[must_use]
    pub fn state(&self) -> UnitOfWorkState {
        UnitOfWorkState::Aborted
    }

    /// Returns how many tracked entities were discarded.
    #[must_use]
    pub fn discarded_entries(&self) -> usize {
        self.discarded_entries
    }

    /// Returns how many queued events were discarded without delivery.
    #[must_use]
    pub fn discarded_events(&self) -> usize {
        self.discarded_events
    }

    /// Returns the failure that caused the abort.
    #[must_use]
    pub fn cause(&self) -> &AppError {
        &self.cause
    }
}

impl From<AbortedUnitOfWork> for AppError {
    fn from(value: AbortedUnitOfWork) -> Self {
        value.cause
    }
}

/// Opens units of work sharing one auditor, notifier and persistence backend.
#[derive(Clone)]
pub struct UnitOfWorkFactory {
    auditor: ChangeAuditor,
    notifier: EventNotifier,
    transactions: Arc<dyn TransactionManager>,
    dispatch_mode: DispatchMode,
}

impl UnitOfWorkFactory {
    /// Creates a factory from its collaborators and deployment settings.
    #[must_use]
    pub fn new(
        auditor: ChangeAuditor,
        notifier: EventNotifier,
        transactions: Arc<dyn TransactionManager>,
        config: UnitOfWorkConfig,
    ) -> Self {
        Self {
            auditor: auditor.with_system_actor(config.system_actor),
            notifier,
            transactions,
            dispatch_mode: config.dispatch_mode,
        }
    }

    /// Returns the configured dispatch mode.
    #[must_use]
    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch_mode
    }

    /// Opens a new unit of work.
    #[must_use]
    pub fn begin(&self) -> UnitOfWork {
        let unit = UnitOfWork {
            id: Uuid::new_v4(),
            state: UnitOfWorkState::Open,
            entries: Vec::new(),
            events: Vec::new(),
            auditor: self.auditor.clone(),
            notifier: self.notifier.clone(),
            transactions: self.transactions.clone(),
            dispatch_mode: self.dispatch_mode,
        };
        debug!(unit_id = %unit.id, mode = unit.dispatch_mode.as_str(), "unit of work opened");
        unit
    }
}

/// Scope of one business operation bounded by a transaction.
///
/// Tracked entities are only stamped and written by [`UnitOfWork::commit`].
/// Dropping an uncommitted unit of work discards its changes and events.
pub struct UnitOfWork {
    id: Uuid,
    state: UnitOfWorkState,
    entries: Vec<TrackedEntry>,
    events: Vec<LifecycleEvent>,
    auditor: ChangeAuditor,
    notifier: EventNotifier,
    transactions: Arc<dyn TransactionManager>,
    dispatch_mode: DispatchMode,
}

impl UnitOfWork {
    /// Returns the unit of work identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    /// Returns the dispatch mode captured when the unit of work opened.
    #[must_use]
    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch_mode
    }

    /// Returns the tracked entries.
    #[must_use]
    pub fn tracked(&self) -> &[TrackedEntry] {
        &self.entries
    }

    /// Returns the queued events in delivery order.
    #[must_use]
    pub fn queued_events(&self) -> &[LifecycleEvent] {
        &self.events
    }

    /// Tracks an entity with an explicit change classification.
    ///
    /// Tracking the same row twice folds both classifications: an entity added
    /// and then deleted in one unit of work is never written.
    pub fn track(&mut self, mut entity: Box<dyn Entity>, state: TrackedState) {
        let existing = self
            .entries
            .iter()
            .position(|entry| entry.same_row(entity.as_ref()));

        let Some(index) = existing else {
            self.entries.push(TrackedEntry::new(entity, state));
            return;
        };

        match fold_states(self.entries[index].state(), state) {
            Some(folded) => {
                carry_creation_stamp(self.entries[index].entity(), entity.as_mut());
                self.entries[index].replace(entity, folded);
            }
            None => {
                self.entries.remove(index);
            }
        }
    }

    /// Tracks a new entity.
    pub fn track_added(&mut self, entity: impl Entity + 'static) {
        self.track(Box::new(entity), TrackedState::Added);
    }

    /// Tracks a changed entity.
    pub fn track_modified(&mut self, entity: impl Entity + 'static) {
        self.track(Box::new(entity), TrackedState::Modified);
    }

    /// Tracks a removed entity.
    pub fn track_deleted(&mut self, entity: impl Entity + 'static) {
        self.track(Box::new(entity), TrackedState::Deleted);
    }

    /// Appends a lifecycle event to the delivery queue.
    pub fn enqueue_lifecycle_event(&mut self, event: LifecycleEvent) {
        self.events.push(event);
    }

    /// Queues an event carrying the current snapshot of `entity`.
    pub fn raise(&mut self, entity: &dyn Entity, transition: TransitionKind) -> AppResult<()> {
        let raised_at = self.auditor.now();
        self.enqueue_lifecycle_event(LifecycleEvent::for_entity(entity, transition, raised_at)?);
        Ok(())
    }

    /// Discards tracked changes and queued events without touching storage.
    pub fn abort(mut self) -> UnitOfWorkState {
        let discarded = self.discard();
        warn!(
            unit_id = %self.id,
            discarded_entries = discarded.0,
            discarded_events = discarded.1,
            "unit of work aborted"
        );
        self.state
    }

    /// Stamps, writes and commits tracked entities and delivers queued events.
    pub async fn commit(mut self) -> Result<CommitReport, AbortedUnitOfWork> {
        match self.run_commit().await {
            Ok(report) => Ok(report),
            Err(cause) => {
                let (discarded_entries, discarded_events) = self.discard();
                warn!(
                    unit_id = %self.id,
                    discarded_entries,
                    discarded_events,
                    error = %cause,
                    "unit of work rolled back"
                );
                Err(AbortedUnitOfWork {
                    unit_id: self.id,
                    discarded_entries,
                    discarded_events,
                    cause,
                })
            }
        }
    }

    async fn run_commit(&mut self) -> AppResult<CommitReport> {
        self.transition(UnitOfWorkState::Stamping)?;
        let (context, mut stamped) = self.auditor.stamp(&mut self.entries);

        self.transition(UnitOfWorkState::Committing)?;
        let mut transaction = self.transactions.begin().await?;
        let in_transaction_report = match self
            .write_within(transaction.as_mut(), &context, &mut stamped)
            .await
        {
            Ok(report) => report,
            Err(error) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    warn!(
                        unit_id = %self.id,
                        error = %rollback_error,
                        "failed to roll back unit of work transaction"
                    );
                }
                return Err(error);
            }
        };
        transaction.commit().await?;

        let written = self
            .entries
            .iter()
            .filter(|entry| {
                matches!(entry.state(), TrackedState::Added | TrackedState::Modified)
            })
            .map(TrackedEntry::to_record)
            .collect::<Vec<_>>();
        let deleted = self
            .entries
            .iter()
            .filter(|entry| entry.state() == TrackedState::Deleted)
            .count();

        let dispatch = self.finish_after_commit(in_transaction_report).await;
        info!(
            unit_id = %self.id,
            actor = %context.actor,
            mode = self.dispatch_mode.as_str(),
            written = written.len(),
            deleted,
            events = dispatch.events,
            delivered = dispatch.delivered,
            failed = dispatch.failures.len(),
            "unit of work committed"
        );

        Ok(CommitReport {
            unit_id: self.id,
            state: self.state,
            context,
            stamped,
            written,
            deleted,
            dispatch,
        })
    }

    async fn write_within(
        &mut self,
        transaction: &mut dyn PersistenceTransaction,
        context: &AuditContext,
        stamped: &mut StampSummary,
    ) -> AppResult<Option<DispatchReport>> {
        transaction.write(&self.entries).await?;

        if self.dispatch_mode == DispatchMode::PostCommit {
            return Ok(None);
        }

        self.transition(UnitOfWorkState::DispatchingInTransaction)?;
        let mut scope = DispatchScope::new(DispatchMode::InTransaction);
        let report = self
            .notifier
            .dispatch_in_transaction(&self.events, &mut scope)
            .await?;

        let mut staged = scope.take_staged();
        if !staged.is_empty() {
            stamped.merge(ChangeAuditor::stamp_with(context, &mut staged));
            transaction.write(&staged).await?;
            self.entries.extend(staged);
        }

        Ok(Some(report))
    }

    async fn finish_after_commit(
        &mut self,
        in_transaction_report: Option<DispatchReport>,
    ) -> DispatchReport {
        // write is durable past this point; sequencing faults only skip delivery
        if self.transition(UnitOfWorkState::Committed).is_err() {
            return DispatchReport::default();
        }

        if let Some(report) = in_transaction_report {
            self.events.clear();
            return match self.transition(UnitOfWorkState::Dispatched) {
                Ok(()) => report,
                Err(_) => DispatchReport::default(),
            };
        }

        if self
            .transition(UnitOfWorkState::DispatchingPostCommit)
            .is_err()
        {
            return DispatchReport::default();
        }
        let events = std::mem::take(&mut self.events);
        let report = self
            .notifier
            .dispatch_post_commit(CommittedEvents::new(events))
            .await;
        if self.transition(UnitOfWorkState::Dispatched).is_err() {
            return DispatchReport::default();
        }

        report
    }

    fn transition(&mut self, next: UnitOfWorkState) -> AppResult<()> {
        let allowed = self.state.can_transition_to(next, self.dispatch_mode);
        debug_assert!(
            allowed,
            "unit of work moved from {} to {}",
            self.state.as_str(),
            next.as_str()
        );

        if !allowed {
            error!(
                unit_id = %self.id,
                from = self.state.as_str(),
                to = next.as_str(),
                mode = self.dispatch_mode.as_str(),
                "unit of work sequencing violation"
            );
            return Err(AppError::SequencingViolation(format!(
                "unit of work '{}' cannot move from '{}' to '{}' in {} mode",
                self.id,
                self.state.as_str(),
                next.as_str(),
                self.dispatch_mode.as_str()
            )));
        }

        self.state = next;
        Ok(())
    }

    fn discard(&mut self) -> (usize, usize) {
        let discarded = (self.entries.len(), self.events.len());
        self.entries.clear();
        self.events.clear();
        self.state = UnitOfWorkState::Aborted;
        discarded
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }

        if !self.entries.is_empty() || !self.events.is_empty() {
            warn!(
                unit_id = %self.id,
                state = self.state.as_str(),
                discarded_entries = self.entries.len(),
                discarded_events = self.events.len(),
                "unit of work dropped before completion"
            );
        }
        self.state = UnitOfWorkState::Aborted;
    }
}

fn carry_creation_stamp(previous: &dyn Entity, next: &mut dyn Entity) {
    let Some(previous) = previous.audit_metadata() else {
        return;
    };
    if let Some(audit) = next.audit_metadata_mut() {
        audit.keep_creation_from(previous);
    }
}

fn fold_states(existing: TrackedState, incoming: TrackedState) -> Option<TrackedState> {
    match (existing, incoming) {
        (TrackedState::Added, TrackedState::Deleted) => None,
        (TrackedState::Added, _) => Some(TrackedState::Added),
        (TrackedState::Deleted, TrackedState::Added) => Some(TrackedState::Modified),
        (TrackedState::Deleted, _) => Some(TrackedState::Deleted),
        (TrackedState::Modified, TrackedState::Deleted) => Some(TrackedState::Deleted),
        (TrackedState::Modified, _) => Some(TrackedState::Modified),
        (TrackedState::Unchanged, incoming) => Some(incoming),
    }
}
