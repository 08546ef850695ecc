use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use taskward_core::{AppError, AppResult};
use taskward_domain::{Entity, LifecycleEvent, TrackedState, TransitionKind};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::persistence_ports::TrackedEntry;


/// When buffered lifecycle events are delivered relative to the commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Deliver only after the transaction committed; listener failures are logged.
    #[default]
    PostCommit,
    /// Deliver inside the transaction; listener failures abort the unit of work.
    InTransaction,
}

impl DispatchMode {
    /// Returns a stable configuration value for the mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostCommit => "post_commit",
            Self::InTransaction => "in_transaction",
        }
    }
}

impl FromStr for DispatchMode {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "post_commit" => Ok(Self::PostCommit),
            "in_transaction" => Ok(Self::InTransaction),
            _ => Err(AppError::Validation(format!(
                "unknown dispatch mode '{value}'"
            ))),
        }
    }
}

/// Routing key deciding which events a listener receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerFilter {
    entity_type: Option<String>,
    transition: Option<TransitionKind>,
}

impl ListenerFilter {
    /// Matches every event.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches every transition of one entity type.
    #[must_use]
    pub fn entity(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            transition: None,
        }
    }

    /// Matches one transition kind across entity types.
    #[must_use]
    pub fn transition(transition: TransitionKind) -> Self {
        Self {
            entity_type: None,
            transition: Some(transition),
        }
    }

    /// Matches one transition kind of one entity type.
    #[must_use]
    pub fn entity_transition(entity_type: impl Into<String>, transition: TransitionKind) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            transition: Some(transition),
        }
    }

    /// Returns whether the filter selects an event.
    #[must_use]
    pub fn matches(&self, event: &LifecycleEvent) -> bool {
        self.entity_type
            .as_deref()
            .is_none_or(|entity_type| entity_type == event.entity_type())
            && self
                .transition
                .is_none_or(|transition| transition == event.transition())
    }
}

/// Context handed to listeners during dispatch.
///
/// In in-transaction mode listeners may stage further entity writes that join
/// the enclosing transaction. In post-commit mode the transaction is already
/// closed and staging is rejected.
#[derive(Debug)]
pub struct DispatchScope {
    mode: DispatchMode,
    staged: Vec<TrackedEntry>,
}

impl DispatchScope {
    pub(crate) fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            staged: Vec::new(),
        }
    }

    /// Returns the dispatch mode of the running delivery.
    #[must_use]
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Stages an entity write inside the enclosing transaction.
    pub fn track(&mut self, entity: Box<dyn Entity>, state: TrackedState) -> AppResult<()> {
        if self.mode == DispatchMode::PostCommit {
            error!(
                entity_type = entity.entity_type(),
                entity_id = %entity.entity_id(),
                "listener attempted to write after commit"
            );
            return Err(AppError::SequencingViolation(format!(
                "cannot track '{}' '{}' after the transaction committed",
                entity.entity_type(),
                entity.entity_id()
            )));
        }

        self.staged.push(TrackedEntry::new(entity, state));
        Ok(())
    }

    pub(crate) fn take_staged(&mut self) -> Vec<TrackedEntry> {
        std::mem::take(&mut self.staged)
    }
}

/// Observer of entity lifecycle events.
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    /// Stable listener name used in logs and dispatch reports.
    fn name(&self) -> &str;

    /// Handles one event.
    async fn handle(&self, event: &LifecycleEvent, scope: &mut DispatchScope) -> AppResult<()>;
}

#[derive(Clone)]
struct ListenerRegistration {
    filter: ListenerFilter,
    listener: Arc<dyn LifecycleListener>,
}

/// Startup-time registry of lifecycle listeners.
#[derive(Default)]
pub struct EventNotifierBuilder {
    registrations: Vec<ListenerRegistration>,
}

impl EventNotifierBuilder {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener; listeners for the same event run in registration order.
    pub fn register_listener(
        &mut self,
        filter: ListenerFilter,
        listener: Arc<dyn LifecycleListener>,
    ) -> &mut Self {
        self.registrations
            .push(ListenerRegistration { filter, listener });
        self
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> EventNotifier {
        EventNotifier {
            registrations: self.registrations.into(),
        }
    }
}

/// One listener failure recorded during post-commit dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    /// Listener name.
    pub listener: String,
    /// Event that was dropped for this listener.
    pub event_id: Uuid,
    /// Rendered error.
    pub error: String,
}

/// Outcome of delivering a batch of events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Events in the batch.
    pub events: usize,
    /// Successful listener invocations.
    pub delivered: usize,
    /// Failed listener invocations.
    pub failures: Vec<ListenerFailure>,
}

/// Events of a unit of work whose transaction has committed.
///
/// Only the unit of work can produce this batch, which keeps post-commit
/// delivery from running before the commit.
#[derive(Debug)]
pub struct CommittedEvents {
    events: Vec<LifecycleEvent>,
}

impl CommittedEvents {
    pub(crate) fn new(events: Vec<LifecycleEvent>) -> Self {
        Self { events }
    }
}

fn panic_error(payload: &(dyn Any + Send)) -> AppError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    AppError::Internal(format!("listener panicked: {message}"))
}

/// Immutable listener registry delivering lifecycle events.
#[derive(Clone, Default)]
pub struct EventNotifier {
    registrations: Arc<[ListenerRegistration]>,
}

impl EventNotifier {
    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registrations.len()
    }

    fn matching<'a>(
        &'a self,
        event: &'a LifecycleEvent,
    ) -> impl Iterator<Item = &'a Arc<dyn LifecycleListener>> + 'a {
        self.registrations
            .iter()
            .filter(move |registration| registration.filter.matches(event))
            .map(|registration| &registration.listener)
    }

    /// Delivers committed events, logging and swallowing listener failures and panics.
    pub async fn dispatch_post_commit(&self, committed: CommittedEvents) -> DispatchReport {
        let mut scope = DispatchScope::new(DispatchMode::PostCommit);
        let mut report = DispatchReport {
            events: committed.events.len(),
            ..DispatchReport::default()
        };

        for event in &committed.events {
            for listener in self.matching(event) {
                let delivery = AssertUnwindSafe(listener.handle(event, &mut scope))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(panic_error(payload.as_ref())));
                match delivery {
                    Ok(()) => report.delivered += 1,
                    Err(error) => {
                        warn!(
                            listener = listener.name(),
                            event_id = %event.event_id(),
                            entity_type = event.entity_type(),
                            entity_id = event.entity_id(),
                            transition = event.transition().as_str(),
                            error = %error,
                            "post-commit listener failed; event dropped for listener"
                        );
                        report.failures.push(ListenerFailure {
                            listener: listener.name().to_owned(),
                            event_id: event.event_id(),
                            error: error.to_string(),
                        });
                    }
                }
            }
        }

        debug!(
            events = report.events,
            delivered = report.delivered,
            failed = report.failures.len(),
            "post-commit dispatch finished"
        );
        report
    }

    /// Delivers events inside an open transaction, stopping at the first failure.
    pub async fn dispatch_in_transaction(
        &self,
        events: &[LifecycleEvent],
        scope: &mut DispatchScope,
    ) -> AppResult<DispatchReport> {
        let mut report = DispatchReport {
            events: events.len(),
            ..DispatchReport::default()
        };

        for event in events {
            for listener in self.matching(event) {
                listener.handle(event, scope).await.map_err(|error| {
                    AppError::ListenerDispatch(format!(
                        "listener '{}' failed on {} event '{}' for '{}' '{}': {error}",
                        listener.name(),
                        event.transition().as_str(),
                        event.event_id(),
                        event.entity_type(),
                        event.entity_id()
                    ))
                })?;
                report.delivered += 1;
            }
        }

        Ok(report)
    }
}
