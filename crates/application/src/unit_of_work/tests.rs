use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use taskward_core::{AppError, AppResult};
use taskward_domain::{
    AuditMetadata, Entity, LifecycleEvent, TodoItem, TodoList, TrackedState, TransitionKind,
};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use uuid::Uuid;

use super::{UnitOfWorkConfig, UnitOfWorkState};
use crate::event_notifier::{
    DispatchMode, DispatchScope, EventNotifierBuilder, LifecycleListener, ListenerFilter,
};
use crate::persistence_ports::EntityRecordReader;
use crate::test_support::{CapturedLogs, RecordingListener, at, harness, user};

fn config(dispatch_mode: DispatchMode) -> UnitOfWorkConfig {
    UnitOfWorkConfig {
        dispatch_mode,
        ..UnitOfWorkConfig::default()
    }
}

fn list(title: &str) -> TodoList {
    match TodoList::new(title, "#FFFFFF") {
        Ok(list) => list,
        Err(error) => panic!("list should be valid: {error}"),
    }
}

fn notifier_with(listener: Arc<RecordingListener>) -> crate::EventNotifier {
    let mut builder = EventNotifierBuilder::new();
    builder.register_listener(ListenerFilter::any(), listener);
    builder.build()
}

struct FollowUpListener;

#[async_trait]
impl LifecycleListener for FollowUpListener {
    fn name(&self) -> &str {
        "follow-up"
    }

    async fn handle(&self, event: &LifecycleEvent, scope: &mut DispatchScope) -> AppResult<()> {
        let Ok(list_id) = Uuid::parse_str(event.entity_id()) else {
            return Err(AppError::Validation("list id must be a uuid".to_owned()));
        };
        let item = TodoItem::new(list_id, "Review list")?;
        scope.track(Box::new(item), TrackedState::Added)
    }
}

#[tokio::test]
async fn created_then_modified_entity_keeps_creator_and_records_editor() {
    let h = harness(EventNotifierBuilder::new().build(), UnitOfWorkConfig::default());
    let created = list("Groceries");
    let list_id = created.entity_id();

    let mut unit = h.factory.begin();
    unit.track_added(created);
    let report = unit.commit().await;
    assert!(report.is_ok());

    let Ok(Some(record)) = h.store.find_record("todo_list", list_id.as_str()).await else {
        panic!("list should be persisted");
    };
    assert_eq!(record.audit.created_by(), Some(&user("alice")));
    assert_eq!(record.audit.created_at(), Some(at(0)));
    assert_eq!(record.audit.last_modified_by(), Some(&user("alice")));
    assert_eq!(record.audit.last_modified_at(), Some(at(0)));

    let Ok(mut reloaded) = TodoList::restore(record.data, record.audit) else {
        panic!("list should restore");
    };
    assert!(reloaded.rename("Weekly groceries").is_ok());
    h.current_user.set(Some(user("bob")));
    h.clock.set(at(90));

    let mut unit = h.factory.begin();
    unit.track_modified(reloaded);
    assert!(unit.commit().await.is_ok());

    let Ok(Some(record)) = h.store.find_record("todo_list", list_id.as_str()).await else {
        panic!("list should be persisted");
    };
    assert_eq!(record.audit.created_by(), Some(&user("alice")));
    assert_eq!(record.audit.created_at(), Some(at(0)));
    assert_eq!(record.audit.last_modified_by(), Some(&user("bob")));
    assert_eq!(record.audit.last_modified_at(), Some(at(90)));
}

#[tokio::test]
async fn deleted_then_re_added_row_keeps_its_creation_stamp() {
    let h = harness(EventNotifierBuilder::new().build(), UnitOfWorkConfig::default());
    let created = list("Groceries");
    let list_id = created.entity_id();

    let mut unit = h.factory.begin();
    unit.track_added(created);
    assert!(unit.commit().await.is_ok());

    let Ok(Some(record)) = h.store.find_record("todo_list", list_id.as_str()).await else {
        panic!("list should be persisted");
    };
    let Ok(stored) = TodoList::restore(record.data.clone(), record.audit) else {
        panic!("list should restore");
    };
    let Ok(mut replacement) = TodoList::restore(record.data, AuditMetadata::unstamped()) else {
        panic!("list should restore");
    };
    assert!(replacement.rename("Replacement").is_ok());
    h.current_user.set(Some(user("bob")));
    h.clock.set(at(30));

    let mut unit = h.factory.begin();
    unit.track_deleted(stored);
    unit.track_added(replacement);
    assert_eq!(unit.tracked()[0].state(), TrackedState::Modified);
    let Ok(report) = unit.commit().await else {
        panic!("commit should succeed");
    };

    let written = &report.written[0].audit;
    assert_eq!(written.created_by(), Some(&user("alice")));
    assert_eq!(written.created_at(), Some(at(0)));
    assert_eq!(written.last_modified_by(), Some(&user("bob")));
    assert_eq!(written.last_modified_at(), Some(at(30)));
}

#[tokio::test]
async fn background_commit_stamps_configured_system_actor() {
    let h = harness(
        EventNotifierBuilder::new().build(),
        UnitOfWorkConfig {
            dispatch_mode: DispatchMode::PostCommit,
            system_actor: user("scheduler"),
        },
    );
    h.current_user.set(None);

    let mut unit = h.factory.begin();
    unit.track_added(list("Nightly"));
    let Ok(report) = unit.commit().await else {
        panic!("commit should succeed");
    };

    assert_eq!(report.context.actor, user("scheduler"));
    assert_eq!(
        report.written[0].audit.created_by(),
        Some(&user("scheduler"))
    );
}

#[tokio::test]
async fn post_commit_events_are_delivered_after_commit() {
    let listener = Arc::new(RecordingListener::new("recorder", false));
    let h = harness(
        notifier_with(listener.clone()),
        config(DispatchMode::PostCommit),
    );
    let created = list("Groceries");

    let mut unit = h.factory.begin();
    assert!(unit.raise(&created, TransitionKind::Created).is_ok());
    unit.track_added(created);
    let Ok(report) = unit.commit().await else {
        panic!("commit should succeed");
    };

    assert_eq!(report.state, UnitOfWorkState::Dispatched);
    assert_eq!(report.dispatch.delivered, 1);
    assert_eq!(listener.seen.lock().await.len(), 1);
    assert_eq!(h.store.records.lock().await.len(), 1);
}

#[tokio::test]
async fn aborted_unit_of_work_delivers_nothing() {
    let listener = Arc::new(RecordingListener::new("recorder", false));
    let h = harness(
        notifier_with(listener.clone()),
        config(DispatchMode::PostCommit),
    );
    let created = list("Groceries");

    let mut unit = h.factory.begin();
    assert!(unit.raise(&created, TransitionKind::Created).is_ok());
    unit.track_added(created);
    assert_eq!(unit.queued_events().len(), 1);

    assert_eq!(unit.abort(), UnitOfWorkState::Aborted);
    assert!(listener.seen.lock().await.is_empty());
    assert!(h.store.records.lock().await.is_empty());
}

#[tokio::test]
async fn explicit_abort_is_logged_as_warning() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(logs.clone()));
    let h = harness(EventNotifierBuilder::new().build(), config(DispatchMode::PostCommit));

    let mut unit = h.factory.begin();
    unit.track_added(list("Groceries"));
    assert_eq!(unit.abort(), UnitOfWorkState::Aborted);

    assert!(logs.contains(Level::WARN, "unit of work aborted"));
    assert!(!logs.contains(Level::INFO, "unit of work aborted"));
}

#[tokio::test]
async fn dropped_unit_of_work_is_discarded() {
    let listener = Arc::new(RecordingListener::new("recorder", false));
    let h = harness(
        notifier_with(listener.clone()),
        config(DispatchMode::PostCommit),
    );

    {
        let created = list("Cancelled");
        let mut unit = h.factory.begin();
        assert!(unit.raise(&created, TransitionKind::Created).is_ok());
        unit.track_added(created);
    }

    assert!(listener.seen.lock().await.is_empty());
    assert!(h.store.records.lock().await.is_empty());
}

#[tokio::test]
async fn failed_physical_commit_aborts_without_delivery() {
    let listener = Arc::new(RecordingListener::new("recorder", false));
    let h = harness(
        notifier_with(listener.clone()),
        config(DispatchMode::PostCommit),
    );
    h.store.fail_commit.store(true, Ordering::SeqCst);
    let created = list("Groceries");

    let mut unit = h.factory.begin();
    assert!(unit.raise(&created, TransitionKind::Created).is_ok());
    unit.track_added(created);
    let Err(aborted) = unit.commit().await else {
        panic!("commit should fail");
    };

    assert_eq!(aborted.state(), UnitOfWorkState::Aborted);
    assert_eq!(aborted.discarded_events(), 1);
    assert!(listener.seen.lock().await.is_empty());
}

#[tokio::test]
async fn post_commit_listener_failure_keeps_the_write() {
    let listener = Arc::new(RecordingListener::new("flaky", true));
    let h = harness(
        notifier_with(listener.clone()),
        config(DispatchMode::PostCommit),
    );
    let created = list("Groceries");

    let mut unit = h.factory.begin();
    assert!(unit.raise(&created, TransitionKind::Created).is_ok());
    unit.track_added(created);
    let Ok(report) = unit.commit().await else {
        panic!("commit should succeed despite listener failure");
    };

    assert_eq!(report.dispatch.failures.len(), 1);
    assert_eq!(h.store.records.lock().await.len(), 1);
}

#[tokio::test]
async fn in_transaction_listener_failure_aborts_and_persists_nothing() {
    let listener = Arc::new(RecordingListener::new("strict", true));
    let h = harness(
        notifier_with(listener.clone()),
        config(DispatchMode::InTransaction),
    );
    let created = list("Groceries");

    let mut unit = h.factory.begin();
    assert!(unit.raise(&created, TransitionKind::Created).is_ok());
    unit.track_added(created);
    let Err(aborted) = unit.commit().await else {
        panic!("commit should abort");
    };

    assert_eq!(aborted.state(), UnitOfWorkState::Aborted);
    assert!(matches!(aborted.cause(), AppError::ListenerDispatch(_)));
    assert_eq!(listener.seen.lock().await.len(), 1);
    assert!(h.store.records.lock().await.is_empty());
}

#[tokio::test]
async fn in_transaction_listener_writes_join_the_commit() {
    let mut builder = EventNotifierBuilder::new();
    builder.register_listener(
        ListenerFilter::entity_transition("todo_list", TransitionKind::Created),
        Arc::new(FollowUpListener),
    );
    let h = harness(builder.build(), config(DispatchMode::InTransaction));
    let created = list("Groceries");

    let mut unit = h.factory.begin();
    assert!(unit.raise(&created, TransitionKind::Created).is_ok());
    unit.track_added(created);
    let Ok(report) = unit.commit().await else {
        panic!("commit should succeed");
    };

    assert_eq!(report.stamped.added, 2);
    assert_eq!(report.written.len(), 2);
    assert!(
        report
            .written
            .iter()
            .all(|record| record.audit.created_at() == Some(at(0)))
    );
    assert_eq!(h.store.records.lock().await.len(), 2);
}

#[tokio::test]
async fn added_then_deleted_entity_is_never_written() {
    let h = harness(EventNotifierBuilder::new().build(), UnitOfWorkConfig::default());
    let created = list("Scratch");

    let mut unit = h.factory.begin();
    unit.track_added(created.clone());
    unit.track_deleted(created);
    assert!(unit.tracked().is_empty());

    let Ok(report) = unit.commit().await else {
        panic!("commit should succeed");
    };
    assert!(report.written.is_empty());
    assert!(h.store.records.lock().await.is_empty());
}

#[tokio::test]
async fn added_then_modified_entity_stays_added() {
    let h = harness(EventNotifierBuilder::new().build(), UnitOfWorkConfig::default());
    let mut created = list("Draft");

    let mut unit = h.factory.begin();
    unit.track_added(created.clone());
    assert!(created.rename("Final").is_ok());
    unit.track_modified(created);

    assert_eq!(unit.tracked().len(), 1);
    assert_eq!(unit.tracked()[0].state(), TrackedState::Added);
    let Ok(report) = unit.commit().await else {
        panic!("commit should succeed");
    };
    assert_eq!(report.written[0].data["title"], "Final");
    assert_eq!(report.written[0].audit.created_by(), Some(&user("alice")));
}

#[tokio::test]
async fn queued_event_is_not_affected_by_later_mutation() {
    let listener = Arc::new(RecordingListener::new("recorder", false));
    let h = harness(
        notifier_with(listener.clone()),
        config(DispatchMode::PostCommit),
    );
    let mut created = list("Before");

    let mut unit = h.factory.begin();
    assert!(unit.raise(&created, TransitionKind::Created).is_ok());
    assert!(created.rename("After").is_ok());
    unit.track_added(created);
    assert!(unit.commit().await.is_ok());

    let seen = listener.seen.lock().await;
    assert_eq!(seen[0].payload()["title"], "Before");
}

#[tokio::test]
async fn raised_event_takes_its_time_from_the_injected_clock() {
    let h = harness(EventNotifierBuilder::new().build(), UnitOfWorkConfig::default());
    h.clock.set(at(45));
    let created = list("Timed");

    let mut unit = h.factory.begin();
    assert!(unit.raise(&created, TransitionKind::Created).is_ok());
    h.clock.set(at(90));
    unit.track_added(created);
    let queued = unit.queued_events().first().map(LifecycleEvent::raised_at);
    let Ok(report) = unit.commit().await else {
        panic!("commit should succeed");
    };

    assert_eq!(queued, Some(at(45)));
    assert_eq!(report.context.now, at(90));
}

#[test]
fn state_machine_allows_only_protocol_transitions() {
    use super::UnitOfWorkState as S;

    let post = DispatchMode::PostCommit;
    let inside = DispatchMode::InTransaction;

    assert!(S::Open.can_transition_to(S::Stamping, post));
    assert!(S::Committing.can_transition_to(S::Committed, post));
    assert!(S::Committed.can_transition_to(S::DispatchingPostCommit, post));
    assert!(!S::Committing.can_transition_to(S::DispatchingInTransaction, post));
    assert!(!S::Open.can_transition_to(S::DispatchingPostCommit, post));

    assert!(S::Committing.can_transition_to(S::DispatchingInTransaction, inside));
    assert!(S::DispatchingInTransaction.can_transition_to(S::Committed, inside));
    assert!(!S::Committed.can_transition_to(S::DispatchingPostCommit, inside));

    assert!(!S::Committed.can_transition_to(S::Aborted, post));
    assert!(!S::Aborted.can_transition_to(S::Open, post));
    assert!(S::Dispatched.is_terminal());
}
