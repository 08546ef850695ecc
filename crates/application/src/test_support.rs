use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use taskward_core::{AppError, AppResult, UserId};
use taskward_domain::{LifecycleEvent, TrackedState};
use tokio::sync::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::{
    ChangeAuditor, Clock, CurrentUserProvider, DispatchScope, EntityRecord, EntityRecordReader,
    EventNotifier, LifecycleListener, PersistenceTransaction, RecordFieldFilter, TrackedEntry,
    TransactionManager, UnitOfWorkConfig, UnitOfWorkFactory,
};

type RecordKey = (String, String);

pub(crate) fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .unwrap_or_default()
}

pub(crate) fn user(subject: &str) -> UserId {
    UserId::new(subject).unwrap_or_else(|_| UserId::system())
}

pub(crate) struct SettableClock {
    now: StdMutex<DateTime<Utc>>,
}

impl SettableClock {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(now),
        }
    }

    pub(crate) fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for SettableClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|guard| *guard).unwrap_or_default()
    }
}

pub(crate) struct SwitchableUser {
    current: StdMutex<Option<UserId>>,
}

impl SwitchableUser {
    pub(crate) fn new(current: Option<UserId>) -> Self {
        Self {
            current: StdMutex::new(current),
        }
    }

    pub(crate) fn set(&self, current: Option<UserId>) {
        if let Ok(mut guard) = self.current.lock() {
            *guard = current;
        }
    }
}

impl CurrentUserProvider for SwitchableUser {
    fn current_user(&self) -> Option<UserId> {
        self.current.lock().ok().and_then(|guard| guard.clone())
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeStore {
    pub(crate) records: Arc<Mutex<BTreeMap<RecordKey, EntityRecord>>>,
    pub(crate) fail_commit: Arc<AtomicBool>,
}

struct FakeTransaction {
    store: FakeStore,
    staged: Vec<(TrackedState, EntityRecord)>,
}

#[async_trait]
impl PersistenceTransaction for FakeTransaction {
    async fn write(&mut self, entries: &[TrackedEntry]) -> AppResult<()> {
        for entry in entries {
            if entry.state().is_pending_write() {
                self.staged.push((entry.state(), entry.to_record()));
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let FakeTransaction { store, staged } = *self;
        if store.fail_commit.load(Ordering::SeqCst) {
            return Err(AppError::Internal("commit refused".to_owned()));
        }

        let mut records = store.records.lock().await;
        for (state, record) in staged {
            let key = (record.entity_type.clone(), record.entity_id.clone());
            match state {
                TrackedState::Deleted => {
                    records.remove(&key);
                }
                _ => {
                    records.insert(key, record);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for FakeStore {
    async fn begin(&self) -> AppResult<Box<dyn PersistenceTransaction>> {
        Ok(Box::new(FakeTransaction {
            store: self.clone(),
            staged: Vec::new(),
        }))
    }
}

#[async_trait]
impl EntityRecordReader for FakeStore {
    async fn find_record(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> AppResult<Option<EntityRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .get(&(entity_type.to_owned(), entity_id.to_owned()))
            .cloned())
    }

    async fn list_records(
        &self,
        entity_type: &str,
        filters: &[RecordFieldFilter],
    ) -> AppResult<Vec<EntityRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .filter(|record| record.entity_type == entity_type)
            .filter(|record| filters.iter().all(|filter| filter.matches(record)))
            .cloned()
            .collect())
    }
}

pub(crate) struct RecordingListener {
    pub(crate) name: String,
    pub(crate) seen: Arc<Mutex<Vec<LifecycleEvent>>>,
    pub(crate) fail: bool,
}

impl RecordingListener {
    pub(crate) fn new(name: &str, fail: bool) -> Self {
        Self {
            name: name.to_owned(),
            seen: Arc::new(Mutex::new(Vec::new())),
            fail,
        }
    }
}

#[async_trait]
impl LifecycleListener for RecordingListener {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    async fn handle(&self, event: &LifecycleEvent, _scope: &mut DispatchScope) -> AppResult<()> {
        self.seen.lock().await.push(event.clone());
        if self.fail {
            return Err(AppError::Internal(format!("{} rejected event", self.name)));
        }
        Ok(())
    }
}

pub(crate) struct Harness {
    pub(crate) clock: Arc<SettableClock>,
    pub(crate) current_user: Arc<SwitchableUser>,
    pub(crate) store: FakeStore,
    pub(crate) factory: UnitOfWorkFactory,
}

pub(crate) fn harness(notifier: EventNotifier, config: UnitOfWorkConfig) -> Harness {
    let clock = Arc::new(SettableClock::new(at(0)));
    let current_user = Arc::new(SwitchableUser::new(Some(user("alice"))));
    let store = FakeStore::default();
    let auditor = ChangeAuditor::new(clock.clone(), current_user.clone());
    let factory = UnitOfWorkFactory::new(auditor, notifier, Arc::new(store.clone()), config);

    Harness {
        clock,
        current_user,
        store,
        factory,
    }
}

/// Tracing layer keeping the level and message of every emitted event.
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs {
    events: Arc<StdMutex<Vec<(Level, String)>>>,
}

impl CapturedLogs {
    pub(crate) fn contains(&self, level: Level, message: &str) -> bool {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .any(|(logged, text)| *logged == level && text == message)
            })
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if let Ok(mut events) = self.events.lock() {
            events.push((*event.metadata().level(), visitor.0));
        }
    }
}
