//! Application services and ports.

#![forbid(unsafe_code)]

mod audit_ports;
mod change_auditor;
mod event_notifier;
mod persistence_ports;
mod todo_service;
mod unit_of_work;

#[cfg(test)]
mod test_support;

pub use audit_ports::{Clock, CurrentUserProvider};
pub use change_auditor::{AuditContext, ChangeAuditor, StampSummary, stamp_audit_fields};
pub use event_notifier::{
    CommittedEvents, DispatchMode, DispatchReport, DispatchScope, EventNotifier,
    EventNotifierBuilder, LifecycleListener, ListenerFailure, ListenerFilter,
};
pub use persistence_ports::{
    EntityRecord, EntityRecordReader, PersistenceTransaction, RecordFieldFilter, TrackedEntry,
    TransactionManager,
};
pub use todo_service::{CreateTodoItemInput, TodoService, UpdateTodoItemInput};
pub use unit_of_work::{
    AbortedUnitOfWork, CommitReport, UnitOfWork, UnitOfWorkConfig, UnitOfWorkFactory,
    UnitOfWorkState,
};
