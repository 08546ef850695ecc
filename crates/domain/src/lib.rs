//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod audit;
mod lifecycle;
mod todo;

pub use audit::{AuditMetadata, AuditStamp, Entity, TrackedState};
pub use lifecycle::{LifecycleEvent, TransitionKind};
pub use todo::{Colour, PriorityLevel, TodoItem, TodoList};
