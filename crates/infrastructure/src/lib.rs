//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod clocks;
mod current_user_providers;
mod in_memory_entity_store;
mod item_count_listener;
mod postgres_entity_store;
mod tracing_lifecycle_listener;

pub use clocks::{FixedClock, SystemClock};
pub use current_user_providers::{
    AnonymousUserProvider, StaticCurrentUserProvider, TaskLocalCurrentUserProvider,
};
pub use in_memory_entity_store::InMemoryEntityStore;
pub use item_count_listener::ItemCountListener;
pub use postgres_entity_store::PostgresEntityStore;
pub use tracing_lifecycle_listener::TracingLifecycleListener;
