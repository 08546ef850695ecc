//! Taskward console runtime.

#![forbid(unsafe_code)]

mod console_config;
mod session;

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use taskward_application::{
    ChangeAuditor, EntityRecordReader, EventNotifierBuilder, ListenerFilter, TodoService,
    TransactionManager, UnitOfWorkFactory,
};
use taskward_core::{AppError, AppResult};
use taskward_infrastructure::{
    InMemoryEntityStore, ItemCountListener, PostgresEntityStore, SystemClock,
    TaskLocalCurrentUserProvider, TracingLifecycleListener,
};
use tracing::info;

use crate::console_config::{ConsoleConfig, init_tracing};
use crate::session::run_scripted_session;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ConsoleConfig::load()?;
    let (transactions, records) = build_store(&config).await?;
    if config.migrate_only {
        info!("migrations completed");
        return Ok(());
    }

    let item_counts = ItemCountListener::new(Arc::clone(&records));
    item_counts.rebuild().await?;

    let mut notifier = EventNotifierBuilder::new();
    notifier
        .register_listener(ListenerFilter::any(), Arc::new(TracingLifecycleListener))
        .register_listener(ListenerFilter::any(), Arc::new(item_counts.clone()));
    let notifier = notifier.build();

    let auditor = ChangeAuditor::new(Arc::new(SystemClock), Arc::new(TaskLocalCurrentUserProvider));
    let units = UnitOfWorkFactory::new(
        auditor,
        notifier,
        transactions,
        config.unit_of_work.clone(),
    );
    let service = TodoService::new(units, records);

    info!(
        dispatch_mode = config.unit_of_work.dispatch_mode.as_str(),
        system_actor = %config.unit_of_work.system_actor,
        actor = ?config.actor.as_ref().map(|actor| actor.as_str()),
        postgres = config.database_url.is_some(),
        "taskward-console started"
    );

    let summary = match config.actor.clone() {
        Some(actor) => {
            TaskLocalCurrentUserProvider::scope(actor, run_scripted_session(&service, &item_counts))
                .await?
        }
        None => run_scripted_session(&service, &item_counts).await?,
    };

    info!(
        lists = summary.lists,
        remaining_items = summary.remaining_items,
        completed_items = summary.completed_items,
        "scripted session finished"
    );

    Ok(())
}

async fn build_store(
    config: &ConsoleConfig,
) -> AppResult<(Arc<dyn TransactionManager>, Arc<dyn EntityRecordReader>)> {
    let Some(database_url) = config.database_url.as_deref() else {
        let store = InMemoryEntityStore::new();
        return Ok((Arc::new(store.clone()), Arc::new(store)));
    };

    let pool = connect_pool(database_url).await?;
    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    let store = PostgresEntityStore::new(pool);
    Ok((Arc::new(store.clone()), Arc::new(store)))
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}
