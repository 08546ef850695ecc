use std::env;

use taskward_application::{DispatchMode, UnitOfWorkConfig};
use taskward_core::{AppError, AppResult, UserId};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub migrate_only: bool,
    pub database_url: Option<String>,
    pub actor: Option<UserId>,
    pub unit_of_work: UnitOfWorkConfig,
}

impl ConsoleConfig {
    pub fn load() -> AppResult<Self> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");
        let mut config = Self::from_lookup(|name| env::var(name).ok())?;
        config.migrate_only = migrate_only;

        if config.migrate_only && config.database_url.is_none() {
            return Err(AppError::Validation(
                "DATABASE_URL is required for migrate".to_owned(),
            ));
        }

        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let dispatch_mode = non_empty("TASKWARD_DISPATCH_MODE")
            .map(|value| value.parse::<DispatchMode>())
            .transpose()
            .map_err(|error| {
                AppError::Validation(format!("invalid TASKWARD_DISPATCH_MODE: {error}"))
            })?
            .unwrap_or_default();
        let system_actor = non_empty("TASKWARD_SYSTEM_ACTOR")
            .map(UserId::new)
            .transpose()?
            .unwrap_or_else(UserId::system);
        let actor = non_empty("TASKWARD_ACTOR").map(UserId::new).transpose()?;

        Ok(Self {
            migrate_only: false,
            database_url: non_empty("DATABASE_URL"),
            actor,
            unit_of_work: UnitOfWorkConfig {
                dispatch_mode,
                system_actor,
            },
        })
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
