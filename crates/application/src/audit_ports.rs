use chrono::{DateTime, Utc};
use taskward_core::UserId;

/// Port for reading the current instant.
///
/// Implementations are shared by concurrent units of work.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Port for resolving the actor of the running operation.
pub trait CurrentUserProvider: Send + Sync {
    /// Returns the authenticated user, or `None` for background work.
    fn current_user(&self) -> Option<UserId>;
}
