use std::future::Future;

use taskward_application::CurrentUserProvider;
use taskward_core::UserId;

tokio::task_local! {
    static SCOPED_USER: UserId;
}

/// Provider that always reports the same configured actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticCurrentUserProvider {
    user: UserId,
}

impl StaticCurrentUserProvider {
    /// Creates a provider for a fixed actor.
    #[must_use]
    pub fn new(user: UserId) -> Self {
        Self { user }
    }
}

impl CurrentUserProvider for StaticCurrentUserProvider {
    fn current_user(&self) -> Option<UserId> {
        Some(self.user.clone())
    }
}

/// Provider for background processes with no authenticated actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousUserProvider;

impl CurrentUserProvider for AnonymousUserProvider {
    fn current_user(&self) -> Option<UserId> {
        None
    }
}

/// Provider that reads the actor bound to the running tokio task.
///
/// Each request runs its work inside [`TaskLocalCurrentUserProvider::scope`];
/// concurrent tasks see only their own actor, and code outside any scope
/// sees no actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskLocalCurrentUserProvider;

impl TaskLocalCurrentUserProvider {
    /// Runs `future` with `user` as the current actor.
    pub async fn scope<F>(user: UserId, future: F) -> F::Output
    where
        F: Future,
    {
        SCOPED_USER.scope(user, future).await
    }
}

impl CurrentUserProvider for TaskLocalCurrentUserProvider {
    fn current_user(&self) -> Option<UserId> {
        SCOPED_USER.try_with(UserId::clone).ok()
    }
}
