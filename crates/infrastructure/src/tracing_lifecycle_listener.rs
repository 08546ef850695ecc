use async_trait::async_trait;
use taskward_application::{DispatchScope, LifecycleListener};
use taskward_core::AppResult;
use taskward_domain::LifecycleEvent;
use tracing::info;

/// Listener that writes every delivered lifecycle event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLifecycleListener;

#[async_trait]
impl LifecycleListener for TracingLifecycleListener {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn handle(&self, event: &LifecycleEvent, scope: &mut DispatchScope) -> AppResult<()> {
        info!(
            event_id = %event.event_id(),
            entity_type = %event.entity_type(),
            entity_id = %event.entity_id(),
            transition = event.transition().as_str(),
            raised_at = %event.raised_at(),
            dispatch_mode = scope.mode().as_str(),
            "lifecycle event delivered"
        );
        Ok(())
    }
}
