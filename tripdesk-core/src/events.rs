use async_trait::async_trait;
use tripdesk_shared::LedgerEvent;

use crate::CoreResult;

/// Outbound notification of committed ledger changes
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &LedgerEvent) -> CoreResult<()>;
}

/// Used when no broker is configured
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, event: &LedgerEvent) -> CoreResult<()> {
        tracing::debug!("Event publishing disabled, dropping {} event", event.topic());
        Ok(())
    }
}
