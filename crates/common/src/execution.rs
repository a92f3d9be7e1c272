use async_trait::async_trait;

use crate::{Result, TradeIntent};

/// Abstraction over the order-execution collaborator.
///
/// The core emits `TradeIntent`s for REAL-stage bots only and never awaits
/// fill confirmation synchronously — `submit` returns once the intent is
/// accepted for execution. Fills are reported back asynchronously as
/// `ExecutionFill`s and reconciled by the promotion manager.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn submit(&self, intent: &TradeIntent) -> Result<()>;
}
