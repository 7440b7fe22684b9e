use async_trait::async_trait;

use crate::error::RouterResult;
use crate::model::{BuildTransactionRequest, BuiltTransaction, NormalizedQuote, QuoteRequest, SimulationReport};

/// Uniform upstream-aggregator capability.
///
/// Implementations are stateless beyond credentials and a pooled HTTP
/// client, apply their own per-request timeout, and translate transport or
/// payload failures into typed errors. Retry and isolation live outside the
/// adapter (circuit breaker + coalescing); an adapter reports the outcome
/// of exactly one attempt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DexAdapter: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn quote(&self, req: &QuoteRequest) -> RouterResult<NormalizedQuote>;

    async fn build_transaction(&self, req: &BuildTransactionRequest) -> RouterResult<BuiltTransaction>;

    async fn simulate_transaction(&self, tx_base64: &str, user_public_key: &str) -> RouterResult<SimulationReport>;

    async fn is_healthy(&self) -> bool;
}
