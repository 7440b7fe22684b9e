use async_trait::async_trait;

use crate::error::RouterResult;
use crate::model::{QuoteRecord, SwapTransactionRecord};

/// Durable store for quote analytics records. Writes are best-effort from
/// the engine's perspective; reads back the record for swap execution.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn insert_quote(&self, record: QuoteRecord) -> RouterResult<()>;
    async fn get_quote(&self, id: &str) -> RouterResult<Option<QuoteRecord>>;
}

/// Durable store for swap transaction lifecycle records. Single-row
/// atomicity and monotone status updates are all the core requires.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapStore: Send + Sync {
    async fn insert_swap(&self, record: SwapTransactionRecord) -> RouterResult<()>;
    async fn get_swap(&self, id: &str) -> RouterResult<Option<SwapTransactionRecord>>;
    async fn update_swap(&self, record: &SwapTransactionRecord) -> RouterResult<()>;
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
