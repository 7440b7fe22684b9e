pub mod http;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use solroute_commons::metrics::RouterMetrics;
use solroute_core::breaker::{CircuitBreaker, CircuitSnapshot};
use solroute_core::cache::{CacheValue, CoalescingCache};
use solroute_core::engine::RouteEngine;
use solroute_core::error::{RouterError, RouterResult};
use solroute_core::keys;
use solroute_core::model::{
    BuildOptions, BuiltTransaction, QuoteRecord, QuoteRequest, RankedQuote, RouteResponse, SimulationReport,
    SwapTransactionRecord, DEFAULT_MAX_ALTERNATIVES,
};
use solroute_core::store::QuoteStore;

use crate::executor::SwapExecutor;

/// Query parameters of `GET /v1/quote`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteQuery {
    pub input_mint: String,
    pub output_mint: String,
    pub amount: String,
    pub slippage_bps: Option<u32>,
    pub user_public_key: Option<String>,
    pub favor_low_latency: Option<bool>,
    pub max_routes: Option<usize>,
}

impl QuoteQuery {
    /// Builds the query from decoded key/value pairs; numeric fields that
    /// fail to parse are rejected up front.
    pub fn from_pairs(pairs: &HashMap<String, String>) -> RouterResult<Self> {
        let required = |key: &str| {
            pairs
                .get(key)
                .cloned()
                .ok_or_else(|| RouterError::invalid_input(format!("missing required query parameter {key}")))
        };
        let parse_u32 = |key: &str| -> RouterResult<Option<u32>> {
            pairs
                .get(key)
                .map(|raw| {
                    raw.parse()
                        .map_err(|_| RouterError::invalid_input(format!("{key} must be an integer")))
                })
                .transpose()
        };
        let parse_usize = |key: &str| -> RouterResult<Option<usize>> {
            pairs
                .get(key)
                .map(|raw| {
                    raw.parse()
                        .map_err(|_| RouterError::invalid_input(format!("{key} must be an integer")))
                })
                .transpose()
        };
        let parse_bool = |key: &str| -> RouterResult<Option<bool>> {
            pairs
                .get(key)
                .map(|raw| {
                    raw.parse()
                        .map_err(|_| RouterError::invalid_input(format!("{key} must be true or false")))
                })
                .transpose()
        };

        Ok(Self {
            input_mint: required("inputMint")?,
            output_mint: required("outputMint")?,
            amount: required("amount")?,
            slippage_bps: parse_u32("slippageBps")?,
            user_public_key: pairs.get("userPublicKey").cloned(),
            favor_low_latency: parse_bool("favorLowLatency")?,
            max_routes: parse_usize("maxRoutes")?,
        })
    }

    fn into_request(self, default_slippage_bps: u32) -> QuoteRequest {
        QuoteRequest {
            input_mint: self.input_mint,
            output_mint: self.output_mint,
            amount: self.amount,
            slippage_bps: self.slippage_bps.unwrap_or(default_slippage_bps),
            user_public_key: self.user_public_key,
            favor_low_latency: self.favor_low_latency.unwrap_or(false),
            max_alternatives: self.max_routes.unwrap_or(DEFAULT_MAX_ALTERNATIVES),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub platform_fee: String,
    pub gas_fee: String,
    pub total_fee: String,
    pub fee_percentage: f64,
}

/// Fee summary for the winning route. Platform fee is denominated in the
/// output asset, gas in compute units; the total is their numeric sum for
/// display only.
pub fn fee_breakdown(best: &RankedQuote) -> FeeBreakdown {
    let platform: u128 = best
        .quote
        .platform_fee
        .as_ref()
        .and_then(|fee| fee.amount.parse().ok())
        .unwrap_or(0);
    let gas: u128 = best.quote.gas_estimate.unwrap_or(0) as u128;
    let in_amount: u128 = best.quote.in_amount.parse().unwrap_or(0);
    let fee_percentage = if in_amount == 0 {
        0.0
    } else {
        platform as f64 / in_amount as f64 * 100.0
    };
    FeeBreakdown {
        platform_fee: platform.to_string(),
        gas_fee: gas.to_string(),
        total_fee: (platform + gas).to_string(),
        fee_percentage,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteBody {
    #[serde(flatten)]
    pub route: RouteResponse,
    pub fee_breakdown: FeeBreakdown,
}

impl CacheValue for QuoteBody {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecordBody {
    pub request_id: String,
    #[serde(flatten)]
    pub record: QuoteRecord,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSwapBody {
    pub quote_id: String,
    pub user_public_key: String,
    pub wrap_and_unwrap_sol: Option<bool>,
    pub use_shared_accounts: Option<bool>,
    pub fee_account: Option<String>,
    pub compute_unit_price_micro_lamports: Option<u64>,
    pub as_legacy_transaction: Option<bool>,
}

impl ExecuteSwapBody {
    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            wrap_and_unwrap_sol: self.wrap_and_unwrap_sol,
            use_shared_accounts: self.use_shared_accounts,
            fee_account: self.fee_account.clone(),
            compute_unit_price_micro_lamports: self.compute_unit_price_micro_lamports,
            as_legacy_transaction: self.as_legacy_transaction,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateSwapBody {
    pub quote_id: String,
    pub user_public_key: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapExecuteResponse {
    pub request_id: String,
    pub transaction_id: String,
    pub status: String,
    pub transaction: BuiltTransaction,
    pub processing_time: u64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapSimulateResponse {
    pub request_id: String,
    pub transaction_id: String,
    pub transaction: BuiltTransaction,
    pub simulation: SimulationReport,
    pub processing_time: u64,
}

/// Projection of a swap-transaction record for status reads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapStatusBody {
    pub request_id: String,
    pub transaction_id: String,
    pub status: String,
    pub provider: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    pub min_out_amount: String,
    pub slippage_bps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
}

impl SwapStatusBody {
    fn project(record: SwapTransactionRecord, request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            transaction_id: record.id,
            status: record.status.as_str().to_string(),
            provider: record.provider,
            input_mint: record.input_mint,
            output_mint: record.output_mint,
            in_amount: record.in_amount,
            out_amount: record.out_amount,
            min_out_amount: record.min_out_amount,
            slippage_bps: record.slippage_bps,
            tx_hash: record.tx_hash,
            execution_time_ms: record.execution_time_ms,
            error_code: record.error_code,
            error_message: record.error_message,
            created_at: record.created_at,
            updated_at: record.updated_at,
            expires_at: record.expires_at,
        }
    }
}

/// Wire shape of every failure. Messages come from the typed error and
/// never include raw upstream payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_code: String,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    pub request_id: String,
}

impl ErrorBody {
    pub fn from_error(err: &RouterError, request_id: &str) -> Self {
        Self {
            error_code: err.code().as_str().to_string(),
            message: err.message().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            details: if err.details().is_empty() {
                None
            } else {
                Some(err.details().to_vec())
            },
            request_id: request_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: String,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthBody {
    pub status: String,
    pub providers: Vec<ProviderHealth>,
    pub circuits: Vec<CircuitSnapshot>,
}

/// The versioned RPC surface. HTTP framing stays in `api::http`; every
/// handler here speaks typed DTOs.
pub struct RouterApi {
    engine: Arc<RouteEngine>,
    executor: Arc<SwapExecutor>,
    quote_store: Arc<dyn QuoteStore>,
    breaker: Arc<CircuitBreaker>,
    /// Collapses identical concurrent GetQuote calls before they reach the
    /// engine. Coalesce-only: the engine's route cache owns result reuse.
    quote_calls: CoalescingCache<QuoteBody>,
    default_slippage_bps: u32,
}

/// Identical in-flight GetQuote calls share one engine pass.
const QUOTE_COALESCE_TIMEOUT: Duration = Duration::from_secs(10);

impl RouterApi {
    pub fn new(
        engine: Arc<RouteEngine>,
        executor: Arc<SwapExecutor>,
        quote_store: Arc<dyn QuoteStore>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<RouterMetrics>,
        default_slippage_bps: u32,
    ) -> Self {
        Self {
            engine,
            executor,
            quote_store,
            breaker,
            quote_calls: CoalescingCache::new(metrics),
            default_slippage_bps,
        }
    }

    pub async fn get_quote(&self, query: QuoteQuery, request_id: &str) -> RouterResult<QuoteBody> {
        let request = query.into_request(self.default_slippage_bps);
        let key = keys::quote_key(
            &request.input_mint,
            &request.output_mint,
            &request.amount,
            request.slippage_bps,
        );
        let fetched = self
            .quote_calls
            .get_with_coalescing(
                &key,
                || async {
                    let route = self.engine.find_best_route(&request, request_id).await?;
                    let fee_breakdown = fee_breakdown(&route.best_route);
                    Ok(QuoteBody { route, fee_breakdown })
                },
                QUOTE_COALESCE_TIMEOUT,
                Duration::ZERO,
            )
            .await?;

        let mut body = fetched.value;
        body.route.request_id = request_id.to_string();
        Ok(body)
    }

    pub async fn get_quote_record(&self, id: &str, request_id: &str) -> RouterResult<QuoteRecordBody> {
        let record = self
            .quote_store
            .get_quote(id)
            .await?
            .ok_or_else(|| RouterError::route_not_found(format!("quote {id} does not exist")))?;
        Ok(QuoteRecordBody {
            request_id: request_id.to_string(),
            record,
        })
    }

    pub async fn execute_swap(&self, body: ExecuteSwapBody, request_id: &str) -> RouterResult<SwapExecuteResponse> {
        let options = body.build_options();
        let execution = self
            .executor
            .execute_swap(&body.quote_id, &body.user_public_key, options)
            .await?;
        Ok(SwapExecuteResponse {
            request_id: request_id.to_string(),
            transaction_id: execution.transaction_id,
            status: execution.status.as_str().to_string(),
            transaction: execution.transaction,
            processing_time: execution.processing_time_ms,
            expires_at: execution.expires_at,
        })
    }

    pub async fn simulate_swap(&self, body: SimulateSwapBody, request_id: &str) -> RouterResult<SwapSimulateResponse> {
        let outcome = self
            .executor
            .simulate_swap(&body.quote_id, &body.user_public_key)
            .await?;
        Ok(SwapSimulateResponse {
            request_id: request_id.to_string(),
            transaction_id: outcome.transaction_id,
            transaction: outcome.transaction,
            simulation: outcome.simulation,
            processing_time: outcome.processing_time_ms,
        })
    }

    pub async fn get_swap(&self, transaction_id: &str, request_id: &str) -> RouterResult<SwapStatusBody> {
        let record = self.executor.get_swap_status(transaction_id).await?;
        Ok(SwapStatusBody::project(record, request_id))
    }

    pub async fn cancel_swap(&self, transaction_id: &str, request_id: &str) -> RouterResult<SwapStatusBody> {
        let record = self.executor.cancel_swap(transaction_id).await?;
        Ok(SwapStatusBody::project(record, request_id))
    }

    pub async fn health(&self) -> HealthBody {
        let probes = join_all(
            self.engine
                .adapters()
                .iter()
                .map(|adapter| async move { (adapter.provider_name().to_string(), adapter.is_healthy().await) }),
        )
        .await;

        let providers: Vec<ProviderHealth> = probes
            .into_iter()
            .map(|(provider, healthy)| ProviderHealth { provider, healthy })
            .collect();
        let status = if providers.iter().any(|p| p.healthy) {
            "ok"
        } else {
            "degraded"
        };
        HealthBody {
            status: status.to_string(),
            providers,
            circuits: self.breaker.snapshots(),
        }
    }
}
