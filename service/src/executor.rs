use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use solroute_commons::error::ErrorCode;
use solroute_commons::metrics::RouterMetrics;
use solroute_core::adapter::DexAdapter;
use solroute_core::breaker::CircuitBreaker;
use solroute_core::engine::BREAKER_SERVICE;
use solroute_core::error::{RouterError, RouterResult};
use solroute_core::model::{
    BuildOptions, BuildTransactionRequest, BuiltTransaction, NormalizedQuote, QuoteRecord, SimulationReport,
    SwapStatus, SwapTransactionRecord,
};
use solroute_core::store::{QuoteStore, SwapStore, now_millis};
use tracing::{info, warn};
use uuid::Uuid;

/// Result of binding a stored quote to a user key.
#[derive(Debug, Clone)]
pub struct SwapExecution {
    pub transaction_id: String,
    pub status: SwapStatus,
    pub transaction: BuiltTransaction,
    pub processing_time_ms: u64,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct SwapSimulation {
    pub transaction_id: String,
    pub transaction: BuiltTransaction,
    pub simulation: SimulationReport,
    pub processing_time_ms: u64,
}

/// Converts a stored quote into a signed-ready transaction payload and
/// owns the swap-transaction lifecycle. The build call goes through the
/// per-provider circuit; the swap-record write is fatal on failure, unlike
/// the engine's analytics write.
pub struct SwapExecutor {
    adapters: HashMap<&'static str, Arc<dyn DexAdapter>>,
    breaker: Arc<CircuitBreaker>,
    quote_store: Arc<dyn QuoteStore>,
    swap_store: Arc<dyn SwapStore>,
    metrics: Arc<RouterMetrics>,
    swap_expiration: Duration,
}

impl SwapExecutor {
    pub fn new(
        adapters: Vec<Arc<dyn DexAdapter>>,
        breaker: Arc<CircuitBreaker>,
        quote_store: Arc<dyn QuoteStore>,
        swap_store: Arc<dyn SwapStore>,
        metrics: Arc<RouterMetrics>,
        swap_expiration: Duration,
    ) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.provider_name(), adapter))
            .collect();
        Self {
            adapters,
            breaker,
            quote_store,
            swap_store,
            metrics,
            swap_expiration,
        }
    }

    /// Loads and gate-checks the stored quote: missing is ROUTE_NOT_FOUND,
    /// stale is ROUTE_EXPIRED. Nothing downstream runs for either.
    async fn load_valid_quote(&self, quote_id: &str) -> RouterResult<(QuoteRecord, NormalizedQuote)> {
        let record = self
            .quote_store
            .get_quote(quote_id)
            .await?
            .ok_or_else(|| RouterError::route_not_found(format!("quote {quote_id} does not exist")))?;

        if record.is_expired(now_millis()) {
            return Err(RouterError::route_expired(format!(
                "quote {quote_id} expired, request a fresh quote"
            )));
        }

        let quote: NormalizedQuote = serde_json::from_str(&record.route_data).map_err(|e| {
            RouterError::from_code(
                ErrorCode::RouteCalculationFailed,
                format!("stored route plan for quote {quote_id} is not decodable"),
            )
            .with_context(e.to_string())
        })?;
        Ok((record, quote))
    }

    fn adapter_for(&self, provider: &str) -> RouterResult<&Arc<dyn DexAdapter>> {
        self.adapters.get(provider).ok_or_else(|| {
            RouterError::from_code(
                ErrorCode::DexUnavailable,
                format!("no adapter configured for provider {provider}"),
            )
        })
    }

    pub async fn execute_swap(
        &self,
        quote_id: &str,
        user_public_key: &str,
        options: BuildOptions,
    ) -> RouterResult<SwapExecution> {
        if user_public_key.trim().is_empty() {
            return Err(RouterError::invalid_input("userPublicKey is required"));
        }
        let started = Instant::now();
        let (quote_record, quote) = self.load_valid_quote(quote_id).await?;
        let adapter = self.adapter_for(&quote_record.provider)?;

        let build_request = BuildTransactionRequest {
            quote: quote.clone(),
            user_public_key: user_public_key.to_string(),
            options,
        };

        let created_at = now_millis();
        let mut record = SwapTransactionRecord {
            id: Uuid::new_v4().to_string(),
            user_public_key: user_public_key.to_string(),
            input_mint: quote_record.input_mint.clone(),
            output_mint: quote_record.output_mint.clone(),
            in_amount: quote_record.in_amount.clone(),
            out_amount: quote_record.out_amount.clone(),
            min_out_amount: quote.other_amount_threshold.clone(),
            slippage_bps: quote_record.slippage_bps,
            provider: quote_record.provider.clone(),
            status: SwapStatus::Pending,
            tx_hash: None,
            route_data: json!({ "quote": &quote, "buildRequest": &build_request }).to_string(),
            fee_amount: quote_record.fee_amount.clone(),
            gas_estimate: quote_record.gas_estimate,
            execution_time_ms: None,
            error_code: None,
            error_message: None,
            created_at,
            updated_at: created_at,
            expires_at: created_at + self.swap_expiration.as_millis() as i64,
        };
        // This write is part of the request contract, not analytics.
        self.swap_store.insert_swap(record.clone()).await?;

        let provider = quote_record.provider.as_str();
        let operation = format!("{provider}.build");
        let build_started = Instant::now();
        let built = self
            .breaker
            .execute_guarded(BREAKER_SERVICE, &operation, adapter.build_transaction(&build_request))
            .await;
        self.metrics
            .swap
            .build_latency
            .with_label_values(&[provider])
            .observe(build_started.elapsed().as_secs_f64());

        let built = match built {
            Ok(built) => built,
            Err(err) => {
                // The record stays PENDING until swept or failed through
                // the status update path.
                warn!("build failed for swap {} via {}: {}", record.id, provider, err);
                self.metrics
                    .swap
                    .executions
                    .with_label_values(&[provider, "build_failed"])
                    .inc();
                return Err(err);
            }
        };

        record.route_data = json!({
            "quote": &quote,
            "buildRequest": &build_request,
            "transaction": &built,
        })
        .to_string();
        record.updated_at = now_millis();
        self.swap_store.update_swap(&record).await?;

        self.metrics
            .swap
            .executions
            .with_label_values(&[provider, "pending"])
            .inc();
        info!("swap {} built via {} for quote {}", record.id, provider, quote_id);

        Ok(SwapExecution {
            transaction_id: record.id,
            status: SwapStatus::Pending,
            transaction: built,
            processing_time_ms: started.elapsed().as_millis() as u64,
            expires_at: record.expires_at,
        })
    }

    /// Builds and dry-runs the transaction. The audit record is synthetic:
    /// it lands directly in a terminal state and its persistence is
    /// best-effort.
    pub async fn simulate_swap(&self, quote_id: &str, user_public_key: &str) -> RouterResult<SwapSimulation> {
        if user_public_key.trim().is_empty() {
            return Err(RouterError::invalid_input("userPublicKey is required"));
        }
        let started = Instant::now();
        let (quote_record, quote) = self.load_valid_quote(quote_id).await?;
        let adapter = self.adapter_for(&quote_record.provider)?;
        let provider = quote_record.provider.as_str();

        let build_request = BuildTransactionRequest {
            quote: quote.clone(),
            user_public_key: user_public_key.to_string(),
            options: BuildOptions::default(),
        };
        let built = self
            .breaker
            .execute_guarded(
                BREAKER_SERVICE,
                &format!("{provider}.build"),
                adapter.build_transaction(&build_request),
            )
            .await?;

        let simulation = self
            .breaker
            .execute_guarded(
                BREAKER_SERVICE,
                &format!("{provider}.simulate"),
                adapter.simulate_transaction(&built.swap_transaction, user_public_key),
            )
            .await?;

        self.metrics
            .swap
            .simulations
            .with_label_values(&[provider, if simulation.success { "ok" } else { "reverted" }])
            .inc();

        let now = now_millis();
        let record = SwapTransactionRecord {
            id: Uuid::new_v4().to_string(),
            user_public_key: user_public_key.to_string(),
            input_mint: quote_record.input_mint.clone(),
            output_mint: quote_record.output_mint.clone(),
            in_amount: quote_record.in_amount.clone(),
            out_amount: quote_record.out_amount.clone(),
            min_out_amount: quote.other_amount_threshold.clone(),
            slippage_bps: quote_record.slippage_bps,
            provider: quote_record.provider.clone(),
            status: if simulation.success {
                SwapStatus::Completed
            } else {
                SwapStatus::Failed
            },
            tx_hash: None,
            route_data: json!({ "quote": &quote, "simulation": &simulation }).to_string(),
            fee_amount: quote_record.fee_amount.clone(),
            gas_estimate: simulation.compute_units_consumed.or(quote_record.gas_estimate),
            execution_time_ms: Some(started.elapsed().as_millis() as i64),
            error_code: simulation.error.as_ref().map(|_| "SIMULATION_REVERTED".to_string()),
            error_message: simulation.error.clone(),
            created_at: now,
            updated_at: now,
            expires_at: now,
        };
        let transaction_id = record.id.clone();
        if let Err(err) = self.swap_store.insert_swap(record).await {
            warn!("simulation audit record write failed (non-fatal): {}", err);
        }

        Ok(SwapSimulation {
            transaction_id,
            transaction: built,
            simulation,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub async fn get_swap_status(&self, transaction_id: &str) -> RouterResult<SwapTransactionRecord> {
        self.swap_store
            .get_swap(transaction_id)
            .await?
            .ok_or_else(|| RouterError::route_not_found(format!("swap transaction {transaction_id} does not exist")))
    }

    /// Applies a monotone status transition. Terminal records never
    /// re-open; reaching a terminal state stamps the execution time from
    /// the record's own `created_at`.
    pub async fn update_swap_status(
        &self,
        transaction_id: &str,
        next: SwapStatus,
        tx_hash: Option<String>,
        error_code: Option<String>,
        error_message: Option<String>,
    ) -> RouterResult<SwapTransactionRecord> {
        let mut record = self.get_swap_status(transaction_id).await?;
        if !record.status.can_transition_to(next) {
            return Err(RouterError::invalid_input(format!(
                "illegal status transition {} -> {}",
                record.status.as_str(),
                next.as_str()
            )));
        }

        let now = now_millis();
        record.status = next;
        record.updated_at = now;
        if let Some(hash) = tx_hash {
            record.tx_hash = Some(hash);
        }
        if error_code.is_some() {
            record.error_code = error_code;
        }
        if error_message.is_some() {
            record.error_message = error_message;
        }
        if next.is_terminal() {
            record.execution_time_ms = Some(now - record.created_at);
        }
        self.swap_store.update_swap(&record).await?;

        self.metrics
            .swap
            .executions
            .with_label_values(&[record.provider.as_str(), next.as_str()])
            .inc();
        Ok(record)
    }

    /// Cancellation is only meaningful while the swap is still PENDING.
    pub async fn cancel_swap(&self, transaction_id: &str) -> RouterResult<SwapTransactionRecord> {
        let record = self.get_swap_status(transaction_id).await?;
        if record.status != SwapStatus::Pending {
            return Err(RouterError::invalid_input(format!(
                "swap transaction {transaction_id} is {} and cannot be cancelled",
                record.status.as_str()
            )));
        }
        self.update_swap_status(
            transaction_id,
            SwapStatus::Failed,
            None,
            Some("CANCELLED".to_string()),
            Some("cancelled by user".to_string()),
        )
        .await
    }
}
