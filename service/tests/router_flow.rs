//! End-to-end flow over the wired service: quote, repeat-quote caching,
//! swap execution, status reads and cancellation, against stub upstreams
//! and a real sqlite store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use solroute_commons::error::ErrorCode;
use solroute_commons::metrics::RouterMetrics;
use solroute_core::adapter::DexAdapter;
use solroute_core::breaker::{BreakerConfig, CircuitBreaker};
use solroute_core::engine::{BREAKER_SERVICE, EngineConfig, RouteEngine};
use solroute_core::error::RouterResult;
use solroute_core::model::{
    BuildTransactionRequest, BuiltTransaction, NormalizedQuote, QuoteRequest, RouteStep, SimulationReport, SwapMode,
};
use solroute_core::store::{QuoteStore, SwapStore, now_millis};
use solroute_service::api::{ExecuteSwapBody, QuoteQuery, RouterApi, SimulateSwapBody};
use solroute_service::executor::SwapExecutor;
use solroute_service::persistance::SqliteStore;

const SOL: &str = "So11111111111111111111111111111111111111112";
const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

struct StubAdapter {
    name: &'static str,
    out_amount: &'static str,
    delay: Duration,
    quote_calls: Arc<AtomicUsize>,
    build_calls: Arc<AtomicUsize>,
}

impl StubAdapter {
    fn new(name: &'static str, out_amount: &'static str, delay: Duration) -> Self {
        Self {
            name,
            out_amount,
            delay,
            quote_calls: Arc::new(AtomicUsize::new(0)),
            build_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl DexAdapter for StubAdapter {
    fn provider_name(&self) -> &'static str {
        self.name
    }

    async fn quote(&self, req: &QuoteRequest) -> RouterResult<NormalizedQuote> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(NormalizedQuote {
            input_mint: req.input_mint.clone(),
            output_mint: req.output_mint.clone(),
            in_amount: req.amount.clone(),
            out_amount: self.out_amount.to_string(),
            other_amount_threshold: self.out_amount.to_string(),
            swap_mode: SwapMode::ExactIn,
            slippage_bps: req.slippage_bps,
            platform_fee: None,
            price_impact_pct: "0.0012".to_string(),
            route_plan: vec![RouteStep {
                amm_key: format!("{}-pool", self.name),
                label: None,
                input_mint: req.input_mint.clone(),
                output_mint: req.output_mint.clone(),
                in_amount: req.amount.clone(),
                out_amount: self.out_amount.to_string(),
                fee_amount: None,
            }],
            gas_estimate: None,
            time_taken_ms: 5,
            context_slot: Some(252_000_000),
        })
    }

    async fn build_transaction(&self, _req: &BuildTransactionRequest) -> RouterResult<BuiltTransaction> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        Ok(BuiltTransaction {
            swap_transaction: "c3R1Yi10cmFuc2FjdGlvbg==".to_string(),
            last_valid_block_height: Some(252_000_400),
            prioritization_fee_lamports: None,
        })
    }

    async fn simulate_transaction(&self, _tx: &str, _user: &str) -> RouterResult<SimulationReport> {
        Ok(SimulationReport {
            success: true,
            error: None,
            compute_units_consumed: Some(48_000),
            logs: vec!["Program log: ok".to_string()],
        })
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

struct Harness {
    api: Arc<RouterApi>,
    store: Arc<SqliteStore>,
    fast: Arc<StubAdapter>,
    rich: Arc<StubAdapter>,
    _db: tempfile::NamedTempFile,
}

fn harness() -> Harness {
    let db = tempfile::NamedTempFile::new().expect("tmp db");
    let store = Arc::new(SqliteStore::new(&db.path().display().to_string()).expect("store"));
    let quote_store: Arc<dyn QuoteStore> = store.clone();
    let swap_store: Arc<dyn SwapStore> = store.clone();

    let metrics = Arc::new(RouterMetrics::new());
    let breaker = Arc::new(
        CircuitBreaker::new(metrics.clone()).with_config(BREAKER_SERVICE, BreakerConfig::adapter_default()),
    );

    // "rich" pays more but is slower; "fast" answers quickly.
    let rich = Arc::new(StubAdapter::new("jupiter", "145670000", Duration::from_millis(20)));
    let fast = Arc::new(StubAdapter::new("okx", "145500000", Duration::from_millis(2)));
    let adapters: Vec<Arc<dyn DexAdapter>> = vec![rich.clone(), fast.clone()];

    let engine = Arc::new(
        RouteEngine::new(
            adapters.clone(),
            breaker.clone(),
            quote_store.clone(),
            metrics.clone(),
            EngineConfig::default(),
        )
        .expect("engine"),
    );
    let executor = Arc::new(SwapExecutor::new(
        adapters,
        breaker.clone(),
        quote_store.clone(),
        swap_store,
        metrics.clone(),
        Duration::from_secs(30),
    ));
    let api = Arc::new(RouterApi::new(engine, executor, quote_store, breaker, metrics, 50));

    Harness {
        api,
        store,
        fast,
        rich,
        _db: db,
    }
}

fn quote_query(amount: &str) -> QuoteQuery {
    let mut pairs = HashMap::new();
    pairs.insert("inputMint".to_string(), SOL.to_string());
    pairs.insert("outputMint".to_string(), USDC.to_string());
    pairs.insert("amount".to_string(), amount.to_string());
    QuoteQuery::from_pairs(&pairs).expect("query")
}

#[tokio::test]
async fn quote_then_execute_then_cancel_walks_the_lifecycle() {
    let h = harness();

    let quote = h.api.get_quote(quote_query("1000000000"), "req-1").await.expect("quote");
    assert_eq!(quote.route.best_route.provider, "jupiter");
    assert_eq!(quote.route.alternatives.len(), 1);
    assert_eq!(quote.route.alternatives[0].provider, "okx");
    assert_eq!(quote.route.cache_hit_ratio, 0.0);
    assert_eq!(quote.fee_breakdown.platform_fee, "0");
    let quote_id = quote.route.quote_id.clone().expect("persisted quote id");

    // The stored record is readable through the projection endpoint.
    let record = h.api.get_quote_record(&quote_id, "req-2").await.expect("record");
    assert_eq!(record.record.provider, "jupiter");

    let execution = h
        .api
        .execute_swap(
            ExecuteSwapBody {
                quote_id: quote_id.clone(),
                user_public_key: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string(),
                wrap_and_unwrap_sol: Some(true),
                use_shared_accounts: None,
                fee_account: None,
                compute_unit_price_micro_lamports: None,
                as_legacy_transaction: None,
            },
            "req-3",
        )
        .await
        .expect("execute");
    assert_eq!(execution.status, "PENDING");
    assert!(!execution.transaction.swap_transaction.is_empty());
    assert_eq!(h.rich.build_calls.load(Ordering::SeqCst), 1);

    let status = h.api.get_swap(&execution.transaction_id, "req-4").await.expect("status");
    assert_eq!(status.status, "PENDING");

    let cancelled = h.api.cancel_swap(&execution.transaction_id, "req-5").await.expect("cancel");
    assert_eq!(cancelled.status, "FAILED");
    assert_eq!(cancelled.error_code.as_deref(), Some("CANCELLED"));

    // Cancellation of a terminal record is rejected.
    let err = h
        .api
        .cancel_swap(&execution.transaction_id, "req-6")
        .await
        .expect_err("terminal");
    assert_eq!(err.code(), ErrorCode::InvalidInput);
}

#[tokio::test]
async fn repeated_quotes_are_coalesced_and_cached() {
    let h = harness();

    let first = h.api.get_quote(quote_query("2000000000"), "req-1").await.expect("first");
    assert_eq!(first.route.cache_hit_ratio, 0.0);

    let second = h.api.get_quote(quote_query("2000000000"), "req-2").await.expect("second");
    assert_eq!(second.route.cache_hit_ratio, 1.0);
    assert!(second.route.best_route.is_cached);
    assert!(second.route.total_response_time_ms < 50);

    // One fan-out total: each adapter was hit exactly once.
    assert_eq!(h.rich.quote_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.fast.quote_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_identical_quotes_consume_one_fanout() {
    let h = harness();

    let mut handles = Vec::new();
    for i in 0..100 {
        let api = h.api.clone();
        handles.push(tokio::spawn(async move {
            api.get_quote(quote_query("3000000000"), &format!("req-{i}")).await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("quote");
    }

    // Coalescing plus the TTL cache bound the upstream traffic to at most
    // one call per adapter (plus a possible refresh at the TTL edge).
    assert!(h.rich.quote_calls.load(Ordering::SeqCst) <= 2);
    assert!(h.fast.quote_calls.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn expired_quote_is_rejected_before_any_build() {
    let h = harness();

    let now = now_millis();
    let stale = solroute_core::model::QuoteRecord {
        id: "stale-quote".to_string(),
        provider: "jupiter".to_string(),
        input_mint: SOL.to_string(),
        output_mint: USDC.to_string(),
        in_amount: "1000000000".to_string(),
        out_amount: "145670000".to_string(),
        price_impact_pct: "0".to_string(),
        route_data: "{}".to_string(),
        fee_amount: None,
        gas_estimate: None,
        response_time_ms: 10,
        is_cached: false,
        created_at: now - 31_000,
        expires_at: now - 1_000,
        efficiency_score: None,
        reliability_score: None,
        slippage_bps: 50,
    };
    let quote_store: Arc<dyn QuoteStore> = h.store.clone();
    quote_store.insert_quote(stale).await.expect("seed");

    let err = h
        .api
        .execute_swap(
            ExecuteSwapBody {
                quote_id: "stale-quote".to_string(),
                user_public_key: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string(),
                wrap_and_unwrap_sol: None,
                use_shared_accounts: None,
                fee_account: None,
                compute_unit_price_micro_lamports: None,
                as_legacy_transaction: None,
            },
            "req-1",
        )
        .await
        .expect_err("expired");

    assert_eq!(err.code(), ErrorCode::RouteExpired);
    assert_eq!(h.rich.build_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.fast.build_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn favor_low_latency_switches_the_winner() {
    let h = harness();

    let mut pairs = HashMap::new();
    pairs.insert("inputMint".to_string(), SOL.to_string());
    pairs.insert("outputMint".to_string(), USDC.to_string());
    pairs.insert("amount".to_string(), "4000000000".to_string());
    pairs.insert("favorLowLatency".to_string(), "true".to_string());
    let query = QuoteQuery::from_pairs(&pairs).expect("query");

    let quote = h.api.get_quote(query, "req-1").await.expect("quote");
    assert_eq!(quote.route.best_route.provider, "okx");
}

#[tokio::test]
async fn simulation_reports_without_opening_a_pending_swap() {
    let h = harness();

    let quote = h.api.get_quote(quote_query("5000000000"), "req-1").await.expect("quote");
    let quote_id = quote.route.quote_id.expect("quote id");

    let outcome = h
        .api
        .simulate_swap(
            SimulateSwapBody {
                quote_id,
                user_public_key: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string(),
            },
            "req-2",
        )
        .await
        .expect("simulate");

    assert!(outcome.simulation.success);
    assert_eq!(outcome.simulation.compute_units_consumed, Some(48_000));
    // The audit record is terminal from the start.
    let audit = h.api.get_swap(&outcome.transaction_id, "req-3").await.expect("audit");
    assert_eq!(audit.status, "COMPLETED");
}

#[tokio::test]
async fn health_reports_providers_and_circuits() {
    let h = harness();
    let health = h.api.health().await;
    assert_eq!(health.status, "ok");
    assert_eq!(health.providers.len(), 2);
    assert!(health.providers.iter().all(|p| p.healthy));
}
