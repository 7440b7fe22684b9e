use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use solroute_commons::error::ErrorCode;
use solroute_commons::metrics::RouterMetrics;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::DexAdapter;
use crate::breaker::CircuitBreaker;
use crate::cache::{CoalescingCache, Fetched};
use crate::error::{RouterError, RouterResult};
use crate::keys;
use crate::model::{NormalizedQuote, QuoteRecord, QuoteRequest, RankedQuote, RouteResponse};
use crate::scoring::{self, ReliabilityTable, ScoreNormalization, ScoreWeights};
use crate::store::{QuoteStore, now_millis};

pub const BREAKER_SERVICE: &str = "dex_adapter";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Validity window for a calculated route and its quote record.
    pub route_expiration: Duration,
    /// TTL for one provider's normalized quote.
    pub provider_quote_ttl: Duration,
    pub route_coalesce_timeout: Duration,
    pub provider_coalesce_timeout: Duration,
    pub weights: ScoreWeights,
    pub normalization: ScoreNormalization,
    pub reliability: ReliabilityTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            route_expiration: Duration::from_secs(30),
            provider_quote_ttl: Duration::from_secs(15),
            route_coalesce_timeout: Duration::from_secs(8),
            provider_coalesce_timeout: Duration::from_secs(5),
            weights: ScoreWeights::default(),
            normalization: ScoreNormalization::default(),
            reliability: ReliabilityTable::default(),
        }
    }
}

struct BranchOutcome {
    provider: &'static str,
    result: RouterResult<Fetched<NormalizedQuote>>,
    elapsed_ms: u64,
}

/// Fans out to every configured adapter, scores the survivors and ranks
/// them under the active policy. All upstream traffic goes through the
/// coalescer and the per-provider circuit.
pub struct RouteEngine {
    adapters: Vec<Arc<dyn DexAdapter>>,
    breaker: Arc<CircuitBreaker>,
    route_cache: Arc<CoalescingCache<RouteResponse>>,
    provider_cache: Arc<CoalescingCache<NormalizedQuote>>,
    quote_store: Arc<dyn QuoteStore>,
    metrics: Arc<RouterMetrics>,
    config: EngineConfig,
}

impl RouteEngine {
    pub fn new(
        adapters: Vec<Arc<dyn DexAdapter>>,
        breaker: Arc<CircuitBreaker>,
        quote_store: Arc<dyn QuoteStore>,
        metrics: Arc<RouterMetrics>,
        config: EngineConfig,
    ) -> RouterResult<Self> {
        config.weights.validate()?;
        Ok(Self {
            adapters,
            breaker,
            route_cache: Arc::new(CoalescingCache::new(metrics.clone())),
            provider_cache: Arc::new(CoalescingCache::new(metrics.clone())),
            quote_store,
            metrics,
            config,
        })
    }

    /// Spawns stale-flight sweepers for both internal caches.
    pub fn spawn_sweepers(&self, interval: Duration) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            crate::cache::spawn_sweeper(self.route_cache.clone(), interval),
            crate::cache::spawn_sweeper(self.provider_cache.clone(), interval),
        ]
    }

    pub fn adapters(&self) -> &[Arc<dyn DexAdapter>] {
        &self.adapters
    }

    pub async fn find_best_route(&self, req: &QuoteRequest, request_id: &str) -> RouterResult<RouteResponse> {
        req.validate()?;
        let started = Instant::now();
        let route_key = keys::route_key(&req.input_mint, &req.output_mint, &req.amount);

        let fetched = self
            .route_cache
            .get_with_coalescing(
                &route_key,
                || self.calculate(req, request_id),
                self.config.route_coalesce_timeout,
                self.config.route_expiration,
            )
            .await;

        let label = match &fetched {
            Ok(f) if f.was_cached() => "hit",
            Ok(_) => "miss",
            Err(_) => "error",
        };
        self.metrics
            .route
            .latency
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());
        self.metrics
            .route
            .requests
            .with_label_values(&[if label == "error" { "error" } else { "ok" }])
            .inc();

        let fetched = fetched?;
        let was_cached = fetched.was_cached();
        let mut response = fetched.value;
        response.request_id = request_id.to_string();
        response.total_response_time_ms = started.elapsed().as_millis() as u64;
        if was_cached {
            response.cache_hit_ratio = 1.0;
            response.best_route.is_cached = true;
            for alt in &mut response.alternatives {
                alt.is_cached = true;
            }
        }
        self.metrics.swap.cache_hit_ratio.set(response.cache_hit_ratio);
        Ok(response)
    }

    async fn calculate(&self, req: &QuoteRequest, request_id: &str) -> RouterResult<RouteResponse> {
        let started = Instant::now();

        let branches = join_all(self.adapters.iter().map(|adapter| {
            let adapter = adapter.clone();
            async move {
                let provider = adapter.provider_name();
                let key = keys::provider_quote_key(
                    provider,
                    &req.input_mint,
                    &req.output_mint,
                    &req.amount,
                    req.slippage_bps,
                );
                let operation = format!("{provider}.quote");
                let branch_started = Instant::now();
                let result = self
                    .provider_cache
                    .get_with_coalescing(
                        &key,
                        || self.breaker.execute_guarded(BREAKER_SERVICE, &operation, adapter.quote(req)),
                        self.config.provider_coalesce_timeout,
                        self.config.provider_quote_ttl,
                    )
                    .await;
                BranchOutcome {
                    provider,
                    result,
                    elapsed_ms: branch_started.elapsed().as_millis() as u64,
                }
            }
        }))
        .await;

        let mut survivors: Vec<RankedQuote> = Vec::new();
        let mut failures: Vec<(String, RouterError)> = Vec::new();
        let mut cached_branches = 0usize;
        let mut settled_branches = 0usize;

        for branch in branches {
            match branch.result {
                Ok(fetched) => {
                    self.metrics
                        .route
                        .provider_outcomes
                        .with_label_values(&[branch.provider, "ok"])
                        .inc();
                    self.metrics
                        .route
                        .provider_latency
                        .with_label_values(&[branch.provider])
                        .observe(branch.elapsed_ms as f64 / 1000.0);

                    let was_cached = fetched.was_cached();
                    let quote = fetched.value;
                    if quote.out_amount_u128().unwrap_or(0) == 0 {
                        warn!("dropping zero-amount quote from {}", branch.provider);
                        self.metrics
                            .route
                            .quotes_dropped
                            .with_label_values(&[branch.provider, "zero_amount"])
                            .inc();
                        continue;
                    }
                    if !quote.route_plan_telescopes() {
                        // Malformed plan is an adapter bug, not an outage:
                        // drop the quote without tripping the circuit.
                        warn!("dropping non-telescoping route plan from {}", branch.provider);
                        self.metrics
                            .route
                            .quotes_dropped
                            .with_label_values(&[branch.provider, "malformed_route_plan"])
                            .inc();
                        continue;
                    }

                    settled_branches += 1;
                    if was_cached {
                        cached_branches += 1;
                    }
                    let score = scoring::score_quote(
                        &quote,
                        branch.provider,
                        branch.elapsed_ms,
                        &self.config.weights,
                        &self.config.normalization,
                        &self.config.reliability,
                    );
                    survivors.push(RankedQuote {
                        provider: branch.provider.to_string(),
                        quote,
                        response_time_ms: branch.elapsed_ms,
                        score,
                        is_cached: was_cached,
                    });
                }
                Err(err) => {
                    debug!("provider {} failed: {}", branch.provider, err);
                    self.metrics
                        .route
                        .provider_outcomes
                        .with_label_values(&[branch.provider, "error"])
                        .inc();
                    failures.push((branch.provider.to_string(), err));
                }
            }
        }

        if survivors.is_empty() {
            // A fully-open circuit set surfaces as such; anything else is a
            // routing failure enriched with per-branch causes.
            if !failures.is_empty()
                && failures.iter().all(|(_, err)| err.code() == ErrorCode::CircuitBreakerOpen)
            {
                let (_, err) = failures.into_iter().next_back().expect("non-empty failures");
                return Err(err);
            }
            let details = failures
                .iter()
                .map(|(provider, err)| format!("{provider}: {}", err.code().as_str()))
                .collect();
            return Err(RouterError::route_not_found(format!(
                "no route available for {} -> {}",
                req.input_mint, req.output_mint
            ))
            .with_details(details));
        }

        scoring::rank_quotes(&mut survivors, req.favor_low_latency);
        let best = survivors.remove(0);
        survivors.truncate(req.max_alternatives);

        let cache_hit_ratio = if settled_branches == 0 {
            0.0
        } else {
            cached_branches as f64 / settled_branches as f64
        };

        let quote_id = self.persist_quote_record(req, &best).await;

        Ok(RouteResponse {
            best_route: best,
            alternatives: survivors,
            request_id: request_id.to_string(),
            quote_id,
            total_response_time_ms: started.elapsed().as_millis() as u64,
            cache_hit_ratio,
        })
    }

    /// Analytics write: failure is logged and swallowed, never fails the
    /// route.
    async fn persist_quote_record(&self, req: &QuoteRequest, best: &RankedQuote) -> Option<String> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_millis();
        let route_data = match serde_json::to_string(&best.quote) {
            Ok(json) => json,
            Err(err) => {
                warn!("failed to serialize route plan for quote record: {}", err);
                return None;
            }
        };
        let record = QuoteRecord {
            id: id.clone(),
            provider: best.provider.clone(),
            input_mint: req.input_mint.clone(),
            output_mint: req.output_mint.clone(),
            in_amount: best.quote.in_amount.clone(),
            out_amount: best.quote.out_amount.clone(),
            price_impact_pct: best.quote.price_impact_pct.clone(),
            route_data,
            fee_amount: best.quote.platform_fee.as_ref().map(|fee| fee.amount.clone()),
            gas_estimate: best.quote.gas_estimate,
            response_time_ms: best.response_time_ms,
            is_cached: best.is_cached,
            created_at,
            expires_at: created_at + self.config.route_expiration.as_millis() as i64,
            efficiency_score: Some(best.score.total_score),
            reliability_score: Some(best.score.reliability),
            slippage_bps: req.slippage_bps,
        };

        match self.quote_store.insert_quote(record).await {
            Ok(()) => {
                self.metrics.swap.persisted_quotes.with_label_values(&["ok"]).inc();
                Some(id)
            }
            Err(err) => {
                warn!("quote record persistence failed (non-fatal): {}", err);
                self.metrics.swap.persisted_quotes.with_label_values(&["error"]).inc();
                None
            }
        }
    }
}
