//! Prometheus metrics sink for the router.
//!
//! Everything in here is registered against one process-wide registry and
//! depends on nothing else in the workspace, so any layer may record into
//! it without creating an upward dependency.

use prometheus::{
    Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
};
use std::sync::OnceLock;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Get or initialize the global registry.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Latency buckets for histograms (in seconds), tuned for a sub-second
/// routing envelope.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.175, 0.25, 0.35, 0.5, 0.75, 1.0, 2.0, 3.5, 5.0, 8.0,
];

/// Routing metrics: inbound quote requests and per-provider fan-out.
pub struct RouteMetrics {
    pub requests: IntCounterVec,
    pub latency: HistogramVec,
    pub provider_outcomes: IntCounterVec,
    pub provider_latency: HistogramVec,
    pub quotes_dropped: IntCounterVec,
}

impl RouteMetrics {
    pub fn new(registry: &Registry) -> Self {
        let requests = IntCounterVec::new(
            Opts::new("solroute_quote_requests_total", "Inbound quote requests"),
            &["result"],
        )
        .expect("Failed to create quote_requests metric");

        let latency = HistogramVec::new(
            HistogramOpts::new("solroute_quote_latency_seconds", "End-to-end quote latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["cache"],
        )
        .expect("Failed to create quote_latency metric");

        let provider_outcomes = IntCounterVec::new(
            Opts::new("solroute_provider_requests_total", "Per-provider fan-out outcomes"),
            &["provider", "result"],
        )
        .expect("Failed to create provider_requests metric");

        let provider_latency = HistogramVec::new(
            HistogramOpts::new("solroute_provider_latency_seconds", "Per-provider quote latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["provider"],
        )
        .expect("Failed to create provider_latency metric");

        let quotes_dropped = IntCounterVec::new(
            Opts::new("solroute_quotes_dropped_total", "Quotes discarded before ranking"),
            &["provider", "reason"],
        )
        .expect("Failed to create quotes_dropped metric");

        registry.register(Box::new(requests.clone())).ok();
        registry.register(Box::new(latency.clone())).ok();
        registry.register(Box::new(provider_outcomes.clone())).ok();
        registry.register(Box::new(provider_latency.clone())).ok();
        registry.register(Box::new(quotes_dropped.clone())).ok();

        Self {
            requests,
            latency,
            provider_outcomes,
            provider_latency,
            quotes_dropped,
        }
    }
}

/// Cache and coalescer metrics, labeled by the cache-type prefix of the key.
pub struct CacheMetrics {
    pub hits: IntCounterVec,
    pub misses: IntCounterVec,
    pub coalesced_requests: IntCounterVec,
    pub requests_saved: IntCounterVec,
    pub coalesce_duration: HistogramVec,
    pub inflight: IntGaugeVec,
    pub swept_entries: Counter,
}

impl CacheMetrics {
    pub fn new(registry: &Registry) -> Self {
        let hits = IntCounterVec::new(
            Opts::new("solroute_cache_hits_total", "Cache hits"),
            &["cache_type"],
        )
        .expect("Failed to create cache_hits metric");

        let misses = IntCounterVec::new(
            Opts::new("solroute_cache_misses_total", "Cache misses"),
            &["cache_type"],
        )
        .expect("Failed to create cache_misses metric");

        let coalesced_requests = IntCounterVec::new(
            Opts::new(
                "solroute_coalesced_requests_total",
                "Requests that joined an in-flight factory call",
            ),
            &["cache_type"],
        )
        .expect("Failed to create coalesced_requests metric");

        let requests_saved = IntCounterVec::new(
            Opts::new(
                "solroute_coalesce_requests_saved_total",
                "Upstream calls avoided by coalescing (waiters per flight minus one)",
            ),
            &["cache_type"],
        )
        .expect("Failed to create requests_saved metric");

        let coalesce_duration = HistogramVec::new(
            HistogramOpts::new("solroute_coalesce_duration_seconds", "Single-flight duration")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["cache_type"],
        )
        .expect("Failed to create coalesce_duration metric");

        let inflight = IntGaugeVec::new(
            Opts::new("solroute_coalesce_inflight", "Open single-flight entries"),
            &["cache_type"],
        )
        .expect("Failed to create inflight metric");

        let swept_entries = Counter::new(
            "solroute_coalesce_swept_total",
            "Stale single-flight entries removed by the sweeper",
        )
        .expect("Failed to create swept_entries metric");

        registry.register(Box::new(hits.clone())).ok();
        registry.register(Box::new(misses.clone())).ok();
        registry.register(Box::new(coalesced_requests.clone())).ok();
        registry.register(Box::new(requests_saved.clone())).ok();
        registry.register(Box::new(coalesce_duration.clone())).ok();
        registry.register(Box::new(inflight.clone())).ok();
        registry.register(Box::new(swept_entries.clone())).ok();

        Self {
            hits,
            misses,
            coalesced_requests,
            requests_saved,
            coalesce_duration,
            inflight,
            swept_entries,
        }
    }
}

/// Circuit breaker metrics.
pub struct BreakerMetrics {
    /// 0=closed, 1=half-open, 2=open
    pub state: IntGaugeVec,
    pub transitions: IntCounterVec,
    pub outcomes: IntCounterVec,
    pub short_circuits: IntCounterVec,
}

impl BreakerMetrics {
    pub fn new(registry: &Registry) -> Self {
        let state = IntGaugeVec::new(
            Opts::new(
                "solroute_breaker_state",
                "Circuit state (0=closed, 1=half-open, 2=open)",
            ),
            &["service", "operation"],
        )
        .expect("Failed to create breaker_state metric");

        let transitions = IntCounterVec::new(
            Opts::new("solroute_breaker_transitions_total", "Circuit state transitions"),
            &["service", "operation", "to"],
        )
        .expect("Failed to create breaker_transitions metric");

        let outcomes = IntCounterVec::new(
            Opts::new("solroute_breaker_outcomes_total", "Guarded call outcomes"),
            &["service", "operation", "result"],
        )
        .expect("Failed to create breaker_outcomes metric");

        let short_circuits = IntCounterVec::new(
            Opts::new(
                "solroute_breaker_short_circuits_total",
                "Calls rejected without reaching the dependency",
            ),
            &["service", "operation"],
        )
        .expect("Failed to create breaker_short_circuits metric");

        registry.register(Box::new(state.clone())).ok();
        registry.register(Box::new(transitions.clone())).ok();
        registry.register(Box::new(outcomes.clone())).ok();
        registry.register(Box::new(short_circuits.clone())).ok();

        Self {
            state,
            transitions,
            outcomes,
            short_circuits,
        }
    }
}

/// Swap execution metrics.
pub struct SwapMetrics {
    pub executions: IntCounterVec,
    pub build_latency: HistogramVec,
    pub simulations: IntCounterVec,
    pub persisted_quotes: CounterVec,
    pub cache_hit_ratio: Gauge,
}

impl SwapMetrics {
    pub fn new(registry: &Registry) -> Self {
        let executions = IntCounterVec::new(
            Opts::new("solroute_swap_executions_total", "Swap execution attempts"),
            &["provider", "status"],
        )
        .expect("Failed to create swap_executions metric");

        let build_latency = HistogramVec::new(
            HistogramOpts::new("solroute_swap_build_latency_seconds", "Build-transaction latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["provider"],
        )
        .expect("Failed to create build_latency metric");

        let simulations = IntCounterVec::new(
            Opts::new("solroute_swap_simulations_total", "Swap simulation outcomes"),
            &["provider", "result"],
        )
        .expect("Failed to create simulations metric");

        let persisted_quotes = CounterVec::new(
            Opts::new("solroute_quote_records_total", "Quote records persisted"),
            &["result"],
        )
        .expect("Failed to create persisted_quotes metric");

        let cache_hit_ratio = Gauge::new(
            "solroute_route_cache_hit_ratio",
            "Cache hit ratio observed by the most recent route calculation",
        )
        .expect("Failed to create cache_hit_ratio metric");

        registry.register(Box::new(executions.clone())).ok();
        registry.register(Box::new(build_latency.clone())).ok();
        registry.register(Box::new(simulations.clone())).ok();
        registry.register(Box::new(persisted_quotes.clone())).ok();
        registry.register(Box::new(cache_hit_ratio.clone())).ok();

        Self {
            executions,
            build_latency,
            simulations,
            persisted_quotes,
            cache_hit_ratio,
        }
    }
}

/// All router metrics.
pub struct RouterMetrics {
    pub route: RouteMetrics,
    pub cache: CacheMetrics,
    pub breaker: BreakerMetrics,
    pub swap: SwapMetrics,
}

impl RouterMetrics {
    pub fn new() -> Self {
        let registry = registry();
        Self {
            route: RouteMetrics::new(registry),
            cache: CacheMetrics::new(registry),
            breaker: BreakerMetrics::new(registry),
            swap: SwapMetrics::new(registry),
        }
    }
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Get metrics as Prometheus text format.
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
