use std::sync::Arc;
use std::time::Duration;

use solroute_adapters::jupiter::{JupiterAdapter, JupiterConfig};
use solroute_adapters::okx::{OkxAdapter, OkxConfig, OkxCredentials};
use solroute_commons::metrics::RouterMetrics;
use solroute_commons::secret_store::EnvSecretStore;
use solroute_core::adapter::DexAdapter;
use solroute_core::breaker::{BreakerConfig, CircuitBreaker};
use solroute_core::engine::{BREAKER_SERVICE, EngineConfig, RouteEngine};
use solroute_core::error::{RouterError, RouterResult};
use solroute_core::scoring::{ReliabilityTable, ScoreNormalization};
use solroute_core::store::{QuoteStore, SwapStore};
use tracing::{info, warn};

use crate::api::RouterApi;
use crate::config::ServiceConfig;
use crate::executor::SwapExecutor;
use crate::persistance::SqliteStore;

/// Fully wired service: adapters behind the breaker, the engine over both,
/// executor and API on top. Dependency direction is strictly downward.
pub struct RouterContext {
    pub config: Arc<ServiceConfig>,
    pub metrics: Arc<RouterMetrics>,
    pub breaker: Arc<CircuitBreaker>,
    pub engine: Arc<RouteEngine>,
    pub executor: Arc<SwapExecutor>,
    pub api: Arc<RouterApi>,
}

async fn build_adapters(config: &ServiceConfig) -> Vec<Arc<dyn DexAdapter>> {
    let mut adapters: Vec<Arc<dyn DexAdapter>> = Vec::new();

    let mut jupiter = JupiterConfig {
        timeout: config.adapter_timeout,
        ..JupiterConfig::default()
    };
    if let Some(base_url) = &config.jupiter_base_url {
        jupiter.base_url = base_url.clone();
    }
    if let Some(rpc_url) = &config.solana_rpc_url {
        jupiter.rpc_url = rpc_url.clone();
    }
    adapters.push(Arc::new(JupiterAdapter::new(jupiter)));

    match OkxCredentials::load(&EnvSecretStore).await {
        Ok(credentials) => {
            let mut okx = OkxConfig {
                timeout: config.adapter_timeout,
                ..OkxConfig::default()
            };
            if let Some(rpc_url) = &config.solana_rpc_url {
                okx.rpc_url = rpc_url.clone();
            }
            adapters.push(Arc::new(OkxAdapter::new(okx, credentials)));
        }
        Err(err) => {
            warn!("okx adapter disabled: {}", err);
        }
    }

    adapters
}

pub async fn build_context(config: ServiceConfig) -> RouterResult<RouterContext> {
    config
        .weights
        .validate()
        .map_err(|err| RouterError::from_code(solroute_commons::error::ErrorCode::ConfigError, err.to_string()))?;

    let config = Arc::new(config);
    let metrics = Arc::new(RouterMetrics::new());

    let store = Arc::new(SqliteStore::new(&config.db_path)?);
    let quote_store: Arc<dyn QuoteStore> = store.clone();
    let swap_store: Arc<dyn SwapStore> = store;

    let breaker = Arc::new(CircuitBreaker::new(metrics.clone()).with_config(
        BREAKER_SERVICE,
        BreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            recovery_timeout: config.breaker_recovery_timeout,
            success_threshold: 2,
            monitoring_window: Duration::from_secs(120),
        },
    ));

    let adapters = build_adapters(&config).await;
    info!(
        "configured providers: {}",
        adapters
            .iter()
            .map(|adapter| adapter.provider_name())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let engine = Arc::new(RouteEngine::new(
        adapters.clone(),
        breaker.clone(),
        quote_store.clone(),
        metrics.clone(),
        EngineConfig {
            route_expiration: config.route_expiration,
            provider_quote_ttl: config.provider_quote_ttl,
            weights: config.weights,
            normalization: ScoreNormalization::default(),
            reliability: ReliabilityTable::default(),
            ..EngineConfig::default()
        },
    )?);

    let executor = Arc::new(SwapExecutor::new(
        adapters,
        breaker.clone(),
        quote_store.clone(),
        swap_store,
        metrics.clone(),
        config.swap_expiration,
    ));

    let api = Arc::new(RouterApi::new(
        engine.clone(),
        executor.clone(),
        quote_store,
        breaker.clone(),
        metrics.clone(),
        config.default_slippage_bps,
    ));

    Ok(RouterContext {
        config,
        metrics,
        breaker,
        engine,
        executor,
        api,
    })
}
