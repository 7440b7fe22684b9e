use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use solroute_commons::error::{CodedError, ErrorCode};
use solroute_core::scoring::ScoreWeights;
use thiserror::Error;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value in {var}: {message}")]
    InvalidValue { var: &'static str, message: String },
    #[error("performance weights are invalid: {message}")]
    InvalidWeights { message: String },
}

impl CodedError for ConfigError {
    fn code(&self) -> ErrorCode {
        ErrorCode::ConfigError
    }
}

/// Service-level configuration, loaded from the environment on startup.
/// Scoring weights are validated here so a bad deployment fails fast
/// instead of silently reshaping route ordering.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    pub db_path: String,
    pub route_expiration: Duration,
    pub provider_quote_ttl: Duration,
    pub default_slippage_bps: u32,
    pub adapter_timeout: Duration,
    pub weights: ScoreWeights,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_timeout: Duration,
    pub sweep_interval: Duration,
    pub swap_expiration: Duration,
    pub jupiter_base_url: Option<String>,
    pub solana_rpc_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".parse().expect("static addr"),
            db_path: "solroute.db".to_string(),
            route_expiration: Duration::from_millis(30_000),
            provider_quote_ttl: Duration::from_millis(15_000),
            default_slippage_bps: 50,
            adapter_timeout: Duration::from_millis(3_000),
            weights: ScoreWeights::default(),
            breaker_failure_threshold: 3,
            breaker_recovery_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30),
            swap_expiration: Duration::from_millis(30_000),
            jupiter_base_url: None,
            solana_rpc_url: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str, current: T) -> ConfigResult<T> {
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            var,
            message: format!("could not parse {raw:?}"),
        }),
        Err(_) => Ok(current),
    }
}

fn env_millis(var: &'static str, current: Duration) -> ConfigResult<Duration> {
    Ok(Duration::from_millis(env_parse(var, current.as_millis() as u64)?))
}

fn parse_weights(raw: &str) -> ConfigResult<ScoreWeights> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| ConfigError::InvalidWeights {
            message: format!("expected five comma-separated numbers, got {raw:?}"),
        })?;
    if parts.len() != 5 {
        return Err(ConfigError::InvalidWeights {
            message: format!("expected five weights (output,fees,gas,latency,reliability), got {}", parts.len()),
        });
    }
    let weights = ScoreWeights {
        output_amount: parts[0],
        fees: parts[1],
        gas_estimate: parts[2],
        latency: parts[3],
        reliability: parts[4],
    };
    weights.validate().map_err(|err| ConfigError::InvalidWeights {
        message: err.to_string(),
    })?;
    Ok(weights)
}

impl ServiceConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let defaults = Self::default();

        let weights = match env::var("SOLROUTE_WEIGHTS") {
            Ok(raw) => parse_weights(&raw)?,
            Err(_) => defaults.weights,
        };

        Ok(Self {
            listen_addr: env_parse("SOLROUTE_LISTEN_ADDR", defaults.listen_addr)?,
            db_path: env::var("SOLROUTE_DB_PATH").unwrap_or(defaults.db_path),
            route_expiration: env_millis("SOLROUTE_ROUTE_EXPIRATION_MS", defaults.route_expiration)?,
            provider_quote_ttl: env_millis("SOLROUTE_PROVIDER_QUOTE_TTL_MS", defaults.provider_quote_ttl)?,
            default_slippage_bps: env_parse("SOLROUTE_SLIPPAGE_BPS", defaults.default_slippage_bps)?,
            adapter_timeout: env_millis("SOLROUTE_ADAPTER_TIMEOUT_MS", defaults.adapter_timeout)?,
            weights,
            breaker_failure_threshold: env_parse(
                "SOLROUTE_BREAKER_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            )?,
            breaker_recovery_timeout: env_millis(
                "SOLROUTE_BREAKER_RECOVERY_TIMEOUT_MS",
                defaults.breaker_recovery_timeout,
            )?,
            sweep_interval: env_millis("SOLROUTE_SWEEP_INTERVAL_MS", defaults.sweep_interval)?,
            swap_expiration: env_millis("SOLROUTE_SWAP_EXPIRATION_MS", defaults.swap_expiration)?,
            jupiter_base_url: env::var("JUPITER_BASE_URL").ok(),
            solana_rpc_url: env::var("SOLANA_RPC_URL").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_operating_envelope() {
        let config = ServiceConfig::default();
        assert_eq!(config.route_expiration, Duration::from_millis(30_000));
        assert_eq!(config.provider_quote_ttl, Duration::from_millis(15_000));
        assert_eq!(config.default_slippage_bps, 50);
        assert_eq!(config.adapter_timeout, Duration::from_millis(3_000));
        assert_eq!(config.breaker_failure_threshold, 3);
        config.weights.validate().expect("default weights valid");
    }

    #[test]
    fn weights_parse_and_validate() {
        let weights = parse_weights("0.40, 0.25, 0.15, 0.15, 0.05").expect("valid");
        assert!((weights.output_amount - 0.40).abs() < f64::EPSILON);

        assert!(parse_weights("0.5,0.5").is_err());
        assert!(parse_weights("0.5,0.5,0.5,0.5,0.5").is_err());
        assert!(parse_weights("a,b,c,d,e").is_err());
    }
}
