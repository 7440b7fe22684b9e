//! OKX DEX aggregator adapter (authenticated).
//!
//! Every request carries the HMAC signature headers; see `signing` for the
//! canonical pre-hash contract.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Deserialize;
use solroute_commons::error::ErrorCode;
use solroute_commons::secret_store::SecretStore;
use solroute_core::adapter::DexAdapter;
use solroute_core::error::{RouterError, RouterResult};
use solroute_core::model::{
    BuildTransactionRequest, BuiltTransaction, NormalizedQuote, QuoteRequest, RouteStep, SimulationReport, SwapMode,
};

use crate::http::{self, DEFAULT_ADAPTER_TIMEOUT};
use crate::signing;

pub const PROVIDER: &str = "okx";

const DEFAULT_BASE_URL: &str = "https://www.okx.com";
const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
const QUOTE_PATH: &str = "/api/v5/dex/aggregator/quote";
const SWAP_PATH: &str = "/api/v5/dex/aggregator/swap";
const HEALTH_PATH: &str = "/api/v5/public/time";
/// Solana network identifier in the upstream's chain table.
const SOLANA_CHAIN_ID: &str = "501";
/// Upstream error code for request throttling.
const RATE_LIMIT_CODE: &str = "50011";

#[derive(Debug, Clone)]
pub struct OkxCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

impl OkxCredentials {
    /// Pulls the API key triple from the secret store; one missing entry
    /// means the adapter stays unconfigured.
    pub async fn load(secrets: &dyn SecretStore) -> RouterResult<Self> {
        let read = |key: &'static str| async move {
            secrets.get_secret(key).await.map_err(|e| {
                RouterError::from_code(ErrorCode::ConfigError, format!("okx credentials unavailable: {key}"))
                    .with_context(e.to_string())
            })
        };
        Ok(Self {
            api_key: read("OKX_API_KEY").await?,
            secret_key: read("OKX_SECRET_KEY").await?,
            passphrase: read("OKX_PASSPHRASE").await?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OkxConfig {
    pub base_url: String,
    pub rpc_url: String,
    pub chain_id: String,
    pub timeout: Duration,
}

impl Default for OkxConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            chain_id: SOLANA_CHAIN_ID.to_string(),
            timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }
}

pub struct OkxAdapter {
    config: OkxConfig,
    credentials: OkxCredentials,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct WireEnvelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuoteData {
    from_token_amount: String,
    to_token_amount: String,
    #[serde(default)]
    estimate_gas_fee: Option<String>,
    #[serde(default)]
    price_impact_percentage: Option<String>,
    #[serde(default)]
    dex_router_list: Vec<WireDexRouter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDexRouter {
    router: String,
    #[serde(default)]
    sub_router_list: Vec<WireSubRouter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSubRouter {
    #[serde(default)]
    dex_protocol: Vec<WireDexProtocol>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDexProtocol {
    dex_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSwapData {
    tx: WireSwapTx,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSwapTx {
    data: String,
}

/// Basis points to the upstream's decimal-ratio slippage ("0.005" = 50 bps).
fn slippage_ratio(slippage_bps: u32) -> String {
    Decimal::new(slippage_bps as i64, 4).normalize().to_string()
}

/// Minimum acceptable output after slippage, in base units.
fn min_out_after_slippage(out_amount: &str, slippage_bps: u32) -> Option<String> {
    let out: u128 = out_amount.parse().ok()?;
    Some((out * (10_000 - slippage_bps as u128) / 10_000).to_string())
}

fn envelope_error(code: &str, msg: &str) -> RouterError {
    if code == RATE_LIMIT_CODE {
        return RouterError::from_code(ErrorCode::DexRateLimited, format!("{PROVIDER} throttled the request"));
    }
    debug!("[okx] upstream rejection code={} msg={}", code, msg);
    RouterError::from_code(
        ErrorCode::DexInvalidResponse,
        format!("{PROVIDER} rejected the request (code {code})"),
    )
}

fn unwrap_envelope<T>(envelope: WireEnvelope<T>) -> RouterResult<T> {
    if envelope.code != "0" {
        return Err(envelope_error(&envelope.code, &envelope.msg));
    }
    envelope.data.into_iter().next().ok_or_else(|| {
        RouterError::from_code(
            ErrorCode::DexInvalidResponse,
            format!("{PROVIDER} returned an empty result set"),
        )
    })
}

fn normalize(req: &QuoteRequest, data: WireQuoteData, elapsed_ms: u64) -> RouterResult<NormalizedQuote> {
    let router = data.dex_router_list.first().ok_or_else(|| {
        RouterError::from_code(
            ErrorCode::DexInvalidResponse,
            format!("{PROVIDER} returned no routing path"),
        )
    })?;

    let label = router
        .sub_router_list
        .iter()
        .flat_map(|sub| sub.dex_protocol.iter().map(|p| p.dex_name.clone()))
        .collect::<Vec<_>>()
        .join("+");

    let other_amount_threshold =
        min_out_after_slippage(&data.to_token_amount, req.slippage_bps).ok_or_else(|| {
            RouterError::from_code(
                ErrorCode::DexInvalidResponse,
                format!("{PROVIDER} returned a non-numeric output amount"),
            )
        })?;

    // The upstream prices its whole path as one unit, so the plan is a
    // single consolidated hop.
    let step = RouteStep {
        amm_key: router.router.clone(),
        label: if label.is_empty() { None } else { Some(label) },
        input_mint: req.input_mint.clone(),
        output_mint: req.output_mint.clone(),
        in_amount: data.from_token_amount.clone(),
        out_amount: data.to_token_amount.clone(),
        fee_amount: None,
    };

    Ok(NormalizedQuote {
        input_mint: req.input_mint.clone(),
        output_mint: req.output_mint.clone(),
        in_amount: data.from_token_amount,
        out_amount: data.to_token_amount,
        other_amount_threshold,
        swap_mode: SwapMode::ExactIn,
        slippage_bps: req.slippage_bps,
        platform_fee: None,
        price_impact_pct: data.price_impact_percentage.unwrap_or_else(|| "0".to_string()),
        route_plan: vec![step],
        gas_estimate: data.estimate_gas_fee.and_then(|fee| fee.parse().ok()),
        time_taken_ms: elapsed_ms,
        context_slot: None,
    })
}

impl OkxAdapter {
    pub fn new(config: OkxConfig, credentials: OkxCredentials) -> Self {
        let client = http::build_client(config.timeout);
        Self {
            config,
            credentials,
            client,
        }
    }

    fn auth_headers(&self, timestamp: &str, method: &str, request_path: &str, payload: &str) -> [(String, String); 4] {
        let signature = signing::sign(&self.credentials.secret_key, timestamp, method, request_path, payload);
        [
            ("OK-ACCESS-KEY".to_string(), self.credentials.api_key.clone()),
            ("OK-ACCESS-SIGN".to_string(), signature),
            ("OK-ACCESS-TIMESTAMP".to_string(), timestamp.to_string()),
            ("OK-ACCESS-PASSPHRASE".to_string(), self.credentials.passphrase.clone()),
        ]
    }

    async fn signed_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, Option<String>)],
    ) -> RouterResult<T> {
        let query = signing::canonical_query(params);
        let (request_path, payload) = if query.is_empty() {
            (path.to_string(), String::new())
        } else {
            (format!("{path}?{query}"), format!("?{query}"))
        };
        let timestamp = signing::iso_timestamp_millis(chrono::Utc::now());
        let url = format!("{}{}", self.config.base_url, request_path);

        let mut request = self.client.get(&url);
        for (name, value) in self.auth_headers(&timestamp, "GET", path, &payload) {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| http::classify_transport(PROVIDER, &e))?;

        http::read_json(PROVIDER, response).await
    }
}

#[async_trait]
impl DexAdapter for OkxAdapter {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    async fn quote(&self, req: &QuoteRequest) -> RouterResult<NormalizedQuote> {
        let params = [
            ("amount", Some(req.amount.clone())),
            ("chainId", Some(self.config.chain_id.clone())),
            ("fromTokenAddress", Some(req.input_mint.clone())),
            ("toTokenAddress", Some(req.output_mint.clone())),
            ("slippage", Some(slippage_ratio(req.slippage_bps))),
        ];

        let started = Instant::now();
        let envelope: WireEnvelope<WireQuoteData> = self.signed_get(QUOTE_PATH, &params).await?;
        let data = unwrap_envelope(envelope)?;
        normalize(req, data, started.elapsed().as_millis() as u64)
    }

    async fn build_transaction(&self, req: &BuildTransactionRequest) -> RouterResult<BuiltTransaction> {
        if req.options.use_shared_accounts.is_some() {
            // No upstream equivalent; the aggregator manages accounts itself.
            debug!("[okx] ignoring useSharedAccounts, not supported upstream");
        }
        let params = [
            ("amount", Some(req.quote.in_amount.clone())),
            ("chainId", Some(self.config.chain_id.clone())),
            ("fromTokenAddress", Some(req.quote.input_mint.clone())),
            ("toTokenAddress", Some(req.quote.output_mint.clone())),
            ("slippage", Some(slippage_ratio(req.quote.slippage_bps))),
            ("userWalletAddress", Some(req.user_public_key.clone())),
            (
                "wrapUnwrapSol",
                req.options.wrap_and_unwrap_sol.map(|flag| flag.to_string()),
            ),
            ("feeAccount", req.options.fee_account.clone()),
            (
                "computeUnitPrice",
                req.options.compute_unit_price_micro_lamports.map(|p| p.to_string()),
            ),
            (
                "legacyTransaction",
                req.options.as_legacy_transaction.map(|flag| flag.to_string()),
            ),
        ];

        let envelope: WireEnvelope<WireSwapData> = self.signed_get(SWAP_PATH, &params).await?;
        let data = unwrap_envelope(envelope)?;
        if data.tx.data.is_empty() {
            return Err(RouterError::from_code(
                ErrorCode::DexInvalidResponse,
                format!("{PROVIDER} returned an empty transaction"),
            ));
        }
        Ok(BuiltTransaction {
            swap_transaction: data.tx.data,
            last_valid_block_height: None,
            prioritization_fee_lamports: req.options.compute_unit_price_micro_lamports,
        })
    }

    async fn simulate_transaction(&self, tx_base64: &str, _user_public_key: &str) -> RouterResult<SimulationReport> {
        http::simulate_transaction_rpc(&self.client, &self.config.rpc_url, PROVIDER, tx_base64).await
    }

    async fn is_healthy(&self) -> bool {
        let url = format!("{}{}", self.config.base_url, HEALTH_PATH);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!("[okx] health probe failed: {}", err);
                false
            }
        }
    }
}
