//! Jupiter v6 aggregator adapter (public, unauthenticated).

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use solroute_commons::error::ErrorCode;
use solroute_core::adapter::DexAdapter;
use solroute_core::error::{RouterError, RouterResult};
use solroute_core::model::{
    BuildTransactionRequest, BuiltTransaction, NormalizedQuote, PlatformFee, QuoteRequest, RouteStep,
    SimulationReport, SwapMode,
};

use crate::http::{self, DEFAULT_ADAPTER_TIMEOUT};

pub const PROVIDER: &str = "jupiter";

const DEFAULT_BASE_URL: &str = "https://quote-api.jup.ag/v6";
const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

#[derive(Debug, Clone)]
pub struct JupiterConfig {
    pub base_url: String,
    /// Solana RPC endpoint used for transaction simulation.
    pub rpc_url: String,
    pub timeout: Duration,
}

impl Default for JupiterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }
}

pub struct JupiterAdapter {
    config: JupiterConfig,
    client: reqwest::Client,
}

// Wire shapes for the v6 /quote and /swap endpoints.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuote {
    input_mint: String,
    in_amount: String,
    output_mint: String,
    out_amount: String,
    other_amount_threshold: String,
    swap_mode: String,
    slippage_bps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform_fee: Option<WirePlatformFee>,
    price_impact_pct: String,
    route_plan: Vec<WireRoutePlanStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_slot: Option<u64>,
    /// Seconds, as reported by the upstream.
    #[serde(default)]
    time_taken: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePlatformFee {
    amount: String,
    fee_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRoutePlanStep {
    swap_info: WireSwapInfo,
    percent: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSwapInfo {
    amm_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    input_mint: String,
    output_mint: String,
    in_amount: String,
    out_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fee_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fee_mint: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSwapRequest {
    quote_response: WireQuote,
    user_public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    wrap_and_unwrap_sol: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_shared_accounts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fee_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compute_unit_price_micro_lamports: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    as_legacy_transaction: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSwapResponse {
    swap_transaction: String,
    #[serde(default)]
    last_valid_block_height: Option<u64>,
    #[serde(default)]
    prioritization_fee_lamports: Option<u64>,
}

fn parse_swap_mode(mode: &str) -> RouterResult<SwapMode> {
    match mode {
        "ExactIn" => Ok(SwapMode::ExactIn),
        "ExactOut" => Ok(SwapMode::ExactOut),
        _ => Err(RouterError::from_code(
            ErrorCode::DexInvalidResponse,
            format!("{PROVIDER} returned unknown swap mode"),
        )),
    }
}

fn normalize(wire: WireQuote) -> RouterResult<NormalizedQuote> {
    if wire.route_plan.is_empty() {
        return Err(RouterError::from_code(
            ErrorCode::DexInvalidResponse,
            format!("{PROVIDER} returned an empty route plan"),
        ));
    }
    let swap_mode = parse_swap_mode(&wire.swap_mode)?;
    Ok(NormalizedQuote {
        input_mint: wire.input_mint,
        output_mint: wire.output_mint,
        in_amount: wire.in_amount,
        out_amount: wire.out_amount,
        other_amount_threshold: wire.other_amount_threshold,
        swap_mode,
        slippage_bps: wire.slippage_bps,
        platform_fee: wire.platform_fee.map(|fee| PlatformFee {
            amount: fee.amount,
            fee_bps: fee.fee_bps,
        }),
        price_impact_pct: wire.price_impact_pct,
        route_plan: wire
            .route_plan
            .into_iter()
            .map(|step| RouteStep {
                amm_key: step.swap_info.amm_key,
                label: step.swap_info.label,
                input_mint: step.swap_info.input_mint,
                output_mint: step.swap_info.output_mint,
                in_amount: step.swap_info.in_amount,
                out_amount: step.swap_info.out_amount,
                fee_amount: step.swap_info.fee_amount,
            })
            .collect(),
        gas_estimate: None,
        time_taken_ms: (wire.time_taken * 1000.0).round().max(0.0) as u64,
        context_slot: wire.context_slot,
    })
}

/// The /swap endpoint wants the quote back in its own wire shape.
fn to_wire_quote(quote: &NormalizedQuote) -> WireQuote {
    WireQuote {
        input_mint: quote.input_mint.clone(),
        in_amount: quote.in_amount.clone(),
        output_mint: quote.output_mint.clone(),
        out_amount: quote.out_amount.clone(),
        other_amount_threshold: quote.other_amount_threshold.clone(),
        swap_mode: match quote.swap_mode {
            SwapMode::ExactIn => "ExactIn".to_string(),
            SwapMode::ExactOut => "ExactOut".to_string(),
        },
        slippage_bps: quote.slippage_bps,
        platform_fee: quote.platform_fee.as_ref().map(|fee| WirePlatformFee {
            amount: fee.amount.clone(),
            fee_bps: fee.fee_bps,
        }),
        price_impact_pct: quote.price_impact_pct.clone(),
        route_plan: quote
            .route_plan
            .iter()
            .map(|step| WireRoutePlanStep {
                swap_info: WireSwapInfo {
                    amm_key: step.amm_key.clone(),
                    label: step.label.clone(),
                    input_mint: step.input_mint.clone(),
                    output_mint: step.output_mint.clone(),
                    in_amount: step.in_amount.clone(),
                    out_amount: step.out_amount.clone(),
                    fee_amount: step.fee_amount.clone(),
                    fee_mint: None,
                },
                percent: 100,
            })
            .collect(),
        context_slot: quote.context_slot,
        time_taken: quote.time_taken_ms as f64 / 1000.0,
    }
}

impl JupiterAdapter {
    pub fn new(config: JupiterConfig) -> Self {
        let client = http::build_client(config.timeout);
        Self { config, client }
    }
}

#[async_trait]
impl DexAdapter for JupiterAdapter {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    async fn quote(&self, req: &QuoteRequest) -> RouterResult<NormalizedQuote> {
        let url = format!("{}/quote", self.config.base_url);
        debug!(
            "[jupiter] quote {} -> {} amount={}",
            req.input_mint, req.output_mint, req.amount
        );
        let slippage_bps = req.slippage_bps.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("inputMint", req.input_mint.as_str()),
                ("outputMint", req.output_mint.as_str()),
                ("amount", req.amount.as_str()),
                ("slippageBps", slippage_bps.as_str()),
            ])
            .send()
            .await
            .map_err(|e| http::classify_transport(PROVIDER, &e))?;

        let wire: WireQuote = http::read_json(PROVIDER, response).await?;
        normalize(wire)
    }

    async fn build_transaction(&self, req: &BuildTransactionRequest) -> RouterResult<BuiltTransaction> {
        let url = format!("{}/swap", self.config.base_url);
        let body = WireSwapRequest {
            quote_response: to_wire_quote(&req.quote),
            user_public_key: req.user_public_key.clone(),
            wrap_and_unwrap_sol: req.options.wrap_and_unwrap_sol,
            use_shared_accounts: req.options.use_shared_accounts,
            fee_account: req.options.fee_account.clone(),
            compute_unit_price_micro_lamports: req.options.compute_unit_price_micro_lamports,
            as_legacy_transaction: req.options.as_legacy_transaction,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::classify_transport(PROVIDER, &e))?;

        let wire: WireSwapResponse = http::read_json(PROVIDER, response).await?;
        if wire.swap_transaction.is_empty() {
            return Err(RouterError::from_code(
                ErrorCode::DexInvalidResponse,
                format!("{PROVIDER} returned an empty transaction"),
            ));
        }
        Ok(BuiltTransaction {
            swap_transaction: wire.swap_transaction,
            last_valid_block_height: wire.last_valid_block_height,
            prioritization_fee_lamports: wire.prioritization_fee_lamports,
        })
    }

    async fn simulate_transaction(&self, tx_base64: &str, _user_public_key: &str) -> RouterResult<SimulationReport> {
        http::simulate_transaction_rpc(&self.client, &self.config.rpc_url, PROVIDER, tx_base64).await
    }

    async fn is_healthy(&self) -> bool {
        match self.client.get(&self.config.base_url).send().await {
            Ok(response) => response.status().as_u16() < 500,
            Err(_) => false,
        }
    }
}
