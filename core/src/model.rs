use serde::{Deserialize, Serialize};
use solroute_commons::error::ErrorCode;

use crate::error::{RouterError, RouterResult};

pub const DEFAULT_SLIPPAGE_BPS: u32 = 50;
pub const MAX_SLIPPAGE_BPS: u32 = 10_000;
pub const DEFAULT_MAX_ALTERNATIVES: usize = 3;
pub const MAX_ALTERNATIVES_CAP: usize = 10;

/// Normalized routing request, validated before it reaches the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Base-unit amount as a decimal string; bounded by u64::MAX.
    pub amount: String,
    pub slippage_bps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_public_key: Option<String>,
    #[serde(default)]
    pub favor_low_latency: bool,
    pub max_alternatives: usize,
}

impl QuoteRequest {
    pub fn new(input_mint: impl Into<String>, output_mint: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            input_mint: input_mint.into(),
            output_mint: output_mint.into(),
            amount: amount.into(),
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            user_public_key: None,
            favor_low_latency: false,
            max_alternatives: DEFAULT_MAX_ALTERNATIVES,
        }
    }

    /// Enforces the request invariants and returns the parsed amount.
    pub fn validate(&self) -> RouterResult<u64> {
        if self.input_mint.trim().is_empty() || self.output_mint.trim().is_empty() {
            return Err(RouterError::invalid_input("inputMint and outputMint are required"));
        }
        if self.input_mint == self.output_mint {
            return Err(RouterError::invalid_input("inputMint and outputMint must differ"));
        }
        let amount: u128 = self
            .amount
            .parse()
            .map_err(|_| RouterError::from_code(ErrorCode::InvalidAmount, "amount must be a decimal integer"))?;
        if amount < 1 {
            return Err(RouterError::from_code(
                ErrorCode::AmountTooSmall,
                "amount must be at least 1",
            ));
        }
        if amount > u64::MAX as u128 {
            return Err(RouterError::from_code(
                ErrorCode::AmountTooLarge,
                "amount exceeds the 64-bit base-unit bound",
            ));
        }
        if self.slippage_bps == 0 {
            return Err(RouterError::invalid_input("slippageBps must be at least 1"));
        }
        if self.slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(RouterError::from_code(
                ErrorCode::SlippageTooHigh,
                format!("slippageBps must not exceed {MAX_SLIPPAGE_BPS}"),
            ));
        }
        if self.max_alternatives > MAX_ALTERNATIVES_CAP {
            return Err(RouterError::invalid_input(format!(
                "maxRoutes must not exceed {MAX_ALTERNATIVES_CAP}"
            )));
        }
        Ok(amount as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapMode {
    ExactIn,
    ExactOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformFee {
    /// Fee in base units of the output asset, decimal string.
    pub amount: String,
    pub fee_bps: u32,
}

/// One hop of a route plan: a single AMM/pool with its in/out amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStep {
    pub amm_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_amount: Option<String>,
}

/// Adapter-agnostic quote shape the engine scores and ranks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedQuote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    /// Minimum acceptable output after slippage.
    pub other_amount_threshold: String,
    pub swap_mode: SwapMode,
    pub slippage_bps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_fee: Option<PlatformFee>,
    pub price_impact_pct: String,
    pub route_plan: Vec<RouteStep>,
    /// Upstream-reported compute budget, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_estimate: Option<u64>,
    /// Quote generation time as observed by the upstream, in ms.
    pub time_taken_ms: u64,
    /// Opaque freshness hint (slot / block height).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_slot: Option<u64>,
}

impl NormalizedQuote {
    pub fn out_amount_u128(&self) -> Option<u128> {
        self.out_amount.parse().ok()
    }

    /// A route plan is well-formed when its hop amounts telescope from the
    /// quote input to the quote output.
    pub fn route_plan_telescopes(&self) -> bool {
        let Some(first) = self.route_plan.first() else {
            return false;
        };
        let Some(last) = self.route_plan.last() else {
            return false;
        };
        if first.in_amount != self.in_amount || last.out_amount != self.out_amount {
            return false;
        }
        for pair in self.route_plan.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.out_amount != next.in_amount || prev.output_mint != next.input_mint {
                return false;
            }
        }
        self.route_plan
            .iter()
            .all(|step| step.in_amount.parse::<u128>().is_ok() && step.out_amount.parse::<u128>().is_ok())
    }
}

/// Sub-scores in [0,1]. Lower-is-better dimensions (fees, gas, latency)
/// store the normalized magnitude; the weighting inverts them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteScore {
    pub output_amount: f64,
    pub fees: f64,
    pub gas_estimate: f64,
    pub latency: f64,
    pub reliability: f64,
    pub total_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedQuote {
    pub provider: String,
    #[serde(flatten)]
    pub quote: NormalizedQuote,
    pub response_time_ms: u64,
    pub score: RouteScore,
    pub is_cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    pub best_route: RankedQuote,
    pub alternatives: Vec<RankedQuote>,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<String>,
    pub total_response_time_ms: u64,
    pub cache_hit_ratio: f64,
}

/// Immutable analytics record persisted for each successful route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecord {
    pub id: String,
    pub provider: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    pub price_impact_pct: String,
    /// Serialized route plan plus scoring context.
    pub route_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_estimate: Option<u64>,
    pub response_time_ms: u64,
    pub is_cached: bool,
    pub created_at: i64,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efficiency_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reliability_score: Option<f64>,
    pub slippage_bps: u32,
}

impl QuoteRecord {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum SwapStatus {
    Pending = 0,
    Completed = 1,
    Failed = 2,
    Expired = 3,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SwapStatus::Pending)
    }

    /// Status moves monotonically: PENDING may move to any terminal state,
    /// terminal states never re-open.
    pub fn can_transition_to(self, next: SwapStatus) -> bool {
        match self {
            SwapStatus::Pending => next != SwapStatus::Pending,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwapStatus::Pending => "PENDING",
            SwapStatus::Completed => "COMPLETED",
            SwapStatus::Failed => "FAILED",
            SwapStatus::Expired => "EXPIRED",
        }
    }
}

/// Lifecycle record for one swap execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTransactionRecord {
    pub id: String,
    pub user_public_key: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    pub min_out_amount: String,
    pub slippage_bps: u32,
    pub provider: String,
    pub status: SwapStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Quote + build request + returned transaction blob, for audit.
    pub route_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_estimate: Option<u64>,
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

/// Build-phase options forwarded to the selected adapter. Mapping to the
/// upstream wire format is the adapter's concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_and_unwrap_sol: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_shared_accounts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_unit_price_micro_lamports: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_legacy_transaction: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTransactionRequest {
    pub quote: NormalizedQuote,
    pub user_public_key: String,
    #[serde(default)]
    pub options: BuildOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltTransaction {
    /// Base64-encoded, signed-ready transaction blob from the upstream.
    pub swap_transaction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_valid_block_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prioritization_fee_lamports: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_units_consumed: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> QuoteRequest {
        QuoteRequest::new("So11111111111111111111111111111111111111112", "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", "1000000000")
    }

    #[test]
    fn valid_request_passes() {
        assert_eq!(request().validate().expect("valid"), 1_000_000_000);
    }

    #[test]
    fn same_mint_pair_is_rejected() {
        let mut req = request();
        req.output_mint = req.input_mint.clone();
        let err = req.validate().expect_err("must fail");
        assert_eq!(err.code(), solroute_commons::error::ErrorCode::InvalidInput);
    }

    #[test]
    fn amount_bounds_are_enforced() {
        let mut req = request();
        req.amount = "0".to_string();
        assert_eq!(
            req.validate().expect_err("zero").code(),
            solroute_commons::error::ErrorCode::AmountTooSmall
        );

        req.amount = "18446744073709551616".to_string(); // u64::MAX + 1
        assert_eq!(
            req.validate().expect_err("huge").code(),
            solroute_commons::error::ErrorCode::AmountTooLarge
        );

        req.amount = "not-a-number".to_string();
        assert_eq!(
            req.validate().expect_err("garbage").code(),
            solroute_commons::error::ErrorCode::InvalidAmount
        );
    }

    #[test]
    fn slippage_bounds_are_enforced() {
        let mut req = request();
        req.slippage_bps = 10_001;
        assert_eq!(
            req.validate().expect_err("too high").code(),
            solroute_commons::error::ErrorCode::SlippageTooHigh
        );
        req.slippage_bps = 0;
        assert_eq!(
            req.validate().expect_err("zero").code(),
            solroute_commons::error::ErrorCode::InvalidInput
        );
    }

    fn quote_with_plan(steps: Vec<RouteStep>) -> NormalizedQuote {
        NormalizedQuote {
            input_mint: "SOL".to_string(),
            output_mint: "USDC".to_string(),
            in_amount: "1000".to_string(),
            out_amount: "950".to_string(),
            other_amount_threshold: "940".to_string(),
            swap_mode: SwapMode::ExactIn,
            slippage_bps: 50,
            platform_fee: None,
            price_impact_pct: "0.01".to_string(),
            route_plan: steps,
            gas_estimate: None,
            time_taken_ms: 12,
            context_slot: None,
        }
    }

    fn step(amm: &str, im: &str, om: &str, ia: &str, oa: &str) -> RouteStep {
        RouteStep {
            amm_key: amm.to_string(),
            label: None,
            input_mint: im.to_string(),
            output_mint: om.to_string(),
            in_amount: ia.to_string(),
            out_amount: oa.to_string(),
            fee_amount: None,
        }
    }

    #[test]
    fn telescoping_plan_is_accepted() {
        let q = quote_with_plan(vec![
            step("pool-a", "SOL", "RAY", "1000", "400"),
            step("pool-b", "RAY", "USDC", "400", "950"),
        ]);
        assert!(q.route_plan_telescopes());
    }

    #[test]
    fn empty_or_broken_plan_is_rejected() {
        assert!(!quote_with_plan(vec![]).route_plan_telescopes());

        let broken = quote_with_plan(vec![
            step("pool-a", "SOL", "RAY", "1000", "400"),
            step("pool-b", "RAY", "USDC", "399", "950"),
        ]);
        assert!(!broken.route_plan_telescopes());

        let wrong_edges = quote_with_plan(vec![step("pool-a", "SOL", "USDC", "999", "950")]);
        assert!(!wrong_edges.route_plan_telescopes());
    }

    #[test]
    fn swap_status_is_monotone() {
        assert!(SwapStatus::Pending.can_transition_to(SwapStatus::Completed));
        assert!(SwapStatus::Pending.can_transition_to(SwapStatus::Failed));
        assert!(SwapStatus::Pending.can_transition_to(SwapStatus::Expired));
        assert!(!SwapStatus::Completed.can_transition_to(SwapStatus::Failed));
        assert!(!SwapStatus::Failed.can_transition_to(SwapStatus::Pending));
        assert!(!SwapStatus::Expired.can_transition_to(SwapStatus::Completed));
    }
}
