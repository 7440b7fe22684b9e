use diesel::prelude::*;

use super::schema::{quote_records, swap_transactions};

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = quote_records)]
pub struct QuoteRecordRow {
    pub quote_id: String,
    pub provider: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    pub price_impact_pct: String,
    pub route_data: String,
    pub fee_amount: Option<String>,
    pub gas_estimate: Option<i64>,
    pub response_time_ms: i64,
    pub is_cached: i32,
    pub created_at: i64,
    pub expires_at: i64,
    pub efficiency_score: Option<f64>,
    pub reliability_score: Option<f64>,
    pub slippage_bps: i32,
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = swap_transactions)]
pub struct SwapTransactionRow {
    pub tx_id: String,
    pub user_public_key: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    pub min_out_amount: String,
    pub slippage_bps: i32,
    pub provider: String,
    pub status: i32,
    pub tx_hash: Option<String>,
    pub route_data: String,
    pub fee_amount: Option<String>,
    pub gas_estimate: Option<i64>,
    pub execution_time_ms: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
}
