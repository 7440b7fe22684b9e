diesel::table! {
    quote_records (quote_id) {
        quote_id -> Text,
        provider -> Text,
        input_mint -> Text,
        output_mint -> Text,
        in_amount -> Text,
        out_amount -> Text,
        price_impact_pct -> Text,
        route_data -> Text,
        fee_amount -> Nullable<Text>,
        gas_estimate -> Nullable<BigInt>,
        response_time_ms -> BigInt,
        is_cached -> Integer,
        created_at -> BigInt,
        expires_at -> BigInt,
        efficiency_score -> Nullable<Double>,
        reliability_score -> Nullable<Double>,
        slippage_bps -> Integer,
    }
}

diesel::table! {
    swap_transactions (tx_id) {
        tx_id -> Text,
        user_public_key -> Text,
        input_mint -> Text,
        output_mint -> Text,
        in_amount -> Text,
        out_amount -> Text,
        min_out_amount -> Text,
        slippage_bps -> Integer,
        provider -> Text,
        status -> Integer,
        tx_hash -> Nullable<Text>,
        route_data -> Text,
        fee_amount -> Nullable<Text>,
        gas_estimate -> Nullable<BigInt>,
        execution_time_ms -> Nullable<BigInt>,
        error_code -> Nullable<Text>,
        error_message -> Nullable<Text>,
        created_at -> BigInt,
        updated_at -> BigInt,
        expires_at -> BigInt,
    }
}
