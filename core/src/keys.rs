//! Stable cache/coalesce fingerprints.
//!
//! Keys are flat strings prefixed by type; the first `:` segment is the
//! cache-type label used by metrics.

pub fn quote_key(input_mint: &str, output_mint: &str, amount: &str, slippage_bps: u32) -> String {
    format!("quote:{input_mint}:{output_mint}:{amount}:{slippage_bps}")
}

pub fn route_key(input_mint: &str, output_mint: &str, amount: &str) -> String {
    format!("route:{input_mint}:{output_mint}:{amount}")
}

pub fn provider_quote_key(
    provider: &str,
    input_mint: &str,
    output_mint: &str,
    amount: &str,
    slippage_bps: u32,
) -> String {
    format!("provider_quote:{provider}:{input_mint}:{output_mint}:{amount}:{slippage_bps}")
}

/// Cache-type label for metrics: everything before the first `:`.
pub fn cache_type(key: &str) -> &str {
    key.split(':').next().unwrap_or("unknown")
}
