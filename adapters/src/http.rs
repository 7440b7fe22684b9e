//! Shared HTTP plumbing for upstream adapters: pooled client construction,
//! status/transport classification, and the Solana JSON-RPC simulation
//! call both adapters reuse.

use std::time::Duration;

use log::warn;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use solroute_commons::error::ErrorCode;
use solroute_core::error::{RouterError, RouterResult};
use solroute_core::model::SimulationReport;

pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(3);

/// One pooled client per adapter; requests inherit the per-adapter timeout.
pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        warn!("Failed to build reqwest client with timeout: {}, using default", e);
        reqwest::Client::new()
    })
}

/// Maps a non-success HTTP status to the upstream error taxonomy.
/// 429 is rate limiting, other 4xx means we sent something the upstream
/// rejects (non-retryable), 5xx means the upstream is down.
pub fn classify_status(provider: &str, status: reqwest::StatusCode) -> RouterError {
    let code = if status.as_u16() == 429 {
        ErrorCode::DexRateLimited
    } else if status.is_client_error() {
        ErrorCode::DexInvalidResponse
    } else {
        ErrorCode::DexUnavailable
    };
    RouterError::from_code(code, format!("{provider} returned HTTP {}", status.as_u16()))
}

/// Maps a transport-level failure. Timeouts get their own code so the
/// breaker and callers can distinguish slow from broken.
pub fn classify_transport(provider: &str, err: &reqwest::Error) -> RouterError {
    if err.is_timeout() {
        RouterError::from_code(
            ErrorCode::TransactionTimeout,
            format!("{provider} request timed out"),
        )
    } else {
        RouterError::from_code(ErrorCode::DexUnavailable, format!("{provider} is unreachable"))
    }
}

/// Checks the status and decodes the body. Malformed or empty payloads are
/// `DEX_INVALID_RESPONSE`; the raw body is never echoed into the error.
pub async fn read_json<T: DeserializeOwned>(provider: &str, response: reqwest::Response) -> RouterResult<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(classify_status(provider, status));
    }
    response.json::<T>().await.map_err(|_| {
        RouterError::from_code(
            ErrorCode::DexInvalidResponse,
            format!("{provider} returned a malformed payload"),
        )
    })
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<RpcResult>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResult {
    value: RpcSimulationValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcSimulationValue {
    err: Option<serde_json::Value>,
    logs: Option<Vec<String>>,
    units_consumed: Option<u64>,
}

/// Dry-runs a signed-ready transaction blob against a Solana RPC node.
/// Both adapters hand out Solana transactions, so the simulation path is
/// identical for them.
pub async fn simulate_transaction_rpc(
    client: &reqwest::Client,
    rpc_url: &str,
    provider: &str,
    tx_base64: &str,
) -> RouterResult<SimulationReport> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "simulateTransaction",
        "params": [
            tx_base64,
            { "encoding": "base64", "sigVerify": false, "replaceRecentBlockhash": true }
        ]
    });

    let response = client
        .post(rpc_url)
        .json(&body)
        .send()
        .await
        .map_err(|e| classify_transport(provider, &e))?;
    let envelope: RpcEnvelope = read_json(provider, response).await?;

    if let Some(err) = envelope.error {
        return Err(RouterError::from_code(
            ErrorCode::DexInvalidResponse,
            format!("{provider} simulation rejected: {}", err.message),
        ));
    }
    let value = envelope
        .result
        .ok_or_else(|| {
            RouterError::from_code(
                ErrorCode::DexInvalidResponse,
                format!("{provider} simulation returned no result"),
            )
        })?
        .value;

    Ok(SimulationReport {
        success: value.err.is_none(),
        error: value.err.map(|e| e.to_string()),
        compute_units_consumed: value.units_consumed,
        logs: value.logs.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_follows_the_taxonomy() {
        let too_many = classify_status("jupiter", reqwest::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(too_many.code(), ErrorCode::DexRateLimited);

        let bad_request = classify_status("jupiter", reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(bad_request.code(), ErrorCode::DexInvalidResponse);

        let unavailable = classify_status("jupiter", reqwest::StatusCode::BAD_GATEWAY);
        assert_eq!(unavailable.code(), ErrorCode::DexUnavailable);
    }

    #[test]
    fn simulation_value_decodes_rpc_shapes() {
        let ok: RpcEnvelope = serde_json::from_value(json!({
            "result": { "value": { "err": null, "logs": ["Program log: ok"], "unitsConsumed": 5123 } }
        }))
        .expect("decode");
        let value = ok.result.expect("result").value;
        assert!(value.err.is_none());
        assert_eq!(value.units_consumed, Some(5123));

        let failed: RpcEnvelope = serde_json::from_value(json!({
            "result": { "value": { "err": { "InstructionError": [0, "Custom"] }, "logs": [] } }
        }))
        .expect("decode");
        assert!(failed.result.expect("result").value.err.is_some());
    }
}
