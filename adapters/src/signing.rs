//! Request signing for the authenticated upstream.
//!
//! The upstream authenticates a canonical pre-hash string
//! `timestamp + METHOD + path_with_prefix + (query | json_body)` with
//! HMAC-SHA256 over the secret key, base64-encoded. The pre-hash must be
//! byte-identical to what the server reconstructs: parameters are
//! serialized in sorted order and absent values are omitted before
//! signing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// ISO-8601 with millisecond precision and a trailing `Z`, the exact
/// format the upstream expects in `OK-ACCESS-TIMESTAMP`.
pub fn iso_timestamp_millis(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Deterministic query string: keys sorted, `None` values omitted.
/// Returns an empty string when nothing remains.
pub fn canonical_query(params: &[(&str, Option<String>)]) -> String {
    let mut present: Vec<(&str, &str)> = params
        .iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (*key, v)))
        .collect();
    present.sort_by(|a, b| a.0.cmp(b.0));
    present
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// The canonical pre-hash string. `payload` is `?query` for GET requests
/// and the JSON body for POST requests; empty for neither.
pub fn canonical_prehash(timestamp: &str, method: &str, request_path: &str, payload: &str) -> String {
    format!("{timestamp}{method}{request_path}{payload}")
}

/// base64(HMAC-SHA256(prehash, secret)).
pub fn sign(secret: &str, timestamp: &str, method: &str, request_path: &str, payload: &str) -> String {
    let prehash = canonical_prehash(timestamp, method, request_path, payload);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(prehash.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "test-secret-key";
    const TIMESTAMP: &str = "2024-01-15T09:30:45.123Z";

    #[test]
    fn timestamp_is_millisecond_truncated_with_z() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 45).unwrap() + chrono::Duration::milliseconds(123);
        assert_eq!(iso_timestamp_millis(at), TIMESTAMP);
    }

    #[test]
    fn canonical_query_sorts_and_omits_absent_values() {
        let query = canonical_query(&[
            ("slippage", Some("0.005".to_string())),
            ("amount", Some("1000000000".to_string())),
            ("feeAccount", None),
            ("chainId", Some("501".to_string())),
        ]);
        assert_eq!(query, "amount=1000000000&chainId=501&slippage=0.005");

        assert_eq!(canonical_query(&[("a", None)]), "");
    }

    #[test]
    fn prehash_is_a_pure_function_of_its_parts() {
        let prehash = canonical_prehash(
            TIMESTAMP,
            "GET",
            "/api/v5/dex/aggregator/quote",
            "?amount=1000000000&chainId=501&slippage=0.005",
        );
        assert_eq!(
            prehash,
            "2024-01-15T09:30:45.123ZGET/api/v5/dex/aggregator/quote?amount=1000000000&chainId=501&slippage=0.005"
        );
    }

    #[test]
    fn get_signature_reproduces_known_fixture() {
        let signature = sign(
            SECRET,
            TIMESTAMP,
            "GET",
            "/api/v5/dex/aggregator/quote",
            "?amount=1000000000&chainId=501&slippage=0.005",
        );
        assert_eq!(signature, "1D7jGqdduUWU6+E9SkU7j7KFHVQgBfJNg7MwSTFmL+0=");
    }

    #[test]
    fn post_signature_covers_the_json_body() {
        let signature = sign(
            SECRET,
            TIMESTAMP,
            "POST",
            "/api/v5/dex/aggregator/swap",
            r#"{"amount":"1000000000","userWalletAddress":"abc"}"#,
        );
        assert_eq!(signature, "dIdQtOWRHgz3rAsINWVwtchbO1RNV/D5/bVAMOVmDX0=");
    }

    #[test]
    fn different_payloads_produce_different_signatures() {
        let a = sign(SECRET, TIMESTAMP, "GET", "/api/v5/dex/aggregator/quote", "?amount=1");
        let b = sign(SECRET, TIMESTAMP, "GET", "/api/v5/dex/aggregator/quote", "?amount=2");
        assert_ne!(a, b);
    }
}
