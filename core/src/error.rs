use serde::Serialize;
use solroute_commons::error::{CodedError, ErrorCode};
use thiserror::Error;

pub type RouterResult<T> = Result<T, RouterError>;

/// Error carried across the routing core.
///
/// Clone is required so a single factory failure can be broadcast to every
/// coalesced waiter. `details` carries per-branch causes when a fan-out
/// fails wholesale; messages never echo raw upstream payloads.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct RouterError {
    code: ErrorCodeRepr,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

/// Serialized view of `ErrorCode` (the commons enum stays serde-free).
#[derive(Debug, Clone, Copy)]
struct ErrorCodeRepr(ErrorCode);

impl Serialize for ErrorCodeRepr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.0.as_str())
    }
}

impl RouterError {
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCodeRepr(code),
            message: message.into(),
            context: None,
            details: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code.0
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn details(&self) -> &[String] {
        &self.details
    }

    // Frequent constructors; the long tail goes through `from_code`.

    pub fn route_not_found(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::RouteNotFound, message)
    }

    pub fn route_expired(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::RouteExpired, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::InvalidInput, message)
    }

    pub fn circuit_open(service: &str, operation: &str) -> Self {
        Self::from_code(
            ErrorCode::CircuitBreakerOpen,
            format!("circuit open for {service}/{operation}"),
        )
    }

    pub fn external_service(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::ExternalServiceError, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::DatabaseError, message)
    }
}

impl CodedError for RouterError {
    fn code(&self) -> ErrorCode {
        self.code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_code_context_and_details() {
        let err = RouterError::route_not_found("no routes for pair")
            .with_context("SOL->USDC")
            .with_details(vec!["jupiter: DEX_RATE_LIMITED".to_string()]);

        assert_eq!(err.code(), ErrorCode::RouteNotFound);
        assert_eq!(err.to_string(), "no routes for pair");
        assert_eq!(err.context(), Some("SOL->USDC"));
        assert_eq!(err.details().len(), 1);
    }

    #[test]
    fn serializes_wire_code() {
        let err = RouterError::from_code(ErrorCode::DexRateLimited, "upstream throttled");
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["code"], "DEX_RATE_LIMITED");
        assert_eq!(json["message"], "upstream throttled");
    }
}
