use async_trait::async_trait;

use crate::error::{CodedError, ErrorCode};

#[derive(thiserror::Error, Debug)]
pub enum SecretError {
    #[error("secret not found: {key}")]
    NotFound { key: String },
    #[error("secret backend error: {message}")]
    Backend { message: String },
}

impl CodedError for SecretError {
    fn code(&self) -> ErrorCode {
        ErrorCode::ConfigError
    }
}

/// Lookup seam for upstream API credentials, so adapter keys can come from
/// env today and a vault later without touching adapter code.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, key: &str) -> Result<String, SecretError>;

    /// Missing secrets collapse to `None`; backend failures still surface.
    async fn get_secret_opt(&self, key: &str) -> Result<Option<String>, SecretError> {
        match self.get_secret(key).await {
            Ok(value) => Ok(Some(value)),
            Err(SecretError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Environment-backed store; empty values count as missing so a blank
/// `OKX_API_KEY=` line does not read as a configured credential.
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, key: &str) -> Result<String, SecretError> {
        match std::env::var(key) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(SecretError::NotFound { key: key.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn env_store_reads_present_vars_and_rejects_missing_or_blank() {
        let key = format!("SOLROUTE_SECRET_TEST_{}", std::process::id());
        unsafe { std::env::set_var(&key, "s3cret") };
        assert_eq!(EnvSecretStore.get_secret(&key).await.expect("present"), "s3cret");
        assert_eq!(
            EnvSecretStore.get_secret_opt(&key).await.expect("present"),
            Some("s3cret".to_string())
        );

        unsafe { std::env::set_var(&key, "  ") };
        assert!(matches!(
            EnvSecretStore.get_secret(&key).await,
            Err(SecretError::NotFound { .. })
        ));

        unsafe { std::env::remove_var(&key) };
        assert_eq!(EnvSecretStore.get_secret_opt(&key).await.expect("absent"), None);
    }
}
