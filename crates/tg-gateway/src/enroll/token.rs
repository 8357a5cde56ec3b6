//! Enrollment token validation
//!
//! Tokens are one-time credentials minted by the control plane. The
//! gateway only asks pass/fail: either against the control plane's
//! validation endpoint or, for standalone deployments, against a static
//! token from configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use tg_core::error::AuthError;

/// Pass/fail check for an enrollment token.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<bool, AuthError>;
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    shared_secret: Option<&'a str>,
}

#[derive(Deserialize)]
struct ValidateResponse {
    valid: bool,
}

/// Validator that defers to the control plane's token endpoint.
pub struct HttpTokenValidator {
    endpoint: String,
    shared_secret: Option<String>,
    client: reqwest::Client,
}

impl HttpTokenValidator {
    pub fn new(endpoint: String, shared_secret: Option<String>) -> Self {
        Self {
            endpoint,
            shared_secret,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TokenValidator for HttpTokenValidator {
    async fn validate(&self, token: &str) -> Result<bool, AuthError> {
        let body = ValidateRequest {
            token,
            shared_secret: self.shared_secret.as_deref(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::ValidatorUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::ValidatorUnavailable(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let parsed: ValidateResponse = response
            .json()
            .await
            .map_err(|e| AuthError::ValidatorUnavailable(e.to_string()))?;

        Ok(parsed.valid)
    }
}

/// Validator used when no token source is configured. Refuses every
/// attempt, so a misconfigured gateway cannot enroll anyone.
pub struct DisabledValidator;

#[async_trait]
impl TokenValidator for DisabledValidator {
    async fn validate(&self, _token: &str) -> Result<bool, AuthError> {
        Ok(false)
    }
}

/// Validator backed by a single token from configuration.
pub struct StaticTokenValidator {
    token: String,
}

impl StaticTokenValidator {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<bool, AuthError> {
        // Constant-time so timing does not leak the match prefix.
        Ok(token.as_bytes().ct_eq(self.token.as_bytes()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_validator_accepts_exact_token() {
        let validator = StaticTokenValidator::new("enroll-me".to_string());
        assert!(validator.validate("enroll-me").await.unwrap());
    }

    #[tokio::test]
    async fn test_static_validator_rejects_mismatch() {
        let validator = StaticTokenValidator::new("enroll-me".to_string());
        assert!(!validator.validate("enroll-m3").await.unwrap());
        assert!(!validator.validate("enroll-me-longer").await.unwrap());
        assert!(!validator.validate("").await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_validator_rejects_everything() {
        assert!(!DisabledValidator.validate("").await.unwrap());
        assert!(!DisabledValidator.validate("any-token").await.unwrap());
    }

    #[tokio::test]
    async fn test_http_validator_unreachable_endpoint() {
        let validator =
            HttpTokenValidator::new("http://127.0.0.1:9/validate".to_string(), None);
        let err = validator.validate("anything").await.unwrap_err();
        assert!(matches!(err, AuthError::ValidatorUnavailable(_)));
    }
}
