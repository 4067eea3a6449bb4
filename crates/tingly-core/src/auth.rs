use std::collections::HashSet;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

/// Seam for the external credential collaborator. The gateway only needs
/// pass/fail on inbound bearer credentials plus a delegate for `POST /token`;
/// issuing and validating JWTs stays outside the core.
pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<(), AuthError>;

    fn issue_token(&self, _body: &Bytes) -> Result<serde_json::Value, AuthError> {
        Err(AuthError {
            status: StatusCode::NOT_IMPLEMENTED,
            message: "token issuance is not available".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub status: StatusCode,
    pub message: String,
}

/// Accepts everything. Used by tests and by deployments that front the
/// gateway with their own auth layer.
#[derive(Debug, Default)]
pub struct NoopAuth;

impl AuthProvider for NoopAuth {
    fn authenticate(&self, _headers: &HeaderMap) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Fixed-token validation: the request's bearer credential must be one of
/// the configured tokens. An empty token set disables the check.
#[derive(Debug, Default)]
pub struct StaticTokenAuth {
    tokens: HashSet<String>,
}

impl StaticTokenAuth {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }
}

impl AuthProvider for StaticTokenAuth {
    fn authenticate(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        if self.tokens.is_empty() {
            return Ok(());
        }
        let token = extract_bearer(headers).ok_or_else(|| AuthError {
            status: StatusCode::UNAUTHORIZED,
            message: "missing bearer credential".to_string(),
        })?;
        if self.tokens.contains(&token) {
            Ok(())
        } else {
            Err(AuthError {
                status: StatusCode::UNAUTHORIZED,
                message: "invalid bearer credential".to_string(),
            })
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key").and_then(|value| value.to_str().ok()) {
        return Some(value.trim().to_string());
    }
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())?
        .trim();
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accepts_configured_token_via_both_headers() {
        let auth = StaticTokenAuth::new(["secret".to_string()]);
        assert!(auth
            .authenticate(&headers_with("authorization", "Bearer secret"))
            .is_ok());
        assert!(auth.authenticate(&headers_with("x-api-key", "secret")).is_ok());
    }

    #[test]
    fn rejects_missing_and_wrong_tokens() {
        let auth = StaticTokenAuth::new(["secret".to_string()]);
        assert_eq!(
            auth.authenticate(&HeaderMap::new()).unwrap_err().status,
            StatusCode::UNAUTHORIZED
        );
        assert!(auth
            .authenticate(&headers_with("authorization", "Bearer wrong"))
            .is_err());
    }

    #[test]
    fn empty_token_set_disables_the_check() {
        let auth = StaticTokenAuth::default();
        assert!(auth.authenticate(&HeaderMap::new()).is_ok());
    }
}
