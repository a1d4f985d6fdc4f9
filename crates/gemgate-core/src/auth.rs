use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use gemgate_protocol::openai::error::ErrorBody;

use crate::store::GatewayConfig;

/// How the request is allowed to use upstream credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Presented the shared trigger key: pooled credentials, retries allowed.
    Pool,
    /// Any other non-empty key: used directly as the upstream credential,
    /// exactly one attempt.
    Passthrough(String),
}

#[derive(Debug)]
pub struct AuthError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl AuthError {
    fn new(status: StatusCode, message: &str) -> Self {
        let body = ErrorBody::new(message, "authentication_error", status.as_u16()).to_json();
        Self {
            status,
            body: Bytes::from(body),
        }
    }
}

/// Resolve the caller's presented key against the configured trigger key.
pub fn authenticate(
    headers: &HeaderMap,
    query: Option<&str>,
    config: &GatewayConfig,
) -> Result<AuthMode, AuthError> {
    let presented = extract_api_key(headers, query)
        .ok_or_else(|| AuthError::new(StatusCode::UNAUTHORIZED, "missing api key"))?;

    let presented = presented.trim();
    if presented.is_empty() {
        return Err(AuthError::new(StatusCode::FORBIDDEN, "invalid api key"));
    }

    if config.is_valid_trigger_key(presented) {
        Ok(AuthMode::Pool)
    } else {
        Ok(AuthMode::Passthrough(presented.to_string()))
    }
}

fn extract_api_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = header_value(headers, "x-goog-api-key") {
        return Some(value);
    }

    if let Some(auth) = header_value(headers, "authorization") {
        let auth = auth.trim();
        if let Some(token) = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
        {
            return Some(token.trim().to_string());
        }
    }

    query_key(query)
}

fn query_key(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("key="))
        .map(|value| value.to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn config_with_trigger(trigger: &str) -> GatewayConfig {
        GatewayConfig {
            trigger_key: Some(trigger.to_string()),
            ..GatewayConfig::default()
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn trigger_key_enters_pool_mode() {
        let mode = authenticate(&bearer("T"), None, &config_with_trigger("T")).unwrap();
        assert_eq!(mode, AuthMode::Pool);
    }

    #[test]
    fn other_keys_are_passthrough() {
        let mode = authenticate(&bearer("sk-user-direct"), None, &config_with_trigger("T")).unwrap();
        assert_eq!(mode, AuthMode::Passthrough("sk-user-direct".to_string()));
    }

    #[test]
    fn goog_header_wins_over_bearer() {
        let mut headers = bearer("from-bearer");
        headers.insert("x-goog-api-key", HeaderValue::from_static("from-goog"));
        let mode = authenticate(&headers, None, &config_with_trigger("T")).unwrap();
        assert_eq!(mode, AuthMode::Passthrough("from-goog".to_string()));
    }

    #[test]
    fn query_key_is_accepted_last() {
        let mode = authenticate(
            &HeaderMap::new(),
            Some("alt=sse&key=from-query"),
            &config_with_trigger("T"),
        )
        .unwrap();
        assert_eq!(mode, AuthMode::Passthrough("from-query".to_string()));
    }

    #[test]
    fn missing_key_is_unauthenticated() {
        let err = authenticate(&HeaderMap::new(), None, &config_with_trigger("T")).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn blank_presented_key_is_forbidden() {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_static(""));
        let err = authenticate(&headers, None, &config_with_trigger("T")).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn unset_trigger_key_never_matches() {
        let config = GatewayConfig::default();
        let mode = authenticate(&bearer("T"), None, &config).unwrap();
        assert_eq!(mode, AuthMode::Passthrough("T".to_string()));
    }
}
