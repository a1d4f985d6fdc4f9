use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use gemgate_protocol::openai::error::ErrorBody;
use gemgate_transform::TransformError;

/// A gateway-originated error with an `{error:{message,type,code}}` body.
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyError {
    fn packaged(status: StatusCode, kind: &str, message: impl AsRef<str>) -> Self {
        let body = ErrorBody::new(message.as_ref(), kind, status.as_u16()).to_json();
        Self {
            status,
            body: Bytes::from(body),
        }
    }

    pub fn bad_request(message: impl AsRef<str>) -> Self {
        Self::packaged(StatusCode::BAD_REQUEST, "invalid_request_error", message)
    }

    pub fn not_found(message: impl AsRef<str>) -> Self {
        Self::packaged(StatusCode::NOT_FOUND, "invalid_request_error", message)
    }

    pub fn method_not_allowed(message: impl AsRef<str>) -> Self {
        Self::packaged(
            StatusCode::METHOD_NOT_ALLOWED,
            "invalid_request_error",
            message,
        )
    }

    pub fn unauthorized(message: impl AsRef<str>) -> Self {
        Self::packaged(StatusCode::UNAUTHORIZED, "authentication_error", message)
    }

    pub fn forbidden(message: impl AsRef<str>) -> Self {
        Self::packaged(StatusCode::FORBIDDEN, "authentication_error", message)
    }

    pub fn internal(message: impl AsRef<str>) -> Self {
        Self::packaged(StatusCode::INTERNAL_SERVER_ERROR, "api_error", message)
    }
}

/// A failed upstream exchange: non-2xx status with the upstream's own body,
/// or a synthesized body for transport-level failures. Forwarded verbatim in
/// passthrough mode, recorded and retried in pool mode.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamError {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn from_status(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn service_unavailable(message: impl AsRef<str>) -> Self {
        let body = ErrorBody::new(message.as_ref(), "api_error", 503).to_json();
        Self::from_status(StatusCode::SERVICE_UNAVAILABLE, body)
    }

    pub fn transport(message: impl AsRef<str>) -> Self {
        let body = ErrorBody::new(message.as_ref(), "api_error", 502).to_json();
        Self::from_status(StatusCode::BAD_GATEWAY, body)
    }

    /// Pool exhaustion keeps the last upstream body but reports 503.
    pub fn into_exhausted(mut self) -> Self {
        self.status = StatusCode::SERVICE_UNAVAILABLE;
        self
    }
}

/// Union of the two error shapes the dispatcher deals in.
#[derive(Debug)]
pub enum GatewayError {
    Proxy(ProxyError),
    Upstream(UpstreamError),
}

impl From<ProxyError> for GatewayError {
    fn from(err: ProxyError) -> Self {
        Self::Proxy(err)
    }
}

impl From<UpstreamError> for GatewayError {
    fn from(err: UpstreamError) -> Self {
        Self::Upstream(err)
    }
}

impl From<TransformError> for GatewayError {
    fn from(err: TransformError) -> Self {
        Self::Proxy(ProxyError::bad_request(err.to_string()))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Proxy(ProxyError::internal(format!("serialize failed: {err}")))
    }
}
