use std::sync::Arc;

use axum::Router;
use axum::routing::any;

use crate::handler::gateway_handler;
use crate::store::ConfigStore;
use crate::upstream::{GeminiOps, UpstreamClient};

pub struct GatewayState {
    pub store: Arc<dyn ConfigStore>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub ops: GeminiOps,
}

pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        upstream: Arc<dyn UpstreamClient>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            state: Arc::new(GatewayState {
                store,
                upstream,
                ops: GeminiOps::new(base_url),
            }),
        }
    }

    /// All gateway traffic lives under the `/api` prefix.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/{*path}", any(gateway_handler))
            .with_state(self.state.clone())
    }

    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }
}
