use std::collections::HashSet;
use std::future::Future;

use tracing::warn;

use crate::auth::AuthMode;
use crate::error::UpstreamError;
use crate::store::{ConfigStore, GatewayConfig};

/// Run one upstream attempt per selected credential until one succeeds.
///
/// Passthrough mode makes exactly one attempt with the caller's own key. Pool
/// mode tries the fallback credential first when the model is in the fallback
/// set, then walks the primary pool from the rotation cursor, trying at most
/// `retry_budget` distinct credentials. Exhaustion surfaces the last upstream
/// error with a 503 status, or a synthesized 503 when nothing was attempted.
pub async fn select_and_execute<T, F, Fut>(
    store: &dyn ConfigStore,
    config: &GatewayConfig,
    mode: &AuthMode,
    model: Option<&str>,
    mut attempt: F,
) -> Result<T, UpstreamError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    if let AuthMode::Passthrough(key) = mode {
        return attempt(key.clone()).await;
    }

    let mut tried: HashSet<String> = HashSet::new();
    let mut last_error: Option<UpstreamError> = None;

    if let Some(model) = model
        && config.fallback_models.contains(model)
        && let Some(fallback) = &config.fallback_key
    {
        match attempt(fallback.clone()).await {
            Ok(output) => return Ok(output),
            Err(err) => {
                warn!(
                    event = "upstream_attempt_failed",
                    credential = "fallback",
                    status = err.status.as_u16(),
                );
                tried.insert(fallback.clone());
                last_error = Some(err);
            }
        }
    }

    let budget = config.retry_budget.max(1) as usize;
    let mut attempts = 0usize;
    let mut scanned = 0usize;

    while attempts < budget && scanned < config.pool.len() {
        let slot = store.rotate_cursor(config.pool.len());
        scanned += 1;

        let entry = &config.pool[slot % config.pool.len()];
        if !tried.insert(entry.key.clone()) {
            continue;
        }
        attempts += 1;

        match attempt(entry.key.clone()).await {
            Ok(output) => return Ok(output),
            Err(err) => {
                warn!(
                    event = "upstream_attempt_failed",
                    credential = %entry.id,
                    status = err.status.as_u16(),
                );
                last_error = Some(err);
            }
        }
    }

    match last_error {
        Some(err) => Err(err.into_exhausted()),
        None => Err(UpstreamError::service_unavailable("no available credentials")),
    }
}
