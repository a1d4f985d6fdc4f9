use std::collections::HashSet;
use std::sync::Mutex;

use http::StatusCode;

use gemgate_core::auth::AuthMode;
use gemgate_core::error::UpstreamError;
use gemgate_core::pool::select_and_execute;
use gemgate_core::store::{GatewayConfig, MemoryConfigStore, PoolEntry};

fn pool_config(keys: &[&str], retry_budget: u32) -> GatewayConfig {
    GatewayConfig {
        pool: keys
            .iter()
            .map(|key| PoolEntry {
                id: key.to_string(),
                key: key.to_string(),
            })
            .collect(),
        retry_budget,
        ..GatewayConfig::default()
    }
}

#[tokio::test]
async fn sequential_allocations_are_fair_across_the_pool() {
    let config = pool_config(&["keyA", "keyB", "keyC"], 1);
    let store = MemoryConfigStore::new(config.clone());
    let calls = Mutex::new(Vec::<String>::new());

    for _ in 0..6 {
        select_and_execute(&store, &config, &AuthMode::Pool, None, |key| {
            calls.lock().unwrap().push(key.clone());
            async move { Ok::<_, UpstreamError>(key) }
        })
        .await
        .unwrap();
    }

    let calls = calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec!["keyA", "keyB", "keyC", "keyA", "keyB", "keyC"]
    );
}

#[tokio::test]
async fn retry_budget_bounds_distinct_credentials() {
    let config = pool_config(&["keyA", "keyB", "keyC"], 2);
    let store = MemoryConfigStore::new(config.clone());
    let calls = Mutex::new(Vec::<String>::new());

    let err = select_and_execute(&store, &config, &AuthMode::Pool, None, |key| {
        calls.lock().unwrap().push(key.clone());
        async move {
            Err::<(), _>(UpstreamError::from_status(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("err-{key}"),
            ))
        }
    })
    .await
    .unwrap_err();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    let distinct: HashSet<&String> = calls.iter().collect();
    assert_eq!(distinct.len(), 2);

    // Exhaustion reports 503 carrying the last upstream body.
    assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(err.body.as_ref(), format!("err-{}", calls[1]).as_bytes());
}

#[tokio::test]
async fn budget_larger_than_pool_stops_at_pool_size() {
    let config = pool_config(&["keyA", "keyB"], 10);
    let store = MemoryConfigStore::new(config.clone());
    let calls = Mutex::new(Vec::<String>::new());

    select_and_execute(&store, &config, &AuthMode::Pool, None, |key| {
        calls.lock().unwrap().push(key.clone());
        async move {
            Err::<(), _>(UpstreamError::from_status(
                StatusCode::INTERNAL_SERVER_ERROR,
                "boom",
            ))
        }
    })
    .await
    .unwrap_err();

    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn fallback_is_tried_first_for_matching_models() {
    let mut config = pool_config(&["keyA"], 3);
    config.fallback_key = Some("fallback".to_string());
    config.fallback_models = ["gemini-pro-preview".to_string()].into_iter().collect();
    let store = MemoryConfigStore::new(config.clone());
    let calls = Mutex::new(Vec::<String>::new());

    let got = select_and_execute(
        &store,
        &config,
        &AuthMode::Pool,
        Some("gemini-pro-preview"),
        |key| {
            calls.lock().unwrap().push(key.clone());
            async move { Ok::<_, UpstreamError>(key) }
        },
    )
    .await
    .unwrap();

    assert_eq!(got, "fallback");
    assert_eq!(*calls.lock().unwrap(), vec!["fallback"]);
}

#[tokio::test]
async fn fallback_failure_falls_through_to_the_pool() {
    let mut config = pool_config(&["keyA", "keyB"], 2);
    config.fallback_key = Some("fallback".to_string());
    config.fallback_models = ["gemini-pro-preview".to_string()].into_iter().collect();
    let store = MemoryConfigStore::new(config.clone());
    let calls = Mutex::new(Vec::<String>::new());

    let got = select_and_execute(
        &store,
        &config,
        &AuthMode::Pool,
        Some("gemini-pro-preview"),
        |key| {
            calls.lock().unwrap().push(key.clone());
            async move {
                if key == "fallback" {
                    Err(UpstreamError::from_status(
                        StatusCode::TOO_MANY_REQUESTS,
                        "quota",
                    ))
                } else {
                    Ok(key)
                }
            }
        },
    )
    .await
    .unwrap();

    assert_eq!(got, "keyA");
    assert_eq!(*calls.lock().unwrap(), vec!["fallback", "keyA"]);
}

#[tokio::test]
async fn fallback_ignored_for_other_models() {
    let mut config = pool_config(&["keyA"], 1);
    config.fallback_key = Some("fallback".to_string());
    config.fallback_models = ["gemini-pro-preview".to_string()].into_iter().collect();
    let store = MemoryConfigStore::new(config.clone());
    let calls = Mutex::new(Vec::<String>::new());

    select_and_execute(&store, &config, &AuthMode::Pool, Some("gemini-x"), |key| {
        calls.lock().unwrap().push(key.clone());
        async move { Ok::<_, UpstreamError>(key) }
    })
    .await
    .unwrap();

    assert_eq!(*calls.lock().unwrap(), vec!["keyA"]);
}

#[tokio::test]
async fn fallback_key_present_in_pool_is_not_retried() {
    let mut config = pool_config(&["keyA", "shared"], 5);
    config.fallback_key = Some("shared".to_string());
    config.fallback_models = ["gemini-pro-preview".to_string()].into_iter().collect();
    let store = MemoryConfigStore::new(config.clone());
    let calls = Mutex::new(Vec::<String>::new());

    select_and_execute(
        &store,
        &config,
        &AuthMode::Pool,
        Some("gemini-pro-preview"),
        |key| {
            calls.lock().unwrap().push(key.clone());
            async move {
                Err::<(), _>(UpstreamError::from_status(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "boom",
                ))
            }
        },
    )
    .await
    .unwrap_err();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.iter().filter(|key| *key == "shared").count(), 1);
}

#[tokio::test]
async fn passthrough_makes_exactly_one_attempt() {
    let config = pool_config(&["keyA", "keyB"], 3);
    let store = MemoryConfigStore::new(config.clone());
    let calls = Mutex::new(Vec::<String>::new());
    let mode = AuthMode::Passthrough("sk-user-direct".to_string());

    let err = select_and_execute(&store, &config, &mode, Some("gemini-x"), |key| {
        calls.lock().unwrap().push(key.clone());
        async move {
            Err::<(), _>(UpstreamError::from_status(
                StatusCode::TOO_MANY_REQUESTS,
                "quota",
            ))
        }
    })
    .await
    .unwrap_err();

    assert_eq!(*calls.lock().unwrap(), vec!["sk-user-direct"]);
    // Passthrough errors are forwarded verbatim, not wrapped in 503.
    assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn empty_pool_yields_503() {
    let config = pool_config(&[], 3);
    let store = MemoryConfigStore::new(config.clone());

    let err = select_and_execute(&store, &config, &AuthMode::Pool, None, |_key| async move {
        Ok::<(), UpstreamError>(())
    })
    .await
    .unwrap_err();

    assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
}
