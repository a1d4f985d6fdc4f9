use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::CliArgs;
use gemgate_core::store::{ConfigStore, GatewayConfig, MemoryConfigStore, StateFile};
use gemgate_core::upstream::{UpstreamClientConfig, WreqUpstreamClient};
use gemgate_core::Gateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    let (config, cursor) = match &args.state_file {
        Some(path) => StateFile::load(path)
            .await
            .context("load state file")?
            .map(StateFile::into_config)
            .unwrap_or((GatewayConfig::default(), 0)),
        None => (GatewayConfig::default(), 0),
    };

    let store = Arc::new(MemoryConfigStore::with_cursor(
        config,
        cursor,
        args.state_file.clone(),
    ));
    apply_overrides(store.as_ref(), &args)
        .await
        .context("apply configuration")?;
    store.flush().await.context("persist configuration")?;

    let snapshot = store.snapshot();
    tracing::info!(
        event = "bootstrap",
        pool_size = snapshot.pool.len(),
        fallback = snapshot.fallback_key.is_some(),
        fallback_models = snapshot.fallback_models.len(),
        retry_budget = snapshot.retry_budget,
    );

    let upstream_config = UpstreamClientConfig {
        proxy: args.proxy.clone(),
        ..UpstreamClientConfig::default()
    };
    let upstream = Arc::new(WreqUpstreamClient::new(upstream_config)?);
    let gateway = Gateway::new(store, upstream, args.upstream_base.clone());

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    tracing::info!(event = "listening", addr = %bind);
    axum::serve(listener, gateway.router()).await?;
    Ok(())
}

async fn apply_overrides(store: &MemoryConfigStore, args: &CliArgs) -> anyhow::Result<()> {
    if let Some(key) = args.trigger_key.clone() {
        store.set_trigger_key(Some(key)).await?;
    }
    if let Some(admin) = &args.admin_key {
        store.set_admin_hash(hash_admin_key(admin)).await?;
    }
    if let Some(keys) = &args.keys {
        store.add_pool_entries(parse_pool_keys(keys)).await?;
    }
    if let Some(fallback) = args.fallback_key.clone() {
        store.set_fallback_key(Some(fallback)).await?;
    }
    if let Some(models) = &args.fallback_models {
        store.add_fallback_models(split_csv(models)).await?;
    }
    if let Some(budget) = args.retry_budget {
        store.set_retry_budget(budget).await?;
    }

    if store.snapshot().retry_budget == 0 {
        store.set_retry_budget(3).await?;
    }
    if store.snapshot().admin_hash.is_empty() {
        let generated = uuid::Uuid::new_v4().to_string();
        eprintln!("generated admin key: {generated}");
        store.set_admin_hash(hash_admin_key(&generated)).await?;
    }
    Ok(())
}

fn hash_admin_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

/// `id=key` entries keyed as given; bare keys get positional ids.
fn parse_pool_keys(raw: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for (index, item) in raw.split(',').enumerate() {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (id, key) = match item.split_once('=') {
            Some((id, key)) => (id.trim().to_string(), key.trim().to_string()),
            None => (format!("key-{:02}", index + 1), item.to_string()),
        };
        if key.is_empty() {
            continue;
        }
        entries.insert(id, key);
    }
    entries
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
