use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub id: String,
    pub key: String,
}

/// Immutable per-request view of the gateway configuration.
///
/// A configuration change swaps in a fresh snapshot; requests already holding
/// the old one are undisturbed.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Hex digest of the admin password.
    pub admin_hash: String,
    /// Shared secret granting pooled-credential access. Empty or unset means
    /// pool mode is unreachable.
    pub trigger_key: Option<String>,
    /// Sorted by id so rotation order is stable across snapshots.
    pub pool: Vec<PoolEntry>,
    pub fallback_key: Option<String>,
    pub fallback_models: HashSet<String>,
    pub retry_budget: u32,
}

impl GatewayConfig {
    pub fn is_valid_trigger_key(&self, presented: &str) -> bool {
        match self.trigger_key.as_deref() {
            Some(trigger) if !trigger.is_empty() => trigger == presented,
            _ => false,
        }
    }
}

/// Configuration operations the gateway depends on. Reads are snapshot loads;
/// mutations are admin-side and may persist.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    fn snapshot(&self) -> Arc<GatewayConfig>;

    /// Allocate the next rotation slot for a pool of `pool_size` entries.
    /// Compare-and-set semantics with bounded retries; under persistent
    /// contention a plain read-modify-write is used and an occasional
    /// duplicate slot is tolerated.
    fn rotate_cursor(&self, pool_size: usize) -> usize;

    async fn set_admin_hash(&self, hash: String) -> StoreResult<()>;
    async fn set_trigger_key(&self, key: Option<String>) -> StoreResult<()>;
    async fn add_pool_entries(&self, entries: BTreeMap<String, String>) -> StoreResult<()>;
    async fn remove_pool_entry(&self, id: &str) -> StoreResult<()>;
    async fn clear_pool(&self) -> StoreResult<()>;
    async fn set_fallback_key(&self, key: Option<String>) -> StoreResult<()>;
    async fn set_fallback_models(&self, models: Vec<String>) -> StoreResult<()>;
    async fn add_fallback_models(&self, models: Vec<String>) -> StoreResult<()>;
    async fn clear_fallback_models(&self) -> StoreResult<()>;
    async fn set_retry_budget(&self, budget: u32) -> StoreResult<()>;
}

/// On-disk shape of the persisted state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub admin_hash: String,
    #[serde(default)]
    pub trigger_key: Option<String>,
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
    #[serde(default)]
    pub fallback_key: Option<String>,
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default)]
    pub cursor: u64,
}

fn default_retry_budget() -> u32 {
    3
}

impl StateFile {
    pub async fn load(path: &PathBuf) -> StoreResult<Option<StateFile>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn into_config(self) -> (GatewayConfig, u64) {
        let config = GatewayConfig {
            admin_hash: self.admin_hash,
            trigger_key: normalize(self.trigger_key),
            pool: entries_from_map(self.keys),
            fallback_key: normalize(self.fallback_key),
            fallback_models: self.fallback_models.into_iter().collect(),
            retry_budget: self.retry_budget.max(1),
        };
        (config, self.cursor)
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn entries_from_map(map: BTreeMap<String, String>) -> Vec<PoolEntry> {
    map.into_iter()
        .filter_map(|(id, key)| {
            let key = key.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some(PoolEntry { id, key })
            }
        })
        .collect()
}

const CURSOR_CAS_ATTEMPTS: usize = 5;

/// Snapshot-swapping store with an atomic rotation cursor and optional JSON
/// state-file persistence.
pub struct MemoryConfigStore {
    snapshot: ArcSwap<GatewayConfig>,
    cursor: AtomicU64,
    state_path: Option<PathBuf>,
}

impl MemoryConfigStore {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_cursor(config, 0, None)
    }

    pub fn with_cursor(
        mut config: GatewayConfig,
        cursor: u64,
        state_path: Option<PathBuf>,
    ) -> Self {
        config.pool.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            snapshot: ArcSwap::from_pointee(config),
            cursor: AtomicU64::new(cursor),
            state_path,
        }
    }

    /// Write the current snapshot to the state file, if one is configured.
    pub async fn flush(&self) -> StoreResult<()> {
        self.persist().await
    }

    async fn update<F>(&self, mutate: F) -> StoreResult<()>
    where
        F: FnOnce(&mut GatewayConfig),
    {
        let mut config = GatewayConfig::clone(&self.snapshot.load());
        mutate(&mut config);
        config.pool.sort_by(|a, b| a.id.cmp(&b.id));

        // A shrunken pool wraps out-of-range cursors back to the start.
        let pool_len = config.pool.len() as u64;
        if pool_len > 0 && self.cursor.load(Ordering::Relaxed) >= pool_len {
            self.cursor.store(0, Ordering::Relaxed);
        }

        self.snapshot.store(Arc::new(config));
        self.persist().await
    }

    async fn persist(&self) -> StoreResult<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        let config = self.snapshot.load();
        let state = StateFile {
            admin_hash: config.admin_hash.clone(),
            trigger_key: config.trigger_key.clone(),
            keys: config
                .pool
                .iter()
                .map(|entry| (entry.id.clone(), entry.key.clone()))
                .collect(),
            fallback_key: config.fallback_key.clone(),
            fallback_models: {
                let mut models: Vec<String> =
                    config.fallback_models.iter().cloned().collect();
                models.sort();
                models
            },
            retry_budget: config.retry_budget,
            cursor: self.cursor.load(Ordering::Relaxed),
        };
        let bytes = serde_json::to_vec_pretty(&state)?;
        if let Err(err) = tokio::fs::write(path, bytes).await {
            warn!(event = "state_persist_failed", path = %path.display(), error = %err);
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    fn snapshot(&self) -> Arc<GatewayConfig> {
        self.snapshot.load_full()
    }

    fn rotate_cursor(&self, pool_size: usize) -> usize {
        if pool_size == 0 {
            return 0;
        }

        let mut backoff = 1u32;
        for _ in 0..CURSOR_CAS_ATTEMPTS {
            let current = self.cursor.load(Ordering::Acquire);
            if self
                .cursor
                .compare_exchange(
                    current,
                    current.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return (current % pool_size as u64) as usize;
            }
            for _ in 0..backoff {
                std::hint::spin_loop();
            }
            backoff = backoff.saturating_mul(2);
        }

        // Contended past the retry bound: take a plain slot. Progress beats
        // strict fairness here.
        let current = self.cursor.load(Ordering::Relaxed);
        self.cursor.store(current.wrapping_add(1), Ordering::Relaxed);
        (current % pool_size as u64) as usize
    }

    async fn set_admin_hash(&self, hash: String) -> StoreResult<()> {
        self.update(|config| config.admin_hash = hash).await
    }

    async fn set_trigger_key(&self, key: Option<String>) -> StoreResult<()> {
        self.update(|config| config.trigger_key = normalize(key))
            .await
    }

    async fn add_pool_entries(&self, entries: BTreeMap<String, String>) -> StoreResult<()> {
        self.update(|config| {
            for entry in entries_from_map(entries) {
                match config.pool.iter_mut().find(|item| item.id == entry.id) {
                    Some(existing) => existing.key = entry.key,
                    None => config.pool.push(entry),
                }
            }
        })
        .await
    }

    async fn remove_pool_entry(&self, id: &str) -> StoreResult<()> {
        self.update(|config| config.pool.retain(|entry| entry.id != id))
            .await
    }

    async fn clear_pool(&self) -> StoreResult<()> {
        self.update(|config| config.pool.clear()).await
    }

    async fn set_fallback_key(&self, key: Option<String>) -> StoreResult<()> {
        self.update(|config| config.fallback_key = normalize(key))
            .await
    }

    async fn set_fallback_models(&self, models: Vec<String>) -> StoreResult<()> {
        self.update(|config| config.fallback_models = models.into_iter().collect())
            .await
    }

    async fn add_fallback_models(&self, models: Vec<String>) -> StoreResult<()> {
        self.update(|config| config.fallback_models.extend(models))
            .await
    }

    async fn clear_fallback_models(&self) -> StoreResult<()> {
        self.update(|config| config.fallback_models.clear()).await
    }

    async fn set_retry_budget(&self, budget: u32) -> StoreResult<()> {
        self.update(|config| config.retry_budget = budget.max(1))
            .await
    }
}
