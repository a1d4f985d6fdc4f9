use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "gemgate",
    version,
    about = "Pooled-credential reverse proxy for the Gemini API"
)]
pub struct CliArgs {
    /// Bind host.
    #[arg(long, env = "GEMGATE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port.
    #[arg(long, env = "GEMGATE_PORT", default_value_t = 8787)]
    pub port: u16,

    /// Shared trigger key granting pooled-credential access.
    #[arg(long, env = "GEMGATE_TRIGGER_KEY")]
    pub trigger_key: Option<String>,

    /// Admin password (plaintext). Stored as a hash.
    #[arg(long, env = "GEMGATE_ADMIN_KEY")]
    pub admin_key: Option<String>,

    /// Comma-separated pool credentials, each `id=key` or a bare key.
    #[arg(long, env = "GEMGATE_KEYS")]
    pub keys: Option<String>,

    /// Single credential tried first for the fallback model set.
    #[arg(long, env = "GEMGATE_FALLBACK_KEY")]
    pub fallback_key: Option<String>,

    /// Comma-separated model names routed to the fallback key first.
    #[arg(long, env = "GEMGATE_FALLBACK_MODELS")]
    pub fallback_models: Option<String>,

    /// Maximum distinct pooled credentials tried per request.
    #[arg(long, env = "GEMGATE_RETRY_BUDGET")]
    pub retry_budget: Option<u32>,

    /// Upstream provider base URL.
    #[arg(
        long,
        env = "GEMGATE_UPSTREAM_BASE",
        default_value = gemgate_core::upstream::DEFAULT_BASE_URL
    )]
    pub upstream_base: String,

    /// Optional outbound proxy for upstream requests.
    #[arg(long, env = "GEMGATE_PROXY")]
    pub proxy: Option<String>,

    /// JSON state file; CLI/env values overlay it and are persisted back.
    #[arg(long, env = "GEMGATE_STATE_FILE")]
    pub state_file: Option<PathBuf>,
}
