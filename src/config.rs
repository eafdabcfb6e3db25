use anyhow::Context;
use std::path::PathBuf;

const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_LOCK_TTL_SECS: i64 = 600;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    /// Scope locks older than this are considered abandoned.
    pub lock_ttl_secs: i64,
    pub busy_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();

        if let Some(p) = non_empty(lookup("RESULTSD_WORKSPACE")) {
            cfg.workspace = Some(PathBuf::from(p));
        }
        if let Some(f) = non_empty(lookup("RESULTSD_LOG")).or_else(|| non_empty(lookup("RUST_LOG")))
        {
            cfg.log_filter = f;
        }
        if let Some(v) = non_empty(lookup("RESULTSD_LOCK_TTL_SECS")) {
            cfg.lock_ttl_secs = v
                .parse::<i64>()
                .with_context(|| format!("RESULTSD_LOCK_TTL_SECS must be an integer, got {v:?}"))?;
            if cfg.lock_ttl_secs <= 0 {
                anyhow::bail!("RESULTSD_LOCK_TTL_SECS must be > 0");
            }
        }
        if let Some(v) = non_empty(lookup("RESULTSD_BUSY_TIMEOUT_MS")) {
            cfg.busy_timeout_ms = v.parse::<u64>().with_context(|| {
                format!("RESULTSD_BUSY_TIMEOUT_MS must be a non-negative integer, got {v:?}")
            })?;
        }

        Ok(cfg)
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
