//! Error taxonomy for role icons.
//!
//! None of these errors ever leave the tick loop: configuration errors disable the
//! component at startup, everything else is logged and retried or skipped.

use std::path::PathBuf;

/// Startup configuration problems. The component disables itself when one occurs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("icon visual template is not assigned")]
    MissingTemplate,
    #[error("neither document_url nor document_path is set")]
    MissingDocumentSource,
    #[error("role document source could not be created: {0}")]
    InvalidSource(String),
    #[error("no role sprites are configured")]
    EmptyRoleSprites,
    #[error("max_pool_size must be at least 1")]
    ZeroPoolSize,
    #[error("players_per_batch must be at least 1")]
    ZeroBatchSize,
    #[error("{name} must be a finite, non-negative number of seconds (got {value})")]
    InvalidInterval { name: &'static str, value: f64 },
    #[error("{name} must be finite and positive (got {value})")]
    InvalidMagnitude { name: &'static str, value: f32 },
}

/// Problems with the content of a fetched role document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("role document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("role document root is not an object")]
    NotAnObject,
    #[error("role document has no `roles` object")]
    MissingRoles,
}

/// Transport-level failures of a role document fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("reading {path:?} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {0}")]
    Status(u16),
    #[error("fetch worker disconnected before answering")]
    WorkerGone,
    #[error("{0}")]
    Other(String),
}

/// Soft failure of [`IconPool::lease`](crate::pool::IconPool::lease).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("icon pool exhausted ({capacity} slots leased)")]
    Exhausted { capacity: usize },
}

/// Loading `RoleIconSettings` from disk.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}
