//! Configuration types for the Herald server.
//!
//! [`Config`] is the root tree loaded from layered `herald.yaml` files,
//! controlling the HTTP listener, OAuth client identity, SQLite database,
//! Claude Code execution limits, optional tunnel, and configured projects.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::HeraldError;

/// Root configuration for Herald.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub execution: ExecutionConfig,
    pub tunnel: TunnelConfig,
    /// Configured projects, keyed by name.
    pub projects: HashMap<String, ProjectConfig>,
    pub rate_limit: RateLimitConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host. Must be a loopback address; `0.0.0.0` is rejected.
    pub host: String,
    pub port: u16,
    /// Externally visible base URL used as the OAuth issuer. Overridden by
    /// the tunnel URL when a tunnel is established.
    pub public_url: String,
    pub log_level: String,
    /// Optional JSON log file. Open failure degrades to stdout only.
    pub log_file: String,
}

/// OAuth 2.1 client identity and token lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub client_id: String,
    /// Shared client secret. Empty means load from `<config_dir>/secret`
    /// (generated when missing). `HERALD_CLIENT_SECRET` takes precedence.
    pub client_secret: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    /// Exact-match redirect URI allowlist.
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path. A leading `~` expands to the home directory.
    pub path: String,
    /// Completed task rows older than this are pruned during cleanup.
    pub retention_days: u32,
}

/// Claude Code execution limits and environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub claude_path: String,
    pub default_timeout_minutes: u64,
    pub max_timeout_minutes: u64,
    /// Prompt staging root. A leading `~` expands to the home directory.
    pub work_dir: String,
    pub max_concurrent: usize,
    /// Maximum prompt size in bytes (0 = no limit).
    pub max_prompt_size: usize,
    /// Per-task in-memory output cap in bytes (0 = unlimited).
    pub max_output_size: usize,
    /// Extra environment passed to every Claude Code child.
    pub env: HashMap<String, String>,
}

/// Optional outbound tunnel for external exposure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub enabled: bool,
    /// Only `ngrok` is recognized.
    pub provider: String,
    /// Overridden by `HERALD_NGROK_AUTHTOKEN`.
    pub auth_token: String,
    pub domain: String,
}

/// A project Claude Code tasks can be dispatched to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub path: String,
    pub description: String,
    /// Used when `start_task` omits the project name.
    pub default: bool,
    pub allowed_tools: Vec<String>,
    /// Per-project running-task cap (0 = no per-project limit).
    pub max_concurrent_tasks: usize,
    pub git: GitConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub auto_branch: bool,
    pub branch_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            database: DatabaseConfig::default(),
            execution: ExecutionConfig::default(),
            tunnel: TunnelConfig::default(),
            projects: HashMap::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8420,
            public_url: String::new(),
            log_level: "info".into(),
            log_file: String::new(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: "herald-claude-chat".into(),
            client_secret: String::new(),
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 30 * 24 * 3600,
            redirect_uris: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.config/herald/herald.db".into(),
            retention_days: 90,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            claude_path: "claude".into(),
            default_timeout_minutes: 30,
            max_timeout_minutes: 120,
            work_dir: "~/.config/herald/work".into(),
            max_concurrent: 3,
            max_prompt_size: 100 * 1024,
            max_output_size: 1024 * 1024,
            env: HashMap::from([
                ("CLAUDE_CODE_ENTRYPOINT".into(), "herald".into()),
                ("CLAUDE_CODE_DISABLE_AUTO_UPDATE".into(), "1".into()),
            ]),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "ngrok".into(),
            auth_token: String::new(),
            domain: String::new(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            description: String::new(),
            default: false,
            allowed_tools: Vec::new(),
            max_concurrent_tasks: 0,
            git: GitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 200,
            burst: 100,
        }
    }
}

impl Config {
    /// Validate the configuration and normalize paths.
    ///
    /// Rejects non-loopback bind hosts, out-of-range ports, and a
    /// concurrency cap below 1. Expands `~` in the database path and the
    /// work directory.
    pub fn validate(&mut self) -> Result<(), HeraldError> {
        if self.server.port == 0 {
            return Err(HeraldError::Config(
                "server.port must be between 1 and 65535".into(),
            ));
        }

        if self.server.host == "0.0.0.0" {
            return Err(HeraldError::Config(
                "server.host must not be 0.0.0.0 -- Herald listens on localhost only \
                 (use the tunnel for external access)"
                    .into(),
            ));
        }

        if self.execution.max_concurrent < 1 {
            return Err(HeraldError::Config(
                "execution.max_concurrent must be at least 1".into(),
            ));
        }

        self.database.path = crate::loader::expand_home(&self.database.path);
        self.execution.work_dir = crate::loader::expand_home(&self.execution.work_dir);

        Ok(())
    }
}
