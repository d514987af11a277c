//! Shared types for the Herald workspace: the error enum and the
//! configuration tree with its layered YAML loader.

mod config;
mod error;
mod loader;

pub use config::{
    AuthConfig, Config, DatabaseConfig, ExecutionConfig, GitConfig, ProjectConfig,
    RateLimitConfig, ServerConfig, TunnelConfig,
};
pub use error::HeraldError;
pub use loader::{expand_home, load, load_from_file};
