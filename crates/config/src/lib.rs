//! Configuration loading and env overrides for wagate.
//!
//! Config files: `wagate.toml`, `wagate.yaml`, `wagate.yml` or `wagate.json`,
//! searched in `./` then in the user config directory.
//!
//! Supports `${ENV_VAR}` substitution in the raw file contents.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, discover_and_load, load_config, load_or_discover, to_toml,
    },
    schema::{
        REDACTED, ServerConfig, SessionsConfig, SidecarConfig, WagateConfig, WebhookConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
