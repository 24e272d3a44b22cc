//! Config schema types (server, webhook sink, sessions, sidecar).
use std::{path::PathBuf, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WagateConfig {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub sessions: SessionsConfig,
    pub sidecar: SidecarConfig,
}

/// Placeholder written in place of secrets when a config is displayed.
pub const REDACTED: &str = "[REDACTED]";

impl WagateConfig {
    /// Copy with every secret replaced by [`REDACTED`], for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.webhook.secret.is_some() {
            config.webhook.secret = Some(Secret::new(REDACTED.to_string()));
        }
        config
    }
}

/// HTTP control API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "0.0.0.0".
    pub bind: String,
    /// Port to listen on. Defaults to 3000.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

/// Outbound lifecycle webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Sink URL. When unset, lifecycle events are logged and dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Shared secret used to sign request bodies (HMAC-SHA256).
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub secret: Option<Secret<String>>,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Delivery attempts per event, including the first one.
    pub max_attempts: u32,

    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,

    /// Capacity of the outbound event queue.
    pub queue_capacity: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            timeout_secs: 10,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 5_000,
            queue_capacity: 1024,
        }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Session lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Profile used by `send` requests that do not name one.
    pub default_profile: String,
    /// Upper bound for the collaborator to accept a connect request.
    pub connect_timeout_secs: u64,
    /// Upper bound for a graceful teardown before the entry is dropped anyway.
    pub teardown_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            default_profile: "default".into(),
            connect_timeout_secs: 60,
            teardown_timeout_secs: 10,
        }
    }
}

impl SessionsConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }
}

/// Browser-automation sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Directory containing the sidecar's `package.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// WebSocket port the sidecar listens on.
    pub port: u16,
    /// Spawn and supervise the sidecar process. Disable when it is run
    /// separately (e.g. in its own container).
    pub auto_start: bool,
    /// Base directory for persisted session credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_dir: Option<PathBuf>,
    /// How long to wait for the sidecar to confirm an outbound message.
    pub send_timeout_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            dir: None,
            port: 18_770,
            auto_start: true,
            auth_dir: None,
            send_timeout_secs: 30,
        }
    }
}

impl SidecarConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = WagateConfig::default();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.webhook.max_attempts, 3);
        assert!(cfg.webhook.url.is_none());
        assert_eq!(cfg.sessions.default_profile, "default");
        assert!(cfg.sidecar.auto_start);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: WagateConfig = toml::from_str(
            r#"
            [webhook]
            url = "https://hooks.example.com/wa"
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.webhook.url.as_deref(),
            Some("https://hooks.example.com/wa")
        );
        assert_eq!(cfg.webhook.max_attempts, 5);
        assert_eq!(cfg.webhook.timeout_secs, 10);
        assert_eq!(cfg.server.bind, "0.0.0.0");
    }

    #[test]
    fn redacted_copy_hides_secret_when_rendered() {
        let cfg: WagateConfig = toml::from_str(
            r#"
            [webhook]
            url = "https://hooks.example.com/wa"
            secret = "hunter2"
            "#,
        )
        .unwrap();

        let shown = crate::to_toml(&cfg.redacted()).unwrap();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains(REDACTED));
        assert!(shown.contains("https://hooks.example.com/wa"));
        // The original is untouched.
        assert_eq!(
            cfg.webhook.secret.as_ref().map(|s| s.expose_secret().as_str()),
            Some("hunter2")
        );

        let without_secret = crate::to_toml(&WagateConfig::default().redacted()).unwrap();
        assert!(!without_secret.contains(REDACTED));
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let cfg: WagateConfig = toml::from_str(
            r#"
            [webhook]
            secret = "hunter2"
            "#,
        )
        .unwrap();
        let rendered = format!("{:?}", cfg.webhook);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(
            cfg.webhook.secret.as_ref().map(|s| s.expose_secret().as_str()),
            Some("hunter2")
        );
    }
}
