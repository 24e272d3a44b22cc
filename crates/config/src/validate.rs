//! Semantic checks over a loaded configuration.
//!
//! Parsing already guarantees the shape; these checks catch values that
//! parse fine but would misbehave at runtime.

use crate::schema::WagateConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "webhook.url"
    pub path: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path,
            message: message.into(),
        });
    }
}

#[must_use]
pub fn validate(config: &WagateConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    check_server(config, &mut result);
    check_webhook(config, &mut result);
    check_sessions(config, &mut result);
    check_sidecar(config, &mut result);
    result
}

fn check_server(config: &WagateConfig, result: &mut ValidationResult) {
    if config.server.bind.trim().is_empty() {
        result.push(Severity::Error, "server.bind", "bind address is empty");
    }
    if config.server.port == 0 {
        result.push(
            Severity::Warning,
            "server.port",
            "port 0 binds a random port",
        );
    }
}

fn check_webhook(config: &WagateConfig, result: &mut ValidationResult) {
    let webhook = &config.webhook;
    match webhook.url.as_deref().map(str::trim) {
        None | Some("") => {
            result.push(
                Severity::Info,
                "webhook.url",
                "no webhook configured; lifecycle events are only logged",
            );
            if webhook.secret.is_some() {
                result.push(
                    Severity::Warning,
                    "webhook.secret",
                    "secret is set but webhook.url is not",
                );
            }
        },
        Some(url) => {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                result.push(
                    Severity::Error,
                    "webhook.url",
                    format!("expected an http(s) URL, got \"{url}\""),
                );
            } else if url.starts_with("http://") && webhook.secret.is_none() {
                result.push(
                    Severity::Warning,
                    "webhook.url",
                    "plain http without a signing secret; the sink cannot authenticate events",
                );
            }
        },
    }

    if webhook.max_attempts == 0 {
        result.push(
            Severity::Error,
            "webhook.max_attempts",
            "must be at least 1",
        );
    }
    if webhook.timeout_secs == 0 {
        result.push(Severity::Error, "webhook.timeout_secs", "must be positive");
    }
    if webhook.queue_capacity == 0 {
        result.push(
            Severity::Error,
            "webhook.queue_capacity",
            "must be at least 1",
        );
    }
    if webhook.initial_backoff_ms > webhook.max_backoff_ms {
        result.push(
            Severity::Warning,
            "webhook.initial_backoff_ms",
            format!(
                "larger than max_backoff_ms ({}), every retry waits max_backoff_ms",
                webhook.max_backoff_ms
            ),
        );
    }
}

fn check_sessions(config: &WagateConfig, result: &mut ValidationResult) {
    let sessions = &config.sessions;
    if sessions.default_profile.trim().is_empty() {
        result.push(
            Severity::Error,
            "sessions.default_profile",
            "default profile is empty",
        );
    }
    if sessions.connect_timeout_secs == 0 {
        result.push(
            Severity::Error,
            "sessions.connect_timeout_secs",
            "must be positive",
        );
    }
    if sessions.teardown_timeout_secs == 0 {
        result.push(
            Severity::Error,
            "sessions.teardown_timeout_secs",
            "must be positive",
        );
    }
}

fn check_sidecar(config: &WagateConfig, result: &mut ValidationResult) {
    let sidecar = &config.sidecar;
    if sidecar.port == 0 {
        result.push(Severity::Error, "sidecar.port", "must be non-zero");
    }
    if sidecar.port == config.server.port {
        result.push(
            Severity::Error,
            "sidecar.port",
            format!("collides with server.port ({})", config.server.port),
        );
    }
    if sidecar.send_timeout_secs == 0 {
        result.push(Severity::Error, "sidecar.send_timeout_secs", "must be positive");
    }
    if let Some(dir) = &sidecar.dir
        && sidecar.auto_start
        && !dir.join("package.json").exists()
    {
        result.push(
            Severity::Warning,
            "sidecar.dir",
            format!("{} has no package.json", dir.display()),
        );
    }
}
