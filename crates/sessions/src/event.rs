use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

// ── Lifecycle events ────────────────────────────────────────────────────────

/// What happened to a session. Serialized as `{"event": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    QrUpdated {
        qr: String,
    },
    #[serde(rename_all = "camelCase")]
    PairingCode {
        pairing_code: String,
    },
    #[serde(rename_all = "camelCase")]
    Connected {
        phone_number: Option<String>,
        display_name: Option<String>,
    },
    AuthFailure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::QrUpdated { .. } => "qr_updated",
            Self::PairingCode { .. } => "pairing_code",
            Self::Connected { .. } => "connected",
            Self::AuthFailure { .. } => "auth_failure",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}

/// Immutable record of one state transition, as delivered to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub profile_id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(profile_id: impl Into<String>, user_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            profile_id: profile_id.into(),
            user_id: user_id.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

// ── Sink ────────────────────────────────────────────────────────────────────

/// Receiver of lifecycle events.
///
/// `publish` is called while the handle's state lock is held, which is what
/// keeps per-profile ordering intact. Implementations must hand the event off
/// (queue it) and return immediately; delivery failures stay inside the sink.
pub trait LifecycleSink: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

/// Sink that only logs. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct NoopSink;

impl LifecycleSink for NoopSink {
    fn publish(&self, event: LifecycleEvent) {
        tracing::debug!(
            profile_id = %event.profile_id,
            event = event.kind.name(),
            "lifecycle event (no sink configured)"
        );
    }
}
