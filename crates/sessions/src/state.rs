use {
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Lifecycle state of a session handle.
///
/// ```text
/// initializing ─┬─> awaiting_qr ──────┬─> connected ──> disconnected
///               └─> awaiting_pairing ─┘
/// any pre-connected state ──> auth_failed ──> disconnected
/// ```
///
/// `initializing -> connected` is allowed for profiles whose credentials were
/// restored by the backend without a new link step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    AwaitingQr,
    AwaitingPairing,
    Connected,
    AuthFailed,
    Disconnected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::AwaitingQr => "awaiting_qr",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Connected => "connected",
            Self::AuthFailed => "auth_failed",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Terminal states only leave through a fresh `init`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AuthFailed | Self::Disconnected)
    }

    fn is_linking(&self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::AwaitingQr | Self::AwaitingPairing
        )
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Initializing, AwaitingQr | AwaitingPairing) => true,
            // Refreshed QR / pairing codes while waiting for the link.
            (AwaitingQr, AwaitingQr) | (AwaitingPairing, AwaitingPairing) => true,
            (from, Connected) => from.is_linking(),
            (from, AuthFailed) => from.is_linking(),
            (Disconnected, Disconnected) => false,
            (_, Disconnected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::SessionState::{self, *};

    const ALL: [SessionState; 6] = [
        Initializing,
        AwaitingQr,
        AwaitingPairing,
        Connected,
        AuthFailed,
        Disconnected,
    ];

    #[test]
    fn happy_paths_are_allowed() {
        assert!(Initializing.can_transition_to(AwaitingQr));
        assert!(AwaitingQr.can_transition_to(AwaitingQr));
        assert!(AwaitingQr.can_transition_to(Connected));
        assert!(Initializing.can_transition_to(AwaitingPairing));
        assert!(AwaitingPairing.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
    }

    #[test]
    fn auth_failure_only_before_connected() {
        assert!(Initializing.can_transition_to(AuthFailed));
        assert!(AwaitingQr.can_transition_to(AuthFailed));
        assert!(AwaitingPairing.can_transition_to(AuthFailed));
        assert!(!Connected.can_transition_to(AuthFailed));
        assert!(AuthFailed.can_transition_to(Disconnected));
    }

    #[test]
    fn disconnected_is_a_sink() {
        for next in ALL {
            assert!(!Disconnected.can_transition_to(next), "disconnected -> {next}");
        }
        for from in ALL.into_iter().filter(|s| *s != Disconnected) {
            assert!(from.can_transition_to(Disconnected), "{from} -> disconnected");
        }
    }

    #[test]
    fn connected_never_goes_back_to_linking() {
        assert!(!Connected.can_transition_to(AwaitingQr));
        assert!(!Connected.can_transition_to(AwaitingPairing));
        assert!(!Connected.can_transition_to(Initializing));
    }

    #[test]
    fn wire_names_are_snake_case() {
        for state in ALL {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, serde_json::Value::String(state.as_str().into()));
        }
        assert!(AuthFailed.is_terminal());
        assert!(!Connected.is_terminal());
    }
}
