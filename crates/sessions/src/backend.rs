//! Boundary to the messaging collaborator that actually talks to WhatsApp.

use {async_trait::async_trait, tokio::sync::mpsc, uuid::Uuid};

use crate::Result;

/// Ask the backend to start linking one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub profile_id: String,
    pub user_id: String,
    /// Identifies this particular attempt. Teardown requests carry it so a
    /// late teardown can never hit a newer session for the same profile.
    pub session_id: Uuid,
    /// Phone number to request a pairing code for. `None` means QR linking.
    pub pairing_phone: Option<String>,
}

impl ConnectRequest {
    pub fn use_pairing(&self) -> bool {
        self.pairing_phone.is_some()
    }
}

/// Raw callback from the backend for one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Qr(String),
    PairingCode(String),
    Ready {
        phone_number: Option<String>,
        display_name: Option<String>,
    },
    AuthFailure {
        message: Option<String>,
    },
    Disconnected {
        reason: Option<String>,
    },
}

/// Ordered event stream for one connected profile. The backend closes it when
/// the profile is torn down.
pub type EventStream = mpsc::Receiver<BackendEvent>;

/// Result of a dispatched message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

/// The messaging collaborator, treated as opaque.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Start a connection attempt and return its event stream. Returning means
    /// the attempt was accepted, not that the profile is linked.
    async fn connect(&self, request: ConnectRequest) -> Result<EventStream>;

    /// Tear down the given attempt. Unknown sessions are not an error.
    async fn destroy(&self, profile_id: &str, session_id: Uuid) -> Result<()>;

    /// Send a text message from a connected profile. `to` is already
    /// normalized to a chat id.
    async fn send_message(&self, profile_id: &str, to: &str, body: &str) -> Result<SendReceipt>;
}
