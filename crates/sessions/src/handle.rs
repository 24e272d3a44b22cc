use std::sync::RwLock;

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    tokio_util::sync::CancellationToken,
    tracing::debug,
    uuid::Uuid,
};

use crate::{
    backend::BackendEvent,
    event::{EventKind, LifecycleEvent, LifecycleSink},
    state::SessionState,
};

/// One connection attempt for one profile.
///
/// State changes go through [`SessionHandle::apply`] or
/// [`SessionHandle::close`], which validate the transition and publish the
/// matching lifecycle event under the same lock. Once the handle is cancelled
/// every further backend event is dropped.
#[derive(Debug)]
pub struct SessionHandle {
    profile_id: String,
    user_id: String,
    session_id: Uuid,
    use_pairing: bool,
    created_at: DateTime<Utc>,
    inner: RwLock<HandleInner>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct HandleInner {
    state: SessionState,
    updated_at: DateTime<Utc>,
    qr: Option<String>,
    pairing_code: Option<String>,
    phone_number: Option<String>,
    display_name: Option<String>,
}

/// Point-in-time view of a handle, safe to hand out over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub profile_id: String,
    pub user_id: String,
    pub session_id: Uuid,
    pub state: SessionState,
    pub connected: bool,
    pub use_pairing: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl SessionHandle {
    pub fn new(profile_id: impl Into<String>, user_id: impl Into<String>, use_pairing: bool) -> Self {
        let now = Utc::now();
        Self {
            profile_id: profile_id.into(),
            user_id: user_id.into(),
            session_id: Uuid::new_v4(),
            use_pairing,
            created_at: now,
            inner: RwLock::new(HandleInner {
                state: SessionState::Initializing,
                updated_at: now,
                qr: None,
                pairing_code: None,
                phone_number: None,
                display_name: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn use_pairing(&self) -> bool {
        self.use_pairing
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        SessionSnapshot {
            profile_id: self.profile_id.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id,
            state: inner.state,
            connected: inner.state.is_connected(),
            use_pairing: self.use_pairing,
            created_at: self.created_at,
            updated_at: inner.updated_at,
            qr: inner.qr.clone(),
            pairing_code: inner.pairing_code.clone(),
            phone_number: inner.phone_number.clone(),
            display_name: inner.display_name.clone(),
        }
    }

    /// Apply a backend event. Returns `true` when the transition was accepted
    /// and published.
    pub fn apply(&self, event: BackendEvent, sink: &dyn LifecycleSink) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if self.cancel.is_cancelled() {
            debug!(profile_id = %self.profile_id, ?event, "dropping event for cancelled session");
            return false;
        }

        let (next, kind) = match event {
            BackendEvent::Qr(qr) => (SessionState::AwaitingQr, EventKind::QrUpdated { qr }),
            BackendEvent::PairingCode(code) => (SessionState::AwaitingPairing, EventKind::PairingCode {
                pairing_code: code,
            }),
            BackendEvent::Ready {
                phone_number,
                display_name,
            } => (SessionState::Connected, EventKind::Connected {
                phone_number,
                display_name,
            }),
            BackendEvent::AuthFailure { message } => {
                (SessionState::AuthFailed, EventKind::AuthFailure { reason: message })
            },
            BackendEvent::Disconnected { reason } => {
                (SessionState::Disconnected, EventKind::Disconnected { reason })
            },
        };

        if !inner.state.can_transition_to(next) {
            debug!(
                profile_id = %self.profile_id,
                from = %inner.state,
                to = %next,
                "ignoring invalid state transition"
            );
            return false;
        }

        match &kind {
            EventKind::QrUpdated { qr } => inner.qr = Some(qr.clone()),
            EventKind::PairingCode { pairing_code } => {
                inner.pairing_code = Some(pairing_code.clone());
            },
            EventKind::Connected {
                phone_number,
                display_name,
            } => {
                inner.qr = None;
                inner.pairing_code = None;
                inner.phone_number = phone_number.clone();
                inner.display_name = display_name.clone();
            },
            EventKind::AuthFailure { .. } | EventKind::Disconnected { .. } => {
                inner.qr = None;
                inner.pairing_code = None;
            },
        }
        inner.state = next;
        inner.updated_at = Utc::now();

        sink.publish(LifecycleEvent::new(&self.profile_id, &self.user_id, kind));
        true
    }

    /// Move to `disconnected`, publish the final event and cancel the handle.
    /// Idempotent: a handle that is already disconnected is only cancelled.
    pub fn close(&self, reason: Option<&str>, sink: &dyn LifecycleSink) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !self.cancel.is_cancelled() && inner.state.can_transition_to(SessionState::Disconnected) {
            inner.state = SessionState::Disconnected;
            inner.updated_at = Utc::now();
            inner.qr = None;
            inner.pairing_code = None;
            sink.publish(LifecycleEvent::new(
                &self.profile_id,
                &self.user_id,
                EventKind::Disconnected {
                    reason: reason.map(str::to_string),
                },
            ));
        }
        self.cancel.cancel();
    }

    /// Stop the handle without publishing anything.
    pub fn cancel(&self) {
        let _guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the handle is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
