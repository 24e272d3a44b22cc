//! Wire types for the gateway <-> sidecar WebSocket protocol.
//!
//! Every frame is a JSON object tagged by `type`, with camelCase fields.

use {
    serde::{Deserialize, Serialize},
    uuid::Uuid,
    wagate_sessions::BackendEvent,
};

/// Frames sent from the gateway to the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// Start a client for the profile and begin linking.
    #[serde(rename_all = "camelCase")]
    Init {
        profile_id: String,
        session_id: Uuid,
        use_pairing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phone_number: Option<String>,
    },
    /// Destroy the profile's client if it still belongs to `session_id`.
    #[serde(rename_all = "camelCase")]
    Destroy {
        profile_id: String,
        session_id: Uuid,
    },
    /// Send a text message. Answered by a `send_result` with the same id.
    #[serde(rename_all = "camelCase")]
    Send {
        request_id: String,
        profile_id: String,
        to: String,
        body: String,
    },
}

/// Frames received from the sidecar.
///
/// `sessionId` is optional on the way in; when present, events for a session
/// other than the current one are discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    #[serde(rename_all = "camelCase")]
    Qr {
        profile_id: String,
        #[serde(default)]
        session_id: Option<Uuid>,
        qr: String,
    },
    #[serde(rename_all = "camelCase")]
    PairingCode {
        profile_id: String,
        #[serde(default)]
        session_id: Option<Uuid>,
        code: String,
    },
    #[serde(rename_all = "camelCase")]
    Ready {
        profile_id: String,
        #[serde(default)]
        session_id: Option<Uuid>,
        #[serde(default)]
        phone_number: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AuthFailure {
        profile_id: String,
        #[serde(default)]
        session_id: Option<Uuid>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Disconnected {
        profile_id: String,
        #[serde(default)]
        session_id: Option<Uuid>,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default)]
        profile_id: Option<String>,
        error: String,
    },
}

/// A sidecar frame that belongs to one profile's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEvent {
    pub profile_id: String,
    pub session_id: Option<Uuid>,
    pub event: BackendEvent,
}

impl SidecarMessage {
    /// Split off the lifecycle frames. Everything else is handed back.
    pub fn into_profile_event(self) -> Result<ProfileEvent, Self> {
        let (profile_id, session_id, event) = match self {
            Self::Qr {
                profile_id,
                session_id,
                qr,
            } => (profile_id, session_id, BackendEvent::Qr(qr)),
            Self::PairingCode {
                profile_id,
                session_id,
                code,
            } => (profile_id, session_id, BackendEvent::PairingCode(code)),
            Self::Ready {
                profile_id,
                session_id,
                phone_number,
                display_name,
            } => (profile_id, session_id, BackendEvent::Ready {
                phone_number,
                display_name,
            }),
            Self::AuthFailure {
                profile_id,
                session_id,
                message,
            } => (profile_id, session_id, BackendEvent::AuthFailure { message }),
            Self::Disconnected {
                profile_id,
                session_id,
                reason,
            } => (profile_id, session_id, BackendEvent::Disconnected { reason }),
            other => return Err(other),
        };
        Ok(ProfileEvent {
            profile_id,
            session_id,
            event,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn init_frame_shape() {
        let session_id = Uuid::nil();
        let frame = GatewayMessage::Init {
            profile_id: "p1".into(),
            session_id,
            use_pairing: true,
            phone_number: Some("15551234567".into()),
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "init",
                "profileId": "p1",
                "sessionId": "00000000-0000-0000-0000-000000000000",
                "usePairing": true,
                "phoneNumber": "15551234567",
            })
        );
    }

    #[test]
    fn qr_init_omits_phone_number() {
        let frame = GatewayMessage::Init {
            profile_id: "p1".into(),
            session_id: Uuid::nil(),
            use_pairing: false,
            phone_number: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value.get("phoneNumber").is_none());
    }

    #[test]
    fn parses_ready_without_session_id() {
        let msg: SidecarMessage = serde_json::from_value(json!({
            "type": "ready",
            "profileId": "p1",
            "phoneNumber": "15551234567",
            "displayName": "Alice",
        }))
        .unwrap();
        let routed = msg.into_profile_event().unwrap();
        assert_eq!(routed.profile_id, "p1");
        assert_eq!(routed.session_id, None);
        assert_eq!(routed.event, BackendEvent::Ready {
            phone_number: Some("15551234567".into()),
            display_name: Some("Alice".into()),
        });
    }

    #[test]
    fn pairing_code_maps_to_backend_event() {
        let msg: SidecarMessage = serde_json::from_str(
            r#"{"type":"pairing_code","profileId":"p2","sessionId":"00000000-0000-0000-0000-000000000000","code":"WXYZ-1234"}"#,
        )
        .unwrap();
        let routed = msg.into_profile_event().unwrap();
        assert_eq!(routed.session_id, Some(Uuid::nil()));
        assert_eq!(routed.event, BackendEvent::PairingCode("WXYZ-1234".into()));
    }

    #[test]
    fn send_result_is_not_a_profile_event() {
        let msg: SidecarMessage = serde_json::from_value(json!({
            "type": "send_result",
            "requestId": "r1",
            "success": false,
            "error": "not on whatsapp",
        }))
        .unwrap();
        let back = msg.into_profile_event().unwrap_err();
        assert!(matches!(back, SidecarMessage::SendResult { success: false, .. }));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let parsed = serde_json::from_value::<SidecarMessage>(json!({
            "type": "message_ack",
            "profileId": "p1",
        }));
        assert!(parsed.is_err());
    }
}
