//! Channel event types
//!
//! ## Protocol
//!
//! Text frames carrying tagged JSON, validated at the boundary. Frames
//! that fail validation are logged and skipped — downstream trackers never
//! see partially-shaped data.
//!
//! Messages (server → client):
//! - `user-joined` / `user-left` - presence changes; the server-reported
//!   `online_count` is authoritative, clients never count locally
//! - `message` - chat broadcast
//! - `clause-updated` - a party changed a clause stance
//! - `agreement-status-changed` - agreement lifecycle transition
//! - `user-typing` / `user-stopped-typing` - typing announcements
//! - `agreement-signed` - a party signed
//! - `custom-clause-added` - a clause appended mid-negotiation
//!
//! Messages (client → server):
//! - `join-agreement` / `leave-agreement` - session membership
//! - `send-message`, `update-clause`, `typing-start`, `typing-stop`,
//!   `agreement-signed`, `custom-clause-added` - mirrors of the above
//!
//! ## Example
//!
//! ```json
//! {
//!   "type": "clause-updated",
//!   "agreement_id": "agr-1",
//!   "clause_id": "cl-7",
//!   "party": "partyB",
//!   "value": "acceptable"
//! }
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{
    AgreementStatus, ChatMessage, ClauseDef, PartyRole, Preference,
};

/// Event received from the collaboration server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A participant joined the agreement session
    UserJoined {
        agreement_id: String,
        user_id: String,
        display_name: String,
        /// Authoritative participant count after the join
        online_count: u32,
    },
    /// A participant left the agreement session
    UserLeft {
        agreement_id: String,
        user_id: String,
        online_count: u32,
    },
    /// Chat message broadcast
    Message { message: ChatMessage },
    /// A party changed a clause stance
    ClauseUpdated {
        agreement_id: String,
        clause_id: String,
        party: PartyRole,
        value: Preference,
    },
    /// Agreement lifecycle transition.
    /// Older servers emit `agreement-status-updated` for the same payload.
    #[serde(alias = "agreement-status-updated")]
    AgreementStatusChanged {
        agreement_id: String,
        status: AgreementStatus,
    },
    /// A remote user started typing
    UserTyping {
        agreement_id: String,
        user_id: String,
        display_name: String,
    },
    /// A remote user stopped typing
    UserStoppedTyping {
        agreement_id: String,
        user_id: String,
    },
    /// A party signed the agreement
    AgreementSigned {
        agreement_id: String,
        party: PartyRole,
        /// Both sides are now complete
        fully_signed: bool,
    },
    /// A custom clause was appended mid-negotiation
    CustomClauseAdded {
        agreement_id: String,
        clause: ClauseDef,
    },
}

/// Event emitted to the collaboration server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Announce membership for one agreement. Re-sent on every reconnect;
    /// the server deduplicates.
    JoinAgreement {
        agreement_id: String,
        user_id: String,
        display_name: String,
    },
    /// Best-effort goodbye, sent at teardown
    LeaveAgreement {
        agreement_id: String,
        user_id: String,
    },
    /// Propagate a clause stance change to the counterpart
    UpdateClause {
        agreement_id: String,
        clause_id: String,
        party: PartyRole,
        value: Preference,
    },
    /// Propagate a chat message (the durable write goes over REST)
    SendMessage { message: ChatMessage },
    TypingStart {
        agreement_id: String,
        user_id: String,
        display_name: String,
    },
    TypingStop {
        agreement_id: String,
        user_id: String,
    },
    /// Announce a completed sign action
    AgreementSigned {
        agreement_id: String,
        party: PartyRole,
        fully_signed: bool,
    },
    /// Propagate a custom clause appended by this party
    CustomClauseAdded {
        agreement_id: String,
        clause: ClauseDef,
    },
}

impl ServerEvent {
    /// Parse an inbound text frame. Invalid frames are logged and dropped.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(ev) => Some(ev),
            Err(e) => {
                warn!(error = %e, frame = text, "Dropping malformed channel frame");
                None
            }
        }
    }

    /// Agreement this event is scoped to.
    pub fn agreement_id(&self) -> &str {
        match self {
            Self::UserJoined { agreement_id, .. }
            | Self::UserLeft { agreement_id, .. }
            | Self::ClauseUpdated { agreement_id, .. }
            | Self::AgreementStatusChanged { agreement_id, .. }
            | Self::UserTyping { agreement_id, .. }
            | Self::UserStoppedTyping { agreement_id, .. }
            | Self::AgreementSigned { agreement_id, .. }
            | Self::CustomClauseAdded { agreement_id, .. } => agreement_id,
            Self::Message { message } => &message.agreement_id,
        }
    }
}

impl ClientEvent {
    /// Serialize for the wire.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeliveryState;
    use uuid::Uuid;

    #[test]
    fn test_server_event_tags() {
        let ev = ServerEvent::ClauseUpdated {
            agreement_id: "agr-1".into(),
            clause_id: "cl-7".into(),
            party: PartyRole::PartyB,
            value: Preference::Acceptable,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"clause-updated\""));
        assert!(json.contains("\"party\":\"partyB\""));
        assert!(json.contains("\"value\":\"acceptable\""));
    }

    #[test]
    fn test_status_changed_alias() {
        // Both historical event names decode to the same variant
        for name in ["agreement-status-changed", "agreement-status-updated"] {
            let json =
                format!(r#"{{"type":"{name}","agreement_id":"agr-1","status":"in-progress"}}"#);
            let ev = ServerEvent::parse(&json).unwrap();
            match ev {
                ServerEvent::AgreementStatusChanged { status, .. } => {
                    assert_eq!(status, AgreementStatus::InProgress);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        assert!(ServerEvent::parse("{\"type\":\"no-such-event\"}").is_none());
        assert!(ServerEvent::parse("not json").is_none());
        // Missing required fields
        assert!(ServerEvent::parse("{\"type\":\"user-joined\"}").is_none());
    }

    #[test]
    fn test_presence_roundtrip() {
        let json = r#"{
            "type": "user-joined",
            "agreement_id": "agr-1",
            "user_id": "u-b",
            "display_name": "Bob",
            "online_count": 2
        }"#;
        let ev = ServerEvent::parse(json).unwrap();
        match ev {
            ServerEvent::UserJoined { online_count, .. } => assert_eq!(online_count, 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_message_event_roundtrip() {
        let msg = ChatMessage {
            id: Some("m-1".into()),
            client_key: Uuid::new_v4(),
            agreement_id: "agr-1".into(),
            sender_id: "u-a".into(),
            sender_name: "Alice".into(),
            role: PartyRole::PartyA,
            body: "hello".into(),
            sent_at: chrono::Utc::now(),
            delivery: DeliveryState::Delivered,
        };
        let ev = ClientEvent::SendMessage {
            message: msg.clone(),
        };
        let json = ev.encode().unwrap();
        assert!(json.contains("\"type\":\"send-message\""));

        // The server echoes the same payload back as `message`
        let echo = json.replace("send-message", "message");
        let back = ServerEvent::parse(&echo).unwrap();
        match back {
            ServerEvent::Message { message } => {
                assert_eq!(message.client_key, msg.client_key);
                assert_eq!(message.body, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_client_event_wire_names() {
        let ev = ClientEvent::JoinAgreement {
            agreement_id: "agr-1".into(),
            user_id: "u-a".into(),
            display_name: "Alice".into(),
        };
        assert!(ev.encode().unwrap().contains("\"type\":\"join-agreement\""));

        let ev = ClientEvent::TypingStart {
            agreement_id: "agr-1".into(),
            user_id: "u-a".into(),
            display_name: "Alice".into(),
        };
        assert!(ev.encode().unwrap().contains("\"type\":\"typing-start\""));
    }
}
