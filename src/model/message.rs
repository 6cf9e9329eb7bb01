//! Chat messages
//!
//! Messages are append-only per agreement. While a send is in flight the
//! local entry carries `DeliveryState::Sending` and no server id; the
//! server's confirmation (REST response) or echo (channel broadcast) is
//! reconciled by exact match on the client-generated `client_key`, so a
//! sent message and its echo collapse to one visible entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agreement::PartyRole;

/// Delivery progress of a locally-originated message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Optimistically appended, durable write still in flight
    Sending,
    /// Confirmed by the backend (or received from the counterpart)
    Delivered,
    /// Durable write failed; entry is kept and marked, never silently dropped
    Failed,
}

/// One chat message scoped to an agreement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned id, absent while the send is in flight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Client-generated idempotency key, minted by the sender
    pub client_key: Uuid,
    pub agreement_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub role: PartyRole,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default = "default_delivery")]
    pub delivery: DeliveryState,
}

fn default_delivery() -> DeliveryState {
    DeliveryState::Delivered
}

impl ChatMessage {
    /// Stage a new outbound message with a fresh client key.
    pub fn outgoing(
        agreement_id: &str,
        sender_id: &str,
        sender_name: &str,
        role: PartyRole,
        body: &str,
    ) -> Self {
        Self {
            id: None,
            client_key: Uuid::new_v4(),
            agreement_id: agreement_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            role,
            body: body.to_string(),
            sent_at: Utc::now(),
            delivery: DeliveryState::Sending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_is_pending() {
        let msg = ChatMessage::outgoing("agr-1", "u-a", "Alice", PartyRole::PartyA, "hello");
        assert!(msg.id.is_none());
        assert_eq!(msg.delivery, DeliveryState::Sending);
    }

    #[test]
    fn test_delivery_defaults_to_delivered_on_the_wire() {
        // Broadcast payloads carry no delivery field; receivers treat them
        // as delivered.
        let json = format!(
            r#"{{"client_key":"{}","agreement_id":"agr-1","sender_id":"u-b",
                "sender_name":"Bob","role":"partyB","body":"hi",
                "sent_at":"2024-01-15T10:30:00Z"}}"#,
            Uuid::new_v4()
        );
        let msg: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg.delivery, DeliveryState::Delivered);
    }

    #[test]
    fn test_distinct_client_keys() {
        let a = ChatMessage::outgoing("agr-1", "u-a", "Alice", PartyRole::PartyA, "one");
        let b = ChatMessage::outgoing("agr-1", "u-a", "Alice", PartyRole::PartyA, "one");
        assert_ne!(a.client_key, b.client_key);
    }
}
