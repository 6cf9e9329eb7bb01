//! Agreement document and party identity

use serde::{Deserialize, Serialize};

use super::clause::ClauseEntry;
use super::signature::Signature;

/// Lifecycle status of an agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgreementStatus {
    Draft,
    Invited,
    Accepted,
    InProgress,
    Completed,
    Signed,
    Rejected,
}

impl AgreementStatus {
    /// Terminal statuses admit no further negotiation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Signed | Self::Rejected)
    }
}

impl std::fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Invited => "invited",
            Self::Accepted => "accepted",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Signed => "signed",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Which side of the agreement an actor belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartyRole {
    PartyA,
    PartyB,
    System,
}

impl PartyRole {
    /// The other negotiating party. `System` has no counterpart.
    pub fn counterpart(&self) -> Option<PartyRole> {
        match self {
            Self::PartyA => Some(Self::PartyB),
            Self::PartyB => Some(Self::PartyA),
            Self::System => None,
        }
    }
}

impl std::fmt::Display for PartyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PartyA => "partyA",
            Self::PartyB => "partyB",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

/// A user participating in an agreement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// An agreement between two parties
///
/// Party A is the creator. Party B may be known only by invite email until
/// the invitation is accepted. The backend is the source of truth; clients
/// hold a read replica refreshed from snapshots and channel events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agreement {
    pub id: String,
    pub title: String,
    pub status: AgreementStatus,
    pub party_a: Participant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_b: Option<Participant>,
    /// Invitee email, set before Party B accepts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_b_email: Option<String>,
    /// Ordered clause entries under negotiation
    #[serde(default)]
    pub clauses: Vec<ClauseEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_a_signature: Option<Signature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_b_signature: Option<Signature>,
}

impl Agreement {
    /// Role of the given user on this agreement, if they participate at all.
    pub fn role_of(&self, user_id: &str) -> Option<PartyRole> {
        if self.party_a.user_id == user_id {
            return Some(PartyRole::PartyA);
        }
        if let Some(b) = &self.party_b {
            if b.user_id == user_id {
                return Some(PartyRole::PartyB);
            }
        }
        None
    }

    /// Signature attached by the given party, if any.
    pub fn signature_of(&self, party: PartyRole) -> Option<&Signature> {
        match party {
            PartyRole::PartyA => self.party_a_signature.as_ref(),
            PartyRole::PartyB => self.party_b_signature.as_ref(),
            PartyRole::System => None,
        }
    }

    /// Both parties have signed. Clause mutation is disabled past this point.
    pub fn fully_signed(&self) -> bool {
        self.party_a_signature.is_some() && self.party_b_signature.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agreement(with_b: bool) -> Agreement {
        Agreement {
            id: "agr-1".into(),
            title: "Mutual NDA".into(),
            status: AgreementStatus::InProgress,
            party_a: Participant {
                user_id: "u-a".into(),
                display_name: "Alice".into(),
                email: None,
            },
            party_b: with_b.then(|| Participant {
                user_id: "u-b".into(),
                display_name: "Bob".into(),
                email: None,
            }),
            party_b_email: (!with_b).then(|| "bob@example.com".into()),
            clauses: Vec::new(),
            party_a_signature: None,
            party_b_signature: None,
        }
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&AgreementStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
        let back: AgreementStatus = serde_json::from_str("\"signed\"").unwrap();
        assert_eq!(back, AgreementStatus::Signed);
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(
            serde_json::to_string(&PartyRole::PartyA).unwrap(),
            "\"partyA\""
        );
        let back: PartyRole = serde_json::from_str("\"partyB\"").unwrap();
        assert_eq!(back, PartyRole::PartyB);
    }

    #[test]
    fn test_role_of() {
        let agr = agreement(true);
        assert_eq!(agr.role_of("u-a"), Some(PartyRole::PartyA));
        assert_eq!(agr.role_of("u-b"), Some(PartyRole::PartyB));
        assert_eq!(agr.role_of("u-x"), None);
    }

    #[test]
    fn test_role_of_before_invite_accepted() {
        let agr = agreement(false);
        assert_eq!(agr.role_of("u-b"), None);
    }

    #[test]
    fn test_counterpart() {
        assert_eq!(PartyRole::PartyA.counterpart(), Some(PartyRole::PartyB));
        assert_eq!(PartyRole::System.counterpart(), None);
    }
}
