//! Clause entries and bilateral resolution
//!
//! Each clause under negotiation carries two independent party preferences.
//! The resolution status is derived on every read from those two fields —
//! it is never stored, so stored and displayed state cannot drift.

use serde::{Deserialize, Serialize};

use super::agreement::PartyRole;

/// A party's stance on a clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    Acceptable,
    Unacceptable,
    /// Legacy value from older agreements; counts as accepting
    Preferred,
    /// Unrecognized wire value. Tolerated at the boundary so the tracker
    /// never operates on partially-shaped data; treated as set but not
    /// accepting.
    Other,
}

impl<'de> Deserialize<'de> for Preference {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(match value.as_str() {
            "acceptable" => Self::Acceptable,
            "unacceptable" => Self::Unacceptable,
            "preferred" => Self::Preferred,
            _ => Self::Other,
        })
    }
}

impl Preference {
    /// Whether this stance is in the accepted family.
    pub fn is_accepting(&self) -> bool {
        matches!(self, Self::Acceptable | Self::Preferred)
    }
}

/// Derived bilateral resolution of a clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    BothAgreed,
    Rejected,
    InDiscussion,
    Pending,
}

/// Clause definition, owned by the external clause/template system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseDef {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub required: bool,
}

/// One clause attached to an agreement, with both parties' stances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseEntry {
    pub id: String,
    pub clause: ClauseDef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_a_preference: Option<Preference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_b_preference: Option<Preference>,
}

impl ClauseEntry {
    /// A fresh entry with both stances unset.
    pub fn new(clause: ClauseDef) -> Self {
        Self {
            id: clause.id.clone(),
            clause,
            party_a_preference: None,
            party_b_preference: None,
        }
    }

    /// The given party's stance.
    pub fn preference_of(&self, party: PartyRole) -> Option<Preference> {
        match party {
            PartyRole::PartyA => self.party_a_preference,
            PartyRole::PartyB => self.party_b_preference,
            PartyRole::System => None,
        }
    }

    /// Set the given party's stance. Callers are responsible for only
    /// writing the acting user's own field.
    pub fn set_preference(&mut self, party: PartyRole, value: Preference) {
        match party {
            PartyRole::PartyA => self.party_a_preference = Some(value),
            PartyRole::PartyB => self.party_b_preference = Some(value),
            PartyRole::System => {}
        }
    }

    /// Derived resolution, a pure function of the two stance fields:
    /// any `unacceptable` rejects; both in the accepted family agrees;
    /// both set otherwise is still in discussion; anything unset is pending.
    pub fn resolution(&self) -> ResolutionStatus {
        let a = self.party_a_preference;
        let b = self.party_b_preference;

        if a == Some(Preference::Unacceptable) || b == Some(Preference::Unacceptable) {
            return ResolutionStatus::Rejected;
        }
        match (a, b) {
            (Some(a), Some(b)) if a.is_accepting() && b.is_accepting() => {
                ResolutionStatus::BothAgreed
            }
            (Some(_), Some(_)) => ResolutionStatus::InDiscussion,
            _ => ResolutionStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(a: Option<Preference>, b: Option<Preference>) -> ClauseEntry {
        ClauseEntry {
            id: "cl-1".into(),
            clause: ClauseDef {
                id: "cl-1".into(),
                name: "Confidentiality".into(),
                description: "Mutual non-disclosure".into(),
                category: "confidentiality".into(),
                required: true,
            },
            party_a_preference: a,
            party_b_preference: b,
        }
    }

    #[test]
    fn test_both_accepting_agrees() {
        use Preference::*;
        assert_eq!(
            entry(Some(Acceptable), Some(Acceptable)).resolution(),
            ResolutionStatus::BothAgreed
        );
        // Legacy value is in the accepted family
        assert_eq!(
            entry(Some(Preferred), Some(Acceptable)).resolution(),
            ResolutionStatus::BothAgreed
        );
    }

    #[test]
    fn test_any_unacceptable_rejects() {
        use Preference::*;
        assert_eq!(
            entry(Some(Unacceptable), Some(Acceptable)).resolution(),
            ResolutionStatus::Rejected
        );
        assert_eq!(
            entry(Some(Acceptable), Some(Unacceptable)).resolution(),
            ResolutionStatus::Rejected
        );
        // Rejection wins even when the other side is unset
        assert_eq!(
            entry(None, Some(Unacceptable)).resolution(),
            ResolutionStatus::Rejected
        );
    }

    #[test]
    fn test_unset_is_pending() {
        use Preference::*;
        assert_eq!(entry(None, None).resolution(), ResolutionStatus::Pending);
        assert_eq!(
            entry(Some(Acceptable), None).resolution(),
            ResolutionStatus::Pending
        );
    }

    #[test]
    fn test_unknown_wire_value_is_in_discussion() {
        use Preference::*;
        assert_eq!(
            entry(Some(Acceptable), Some(Other)).resolution(),
            ResolutionStatus::InDiscussion
        );
    }

    #[test]
    fn test_unknown_wire_value_deserializes() {
        let p: Preference = serde_json::from_str("\"negotiable\"").unwrap();
        assert_eq!(p, Preference::Other);
        assert!(!p.is_accepting());
    }

    #[test]
    fn test_preference_wire_names() {
        assert_eq!(
            serde_json::to_string(&Preference::Acceptable).unwrap(),
            "\"acceptable\""
        );
        assert_eq!(
            serde_json::to_string(&ResolutionStatus::BothAgreed).unwrap(),
            "\"BOTH_AGREED\""
        );
    }

    #[test]
    fn test_set_preference_by_role() {
        let mut e = entry(None, None);
        e.set_preference(PartyRole::PartyB, Preference::Acceptable);
        assert_eq!(e.party_b_preference, Some(Preference::Acceptable));
        assert_eq!(e.party_a_preference, None);
        // System writes nowhere
        e.set_preference(PartyRole::System, Preference::Unacceptable);
        assert_eq!(e.resolution(), ResolutionStatus::Pending);
    }
}
