//! Signature gate
//!
//! Guards the terminal sign action. Per-party stages move strictly forward
//! (`NoSignature → SignatureUploaded → Signed`); there is no unsign. The
//! gate's verdict is advisory — the backend re-verifies every precondition
//! at sign time.

use crate::model::PartyRole;
use crate::types::{ParleyError, Result};

/// Per-party signing progression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStage {
    NoSignature,
    SignatureUploaded,
    Signed,
}

/// Client-side guard for the sign action of the local party
#[derive(Debug)]
pub struct SignatureGate {
    local_party: PartyRole,
    stage: SigningStage,
    artifact_reference: Option<String>,
    counterpart_signed: bool,
}

impl SignatureGate {
    pub fn new(local_party: PartyRole) -> Self {
        Self {
            local_party,
            stage: SigningStage::NoSignature,
            artifact_reference: None,
            counterpart_signed: false,
        }
    }

    pub fn stage(&self) -> SigningStage {
        self.stage
    }

    pub fn artifact_reference(&self) -> Option<&str> {
        self.artifact_reference.as_deref()
    }

    /// Attach an uploaded artifact reference. A cached reference from an
    /// earlier agreement may be reused here.
    pub fn attach_artifact(&mut self, reference: &str) {
        self.artifact_reference = Some(reference.to_string());
        if self.stage == SigningStage::NoSignature {
            self.stage = SigningStage::SignatureUploaded;
        }
    }

    /// Whether the sign button may be enabled, given the consensus gate.
    pub fn can_sign(&self, all_clauses_accepted: bool) -> bool {
        self.stage == SigningStage::SignatureUploaded
            && self.artifact_reference.is_some()
            && all_clauses_accepted
    }

    /// Check every precondition, naming the first one that fails so the
    /// caller can explain why the action is blocked instead of firing a
    /// doomed request.
    pub fn check_preconditions(&self, all_clauses_accepted: bool) -> Result<&str> {
        if self.stage == SigningStage::Signed {
            return Err(ParleyError::Precondition(
                "This party has already signed".into(),
            ));
        }
        let reference = self.artifact_reference.as_deref().ok_or_else(|| {
            ParleyError::Precondition("No signature artifact uploaded".into())
        })?;
        if !all_clauses_accepted {
            return Err(ParleyError::Precondition(
                "Not every clause is mutually accepted".into(),
            ));
        }
        Ok(reference)
    }

    /// Record a completed sign, ours or the counterpart's. Monotonic: once
    /// signed, nothing here moves backwards.
    pub fn record_signed(&mut self, party: PartyRole, fully_signed: bool) {
        if party == self.local_party {
            self.stage = SigningStage::Signed;
        } else {
            self.counterpart_signed = true;
        }
        if fully_signed {
            self.counterpart_signed = true;
            if self.stage != SigningStage::Signed && party == self.local_party {
                self.stage = SigningStage::Signed;
            }
        }
    }

    /// Both parties have independently reached `Signed`.
    pub fn both_signed(&self) -> bool {
        self.stage == SigningStage::Signed && self.counterpart_signed
    }

    pub fn counterpart_signed(&self) -> bool {
        self.counterpart_signed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_progress_forward() {
        let mut gate = SignatureGate::new(PartyRole::PartyA);
        assert_eq!(gate.stage(), SigningStage::NoSignature);

        gate.attach_artifact("sig/abc.png");
        assert_eq!(gate.stage(), SigningStage::SignatureUploaded);

        gate.record_signed(PartyRole::PartyA, false);
        assert_eq!(gate.stage(), SigningStage::Signed);

        // Re-attaching after signing does not move the stage back
        gate.attach_artifact("sig/other.png");
        assert_eq!(gate.stage(), SigningStage::Signed);
    }

    #[test]
    fn test_can_sign_requires_artifact_and_consensus() {
        let mut gate = SignatureGate::new(PartyRole::PartyA);
        assert!(!gate.can_sign(true));

        gate.attach_artifact("sig/abc.png");
        assert!(gate.can_sign(true));
        assert!(!gate.can_sign(false));

        gate.record_signed(PartyRole::PartyA, false);
        assert!(!gate.can_sign(true));
    }

    #[test]
    fn test_precondition_messages_name_the_blocker() {
        let mut gate = SignatureGate::new(PartyRole::PartyA);

        let err = gate.check_preconditions(true).unwrap_err();
        assert!(err.to_string().contains("artifact"));

        gate.attach_artifact("sig/abc.png");
        let err = gate.check_preconditions(false).unwrap_err();
        assert!(err.to_string().contains("mutually accepted"));

        assert_eq!(gate.check_preconditions(true).unwrap(), "sig/abc.png");

        gate.record_signed(PartyRole::PartyA, false);
        let err = gate.check_preconditions(true).unwrap_err();
        assert!(err.to_string().contains("already signed"));
    }

    #[test]
    fn test_both_signed() {
        let mut gate = SignatureGate::new(PartyRole::PartyA);
        gate.attach_artifact("sig/abc.png");

        gate.record_signed(PartyRole::PartyB, false);
        assert!(gate.counterpart_signed());
        assert!(!gate.both_signed());

        gate.record_signed(PartyRole::PartyA, true);
        assert!(gate.both_signed());
    }
}
