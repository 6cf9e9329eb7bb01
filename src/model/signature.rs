//! Signature artifacts
//!
//! A signature belongs to exactly one party and is immutable once the
//! agreement reaches the signed state. The artifact is either an uploaded
//! image (stored by the backend, referenced here) or typed text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agreement::PartyRole;

/// The signature content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignatureArtifact {
    /// Backend storage reference for an uploaded image
    Image { reference: String },
    /// Free-text signature from the typed flow
    Typed { text: String },
}

impl SignatureArtifact {
    /// The reusable backend reference, when the artifact has one.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Image { reference } => Some(reference),
            Self::Typed { .. } => None,
        }
    }
}

/// A signature attached to an agreement by one party
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub party: PartyRole,
    pub artifact: SignatureArtifact,
    pub attached_at: DateTime<Utc>,
}
