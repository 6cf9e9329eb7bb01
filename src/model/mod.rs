//! Domain model for agreement collaboration
//!
//! Wire-faithful structs shared between the REST backend client and the
//! real-time channel: agreements, clause entries, chat messages and
//! signature artifacts. Derived values (clause resolution, the signing
//! gate input) are computed on read, never stored.

pub mod agreement;
pub mod clause;
pub mod message;
pub mod signature;

pub use agreement::{Agreement, AgreementStatus, Participant, PartyRole};
pub use clause::{ClauseDef, ClauseEntry, Preference, ResolutionStatus};
pub use message::{ChatMessage, DeliveryState};
pub use signature::{Signature, SignatureArtifact};
