//! Clause consensus tracker
//!
//! Holds the authoritative local list of clause entries for one agreement.
//! The list is replaced wholesale from server snapshots after every durable
//! mutation; channel broadcasts are applied field-wise so the counterpart's
//! view moves without a refresh. Resolution is derived on every read.

use tracing::debug;

use crate::model::{ClauseDef, ClauseEntry, PartyRole, Preference, ResolutionStatus};
use crate::types::{ParleyError, Result};

/// Per-clause bilateral state for one agreement
#[derive(Debug, Default)]
pub struct ConsensusTracker {
    clauses: Vec<ClauseEntry>,
    /// Set once both signatures exist; all clause mutation is disabled
    locked: bool,
}

impl ConsensusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list from a server snapshot. The server is
    /// authoritative; locally derived values are discarded.
    pub fn replace_all(&mut self, clauses: Vec<ClauseEntry>) {
        self.clauses = clauses;
    }

    /// Lock the tracker once both parties have signed.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn clauses(&self) -> &[ClauseEntry] {
        &self.clauses
    }

    pub fn get(&self, clause_id: &str) -> Option<&ClauseEntry> {
        self.clauses.iter().find(|c| c.id == clause_id)
    }

    /// Apply a `clause-updated` broadcast. Applying the echo of our own
    /// update is idempotent: the snapshot already holds the same value.
    /// Updates for unknown clauses are dropped — a snapshot refresh will
    /// pick them up.
    pub fn apply_remote_update(&mut self, clause_id: &str, party: PartyRole, value: Preference) {
        match self.clauses.iter_mut().find(|c| c.id == clause_id) {
            Some(entry) => entry.set_preference(party, value),
            None => debug!(clause_id, "Stance update for unknown clause dropped"),
        }
    }

    /// Append a custom clause with both stances unset. Refused once both
    /// signatures exist.
    pub fn append_custom(&mut self, clause: ClauseDef) -> Result<&ClauseEntry> {
        if self.locked {
            return Err(ParleyError::Precondition(
                "Agreement is fully signed; clauses can no longer change".into(),
            ));
        }
        if self.clauses.iter().any(|c| c.id == clause.id) {
            return Err(ParleyError::BadRequest(format!(
                "Clause {} already attached",
                clause.id
            )));
        }
        self.clauses.push(ClauseEntry::new(clause));
        Ok(self.clauses.last().expect("just pushed"))
    }

    /// Derived resolution for one clause.
    pub fn resolution(&self, clause_id: &str) -> Option<ResolutionStatus> {
        self.get(clause_id).map(ClauseEntry::resolution)
    }

    /// The aggregate gate: every clause is mutually accepted. An empty
    /// agreement has nothing unresolved and passes.
    pub fn all_mutually_accepted(&self) -> bool {
        self.clauses
            .iter()
            .all(|c| c.resolution() == ResolutionStatus::BothAgreed)
    }

    /// Count of clauses per derived status, for status displays.
    pub fn tally(&self) -> ConsensusTally {
        let mut tally = ConsensusTally::default();
        for clause in &self.clauses {
            match clause.resolution() {
                ResolutionStatus::BothAgreed => tally.agreed += 1,
                ResolutionStatus::Rejected => tally.rejected += 1,
                ResolutionStatus::InDiscussion => tally.in_discussion += 1,
                ResolutionStatus::Pending => tally.pending += 1,
            }
        }
        tally
    }
}

/// Aggregate clause counts by derived resolution
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusTally {
    pub agreed: usize,
    pub rejected: usize,
    pub in_discussion: usize,
    pub pending: usize,
}

impl ConsensusTally {
    pub fn total(&self) -> usize {
        self.agreed + self.rejected + self.in_discussion + self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(id: &str) -> ClauseDef {
        ClauseDef {
            id: id.into(),
            name: format!("Clause {id}"),
            description: "text".into(),
            category: "general".into(),
            required: false,
        }
    }

    fn tracker_with(ids: &[&str]) -> ConsensusTracker {
        let mut t = ConsensusTracker::new();
        t.replace_all(ids.iter().map(|id| ClauseEntry::new(def(id))).collect());
        t
    }

    #[test]
    fn test_empty_tracker_passes_gate() {
        assert!(ConsensusTracker::new().all_mutually_accepted());
    }

    #[test]
    fn test_aggregate_gate() {
        let mut t = tracker_with(&["cl-1", "cl-2"]);
        assert!(!t.all_mutually_accepted());

        t.apply_remote_update("cl-1", PartyRole::PartyA, Preference::Acceptable);
        t.apply_remote_update("cl-1", PartyRole::PartyB, Preference::Acceptable);
        assert!(!t.all_mutually_accepted());

        t.apply_remote_update("cl-2", PartyRole::PartyA, Preference::Acceptable);
        t.apply_remote_update("cl-2", PartyRole::PartyB, Preference::Preferred);
        assert!(t.all_mutually_accepted());
    }

    #[test]
    fn test_one_rejection_blocks_gate() {
        let mut t = tracker_with(&["cl-1", "cl-2"]);
        t.apply_remote_update("cl-1", PartyRole::PartyA, Preference::Acceptable);
        t.apply_remote_update("cl-1", PartyRole::PartyB, Preference::Acceptable);
        t.apply_remote_update("cl-2", PartyRole::PartyA, Preference::Acceptable);
        t.apply_remote_update("cl-2", PartyRole::PartyB, Preference::Unacceptable);

        assert_eq!(t.resolution("cl-2"), Some(ResolutionStatus::Rejected));
        assert!(!t.all_mutually_accepted());
    }

    #[test]
    fn test_own_echo_is_idempotent() {
        let mut t = tracker_with(&["cl-1"]);
        t.apply_remote_update("cl-1", PartyRole::PartyA, Preference::Acceptable);
        let before = t.resolution("cl-1");
        // The broadcast of our own update arrives after the snapshot
        t.apply_remote_update("cl-1", PartyRole::PartyA, Preference::Acceptable);
        assert_eq!(t.resolution("cl-1"), before);
    }

    #[test]
    fn test_unknown_clause_update_dropped() {
        let mut t = tracker_with(&["cl-1"]);
        t.apply_remote_update("cl-9", PartyRole::PartyA, Preference::Acceptable);
        assert_eq!(t.clauses().len(), 1);
        assert!(t.resolution("cl-9").is_none());
    }

    #[test]
    fn test_append_custom() {
        let mut t = tracker_with(&["cl-1"]);
        t.append_custom(def("cl-2")).unwrap();
        assert_eq!(t.clauses().len(), 2);
        assert_eq!(t.resolution("cl-2"), Some(ResolutionStatus::Pending));

        // Duplicate ids refused
        assert!(t.append_custom(def("cl-2")).is_err());
    }

    #[test]
    fn test_locked_tracker_refuses_append() {
        let mut t = tracker_with(&["cl-1"]);
        t.lock();
        let err = t.append_custom(def("cl-2")).unwrap_err();
        assert!(matches!(err, ParleyError::Precondition(_)));
    }

    #[test]
    fn test_tally() {
        let mut t = tracker_with(&["cl-1", "cl-2", "cl-3"]);
        t.apply_remote_update("cl-1", PartyRole::PartyA, Preference::Acceptable);
        t.apply_remote_update("cl-1", PartyRole::PartyB, Preference::Acceptable);
        t.apply_remote_update("cl-2", PartyRole::PartyB, Preference::Unacceptable);

        let tally = t.tally();
        assert_eq!(tally.agreed, 1);
        assert_eq!(tally.rejected, 1);
        assert_eq!(tally.pending, 1);
        assert_eq!(tally.total(), 3);
    }
}
