//! Run-local duplicate suppression.
//!
//! Every parse pass re-reads the whole visible document, so earlier cards
//! come back on every pass. The tracker remembers ids seen during one
//! extraction run; the set only grows for the run's lifetime. Cross-run
//! suppression is the monitor's job via the persistent store.

use std::collections::HashSet;

use placewatch_common::ReviewRecord;

#[derive(Debug, Default)]
pub struct DedupTracker {
    seen: HashSet<String>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop records whose id was already seen this run; remember the rest.
    pub fn filter_new(&mut self, records: Vec<ReviewRecord>) -> Vec<ReviewRecord> {
        records
            .into_iter()
            .filter(|r| self.seen.insert(r.id_review.clone()))
            .collect()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str) -> ReviewRecord {
        ReviewRecord::new(id.to_string(), Utc::now())
    }

    #[test]
    fn repeated_ids_pass_through_once() {
        let mut tracker = DedupTracker::new();

        let first = tracker.filter_new(vec![record("a"), record("b")]);
        assert_eq!(first.len(), 2);

        // Same document re-parsed after a scroll: a and b again, plus c
        let second = tracker.filter_new(vec![record("a"), record("b"), record("c")]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id_review, "c");

        assert_eq!(tracker.seen_count(), 3);
    }

    #[test]
    fn duplicates_within_one_batch_collapse() {
        let mut tracker = DedupTracker::new();
        let fresh = tracker.filter_new(vec![record("x"), record("x")]);
        assert_eq!(fresh.len(), 1);
    }
}
