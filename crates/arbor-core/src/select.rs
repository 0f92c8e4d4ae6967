//! Selective composition: the first child to succeed wins.

use std::collections::BTreeSet;

use crate::group::{ActionGroup, CompletionPolicy, Launch, Verdict};

#[derive(Debug, Default, Clone)]
pub struct SelectPolicy {
    winner: Option<usize>,
    failed: BTreeSet<usize>,
}

impl CompletionPolicy for SelectPolicy {
    const KIND: &'static str = "Select";

    fn reset(&mut self, _child_count: usize) {
        self.winner = None;
        self.failed.clear();
    }

    fn launch(&mut self, child_count: usize) -> Launch {
        // no child can succeed
        if child_count == 0 {
            Launch::Finish(false)
        } else {
            Launch::All
        }
    }

    fn child_finished(&mut self, index: usize, succeeded: bool, child_count: usize) -> Verdict {
        if succeeded {
            self.winner = Some(index);
            return Verdict::FinishAndStopOthers(true);
        }
        self.failed.insert(index);
        if self.failed.len() == child_count {
            Verdict::Finish(false)
        } else {
            Verdict::Pending
        }
    }
}

/// Starts every child; finishes with the first success, or fails once every
/// child failed.
pub type SelectAction = ActionGroup<SelectPolicy>;

impl ActionGroup<SelectPolicy> {
    /// Index of the child whose success finished the current run.
    pub fn winner(&self) -> Option<usize> {
        self.policy().winner
    }

    pub fn failed(&self) -> BTreeSet<usize> {
        self.policy().failed.clone()
    }
}
