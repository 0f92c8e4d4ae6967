//! Sequential composition: run children one after another, stop at the first
//! failure.

use crate::group::{ActionGroup, CompletionPolicy, Launch, Verdict};

#[derive(Debug, Default, Clone)]
pub struct SequencePolicy {
    current: Option<usize>,
    failed_at: Option<usize>,
}

impl CompletionPolicy for SequencePolicy {
    const KIND: &'static str = "Sequence";

    fn reset(&mut self, _child_count: usize) {
        self.current = None;
        self.failed_at = None;
    }

    fn launch(&mut self, child_count: usize) -> Launch {
        if child_count == 0 {
            return Launch::Finish(true);
        }
        self.current = Some(0);
        Launch::First
    }

    fn child_finished(&mut self, index: usize, succeeded: bool, child_count: usize) -> Verdict {
        if self.current != Some(index) {
            // only the running child can report
            return Verdict::Pending;
        }
        if !succeeded {
            self.current = None;
            self.failed_at = Some(index);
            return Verdict::Finish(false);
        }
        let next = index + 1;
        if next == child_count {
            self.current = None;
            Verdict::Finish(true)
        } else {
            self.current = Some(next);
            Verdict::StartNext(next)
        }
    }
}

/// Runs children in append order; each success starts the next child.
pub type SequenceAction = ActionGroup<SequencePolicy>;

impl ActionGroup<SequencePolicy> {
    /// Index of the child currently running, if any.
    pub fn current(&self) -> Option<usize> {
        self.policy().current
    }

    /// Index of the child whose failure ended the current run.
    pub fn failed_at(&self) -> Option<usize> {
        self.policy().failed_at
    }
}
