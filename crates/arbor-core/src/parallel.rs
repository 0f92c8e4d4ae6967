//! Parallel composition: succeed iff every child succeeds.

use std::collections::BTreeSet;

use crate::group::{ActionGroup, CompletionPolicy, Launch, Verdict};

/// Bookkeeping for [`ParallelAction`].
///
/// By default the group waits until every child has reported and then
/// finishes with success only if all of them succeeded. In fail-fast mode the
/// first failure finishes the group and stops the children still running.
#[derive(Debug, Default, Clone)]
pub struct ParallelPolicy {
    succeeded: BTreeSet<usize>,
    failed: BTreeSet<usize>,
    fail_fast: bool,
}

impl ParallelPolicy {
    pub fn fail_fast() -> Self {
        Self {
            fail_fast: true,
            ..Self::default()
        }
    }
}

impl CompletionPolicy for ParallelPolicy {
    const KIND: &'static str = "Parallel";

    fn reset(&mut self, _child_count: usize) {
        self.succeeded.clear();
        self.failed.clear();
    }

    fn launch(&mut self, child_count: usize) -> Launch {
        // all of an empty set succeeded
        if child_count == 0 {
            Launch::Finish(true)
        } else {
            Launch::All
        }
    }

    fn child_finished(&mut self, index: usize, succeeded: bool, child_count: usize) -> Verdict {
        if succeeded {
            self.succeeded.insert(index);
        } else {
            self.failed.insert(index);
        }

        if self.succeeded.len() == child_count {
            Verdict::Finish(true)
        } else if !succeeded && self.fail_fast {
            Verdict::FinishAndStopOthers(false)
        } else if self.succeeded.len() + self.failed.len() == child_count {
            Verdict::Finish(false)
        } else {
            Verdict::Pending
        }
    }
}

/// Starts every child at once; succeeds once all of them succeeded.
pub type ParallelAction = ActionGroup<ParallelPolicy>;

impl ActionGroup<ParallelPolicy> {
    /// A parallel group that fails on the first child failure.
    pub fn new_fail_fast() -> Self {
        Self::with_policy(ParallelPolicy::fail_fast())
    }

    pub fn is_fail_fast(&self) -> bool {
        self.policy().fail_fast
    }

    pub fn set_fail_fast(&mut self, fail_fast: bool) {
        self.policy_mut().fail_fast = fail_fast;
    }

    /// Indices of the children that succeeded in the current run.
    pub fn succeeded(&self) -> BTreeSet<usize> {
        self.policy().succeeded.clone()
    }

    /// Indices of the children that failed in the current run.
    pub fn failed(&self) -> BTreeSet<usize> {
        self.policy().failed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionCore, ActionState};
    use crate::testing::{Stub, Recorder};

    fn group_of(n: usize) -> (ParallelAction, Vec<ActionCore>, Recorder) {
        let recorder = Recorder::new();
        let mut group = ParallelAction::new();
        group.set_finish_callback(recorder.callback());
        let handles = (0..n)
            .map(|_| {
                let stub = Stub::new();
                let handle = stub.handle();
                group.push(stub).unwrap();
                handle
            })
            .collect();
        (group, handles, recorder)
    }

    fn set(items: &[usize]) -> BTreeSet<usize> {
        items.iter().copied().collect()
    }

    #[test]
    fn start_starts_every_child_in_order() {
        let (mut group, handles, _) = group_of(3);
        assert!(group.start());
        for handle in &handles {
            assert_eq!(handle.state(), ActionState::Started);
        }
        assert!(group.succeeded().is_empty());
        assert!(group.failed().is_empty());
    }

    #[test]
    fn three_children_all_succeed() {
        let (mut group, handles, recorder) = group_of(3);
        group.start();

        handles[2].finish(true);
        handles[0].finish(true);
        assert!(recorder.is_empty());
        handles[1].finish(true);

        assert_eq!(recorder.outcomes(), vec![true]);
        assert_eq!(group.succeeded(), set(&[0, 1, 2]));
        assert_eq!(group.failed(), set(&[]));
        assert_eq!(group.outcome(), Some(true));
    }

    #[test]
    fn all_succeed_for_any_n() {
        for n in 1..=6 {
            let (mut group, handles, recorder) = group_of(n);
            group.start();
            for handle in handles.iter().rev() {
                handle.finish(true);
            }
            assert_eq!(recorder.outcomes(), vec![true], "n = {n}");
            assert_eq!(group.succeeded().len(), n);
        }
    }

    #[test]
    fn two_failures_then_success_finishes_with_failure() {
        let (mut group, handles, recorder) = group_of(3);
        group.start();

        handles[0].finish(false);
        handles[1].finish(false);
        assert!(recorder.is_empty());
        handles[2].finish(true);

        assert_eq!(recorder.outcomes(), vec![false]);
        assert_eq!(group.succeeded(), set(&[2]));
        assert_eq!(group.failed(), set(&[0, 1]));
    }

    #[test]
    fn failure_never_turns_into_success() {
        for failing in 0..4 {
            let (mut group, handles, recorder) = group_of(4);
            group.start();
            for (index, handle) in handles.iter().enumerate() {
                handle.finish(index != failing);
                let succeeded = group.succeeded();
                let failed = group.failed();
                assert!(succeeded.is_disjoint(&failed));
                assert!(succeeded.len() + failed.len() <= 4);
            }
            assert_eq!(recorder.outcomes(), vec![false]);
        }
    }

    #[test]
    fn no_completion_after_every_child_reported() {
        let (mut group, handles, recorder) = group_of(2);
        group.start();
        handles[0].finish(true);
        handles[1].finish(false);

        // children cannot finish twice, so nothing else reaches the group
        assert!(!handles[0].finish(false));
        assert!(!handles[1].finish(true));
        assert_eq!(recorder.outcomes(), vec![false]);
        assert_eq!(group.succeeded().len() + group.failed().len(), 2);
    }

    #[test]
    fn stop_on_never_started_group_is_a_no_op() {
        let (mut group, handles, recorder) = group_of(2);
        assert!(!group.stop());
        assert!(recorder.is_empty());
        assert_eq!(handles[0].state(), ActionState::Idle);
    }

    #[test]
    fn stop_cancels_children_and_suppresses_completion() {
        let (mut group, handles, recorder) = group_of(3);
        group.start();
        handles[0].finish(true);

        assert!(group.stop());
        assert_eq!(handles[1].state(), ActionState::Idle);
        assert_eq!(handles[2].state(), ActionState::Idle);
        assert!(!handles[1].finish(true));
        assert!(recorder.is_empty());
    }

    #[test]
    fn zero_children_succeed_on_start() {
        let (mut group, _, recorder) = group_of(0);
        assert!(group.start());
        assert_eq!(recorder.outcomes(), vec![true]);
        assert_eq!(group.state(), ActionState::Finished);
        assert!(group.succeeded().is_empty());
    }

    #[test]
    fn synchronous_completions_during_start() {
        let recorder = Recorder::new();
        let mut group = ParallelAction::new();
        group.set_finish_callback(recorder.callback());
        group.push(Stub::immediate(true)).unwrap();
        group.push(Stub::immediate(false)).unwrap();
        let last = Stub::new();
        let last_handle = last.handle();
        group.push(last).unwrap();

        group.start();
        assert_eq!(group.succeeded(), set(&[0]));
        assert_eq!(group.failed(), set(&[1]));
        assert!(recorder.is_empty());
        assert_eq!(last_handle.state(), ActionState::Started);

        last_handle.finish(true);
        assert_eq!(recorder.outcomes(), vec![false]);
    }

    #[test]
    fn every_child_finishing_synchronously_finishes_inside_start() {
        let recorder = Recorder::new();
        let mut group = ParallelAction::new();
        group.set_finish_callback(recorder.callback());
        for _ in 0..3 {
            group.push(Stub::immediate(true)).unwrap();
        }
        group.start();
        assert_eq!(recorder.outcomes(), vec![true]);
        assert_eq!(group.succeeded(), set(&[0, 1, 2]));
    }

    #[test]
    fn child_refusing_to_start_counts_as_failure() {
        let recorder = Recorder::new();
        let mut group = ParallelAction::new();
        group.set_finish_callback(recorder.callback());
        group.push(Stub::refusing()).unwrap();
        let ok = Stub::new();
        let ok_handle = ok.handle();
        group.push(ok).unwrap();

        group.start();
        assert_eq!(group.failed(), set(&[0]));
        ok_handle.finish(true);
        assert_eq!(recorder.outcomes(), vec![false]);
    }

    #[test]
    fn restart_clears_previous_sets() {
        let (mut group, handles, recorder) = group_of(2);
        group.start();
        handles[0].finish(false);
        handles[1].finish(true);

        group.start();
        assert!(group.succeeded().is_empty());
        assert!(group.failed().is_empty());
        handles[0].finish(true);
        handles[1].finish(true);
        assert_eq!(recorder.outcomes(), vec![false, true]);
    }

    #[test]
    fn fail_fast_stops_remaining_children() {
        let recorder = Recorder::new();
        let mut group = ParallelAction::new_fail_fast();
        group.set_finish_callback(recorder.callback());
        let stubs: Vec<Stub> = (0..3).map(|_| Stub::new()).collect();
        let handles: Vec<ActionCore> = stubs.iter().map(|p| p.handle()).collect();
        let stops: Vec<_> = stubs.iter().map(|p| p.counters().1).collect();
        for stub in stubs {
            group.push(stub).unwrap();
        }
        assert!(group.is_fail_fast());

        group.start();
        handles[1].finish(false);

        assert_eq!(recorder.outcomes(), vec![false]);
        assert_eq!(group.failed(), set(&[1]));
        assert_eq!(stops[0].get(), 1);
        assert_eq!(stops[1].get(), 0);
        assert_eq!(stops[2].get(), 1);
        assert!(!handles[0].finish(true));
    }

    #[test]
    fn nested_parallel_groups_bubble_up() {
        let recorder = Recorder::new();
        let mut inner = ParallelAction::new().with_label("inner");
        let leaf = Stub::new();
        let leaf_handle = leaf.handle();
        inner.push(leaf).unwrap();
        inner.push(Stub::immediate(true)).unwrap();

        let mut outer = ParallelAction::new();
        outer.set_finish_callback(recorder.callback());
        outer.push(inner).unwrap();
        outer.push(Stub::immediate(true)).unwrap();

        outer.start();
        assert!(recorder.is_empty());
        assert_eq!(outer.succeeded(), set(&[1]));

        leaf_handle.finish(true);
        assert_eq!(recorder.outcomes(), vec![true]);
        assert_eq!(outer.succeeded(), set(&[0, 1]));
        let snap = outer.snapshot();
        assert_eq!(snap.children[0].outcome, Some(true));
    }
}
