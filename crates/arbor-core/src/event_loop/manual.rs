use std::cell::RefCell;
use std::collections::BTreeMap;
use std::time::Duration;

use tracing::trace;

use super::{EventLoop, Task, TimerId};

struct Entry {
    id: TimerId,
    task: Task,
}

#[derive(Default)]
struct State {
    now: Duration,
    next_id: u64,
    next_seq: u64,
    /// Keyed by (due time, insertion order).
    queue: BTreeMap<(Duration, u64), Entry>,
}

/// Deterministic loop with a virtual clock.
///
/// Nothing runs until the owner turns the loop with
/// [`run_until_idle`](ManualLoop::run_until_idle), [`step`](ManualLoop::step),
/// [`advance`](ManualLoop::advance) or [`run`](ManualLoop::run). Tasks due at
/// the same instant run in scheduling order.
#[derive(Default)]
pub struct ManualLoop {
    state: RefCell<State>,
}

impl ManualLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since the loop was created.
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Due time of the earliest pending task.
    pub fn next_due(&self) -> Option<Duration> {
        self.state.borrow().queue.keys().next().map(|&(due, _)| due)
    }

    /// Runs every task due now, including tasks deferred while doing so.
    pub fn run_until_idle(&self) -> usize {
        let now = self.now();
        self.drain_until(now)
    }

    /// Moves the clock to the next due task and runs everything due at that
    /// instant. Returns `false` if nothing is pending.
    pub fn step(&self) -> bool {
        let Some(due) = self.next_due() else {
            return false;
        };
        self.drain_until(due);
        true
    }

    /// Advances the clock by `by`, running every task that falls due on the
    /// way, in time order.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let ran = self.drain_until(target);
        self.state.borrow_mut().now = target;
        ran
    }

    /// Steps until nothing is pending. Never returns if a task keeps
    /// rescheduling itself; use [`advance`](ManualLoop::advance) for those.
    pub fn run(&self) -> usize {
        let mut ran = self.run_until_idle();
        while let Some(due) = self.next_due() {
            ran += self.drain_until(due);
        }
        ran
    }

    fn drain_until(&self, until: Duration) -> usize {
        let mut ran = 0;
        while let Some(task) = self.pop_due(until) {
            task();
            ran += 1;
        }
        ran
    }

    fn pop_due(&self, until: Duration) -> Option<Task> {
        let mut state = self.state.borrow_mut();
        let key = *state.queue.keys().next()?;
        if key.0 > until {
            return None;
        }
        let entry = state.queue.remove(&key)?;
        if key.0 > state.now {
            state.now = key.0;
        }
        trace!(timer = %entry.id, at = ?state.now, "dispatching");
        Some(entry.task)
    }
}

impl EventLoop for ManualLoop {
    fn run_after(&self, delay: Duration, task: Task) -> TimerId {
        let mut state = self.state.borrow_mut();
        let id = TimerId::new(state.next_id);
        state.next_id += 1;
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.queue.insert((due, seq), Entry { id, task });
        id
    }

    fn cancel(&self, timer: TimerId) -> bool {
        let mut state = self.state.borrow_mut();
        let key = state
            .queue
            .iter()
            .find(|(_, entry)| entry.id == timer)
            .map(|(key, _)| *key);
        match key {
            Some(key) => state.queue.remove(&key).is_some(),
            None => false,
        }
    }
}
