//! Event-loop seam used by leaf actions.
//!
//! Actions never block. A leaf that waits arms a timer or defers a task on the
//! loop it was built with and completes from inside that later dispatch. The
//! engine itself never touches the loop.
//!
//! Two implementations ship with the crate: [`ManualLoop`], a deterministic
//! virtual-time loop driven by the caller, and [`TokioLoop`], which spawns
//! local tasks on a tokio `LocalSet`.

mod manual;
mod tokio_loop;

pub use manual::ManualLoop;
pub use tokio_loop::TokioLoop;

use std::fmt;
use std::time::Duration;

/// One-shot unit of work dispatched by a loop.
pub type Task = Box<dyn FnOnce()>;

/// Handle to a pending task, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub(crate) fn new(raw: u64) -> Self {
        TimerId(raw)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

pub trait EventLoop {
    /// Runs `task` on a later loop iteration.
    fn defer(&self, task: Task) -> TimerId {
        self.run_after(Duration::ZERO, task)
    }

    /// Runs `task` once, `delay` from now.
    fn run_after(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancels a pending task. Returns `false` if it already ran or was
    /// cancelled.
    fn cancel(&self, timer: TimerId) -> bool;
}
