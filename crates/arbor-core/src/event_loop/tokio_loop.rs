use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::AbortHandle;

use super::{EventLoop, Task, TimerId};

/// Event loop backed by tokio local tasks.
///
/// Every scheduled task becomes a `spawn_local` task, so the loop must be used
/// from inside a [`tokio::task::LocalSet`] on a current-thread runtime.
/// Dropping the loop aborts whatever is still pending.
#[derive(Default)]
pub struct TokioLoop {
    handles: Rc<RefCell<HashMap<TimerId, AbortHandle>>>,
    next_id: Cell<u64>,
}

impl TokioLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.handles.borrow().len()
    }
}

impl EventLoop for TokioLoop {
    fn run_after(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId::new(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);

        let handles = Rc::clone(&self.handles);
        let join = tokio::task::spawn_local(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            handles.borrow_mut().remove(&id);
            task();
        });
        self.handles.borrow_mut().insert(id, join.abort_handle());
        id
    }

    fn cancel(&self, timer: TimerId) -> bool {
        match self.handles.borrow_mut().remove(&timer) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for TokioLoop {
    fn drop(&mut self) {
        for (_, handle) in self.handles.borrow_mut().drain() {
            handle.abort();
        }
    }
}
