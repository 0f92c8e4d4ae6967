use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

use crate::action::{Action, ActionCore};
use crate::event_loop::{EventLoop, TimerId};

/// Succeeds once `duration` has elapsed on the loop.
pub struct SleepAction {
    core: ActionCore,
    event_loop: Rc<dyn EventLoop>,
    duration: Duration,
    timer: Option<TimerId>,
}

impl SleepAction {
    pub fn new(event_loop: Rc<dyn EventLoop>, duration: Duration) -> Self {
        Self {
            core: ActionCore::new("Sleep"),
            event_loop,
            duration,
            timer: None,
        }
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.core.set_label(label);
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Action for SleepAction {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn on_start(&mut self) -> bool {
        let core = self.core.clone();
        let token = core.run_token();
        let timer = self.event_loop.run_after(
            self.duration,
            Box::new(move || {
                core.finish_run(token, true);
            }),
        );
        trace!(action = %self.core, %timer, duration = ?self.duration, "sleep armed");
        self.timer = Some(timer);
        true
    }

    fn on_stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.event_loop.cancel(timer);
        }
    }
}

impl Drop for SleepAction {
    fn drop(&mut self) {
        self.stop();
    }
}
