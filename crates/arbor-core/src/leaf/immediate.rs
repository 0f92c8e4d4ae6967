use std::rc::Rc;

use crate::action::{Action, ActionCore};
use crate::event_loop::{EventLoop, TimerId};

/// Finishes with a fixed outcome.
///
/// Without a loop the completion is synchronous, inside `start()`. With one,
/// it is deferred to the next loop iteration.
pub struct ImmediateAction {
    core: ActionCore,
    outcome: bool,
    event_loop: Option<Rc<dyn EventLoop>>,
    pending: Option<TimerId>,
}

impl ImmediateAction {
    pub fn new(outcome: bool) -> Self {
        Self {
            core: ActionCore::new(if outcome { "Succeed" } else { "Fail" }),
            outcome,
            event_loop: None,
            pending: None,
        }
    }

    pub fn succeed() -> Self {
        Self::new(true)
    }

    pub fn fail() -> Self {
        Self::new(false)
    }

    /// Completes on the next iteration of `event_loop` instead of inside
    /// `start()`.
    pub fn deferred(mut self, event_loop: Rc<dyn EventLoop>) -> Self {
        self.event_loop = Some(event_loop);
        self
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.core.set_label(label);
        self
    }
}

impl Action for ImmediateAction {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn on_start(&mut self) -> bool {
        let outcome = self.outcome;
        match &self.event_loop {
            None => {
                self.core.finish(outcome);
            }
            Some(event_loop) => {
                let core = self.core.clone();
                let token = core.run_token();
                self.pending = Some(event_loop.defer(Box::new(move || {
                    core.finish_run(token, outcome);
                })));
            }
        }
        true
    }

    fn on_stop(&mut self) {
        if let (Some(event_loop), Some(timer)) = (&self.event_loop, self.pending.take()) {
            event_loop.cancel(timer);
        }
    }
}

impl Drop for ImmediateAction {
    fn drop(&mut self) {
        self.stop();
    }
}
