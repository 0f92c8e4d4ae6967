use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::trace;

use crate::action::{Action, ActionCore, RunToken};
use crate::event_loop::{EventLoop, TimerId};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Default)]
struct Timers {
    poll: Option<TimerId>,
    timeout: Option<TimerId>,
}

struct Poll {
    core: ActionCore,
    event_loop: Rc<dyn EventLoop>,
    predicate: RefCell<Box<dyn FnMut() -> bool>>,
    interval: Duration,
    timers: RefCell<Timers>,
}

impl Poll {
    fn check(&self) -> bool {
        (self.predicate.borrow_mut())()
    }

    fn arm_poll(self: &Rc<Self>, token: RunToken) {
        let poll = Rc::downgrade(self);
        let timer = self.event_loop.run_after(
            self.interval,
            Box::new(move || {
                if let Some(poll) = Weak::upgrade(&poll) {
                    poll.tick(token);
                }
            }),
        );
        self.timers.borrow_mut().poll = Some(timer);
    }

    fn arm_timeout(self: &Rc<Self>, token: RunToken, timeout: Duration) {
        let poll = Rc::downgrade(self);
        let timer = self.event_loop.run_after(
            timeout,
            Box::new(move || {
                if let Some(poll) = Weak::upgrade(&poll) {
                    poll.timers.borrow_mut().timeout = None;
                    trace!(action = %poll.core, "condition timed out");
                    poll.settle(token, false);
                }
            }),
        );
        self.timers.borrow_mut().timeout = Some(timer);
    }

    fn tick(self: &Rc<Self>, token: RunToken) {
        self.timers.borrow_mut().poll = None;
        if !self.core.is_current(token) {
            return;
        }
        if self.check() {
            self.settle(token, true);
        } else {
            self.arm_poll(token);
        }
    }

    fn settle(&self, token: RunToken, succeeded: bool) {
        self.cancel_timers();
        self.core.finish_run(token, succeeded);
    }

    fn cancel_timers(&self) {
        let timers = std::mem::take(&mut *self.timers.borrow_mut());
        for timer in [timers.poll, timers.timeout].into_iter().flatten() {
            self.event_loop.cancel(timer);
        }
    }
}

/// Waits for a predicate to hold.
///
/// The predicate is checked on start and then every `interval` on the loop.
/// With a timeout, the action fails if the predicate still does not hold when
/// it expires. Intervals below one millisecond are raised to one.
pub struct ConditionAction {
    poll: Rc<Poll>,
    timeout: Option<Duration>,
}

impl ConditionAction {
    pub fn new(
        event_loop: Rc<dyn EventLoop>,
        interval: Duration,
        predicate: impl FnMut() -> bool + 'static,
    ) -> Self {
        Self {
            poll: Rc::new(Poll {
                core: ActionCore::new("Condition"),
                event_loop,
                predicate: RefCell::new(Box::new(predicate)),
                interval: interval.max(MIN_INTERVAL),
                timers: RefCell::new(Timers::default()),
            }),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.poll.core.set_label(label);
        self
    }

    pub fn interval(&self) -> Duration {
        self.poll.interval
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Action for ConditionAction {
    fn core(&self) -> &ActionCore {
        &self.poll.core
    }

    fn on_start(&mut self) -> bool {
        let token = self.poll.core.run_token();
        if self.poll.check() {
            self.poll.core.finish(true);
            return true;
        }
        self.poll.arm_poll(token);
        if let Some(timeout) = self.timeout {
            self.poll.arm_timeout(token, timeout);
        }
        true
    }

    fn on_stop(&mut self) {
        self.poll.cancel_timers();
    }
}

impl Drop for ConditionAction {
    fn drop(&mut self) {
        self.stop();
    }
}
