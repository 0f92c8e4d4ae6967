//! Composite actions: ownership, stable indexing and completion routing.
//!
//! An [`ActionGroup`] exclusively owns its children as `Box<dyn Action>` and is
//! itself an [`Action`]. What the group does when it starts and when a child
//! reports is delegated to a [`CompletionPolicy`]: the policy decides under a
//! short borrow and the group carries the decision out afterwards, so a child
//! that completes synchronously inside its own `start()` re-enters the group
//! safely.
//!
//! Each child's finish callback holds a weak reference to the group and the
//! child's index. A callback arriving after the group is gone, or while it is
//! not running, is dropped.
//!
//! Child starts are queued while another start is on the call stack, and the
//! outermost start drains the queue. A sequence of children that all finish
//! inside `start()` therefore runs in a loop, with constant stack depth.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::action::{Action, ActionCore, ActionId, ActionSnapshot, ActionState, RunToken};
use crate::diagnostics::Diagnostics;

// ---------------------------------------------------------------------------
// Policy seam
// ---------------------------------------------------------------------------

/// What a group does when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// Start every child, in append order.
    All,
    /// Start child 0 only.
    First,
    /// Finish immediately with the given outcome.
    Finish(bool),
}

/// What a group does after a child reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pending,
    StartNext(usize),
    Finish(bool),
    /// Stop every other child, then finish.
    FinishAndStopOthers(bool),
}

/// Completion policy of a composite: how a group's outcome is derived from
/// its children's outcomes.
pub trait CompletionPolicy: 'static {
    const KIND: &'static str;

    /// Clears per-run bookkeeping.
    fn reset(&mut self, child_count: usize);

    fn launch(&mut self, child_count: usize) -> Launch;

    fn child_finished(&mut self, index: usize, succeeded: bool, child_count: usize) -> Verdict;
}

// ---------------------------------------------------------------------------
// AppendError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppendError {
    #[error("{kind}{id} is already a child of this group")]
    Duplicate { id: ActionId, kind: &'static str },

    #[error("{kind}{id} is running and cannot be adopted")]
    ChildRunning { id: ActionId, kind: &'static str },

    #[error("cannot append to a running group")]
    GroupRunning,
}

// ---------------------------------------------------------------------------
// GroupInner
// ---------------------------------------------------------------------------

struct Slot {
    core: ActionCore,
    /// `None` while the child is on the call stack (being started or stopped).
    action: Option<Box<dyn Action>>,
    stop_pending: bool,
}

struct GroupInner<P> {
    core: ActionCore,
    slots: RefCell<Vec<Slot>>,
    policy: RefCell<P>,
    /// Child starts waiting for the start currently on the call stack.
    starts: RefCell<VecDeque<(RunToken, usize)>>,
    starting: Cell<bool>,
}

impl<P: CompletionPolicy> GroupInner<P> {
    fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    fn append(self: &Rc<Self>, mut child: Box<dyn Action>) -> Result<usize, AppendError> {
        let id = child.id();
        let kind = child.kind();

        let rejected = if self.core.is_started() {
            Some(AppendError::GroupRunning)
        } else if self.slots.borrow().iter().any(|slot| slot.core.id() == id) {
            Some(AppendError::Duplicate { id, kind })
        } else if child.state() == ActionState::Started {
            Some(AppendError::ChildRunning { id, kind })
        } else {
            None
        };
        if let Some(err) = rejected {
            self.core.warn(format!("{}: {err}", self.core));
            return Err(err);
        }

        let index = self.len();
        let group = Rc::downgrade(self);
        child.set_finish_callback(Box::new(move |succeeded| {
            if let Some(group) = group.upgrade() {
                group.child_finished(index, succeeded);
            }
        }));

        let core = child.core().clone();
        debug!(group = %self.core, child = %core, index, "child appended");
        self.slots.borrow_mut().push(Slot {
            core,
            action: Some(child),
            stop_pending: false,
        });
        Ok(index)
    }

    /// Runs `f` on child `index` with the slot released, so completions fired
    /// from inside `f` can reach the group. `None` if the child is already on
    /// the call stack.
    fn with_child<R>(&self, index: usize, f: impl FnOnce(&mut dyn Action) -> R) -> Option<R> {
        let mut child = self.slots.borrow_mut().get_mut(index)?.action.take()?;
        let result = f(child.as_mut());
        self.restore(index, child);
        Some(result)
    }

    /// Puts a child back into its slot, first applying any stop requested
    /// while it was out.
    fn restore(&self, index: usize, mut child: Box<dyn Action>) {
        loop {
            let stop_pending = std::mem::take(&mut self.slots.borrow_mut()[index].stop_pending);
            if !stop_pending {
                break;
            }
            trace!(group = %self.core, index, "applying deferred stop");
            child.stop();
        }
        self.slots.borrow_mut()[index].action = Some(child);
    }

    /// Starts child `index` for the current run. Called while another start
    /// is in progress, it only queues the child.
    fn start_child(&self, index: usize) {
        self.starts
            .borrow_mut()
            .push_back((self.core.run_token(), index));
        if self.starting.replace(true) {
            trace!(group = %self.core, index, "child start queued");
            return;
        }
        loop {
            let next = self.starts.borrow_mut().pop_front();
            let Some((token, index)) = next else {
                break;
            };
            if self.core.is_current(token) {
                self.start_now(index);
            } else {
                trace!(group = %self.core, index, "queued start dropped: run is over");
            }
        }
        self.starting.set(false);
    }

    fn start_now(&self, index: usize) {
        match self.with_child(index, |child| child.start()) {
            Some(true) => {}
            Some(false) => {
                debug!(group = %self.core, index, "child refused to start, counted as failed");
                self.child_finished(index, false);
            }
            None => self
                .core
                .warn(format!("{}: child {index} is busy and was not started", self.core)),
        }
    }

    fn stop_child(&self, index: usize) {
        if self.with_child(index, |child| child.stop()).is_none() {
            if let Some(slot) = self.slots.borrow_mut().get_mut(index) {
                slot.stop_pending = true;
            }
        }
    }

    fn launch(&self) -> bool {
        let count = self.len();
        let launch = {
            let mut policy = self.policy.borrow_mut();
            policy.reset(count);
            policy.launch(count)
        };
        trace!(group = %self.core, count, ?launch, "launching");

        let token = self.core.run_token();
        match launch {
            Launch::All => {
                for index in 0..count {
                    // a synchronous completion may already have settled the run
                    if !self.core.is_current(token) {
                        break;
                    }
                    self.start_child(index);
                }
            }
            Launch::First => self.start_child(0),
            Launch::Finish(succeeded) => {
                self.core.finish(succeeded);
            }
        }
        true
    }

    fn halt(&self) {
        for index in 0..self.len() {
            self.stop_child(index);
        }
    }

    fn child_finished(&self, index: usize, succeeded: bool) {
        if !self.core.is_started() {
            trace!(group = %self.core, index, succeeded, "child completion ignored");
            return;
        }
        let count = self.len();
        let verdict = self
            .policy
            .borrow_mut()
            .child_finished(index, succeeded, count);
        debug!(group = %self.core, index, succeeded, ?verdict, "child finished");

        match verdict {
            Verdict::Pending => {}
            Verdict::StartNext(next) => self.start_child(next),
            Verdict::Finish(outcome) => {
                self.core.finish(outcome);
            }
            Verdict::FinishAndStopOthers(outcome) => {
                for other in (0..count).filter(|&other| other != index) {
                    self.stop_child(other);
                }
                self.core.finish(outcome);
            }
        }
    }

    fn snapshot(&self) -> ActionSnapshot {
        let mut snapshot = ActionSnapshot::of(&self.core);
        snapshot.children = self
            .slots
            .borrow()
            .iter()
            .map(|slot| match &slot.action {
                Some(child) => child.snapshot(),
                None => ActionSnapshot::of(&slot.core),
            })
            .collect();
        snapshot
    }
}

// ---------------------------------------------------------------------------
// ActionGroup
// ---------------------------------------------------------------------------

/// A composite action owning an ordered set of children.
///
/// Child indices are assigned at append time (0, 1, 2, …) and never reused.
/// Dropping a running group stops it, and with it every running child, before
/// the children are released.
pub struct ActionGroup<P: CompletionPolicy> {
    inner: Rc<GroupInner<P>>,
}

impl<P: CompletionPolicy + Default> ActionGroup<P> {
    pub fn new() -> Self {
        Self::with_policy(P::default())
    }
}

impl<P: CompletionPolicy + Default> Default for ActionGroup<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: CompletionPolicy> ActionGroup<P> {
    pub fn with_policy(policy: P) -> Self {
        Self {
            inner: Rc::new(GroupInner {
                core: ActionCore::new(P::KIND),
                slots: RefCell::new(Vec::new()),
                policy: RefCell::new(policy),
                starts: RefCell::new(VecDeque::new()),
                starting: Cell::new(false),
            }),
        }
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.inner.core.set_label(label);
        self
    }

    pub fn with_diagnostics(self, diagnostics: Rc<dyn Diagnostics>) -> Self {
        self.inner.core.set_diagnostics(diagnostics);
        self
    }

    /// Takes ownership of `child` and returns its index.
    ///
    /// Rejected, with a warning diagnostic and the child set unchanged, if the
    /// same action is already a child, if the child is running, or if the
    /// group itself is running.
    pub fn append(&mut self, child: Box<dyn Action>) -> Result<usize, AppendError> {
        self.inner.append(child)
    }

    pub fn push(&mut self, child: impl Action + 'static) -> Result<usize, AppendError> {
        self.append(Box::new(child))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn child_state(&self, index: usize) -> Option<ActionState> {
        self.inner.slots.borrow().get(index).map(|slot| slot.core.state())
    }

    pub fn child_kind(&self, index: usize) -> Option<&'static str> {
        self.inner.slots.borrow().get(index).map(|slot| slot.core.kind())
    }

    pub(crate) fn policy(&self) -> Ref<'_, P> {
        self.inner.policy.borrow()
    }

    pub(crate) fn policy_mut(&self) -> RefMut<'_, P> {
        self.inner.policy.borrow_mut()
    }
}

impl<P: CompletionPolicy> Action for ActionGroup<P> {
    fn core(&self) -> &ActionCore {
        &self.inner.core
    }

    fn on_start(&mut self) -> bool {
        self.inner.launch()
    }

    fn on_stop(&mut self) {
        self.inner.halt();
    }

    fn snapshot(&self) -> ActionSnapshot {
        self.inner.snapshot()
    }
}

impl<P: CompletionPolicy> Drop for ActionGroup<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
