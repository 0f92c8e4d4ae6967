//! Action lifecycle: the contract every node of an action tree satisfies.
//!
//! An action is a small finite-state task: `Idle → Started → Finished`, with
//! `stop()` returning a started action to `Idle`. Each run ends with at most
//! one completion, delivered synchronously to the single registered finish
//! callback.
//!
//! Implementations own an [`ActionCore`] (the shared lifecycle record) and
//! provide the two hooks [`Action::on_start`] and [`Action::on_stop`]. Work that
//! completes later, from an event-loop dispatch, holds a clone of the core and
//! a [`RunToken`] and completes through [`ActionCore::finish_run`], so that a
//! completion belonging to a stopped or superseded run is dropped.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::diagnostics::{Diagnostic, Diagnostics, Severity, TracingDiagnostics};

// ---------------------------------------------------------------------------
// ActionId / ActionState / RunToken
// ---------------------------------------------------------------------------

/// Identity of an action core, unique within the thread that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ActionId(u64);

impl ActionId {
    fn next() -> Self {
        thread_local! {
            static NEXT: Cell<u64> = const { Cell::new(1) };
        }
        NEXT.with(|next| {
            let id = next.get();
            next.set(id + 1);
            ActionId(id)
        })
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of an action.
///
/// Transitions: `Idle → Started → Finished`, `Started → Idle` on stop,
/// `Finished → Started` on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Idle,
    Started,
    Finished,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Idle => "idle",
            ActionState::Started => "started",
            ActionState::Finished => "finished",
        }
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names one run of one action. Captured by deferred work at start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToken {
    action: ActionId,
    run: u64,
}

/// Completion consumer, invoked with `true` on success and `false` on failure.
pub type FinishCallback = Box<dyn FnMut(bool)>;

// ---------------------------------------------------------------------------
// ActionCore
// ---------------------------------------------------------------------------

struct CoreInner {
    id: ActionId,
    kind: &'static str,
    label: RefCell<Option<String>>,
    state: Cell<ActionState>,
    outcome: Cell<Option<bool>>,
    run: Cell<u64>,
    on_finish: RefCell<Option<FinishCallback>>,
    /// Outcomes not yet handed to the callback.
    completions: RefCell<VecDeque<bool>>,
    delivering: Cell<bool>,
    diagnostics: RefCell<Rc<dyn Diagnostics>>,
}

/// Shared lifecycle record of one action.
///
/// Cloning yields another handle to the same record; the clone is what
/// deferred work captures to complete the action later.
#[derive(Clone)]
pub struct ActionCore {
    inner: Rc<CoreInner>,
}

impl ActionCore {
    pub fn new(kind: &'static str) -> Self {
        Self {
            inner: Rc::new(CoreInner {
                id: ActionId::next(),
                kind,
                label: RefCell::new(None),
                state: Cell::new(ActionState::Idle),
                outcome: Cell::new(None),
                run: Cell::new(0),
                on_finish: RefCell::new(None),
                completions: RefCell::new(VecDeque::new()),
                delivering: Cell::new(false),
                diagnostics: RefCell::new(Rc::new(TracingDiagnostics)),
            }),
        }
    }

    pub fn id(&self) -> ActionId {
        self.inner.id
    }

    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }

    pub fn label(&self) -> Option<String> {
        self.inner.label.borrow().clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *self.inner.label.borrow_mut() = Some(label.into());
    }

    pub fn state(&self) -> ActionState {
        self.inner.state.get()
    }

    pub fn is_started(&self) -> bool {
        self.state() == ActionState::Started
    }

    /// `Some` only once the current run has finished.
    pub fn outcome(&self) -> Option<bool> {
        self.inner.outcome.get()
    }

    pub fn run_token(&self) -> RunToken {
        RunToken {
            action: self.inner.id,
            run: self.inner.run.get(),
        }
    }

    /// True while `token` names the current, still running, run.
    pub fn is_current(&self, token: RunToken) -> bool {
        token == self.run_token() && self.is_started()
    }

    pub fn set_diagnostics(&self, diagnostics: Rc<dyn Diagnostics>) {
        *self.inner.diagnostics.borrow_mut() = diagnostics;
    }

    pub fn diagnostics(&self) -> Rc<dyn Diagnostics> {
        Rc::clone(&self.inner.diagnostics.borrow())
    }

    /// Registers the completion consumer, replacing any earlier one.
    ///
    /// Refused with a warning while the action is started.
    pub fn set_finish_callback(&self, callback: FinishCallback) -> bool {
        if self.is_started() {
            self.warn(format!(
                "{self} is running; finish callback not replaced"
            ));
            return false;
        }
        *self.inner.on_finish.borrow_mut() = Some(callback);
        true
    }

    /// Completes the current run. Returns `false` (and does nothing) unless the
    /// action is started; a run therefore finishes at most once.
    pub fn finish(&self, succeeded: bool) -> bool {
        let inner = Rc::clone(&self.inner);
        if inner.state.get() != ActionState::Started {
            trace!(action = %self, succeeded, "finish ignored: not running");
            return false;
        }
        inner.state.set(ActionState::Finished);
        inner.outcome.set(Some(succeeded));
        debug!(action = %self, succeeded, "action finished");

        // The callback runs without the slot borrowed and may restart this
        // action. A run that finishes while the callback is still running is
        // queued and delivered after it returns.
        inner.completions.borrow_mut().push_back(succeeded);
        if inner.delivering.replace(true) {
            return true;
        }
        loop {
            let next = inner.completions.borrow_mut().pop_front();
            let Some(outcome) = next else {
                break;
            };
            let callback = inner.on_finish.borrow_mut().take();
            if let Some(mut callback) = callback {
                callback(outcome);
                let mut slot = inner.on_finish.borrow_mut();
                if slot.is_none() {
                    *slot = Some(callback);
                }
            }
        }
        inner.delivering.set(false);
        true
    }

    /// Completes the run named by `token`, if it is still the current run.
    pub fn finish_run(&self, token: RunToken, succeeded: bool) -> bool {
        if token != self.run_token() {
            trace!(action = %self, succeeded, "finish ignored: stale run");
            return false;
        }
        self.finish(succeeded)
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.report(Severity::Warning, message.into());
    }

    /// Reports a programming error and panics.
    pub fn fatal(&self, message: impl Into<String>) -> ! {
        let message = message.into();
        self.report(Severity::Fatal, message.clone());
        panic!("{message}");
    }

    fn report(&self, severity: Severity, message: String) {
        let diagnostic = Diagnostic {
            severity,
            kind: self.kind(),
            action: self.id(),
            message,
        };
        self.diagnostics().report(&diagnostic);
    }

    // -----------------------------------------------------------------------
    // Transitions driven by the provided `Action` methods
    // -----------------------------------------------------------------------

    fn begin(&self) -> RunToken {
        if self.is_started() {
            self.fatal(format!("{self} is already started"));
        }
        self.inner.run.set(self.inner.run.get() + 1);
        self.inner.outcome.set(None);
        self.inner.state.set(ActionState::Started);
        debug!(action = %self, "action started");
        self.run_token()
    }

    fn abandon(&self, token: RunToken) -> bool {
        if self.is_current(token) {
            self.inner.state.set(ActionState::Idle);
            return true;
        }
        false
    }

    fn halt(&self) -> bool {
        if !self.is_started() {
            return false;
        }
        self.inner.state.set(ActionState::Idle);
        self.inner.outcome.set(None);
        debug!(action = %self, "action stopped");
        true
    }
}

impl fmt::Display for ActionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind(), self.id())?;
        if let Some(label) = self.inner.label.borrow().as_deref() {
            write!(f, "({label})")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ActionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCore")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("label", &self.label())
            .field("state", &self.state())
            .field("outcome", &self.outcome())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ActionSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of an action and its descendants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSnapshot {
    pub id: ActionId,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub state: ActionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ActionSnapshot>,
}

impl ActionSnapshot {
    pub fn of(core: &ActionCore) -> Self {
        Self {
            id: core.id(),
            kind: core.kind(),
            label: core.label(),
            state: core.state(),
            outcome: core.outcome(),
            children: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A unit of asynchronous work with a start/stop/finish lifecycle.
///
/// Implementors provide [`core`](Action::core) and the hooks; the lifecycle
/// methods are provided and should not be overridden.
pub trait Action {
    fn core(&self) -> &ActionCore;

    /// Begins the work. Returning `false` means the action could not begin;
    /// no completion follows for that run.
    fn on_start(&mut self) -> bool;

    /// Cancels in-flight work. Called only while started.
    fn on_stop(&mut self) {}

    fn kind(&self) -> &'static str {
        self.core().kind()
    }

    fn id(&self) -> ActionId {
        self.core().id()
    }

    fn label(&self) -> Option<String> {
        self.core().label()
    }

    fn state(&self) -> ActionState {
        self.core().state()
    }

    fn outcome(&self) -> Option<bool> {
        self.core().outcome()
    }

    fn snapshot(&self) -> ActionSnapshot {
        ActionSnapshot::of(self.core())
    }

    fn set_finish_callback(&mut self, callback: FinishCallback) -> bool {
        self.core().set_finish_callback(callback)
    }

    /// Starts a new run. Starting an action that is already started is a
    /// programming error and panics.
    fn start(&mut self) -> bool {
        let core = self.core().clone();
        let token = core.begin();
        let started = self.on_start();
        if !started && core.abandon(token) {
            debug!(action = %core, "action refused to start");
        }
        started
    }

    /// Cancels the current run. A no-op returning `false` unless started;
    /// a stopped run never reports completion.
    fn stop(&mut self) -> bool {
        let core = self.core().clone();
        if !core.halt() {
            return false;
        }
        self.on_stop();
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
