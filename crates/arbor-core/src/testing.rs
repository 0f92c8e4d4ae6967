//! Test doubles shared by the unit tests of this crate.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::action::{Action, ActionCore, FinishCallback};
use crate::jsonrpc::{RawProto, Request, Response, RpcClient};

/// Leaf whose completion is driven by the test through [`Stub::handle`].
pub(crate) struct Stub {
    core: ActionCore,
    accept: bool,
    finish_on_start: Option<bool>,
    start_hook: Option<Box<dyn FnMut()>>,
    starts: Rc<Cell<usize>>,
    stops: Rc<Cell<usize>>,
}

impl Stub {
    pub(crate) fn new() -> Self {
        Self {
            core: ActionCore::new("Stub"),
            accept: true,
            finish_on_start: None,
            start_hook: None,
            starts: Rc::new(Cell::new(0)),
            stops: Rc::new(Cell::new(0)),
        }
    }

    /// A stub whose `on_start` returns `false`.
    pub(crate) fn refusing() -> Self {
        Self {
            accept: false,
            ..Self::new()
        }
    }

    /// A stub that completes synchronously inside its own `start()`.
    pub(crate) fn immediate(succeeded: bool) -> Self {
        Self {
            finish_on_start: Some(succeeded),
            ..Self::new()
        }
    }

    /// A stub over an existing core that completes synchronously: a second
    /// way to start the same action, for restarts from inside its callback.
    pub(crate) fn immediate_on(core: &ActionCore, succeeded: bool) -> Self {
        Self {
            core: core.clone(),
            ..Self::immediate(succeeded)
        }
    }

    /// Runs `hook` inside `on_start`, before the stub accepts.
    pub(crate) fn with_start_hook(mut self, hook: impl FnMut() + 'static) -> Self {
        self.start_hook = Some(Box::new(hook));
        self
    }

    /// Second handle to the same action, usable after the stub was moved
    /// into a group.
    pub(crate) fn handle(&self) -> ActionCore {
        self.core.clone()
    }

    pub(crate) fn counters(&self) -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
        (Rc::clone(&self.starts), Rc::clone(&self.stops))
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts.get()
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.get()
    }
}

impl Action for Stub {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn on_start(&mut self) -> bool {
        self.starts.set(self.starts.get() + 1);
        if let Some(hook) = self.start_hook.as_mut() {
            hook();
        }
        if let Some(succeeded) = self.finish_on_start {
            self.core.finish(succeeded);
        }
        self.accept
    }

    fn on_stop(&mut self) {
        self.stops.set(self.stops.get() + 1);
    }
}

/// Second action sharing another action's core: the only way to present the
/// same child to a group twice.
pub(crate) struct Alias {
    core: ActionCore,
}

impl Alias {
    pub(crate) fn of(core: &ActionCore) -> Self {
        Self { core: core.clone() }
    }
}

impl Action for Alias {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn on_start(&mut self) -> bool {
        true
    }
}

/// Collects the outcomes delivered to a finish callback.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    outcomes: Rc<RefCell<Vec<bool>>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn callback(&self) -> FinishCallback {
        let outcomes = Rc::clone(&self.outcomes);
        Box::new(move |succeeded| outcomes.borrow_mut().push(succeeded))
    }

    pub(crate) fn outcomes(&self) -> Vec<bool> {
        self.outcomes.borrow().clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.outcomes.borrow().is_empty()
    }
}

/// Client whose transport answers every request synchronously, echoing its
/// params back as the result before `send` returns.
pub(crate) fn echo_client() -> Rc<RpcClient> {
    Rc::new_cyclic(|weak: &std::rc::Weak<RpcClient>| {
        let weak = weak.clone();
        RpcClient::new(move |bytes| {
            let request: Request = serde_json::from_slice(bytes).unwrap();
            let Some(id) = request.id else {
                return;
            };
            let reply = RawProto::encode(&Response::result(id, request.params)).unwrap();
            if let Some(client) = weak.upgrade() {
                client.on_recv_data(&reply);
            }
        })
    })
}
