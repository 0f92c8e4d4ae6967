use crate::action::{Action, ActionCore};

/// Runs a closure synchronously on start and finishes with its result.
pub struct FunctionAction {
    core: ActionCore,
    func: Box<dyn FnMut() -> bool>,
}

impl FunctionAction {
    pub fn new(func: impl FnMut() -> bool + 'static) -> Self {
        Self {
            core: ActionCore::new("Function"),
            func: Box::new(func),
        }
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.core.set_label(label);
        self
    }
}

impl Action for FunctionAction {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn on_start(&mut self) -> bool {
        let succeeded = (self.func)();
        self.core.finish(succeeded);
        true
    }
}
