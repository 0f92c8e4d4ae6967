use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;

use crate::action::{Action, ActionCore};
use crate::jsonrpc::RpcClient;

/// Response to the last completed call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcReply {
    pub errcode: i32,
    pub result: Value,
}

/// Calls a remote method and succeeds if the response carries no error.
pub struct RpcCallAction {
    core: ActionCore,
    client: Rc<RpcClient>,
    method: String,
    params: Value,
    request: Option<i64>,
    reply: Rc<RefCell<Option<RpcReply>>>,
}

impl RpcCallAction {
    pub fn new(client: Rc<RpcClient>, method: impl Into<String>, params: Value) -> Self {
        Self {
            core: ActionCore::new("RpcCall"),
            client,
            method: method.into(),
            params,
            request: None,
            reply: Rc::default(),
        }
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.core.set_label(label);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn reply(&self) -> Option<RpcReply> {
        self.reply.borrow().clone()
    }
}

impl Action for RpcCallAction {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn on_start(&mut self) -> bool {
        *self.reply.borrow_mut() = None;
        let core = self.core.clone();
        let token = core.run_token();
        let reply = Rc::clone(&self.reply);

        let sent = self
            .client
            .call(&self.method, self.params.clone(), move |errcode, result| {
                if !core.is_current(token) {
                    return;
                }
                *reply.borrow_mut() = Some(RpcReply { errcode, result });
                core.finish_run(token, errcode == 0);
            });
        match sent {
            Ok(id) => {
                if self.core.is_current(token) {
                    self.request = Some(id);
                }
                true
            }
            Err(e) => {
                self.core
                    .warn(format!("{}: '{}' not sent: {e}", self.core, self.method));
                false
            }
        }
    }

    fn on_stop(&mut self) {
        if let Some(id) = self.request.take() {
            self.client.forget(id);
        }
    }
}

impl Drop for RpcCallAction {
    fn drop(&mut self) {
        self.stop();
    }
}
