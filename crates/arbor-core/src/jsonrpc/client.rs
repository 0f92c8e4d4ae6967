use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use super::proto::{Callbacks, RawProto};
use crate::error::Result;

/// Receives `(errcode, result)` for one request.
pub type ResponseHandler = Box<dyn FnOnce(i32, Value)>;

/// Request side of a JSON-RPC connection.
///
/// Outgoing bytes go to the transport closure given at construction; incoming
/// bytes are handed to [`on_recv_data`](RpcClient::on_recv_data). Responses are
/// routed to the handler registered for their id, which is removed before it
/// runs.
pub struct RpcClient {
    proto: RawProto,
    next_id: Cell<i64>,
    pending: Rc<RefCell<HashMap<i64, ResponseHandler>>>,
}

impl RpcClient {
    pub fn new(transport: impl FnMut(&[u8]) + 'static) -> Self {
        let pending: Rc<RefCell<HashMap<i64, ResponseHandler>>> = Rc::default();
        let table = Rc::clone(&pending);

        let proto = RawProto::new();
        proto.set_callbacks(Callbacks {
            on_request: Some(Box::new(|id, method, _| {
                debug!(?id, method, "ignoring request received by client");
            })),
            on_respond: Some(Box::new(move |id, errcode, result| {
                let handler = table.borrow_mut().remove(&id);
                match handler {
                    Some(handler) => handler(errcode, result.clone()),
                    None => debug!(id, errcode, "response for unknown or forgotten request"),
                }
            })),
            on_send: Some(Box::new(transport)),
        });

        Self {
            proto,
            next_id: Cell::new(1),
            pending,
        }
    }

    /// Sends `method` and registers `handler` for its response. Returns the
    /// request id.
    pub fn call(
        &self,
        method: &str,
        params: Value,
        handler: impl FnOnce(i32, Value) + 'static,
    ) -> Result<i64> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        // registered first: a loopback transport may answer before send returns
        self.pending.borrow_mut().insert(id, Box::new(handler));
        if let Err(e) = self.proto.send_request(id, method, params) {
            self.pending.borrow_mut().remove(&id);
            return Err(e);
        }
        debug!(id, method, "request sent");
        Ok(id)
    }

    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.proto.send_notification(method, params)
    }

    /// Drops the handler for `id`; a late response is then ignored.
    pub fn forget(&self, id: i64) -> bool {
        self.pending.borrow_mut().remove(&id).is_some()
    }

    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn on_recv_data(&self, data: &[u8]) -> usize {
        self.proto.on_recv_data(data)
    }
}
