use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use serde::Serialize;
use serde_json::Value;
use tracing::{trace, warn};

use super::{Message, Request, Response, VERSION};
use crate::error::Result;

pub type RequestFn = Box<dyn FnMut(Option<i64>, &str, &Value)>;
pub type RespondFn = Box<dyn FnMut(i64, i32, &Value)>;
pub type SendFn = Box<dyn FnMut(&[u8])>;

/// Hooks installed on a [`RawProto`]. Absent hooks drop the event.
#[derive(Default)]
pub struct Callbacks {
    /// `(id, method, params)`; `id` is `None` for notifications.
    pub on_request: Option<RequestFn>,
    /// `(id, errcode, result)`; `errcode` is `0` on success and `result` is
    /// null on error.
    pub on_respond: Option<RespondFn>,
    /// Encoded bytes ready for the transport.
    pub on_send: Option<SendFn>,
}

/// A decoded message waiting for its hook.
enum Inbound {
    Request {
        id: Option<i64>,
        method: String,
        params: Value,
    },
    Response {
        id: i64,
        errcode: i32,
        result: Value,
    },
}

/// Framing for JSON-RPC messages written back to back on a byte stream,
/// without delimiters.
///
/// Hooks may call back into the proto. Outgoing messages produced while
/// `on_send` runs, and incoming ones decoded while `on_request` or
/// `on_respond` runs, are queued and handed over in order once the running
/// hook returns. A transport that answers synchronously (a loopback feeding
/// `on_send` output straight into [`on_recv_data`](RawProto::on_recv_data))
/// therefore sees every message.
#[derive(Default)]
pub struct RawProto {
    on_request: RefCell<Option<RequestFn>>,
    on_respond: RefCell<Option<RespondFn>>,
    on_send: RefCell<Option<SendFn>>,
    outbox: RefCell<VecDeque<Vec<u8>>>,
    sending: Cell<bool>,
    inbox: RefCell<VecDeque<Inbound>>,
    delivering: Cell<bool>,
}

impl RawProto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callbacks(&self, callbacks: Callbacks) {
        *self.on_request.borrow_mut() = callbacks.on_request;
        *self.on_respond.borrow_mut() = callbacks.on_respond;
        *self.on_send.borrow_mut() = callbacks.on_send;
    }

    pub fn send_request(&self, id: i64, method: &str, params: Value) -> Result<()> {
        self.send(&Request::new(Some(id), method, params))
    }

    pub fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        self.send(&Request::new(None, method, params))
    }

    pub fn send_result(&self, id: i64, result: Value) -> Result<()> {
        self.send(&Response::result(id, result))
    }

    pub fn send_error(&self, id: i64, code: i32, message: &str) -> Result<()> {
        self.send(&Response::error(id, code, message))
    }

    /// Consumes every complete message at the front of `data` and returns the
    /// number of bytes used. An incomplete trailing message is left for the
    /// caller to resubmit with more data. Malformed input is logged and the
    /// whole buffer is reported as consumed.
    pub fn on_recv_data(&self, data: &[u8]) -> usize {
        let mut stream = serde_json::Deserializer::from_slice(data).into_iter::<Value>();
        let mut consumed = 0;
        loop {
            match stream.next() {
                // only whitespace left
                None => return data.len(),
                Some(Ok(value)) => {
                    consumed = stream.byte_offset();
                    self.dispatch(value);
                }
                Some(Err(e)) if e.is_eof() => {
                    trace!(consumed, buffered = data.len(), "incomplete JSON-RPC message");
                    return consumed;
                }
                Some(Err(e)) => {
                    warn!(error = %e, discarded = data.len() - consumed, "malformed JSON-RPC data");
                    return data.len();
                }
            }
        }
    }

    /// Encodes one message the way this proto writes it to the wire.
    pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let bytes = Self::encode(message)?;
        self.outbox.borrow_mut().push_back(bytes);
        if self.sending.replace(true) {
            trace!("send queued behind the one in progress");
            return Ok(());
        }
        loop {
            let next = self.outbox.borrow_mut().pop_front();
            let Some(bytes) = next else {
                break;
            };
            if !invoke(&self.on_send, |send| send(&bytes)) {
                trace!(len = bytes.len(), "no transport installed, message dropped");
            }
        }
        self.sending.set(false);
        Ok(())
    }

    fn dispatch(&self, value: Value) {
        let inbound = match serde_json::from_value::<Message>(value) {
            Ok(Message::Request(req)) => {
                if req.jsonrpc != VERSION {
                    warn!(version = %req.jsonrpc, method = %req.method, "unsupported JSON-RPC version");
                    return;
                }
                Inbound::Request {
                    id: req.id,
                    method: req.method,
                    params: req.params,
                }
            }
            Ok(Message::Response(resp)) => {
                let errcode = resp.errcode();
                let result = match resp.error {
                    Some(_) => Value::Null,
                    None => resp.result.unwrap_or(Value::Null),
                };
                Inbound::Response {
                    id: resp.id,
                    errcode,
                    result,
                }
            }
            Err(e) => {
                warn!(error = %e, "not a JSON-RPC message");
                return;
            }
        };

        self.inbox.borrow_mut().push_back(inbound);
        if self.delivering.replace(true) {
            return;
        }
        loop {
            let next = self.inbox.borrow_mut().pop_front();
            match next {
                None => break,
                Some(Inbound::Request { id, method, params }) => {
                    if !invoke(&self.on_request, |on_request| on_request(id, &method, &params)) {
                        trace!(?id, method = %method, "no request handler, dropped");
                    }
                }
                Some(Inbound::Response { id, errcode, result }) => {
                    if !invoke(&self.on_respond, |on_respond| on_respond(id, errcode, &result)) {
                        trace!(id, errcode, "no response handler, dropped");
                    }
                }
            }
        }
        self.delivering.set(false);
    }
}

/// Calls the hook in `slot` with the slot released. Returns `false` if no
/// hook is installed. A hook replaced while it ran stays replaced.
fn invoke<F: ?Sized>(slot: &RefCell<Option<Box<F>>>, call: impl FnOnce(&mut F)) -> bool {
    let taken = slot.borrow_mut().take();
    let Some(mut hook) = taken else {
        return false;
    };
    call(hook.as_mut());
    let mut slot = slot.borrow_mut();
    if slot.is_none() {
        *slot = Some(hook);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    /// A proto whose output is fed straight back into its own input.
    fn loopback(callbacks: Callbacks) -> Rc<RawProto> {
        let proto = Rc::new(RawProto::new());
        let weak = Rc::downgrade(&proto);
        proto.set_callbacks(Callbacks {
            on_send: Some(Box::new(move |bytes| {
                if let Some(proto) = weak.upgrade() {
                    proto.on_recv_data(bytes);
                }
            })),
            ..callbacks
        });
        proto
    }

    #[test]
    fn request_without_params_round_trips() {
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let proto = loopback(Callbacks {
            on_request: Some(Box::new(move |id, method, params| {
                assert_eq!(id, Some(1));
                assert_eq!(method, "test");
                assert_eq!(params, &Value::Null);
                seen.set(seen.get() + 1);
            })),
            ..Callbacks::default()
        });

        proto.send_request(1, "test", Value::Null).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn request_params_arrive_intact() {
        let sent = json!({"a": 123, "b": ["hello", "world", "!"]});
        let expected = sent.clone();
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let proto = loopback(Callbacks {
            on_request: Some(Box::new(move |_, _, params| {
                assert_eq!(params, &expected);
                seen.set(seen.get() + 1);
            })),
            ..Callbacks::default()
        });

        proto.send_request(1, "test", sent).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn result_reaches_on_respond() {
        let sent = json!({"a": 123});
        let expected = sent.clone();
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let proto = loopback(Callbacks {
            on_request: Some(Box::new(|_, _, _| panic!("not a request"))),
            on_respond: Some(Box::new(move |id, errcode, result| {
                assert_eq!((id, errcode), (1, 0));
                assert_eq!(result, &expected);
                seen.set(seen.get() + 1);
            })),
            ..Callbacks::default()
        });

        proto.send_result(1, sent).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn error_reaches_on_respond_with_code() {
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let proto = loopback(Callbacks {
            on_respond: Some(Box::new(move |id, errcode, result| {
                assert_eq!((id, errcode), (1, -1000));
                assert!(result.is_null());
                seen.set(seen.get() + 1);
            })),
            ..Callbacks::default()
        });

        proto.send_error(1, -1000, "").unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn incomplete_message_consumes_nothing() {
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let proto = RawProto::new();
        proto.set_callbacks(Callbacks {
            on_request: Some(Box::new(move |id, method, _| {
                assert_eq!(id, Some(1));
                assert_eq!(method, "test");
                seen.set(seen.get() + 1);
            })),
            ..Callbacks::default()
        });

        let partial = br#"{"id":1,"meth"#;
        let whole = br#"{"id":1,"method":"test","jsonrpc":"2.0"}"#;
        assert_eq!(proto.on_recv_data(partial), 0);
        assert_eq!(proto.on_recv_data(whole), whole.len());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn back_to_back_messages_stop_at_the_incomplete_tail() {
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let proto = RawProto::new();
        proto.set_callbacks(Callbacks {
            on_request: Some(Box::new(move |_, _, _| seen.set(seen.get() + 1))),
            ..Callbacks::default()
        });

        let first = br#"{"jsonrpc":"2.0","method":"a"}"#;
        let mut data = first.to_vec();
        data.extend_from_slice(br#"{"jsonrpc":"2.0","method":"b"}{"jsonrpc":"2.0","me"#);

        let consumed = proto.on_recv_data(&data);
        assert_eq!(count.get(), 2);
        assert_eq!(&data[consumed..], br#"{"jsonrpc":"2.0","me"#);
    }

    #[test]
    fn malformed_data_is_discarded() {
        let proto = RawProto::new();
        let data = b"{\"id\":1,]";
        assert_eq!(proto.on_recv_data(data), data.len());
    }

    #[test]
    fn wrong_version_is_dropped() {
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let proto = RawProto::new();
        proto.set_callbacks(Callbacks {
            on_request: Some(Box::new(move |_, _, _| seen.set(seen.get() + 1))),
            ..Callbacks::default()
        });
        proto.on_recv_data(br#"{"jsonrpc":"1.0","id":1,"method":"x"}"#);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn request_handler_may_reply_through_a_loopback() {
        let proto: Rc<RawProto> = Rc::new(RawProto::new());
        let replies = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&replies);
        let weak = Rc::downgrade(&proto);
        let transport = Rc::downgrade(&proto);
        proto.set_callbacks(Callbacks {
            on_request: Some(Box::new(move |id, _, params| {
                if let (Some(id), Some(proto)) = (id, weak.upgrade()) {
                    proto.send_result(id, params.clone()).unwrap();
                }
            })),
            on_respond: Some(Box::new(move |id, errcode, result| {
                seen.borrow_mut().push((id, errcode, result.clone()));
            })),
            on_send: Some(Box::new(move |bytes| {
                if let Some(proto) = transport.upgrade() {
                    proto.on_recv_data(bytes);
                }
            })),
        });

        proto.send_request(7, "echo", json!("hi")).unwrap();
        assert_eq!(*replies.borrow(), vec![(7, 0, json!("hi"))]);
    }

    #[test]
    fn responses_arriving_inside_a_response_handler_are_delivered_in_order() {
        let proto = Rc::new(RawProto::new());
        let order = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&order);
        let weak = Rc::downgrade(&proto);
        proto.set_callbacks(Callbacks {
            on_respond: Some(Box::new(move |id, _, _| {
                seen.borrow_mut().push(id);
                if id == 1 {
                    if let Some(proto) = weak.upgrade() {
                        let next = RawProto::encode(&Response::result(2, Value::Null)).unwrap();
                        proto.on_recv_data(&next);
                        // not delivered until this handler returns
                        assert_eq!(seen.borrow().len(), 1);
                    }
                }
            })),
            ..Callbacks::default()
        });

        let first = RawProto::encode(&Response::result(1, Value::Null)).unwrap();
        proto.on_recv_data(&first);
        assert_eq!(*order.borrow(), vec![1, 2]);
    }
}
