//! JSON-RPC 2.0 over a raw byte stream.
//!
//! [`RawProto`] frames back-to-back JSON objects and turns them into request
//! and response callbacks. [`RpcClient`] layers request ids and a pending
//! response table on top; [`RpcCallAction`](crate::leaf::RpcCallAction) uses
//! it to make a remote call one step of an action tree.

mod client;
mod proto;

pub use client::{ResponseHandler, RpcClient};
pub use proto::{Callbacks, RawProto};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const VERSION: &str = "2.0";

fn version() -> String {
    VERSION.to_string()
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A call, or a notification when `id` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    pub fn new(id: Option<i64>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: version(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn result(id: i64, result: Value) -> Self {
        Self {
            jsonrpc: version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: i64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: version(),
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
            }),
        }
    }

    /// `0` on success, the error code otherwise.
    pub fn errcode(&self) -> i32 {
        self.error.as_ref().map_or(0, |e| e.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Anything that can arrive on the stream. A message carrying `method` is a
/// request; otherwise it must carry `id` and is a response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}
