//! Leaf actions: the units of work composites are built from.
//!
//! Leaves that wait do so on an [`EventLoop`](crate::event_loop::EventLoop)
//! and complete from inside a later dispatch through their run token, so a
//! timer that fires after `stop()` or after a restart changes nothing.

mod condition;
mod function;
mod immediate;
mod rpc_call;
mod sleep;

pub use condition::ConditionAction;
pub use function::FunctionAction;
pub use immediate::ImmediateAction;
pub use rpc_call::{RpcCallAction, RpcReply};
pub use sleep::SleepAction;
