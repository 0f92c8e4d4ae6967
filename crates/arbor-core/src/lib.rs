//! Composable, cancellable actions for single-threaded event loops.
//!
//! Leaves ([`leaf`]) do the work; [`ParallelAction`], [`SequenceAction`] and
//! [`SelectAction`] combine children into one action with one outcome. Plans
//! ([`plan`]) describe trees declaratively and are loaded through [`config`].

pub mod action;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event_loop;
pub mod group;
pub mod jsonrpc;
pub mod leaf;
pub mod parallel;
pub mod plan;
pub mod select;
pub mod sequence;

#[cfg(test)]
pub(crate) mod testing;

pub use action::{Action, ActionCore, ActionId, ActionSnapshot, ActionState, FinishCallback};
pub use error::{ArborError, Result};
pub use group::{ActionGroup, AppendError};
pub use parallel::ParallelAction;
pub use select::SelectAction;
pub use sequence::SequenceAction;
