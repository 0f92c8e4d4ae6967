//! Reporting channel for misuse of the action API.
//!
//! Structural misuse comes in two severities. A [`Severity::Warning`] is
//! recoverable (appending the same child twice) and the caller decides what
//! to do. A [`Severity::Fatal`] diagnostic means the tree is in an invalid
//! state; the reporting [`ActionCore`](crate::action::ActionCore) panics right
//! after the sink has seen it, whatever the sink does.

use std::cell::RefCell;
use std::fmt;

use serde::Serialize;
use tracing::{error, warn};

use crate::action::ActionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Fatal => f.write_str("fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: &'static str,
    pub action: ActionId,
    pub message: String,
}

/// Sink for diagnostics raised by actions.
pub trait Diagnostics {
    fn report(&self, diagnostic: &Diagnostic);
}

/// Default sink: forwards every diagnostic to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&self, d: &Diagnostic) {
        match d.severity {
            Severity::Warning => warn!(
                kind = d.kind,
                action = %d.action,
                "{}",
                d.message
            ),
            Severity::Fatal => error!(
                kind = d.kind,
                action = %d.action,
                "{}",
                d.message
            ),
        }
    }
}

/// Sink that keeps every diagnostic in memory, for tests and embedders that
/// want to surface misuse themselves.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    entries: RefCell<Vec<Diagnostic>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.borrow().clone()
    }

    pub fn warnings(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn report(&self, diagnostic: &Diagnostic) {
        self.entries.borrow_mut().push(diagnostic.clone());
    }
}
