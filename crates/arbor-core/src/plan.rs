//! Declarative action trees.
//!
//! A [`PlanNode`] is the serialisable description of an action tree, as found
//! under `plan:` in the configuration. [`PlanNode::build`] turns it into live
//! actions wired to an event loop and a shared [`FlagSet`].

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::config::ConfigWarning;
use crate::diagnostics::Diagnostics;
use crate::error::{ArborError, Result};
use crate::event_loop::EventLoop;
use crate::group::{ActionGroup, CompletionPolicy};
use crate::leaf::{ConditionAction, FunctionAction, ImmediateAction, SleepAction};
use crate::parallel::{ParallelAction, ParallelPolicy};
use crate::select::SelectAction;
use crate::sequence::SequenceAction;

fn default_interval_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ---------------------------------------------------------------------------
// PlanNode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanNode {
    Parallel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        fail_fast: bool,
        #[serde(default)]
        children: Vec<PlanNode>,
    },
    Sequence {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default)]
        children: Vec<PlanNode>,
    },
    Select {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default)]
        children: Vec<PlanNode>,
    },
    Sleep {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        ms: u64,
    },
    Succeed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Fail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Waits until `flag` is set.
    Condition {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        flag: String,
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Sets `flag` to `value` and succeeds.
    SetFlag {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        flag: String,
        #[serde(default = "default_true")]
        value: bool,
    },
}

impl PlanNode {
    pub fn succeed() -> Self {
        PlanNode::Succeed { label: None }
    }

    pub fn fail() -> Self {
        PlanNode::Fail { label: None }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlanNode::Parallel { .. } => "parallel",
            PlanNode::Sequence { .. } => "sequence",
            PlanNode::Select { .. } => "select",
            PlanNode::Sleep { .. } => "sleep",
            PlanNode::Succeed { .. } => "succeed",
            PlanNode::Fail { .. } => "fail",
            PlanNode::Condition { .. } => "condition",
            PlanNode::SetFlag { .. } => "set_flag",
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            PlanNode::Parallel { label, .. }
            | PlanNode::Sequence { label, .. }
            | PlanNode::Select { label, .. }
            | PlanNode::Sleep { label, .. }
            | PlanNode::Succeed { label }
            | PlanNode::Fail { label }
            | PlanNode::Condition { label, .. }
            | PlanNode::SetFlag { label, .. } => label.as_deref(),
        }
    }

    pub fn children(&self) -> &[PlanNode] {
        match self {
            PlanNode::Parallel { children, .. }
            | PlanNode::Sequence { children, .. }
            | PlanNode::Select { children, .. } => children,
            _ => &[],
        }
    }

    /// Number of nodes in this subtree, including this one.
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(PlanNode::node_count).sum::<usize>()
    }

    /// Flags written by `set_flag` nodes anywhere in this subtree.
    pub fn flags_written(&self) -> BTreeSet<String> {
        let mut flags = BTreeSet::new();
        self.collect_flags_written(&mut flags);
        flags
    }

    fn collect_flags_written(&self, flags: &mut BTreeSet<String>) {
        if let PlanNode::SetFlag { flag, .. } = self {
            flags.insert(flag.clone());
        }
        for child in self.children() {
            child.collect_flags_written(flags);
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Checks the tree for suspicious or unrunnable nodes. `known_flags` are
    /// the flags with an initial value; flags set by the plan itself are added.
    pub fn validate(&self, known_flags: &BTreeSet<String>) -> Vec<ConfigWarning> {
        let mut flags = known_flags.clone();
        flags.extend(self.flags_written());

        let mut warnings = Vec::new();
        self.validate_at("plan", &flags, &mut warnings);
        warnings
    }

    fn validate_at(&self, path: &str, flags: &BTreeSet<String>, warnings: &mut Vec<ConfigWarning>) {
        match self {
            PlanNode::Parallel { children, .. } | PlanNode::Sequence { children, .. }
                if children.is_empty() =>
            {
                warnings.push(ConfigWarning::warning(
                    path,
                    format!("{} has no children and succeeds immediately", self.kind()),
                ));
            }
            PlanNode::Select { children, .. } if children.is_empty() => {
                warnings.push(ConfigWarning::warning(
                    path,
                    "select has no children and fails immediately",
                ));
            }
            PlanNode::Sleep { ms: 0, .. } => {
                warnings.push(ConfigWarning::warning(path, "sleep of 0ms"));
            }
            PlanNode::Condition {
                flag,
                interval_ms,
                timeout_ms,
                ..
            } => {
                if flag.trim().is_empty() {
                    warnings.push(ConfigWarning::error(path, "condition has an empty flag name"));
                } else if !flags.contains(flag) {
                    if timeout_ms.is_some() {
                        warnings.push(ConfigWarning::warning(
                            path,
                            format!("flag '{flag}' is never set; condition will time out"),
                        ));
                    } else {
                        warnings.push(ConfigWarning::error(
                            path,
                            format!("flag '{flag}' is never set and the condition has no timeout"),
                        ));
                    }
                }
                if *interval_ms == 0 {
                    warnings.push(ConfigWarning::warning(
                        path,
                        "interval_ms is 0; polling every 1ms instead",
                    ));
                }
            }
            PlanNode::SetFlag { flag, .. } if flag.trim().is_empty() => {
                warnings.push(ConfigWarning::error(path, "set_flag has an empty flag name"));
            }
            _ => {}
        }

        for (index, child) in self.children().iter().enumerate() {
            child.validate_at(&format!("{path}.children[{index}]"), flags, warnings);
        }
    }

    // -----------------------------------------------------------------------
    // Building
    // -----------------------------------------------------------------------

    pub fn build(&self, ctx: &BuildContext) -> Result<Box<dyn Action>> {
        let action: Box<dyn Action> = match self {
            PlanNode::Parallel {
                fail_fast, children, ..
            } => {
                let policy = if *fail_fast {
                    ParallelPolicy::fail_fast()
                } else {
                    ParallelPolicy::default()
                };
                build_group(ParallelAction::with_policy(policy), children, ctx)?
            }
            PlanNode::Sequence { children, .. } => {
                build_group(SequenceAction::new(), children, ctx)?
            }
            PlanNode::Select { children, .. } => build_group(SelectAction::new(), children, ctx)?,
            PlanNode::Sleep { ms, .. } => Box::new(SleepAction::new(
                Rc::clone(&ctx.event_loop),
                Duration::from_millis(*ms),
            )),
            PlanNode::Succeed { .. } => Box::new(ImmediateAction::succeed()),
            PlanNode::Fail { .. } => Box::new(ImmediateAction::fail()),
            PlanNode::Condition {
                flag,
                interval_ms,
                timeout_ms,
                ..
            } => {
                if flag.trim().is_empty() {
                    return Err(ArborError::InvalidPlan(
                        "condition has an empty flag name".to_string(),
                    ));
                }
                let flags = ctx.flags.clone();
                let flag = flag.clone();
                let action = ConditionAction::new(
                    Rc::clone(&ctx.event_loop),
                    Duration::from_millis(*interval_ms),
                    move || flags.get(&flag),
                );
                match timeout_ms {
                    Some(ms) => Box::new(action.with_timeout(Duration::from_millis(*ms))),
                    None => Box::new(action),
                }
            }
            PlanNode::SetFlag { flag, value, .. } => {
                if flag.trim().is_empty() {
                    return Err(ArborError::InvalidPlan(
                        "set_flag has an empty flag name".to_string(),
                    ));
                }
                let flags = ctx.flags.clone();
                let flag = flag.clone();
                let value = *value;
                Box::new(FunctionAction::new(move || {
                    flags.set(&flag, value);
                    true
                }))
            }
        };

        let core = action.core();
        if let Some(label) = self.label() {
            core.set_label(label);
        }
        if let Some(diagnostics) = &ctx.diagnostics {
            core.set_diagnostics(Rc::clone(diagnostics));
        }
        Ok(action)
    }

    // -----------------------------------------------------------------------
    // Description
    // -----------------------------------------------------------------------

    /// Renders the tree one node per line, children indented by two spaces.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.describe_into(0, &mut out);
        out
    }

    fn describe_into(&self, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(self.kind());
        if let Some(label) = self.label() {
            out.push_str(&format!(" \"{label}\""));
        }
        match self {
            PlanNode::Parallel { fail_fast: true, .. } => out.push_str(" (fail-fast)"),
            PlanNode::Sleep { ms, .. } => out.push_str(&format!(" {ms}ms")),
            PlanNode::Condition {
                flag,
                interval_ms,
                timeout_ms,
                ..
            } => {
                out.push_str(&format!(" {flag} every {interval_ms}ms"));
                if let Some(ms) = timeout_ms {
                    out.push_str(&format!(", timeout {ms}ms"));
                }
            }
            PlanNode::SetFlag { flag, value, .. } => out.push_str(&format!(" {flag}={value}")),
            _ => {}
        }
        out.push('\n');
        for child in self.children() {
            child.describe_into(depth + 1, out);
        }
    }
}

fn build_group<P: CompletionPolicy>(
    mut group: ActionGroup<P>,
    children: &[PlanNode],
    ctx: &BuildContext,
) -> Result<Box<dyn Action>> {
    for child in children {
        group.append(child.build(ctx)?)?;
    }
    Ok(Box::new(group))
}

// ---------------------------------------------------------------------------
// FlagSet / BuildContext
// ---------------------------------------------------------------------------

/// Named booleans shared between the actions of one tree. Unset flags read
/// as `false`.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    flags: Rc<RefCell<BTreeMap<String, bool>>>,
}

impl FlagSet {
    pub fn new(initial: BTreeMap<String, bool>) -> Self {
        Self {
            flags: Rc::new(RefCell::new(initial)),
        }
    }

    pub fn get(&self, name: &str) -> bool {
        self.flags.borrow().get(name).copied().unwrap_or(false)
    }

    pub fn set(&self, name: &str, value: bool) {
        self.flags.borrow_mut().insert(name.to_string(), value);
    }

    pub fn to_map(&self) -> BTreeMap<String, bool> {
        self.flags.borrow().clone()
    }
}

/// What a plan is built against.
pub struct BuildContext {
    pub event_loop: Rc<dyn EventLoop>,
    pub flags: FlagSet,
    /// Sink installed on every built action; `tracing` when `None`.
    pub diagnostics: Option<Rc<dyn Diagnostics>>,
}

impl BuildContext {
    pub fn new(event_loop: Rc<dyn EventLoop>) -> Self {
        Self {
            event_loop,
            flags: FlagSet::default(),
            diagnostics: None,
        }
    }

    pub fn with_flags(mut self, flags: FlagSet) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Rc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
