pub mod check;
pub mod config;
pub mod run;

use anyhow::Context;
use arbor_core::config::{AppConfig, ConfigTree};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Shared configuration arguments
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Config file to merge (.json, .yaml or .yml); repeatable, later files win
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub files: Vec<PathBuf>,

    /// Override one value after the files are merged, e.g. -s log.level=debug
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE", global = true)]
    pub sets: Vec<String>,
}

/// The merged configuration tree and its typed view.
pub struct Loaded {
    pub tree: ConfigTree,
    pub app: AppConfig,
}

pub fn load(args: &ConfigArgs) -> anyhow::Result<Loaded> {
    let mut tree = ConfigTree::new();
    for path in &args.files {
        tree.load_file(path)?;
    }
    for assignment in &args.sets {
        tree.set(assignment)?;
    }
    let app = AppConfig::from_tree(&tree).context("invalid configuration")?;
    Ok(Loaded { tree, app })
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    /// Stopped by Ctrl-C.
    Interrupted,
    /// Nothing left to run, yet the root never finished.
    Stalled,
    /// Virtual-time limit reached before the root finished.
    TimedOut,
}

impl Outcome {
    pub fn from_finish(succeeded: bool) -> Self {
        if succeeded {
            Outcome::Succeeded
        } else {
            Outcome::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
            Outcome::Interrupted => "interrupted",
            Outcome::Stalled => "stalled",
            Outcome::TimedOut => "timed out",
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Outcome::Succeeded
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
