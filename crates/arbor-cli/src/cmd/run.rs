use crate::cmd::{config, millis, Loaded, Outcome};
use crate::output::{print_json, print_snapshot, print_warnings};
use anyhow::Context;
use arbor_core::config::AppConfig;
use arbor_core::event_loop::TokioLoop;
use arbor_core::plan::{BuildContext, FlagSet, PlanNode};
use arbor_core::{Action, ActionSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub outcome: Outcome,
    pub elapsed_ms: u64,
    pub flags: BTreeMap<String, bool>,
    pub tree: ActionSnapshot,
}

pub fn run(loaded: &Loaded, print: bool, dry_run: bool, json: bool) -> anyhow::Result<()> {
    if print {
        config::run(loaded, json)?;
    }
    if dry_run {
        return Ok(());
    }

    let plan = loaded.app.plan()?;
    let warnings = loaded.app.validate();
    for w in warnings.iter().filter(|w| !w.is_error()) {
        warn!(path = %w.path, "{}", w.message);
    }
    if warnings.iter().any(|w| w.is_error()) {
        print_warnings(&warnings);
        anyhow::bail!("plan validation found errors");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;
    let report = LocalSet::new().block_on(&runtime, execute(plan, &loaded.app))?;

    if json {
        print_json(&report)?;
    } else {
        println!("outcome: {} ({} ms)", report.outcome.as_str(), report.elapsed_ms);
        println!();
        print_snapshot(&report.tree);
    }

    if !report.outcome.is_success() {
        anyhow::bail!("plan {}", report.outcome.as_str());
    }
    Ok(())
}

async fn execute(plan: &PlanNode, app: &AppConfig) -> anyhow::Result<RunReport> {
    let event_loop = Rc::new(TokioLoop::new());
    let flags = FlagSet::new(app.flags.clone());
    let ctx = BuildContext::new(event_loop.clone()).with_flags(flags.clone());
    let mut root = plan.build(&ctx).context("failed to build plan")?;

    let (tx, rx) = oneshot::channel();
    let mut tx = Some(tx);
    root.set_finish_callback(Box::new(move |succeeded| {
        if let Some(tx) = tx.take() {
            let _ = tx.send(succeeded);
        }
    }));

    info!(root = %root.core(), nodes = plan.node_count(), "running plan");
    let started = Instant::now();
    if !root.start() {
        anyhow::bail!("{} refused to start", root.core());
    }

    let outcome = tokio::select! {
        finished = rx => match finished {
            Ok(succeeded) => Outcome::from_finish(succeeded),
            Err(_) => anyhow::bail!("plan was released before it finished"),
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping the plan");
            root.stop();
            Outcome::Interrupted
        }
    };
    let elapsed_ms = millis(started.elapsed());
    info!(outcome = outcome.as_str(), elapsed_ms, "plan finished");

    Ok(RunReport {
        outcome,
        elapsed_ms,
        flags: flags.to_map(),
        tree: root.snapshot(),
    })
}
