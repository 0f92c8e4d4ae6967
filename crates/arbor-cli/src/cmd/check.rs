use crate::cmd::{millis, Loaded, Outcome};
use crate::output::{print_json, print_warnings};
use arbor_core::config::{AppConfig, ConfigWarning};
use arbor_core::event_loop::ManualLoop;
use arbor_core::plan::{BuildContext, FlagSet, PlanNode};
use arbor_core::{Action, ActionSnapshot};
use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct CheckReport {
    warnings: Vec<ConfigWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nodes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    simulation: Option<Simulation>,
}

#[derive(Debug, Serialize)]
struct Simulation {
    outcome: Outcome,
    virtual_ms: u64,
    tree: ActionSnapshot,
}

pub fn run(loaded: &Loaded, simulate: bool, limit_ms: u64, json: bool) -> anyhow::Result<()> {
    let warnings = loaded.app.validate();
    let has_errors = warnings.iter().any(|w| w.is_error());
    let plan = loaded.app.plan.as_ref();

    let simulation = match plan {
        Some(plan) if simulate && !has_errors => Some(run_simulation(
            plan,
            &loaded.app,
            Duration::from_millis(limit_ms),
        )?),
        _ => None,
    };

    let report = CheckReport {
        nodes: plan.map(PlanNode::node_count),
        description: plan.map(PlanNode::describe),
        warnings,
        simulation,
    };

    if json {
        print_json(&report)?;
    } else {
        if let (Some(nodes), Some(description)) = (report.nodes, &report.description) {
            println!("plan: {nodes} nodes");
            print!("{description}");
        }
        if report.warnings.is_empty() {
            println!("No warnings.");
        } else {
            print_warnings(&report.warnings);
        }
        if let Some(sim) = &report.simulation {
            println!(
                "simulation: {} after {} ms of virtual time",
                sim.outcome.as_str(),
                sim.virtual_ms
            );
        }
    }

    if has_errors {
        anyhow::bail!("plan validation found errors");
    }
    Ok(())
}

/// Runs the plan on a virtual clock, jumping from one due timer to the next,
/// until the root finishes or `limit` is reached.
fn run_simulation(plan: &PlanNode, app: &AppConfig, limit: Duration) -> anyhow::Result<Simulation> {
    let event_loop = Rc::new(ManualLoop::new());
    let ctx = BuildContext::new(event_loop.clone()).with_flags(FlagSet::new(app.flags.clone()));
    let mut root = plan.build(&ctx)?;

    let finished: Rc<Cell<Option<(bool, Duration)>>> = Rc::default();
    let slot = Rc::clone(&finished);
    let clock = Rc::clone(&event_loop);
    root.set_finish_callback(Box::new(move |succeeded| {
        slot.set(Some((succeeded, clock.now())));
    }));

    root.start();
    event_loop.run_until_idle();
    let outcome = loop {
        if let Some((succeeded, _)) = finished.get() {
            break Outcome::from_finish(succeeded);
        }
        match event_loop.next_due() {
            None => break Outcome::Stalled,
            Some(due) if due > limit => break Outcome::TimedOut,
            Some(_) => {
                event_loop.step();
            }
        }
    };

    let virtual_time = match finished.get() {
        Some((_, at)) => at,
        None => event_loop.now(),
    };
    let tree = root.snapshot();
    root.stop();

    Ok(Simulation {
        outcome,
        virtual_ms: millis(virtual_time),
        tree,
    })
}
