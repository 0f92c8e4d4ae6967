use arbor_core::config::{ConfigWarning, WarnLevel};
use arbor_core::ActionSnapshot;
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<String>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:width$}"))
            .collect();
        println!("{}", padded.join("  ").trim_end());
    };

    line(headers.iter().map(|h| h.to_string()).collect());
    line(widths.iter().map(|&w| "-".repeat(w)).collect());
    for row in rows {
        line(row.clone());
    }
}

/// One row per action, depth first, names indented by depth.
pub fn snapshot_rows(snapshot: &ActionSnapshot) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    push_rows(snapshot, 0, &mut rows);
    rows
}

fn push_rows(snapshot: &ActionSnapshot, depth: usize, rows: &mut Vec<Vec<String>>) {
    let name = match &snapshot.label {
        Some(label) => label.clone(),
        None => snapshot.id.to_string(),
    };
    let outcome = match snapshot.outcome {
        Some(true) => "success",
        Some(false) => "failure",
        None => "-",
    };
    rows.push(vec![
        format!("{}{name}", "  ".repeat(depth)),
        snapshot.kind.to_string(),
        snapshot.state.to_string(),
        outcome.to_string(),
    ]);
    for child in &snapshot.children {
        push_rows(child, depth + 1, rows);
    }
}

pub fn print_snapshot(snapshot: &ActionSnapshot) {
    print_table(&["ACTION", "KIND", "STATE", "OUTCOME"], &snapshot_rows(snapshot));
}

pub fn print_warnings(warnings: &[ConfigWarning]) {
    for w in warnings {
        let prefix = match w.level {
            WarnLevel::Warning => "warning",
            WarnLevel::Error => "error",
        };
        println!("[{prefix}] {}: {}", w.path, w.message);
    }
}
