//! `cndr bring-up`: resolve and merge the configured systems.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use tracing::info_span;

use conductor_core::bringup::{BringUpReport, find_cycles};
use conductor_observe::span_attrs::{OP_BRING_UP, SPAN_BRING_UP};
use conductor_types::error::ControlPlaneError;

use crate::state::AppState;

/// Bring the plane up and print the resolution order and merged namespace.
///
/// On a cycle or missing dependency the stuck systems, missing ids and the
/// cycles found among declared systems are printed before the error returns.
pub fn bring_up(state: &AppState, json: bool) -> Result<BringUpReport> {
    let span = info_span!(SPAN_BRING_UP, conductor.operation = OP_BRING_UP);
    let _enter = span.enter();

    match state.plane.bring_up() {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(state, &report)?;
            }
            Ok(report)
        }
        Err(err) => {
            if let ControlPlaneError::CycleOrMissingDependency { stuck, missing } = &err {
                let cycles = find_cycles(&state.plane.config().systems);
                print_failure(stuck, missing, &cycles, json)?;
            }
            Err(err.into())
        }
    }
}

fn print_report(state: &AppState, report: &BringUpReport) -> Result<()> {
    println!();
    println!(
        "  {} Brought up {} system(s), {} agent(s)",
        style("ok").green(),
        style(report.order.len()).bold(),
        style(state.plane.registry().len()).bold(),
    );
    println!();

    if !report.order.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("#").fg(Color::Cyan),
                Cell::new("System").fg(Color::Cyan),
                Cell::new("Depends on").fg(Color::Cyan),
            ]);

        let systems = &state.plane.config().systems;
        for (position, id) in report.order.iter().enumerate() {
            let deps = systems
                .iter()
                .find(|s| &s.id == id)
                .map(|s| s.dependencies.join(", "))
                .unwrap_or_default();
            table.add_row(vec![
                Cell::new(position + 1),
                Cell::new(id),
                Cell::new(if deps.is_empty() { "-".to_string() } else { deps }),
            ]);
        }
        println!("{table}");
        println!();
    }

    println!("  {}", style("── Namespace ──").dim());
    println!("{}", serde_json::to_string_pretty(&report.namespace)?);
    println!();
    Ok(())
}

fn print_failure(stuck: &[String], missing: &[String], cycles: &[Vec<String>], json: bool) -> Result<()> {
    if json {
        let failure = serde_json::json!({
            "ok": false,
            "stuck": stuck,
            "missing": missing,
            "cycles": cycles,
        });
        println!("{}", serde_json::to_string_pretty(&failure)?);
        return Ok(());
    }

    println!();
    println!("  {} Bring-up failed", style("✗").red().bold());
    println!("  Stuck:   {}", style(stuck.join(", ")).yellow());
    if !missing.is_empty() {
        println!("  Missing: {}", style(missing.join(", ")).red());
    }
    for cycle in cycles {
        println!("  Cycle:   {}", style(cycle.join(" -> ")).red());
    }
    println!();
    Ok(())
}
