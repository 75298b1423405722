//! `cndr secrets`: list secret names (never values).

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

pub async fn list_secrets(state: &AppState, json: bool) -> Result<()> {
    let entries = state.plane.secrets().list_names().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!(
            "  {} No secrets visible. Export one with: {}",
            style("i").blue().bold(),
            style("CONDUCTOR_SECRET_API_TOKEN=...").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Source").fg(Color::Cyan),
            Cell::new("Updated").fg(Color::Cyan),
        ]);

    for entry in &entries {
        table.add_row(vec![
            Cell::new(&entry.key),
            Cell::new(entry.source),
            Cell::new(entry.updated_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
