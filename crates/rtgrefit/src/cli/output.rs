//! Output formatting for CLI commands

use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use rtgrefit_sync::ValidationState;

/// Print a table with headers and rows
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }

    println!("{}", table);
}

/// "3/4 (75%)", or "-" when there is nothing to count
pub fn format_ratio(done: usize, total: usize) -> String {
    if total == 0 {
        return "-".to_string();
    }
    format!("{}/{} ({}%)", done, total, done * 100 / total)
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_validation(state: &ValidationState) -> String {
    match state {
        ValidationState::Unvalidated => "pending".to_string(),
        ValidationState::Validated(at) => format!("validated {}", format_timestamp(*at)),
    }
}
