use colored::Colorize;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};

use crate::flat_tree::VersionTag;
use crate::lp::LpStatus;
use crate::verify::EquilibriumReport;
use crate::walker::TreeStats;

pub fn styled_value(value: f64) -> String {
    let s = format!("{:+.6}", value);
    if value > 1e-12 {
        s.green().to_string()
    } else if value < -1e-12 {
        s.red().to_string()
    } else {
        s.dimmed().to_string()
    }
}

fn key_value_table(rows: &[(&str, String)]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    for (key, value) in rows {
        table.add_row(vec![
            Cell::new(key.bold().to_string()),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

pub fn tree_info_table(kind: &str, version: &VersionTag, stats: &TreeStats) -> String {
    let table = key_value_table(&[
        ("Kind", kind.to_string()),
        ("Version", version.to_string()),
        ("Nodes", stats.nodes.to_string()),
        ("Leaves", stats.leaves.to_string()),
        ("Max depth", stats.max_depth.to_string()),
    ]);
    table.to_string()
}

/// One row per player.
pub fn values_table(title: &str, values: &[f64]) -> String {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Player"),
        Cell::new(title).set_alignment(CellAlignment::Right),
    ]);
    for (p, &v) in values.iter().enumerate() {
        table.add_row(vec![
            Cell::new(p),
            Cell::new(styled_value(v)).set_alignment(CellAlignment::Right),
        ]);
    }
    table.to_string()
}

pub fn equilibrium_table(report: &EquilibriumReport, epsilon: f64) -> String {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Player"),
        Cell::new("Game value").set_alignment(CellAlignment::Right),
        Cell::new("Best response").set_alignment(CellAlignment::Right),
        Cell::new("Gain").set_alignment(CellAlignment::Right),
    ]);
    let gains = report.gains();
    for p in 0..report.game_values.len() {
        let gain = if gains[p] > epsilon {
            format!("{:.6}", gains[p]).yellow().to_string()
        } else {
            format!("{:.6}", gains[p]).dimmed().to_string()
        };
        table.add_row(vec![
            Cell::new(p),
            Cell::new(styled_value(report.game_values[p])).set_alignment(CellAlignment::Right),
            Cell::new(styled_value(report.best_responses[p])).set_alignment(CellAlignment::Right),
            Cell::new(gain).set_alignment(CellAlignment::Right),
        ]);
    }
    let verdict = if report.is_equilibrium(epsilon) {
        "equilibrium".green().bold()
    } else {
        "exploitable".red().bold()
    };
    format!(
        "{}\n  exploitability {:.6} ({}), zero-sum error {:.2e}",
        table,
        report.exploitability(),
        verdict,
        report.zero_sum_error()
    )
}

pub fn lp_status(status: LpStatus) -> String {
    match status {
        LpStatus::Optimal => status.to_string().green().bold().to_string(),
        _ => status.to_string().red().bold().to_string(),
    }
}

pub fn print_section(title: &str, content: &str) {
    println!("\n{}", title.cyan().bold());
    println!("{}", content);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "Error:".red().bold(), msg);
}

pub fn print_success(msg: &str) {
    println!("{}", msg.green().bold());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_list_every_player() {
        colored::control::set_override(false);
        let out = values_table("Value", &[0.5, -0.5]);
        assert!(out.contains("+0.500000"));
        assert!(out.contains("-0.500000"));

        let report = EquilibriumReport {
            game_values: vec![-0.05, 0.05],
            best_responses: vec![-0.05, 0.25],
        };
        let out = equilibrium_table(&report, 1e-6);
        assert!(out.contains("0.200000"));
        assert!(out.contains("exploitable"));
    }
}
