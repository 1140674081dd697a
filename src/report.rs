//! End-of-run summary: counts of commits, revisions, integration edges, and
//! bytes written, printed as a table or serialized as JSON (spec's ambient
//! reporting surface, grounded on the teacher's `analysis.rs`
//! `RepositoryMetrics`/`AnalysisReport` pair).

use std::io;
use std::path::Path;

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub commits_processed: u64,
    pub revisions_written: u64,
    pub integration_edges_written: u64,
    pub archive_files_written: u64,
    pub archive_bytes_written: u64,
    pub blobs_deduplicated: u64,
    pub ignorable_actions: u64,
}

fn print_section(title: &str) {
    println!();
    println!("{}", format!("{:-^56}", format!(" {title} ")).bold().cyan());
}

fn print_table(rows: &[(&str, String)]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Metric").add_attribute(Attribute::Bold),
        Cell::new("Value")
            .add_attribute(Attribute::Bold)
            .set_alignment(CellAlignment::Right),
    ]);
    for (name, value) in rows {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    for line in table.to_string().lines() {
        println!("  {line}");
    }
}

impl RunSummary {
    /// Print the human-readable table, unless `quiet` suppresses it (spec's
    /// ambient `Config::quiet`).
    pub fn print_human(&self, quiet: bool) {
        if quiet {
            return;
        }
        print_section("Migration summary");
        print_table(&[
            ("Commits processed", self.commits_processed.to_string()),
            ("Revisions written", self.revisions_written.to_string()),
            ("Integration edges written", self.integration_edges_written.to_string()),
            ("Archive files written", self.archive_files_written.to_string()),
            ("Archive bytes written", self.archive_bytes_written.to_string()),
            ("Blobs deduplicated", self.blobs_deduplicated.to_string()),
            ("Ignorable actions skipped", self.ignorable_actions.to_string()),
        ]);
    }

    /// Write the summary as JSON to `path` (ambient `Config::report_json`).
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trips_counts() {
        let summary = RunSummary {
            commits_processed: 3,
            revisions_written: 5,
            integration_edges_written: 2,
            archive_files_written: 4,
            archive_bytes_written: 1024,
            blobs_deduplicated: 1,
            ignorable_actions: 0,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        summary.write_json(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["commits_processed"], 3);
        assert_eq!(parsed["archive_bytes_written"], 1024);
    }
}
