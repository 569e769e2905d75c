use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ChildrenResult, LookupResult, ProgressEvent, ProgressSink, RunSummary};
use crate::retrieve::RetrieveResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(result: &RunSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_lookup(result: &LookupResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_children(result: &ChildrenResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_retrieve(result: &RetrieveResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("[{:>6.1}s] {}", elapsed.as_secs_f64(), event.message),
            None => eprintln!("{}", event.message),
        }
    }
}

pub fn summary_lines(summary: &RunSummary) -> Vec<String> {
    let mut lines = vec![
        format!("{} rows of {} from {}", summary.rows, summary.node_type, summary.input),
        format!(
            "saved: {} (created {}, updated {}), newly tracked: {}",
            summary.saved(),
            summary.created,
            summary.updated,
            summary.tracked
        ),
    ];
    if summary.invalid > 0 {
        lines.push(format!("invalid: {} -> {}", summary.invalid, summary.invalid_sink));
    }
    if summary.save_failed > 0 {
        lines.push(format!(
            "save failed: {} -> {}",
            summary.save_failed, summary.unsaved_sink
        ));
    }
    if summary.parent_missing > 0 {
        lines.push(format!("parent missing: {}", summary.parent_missing));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_mentions_only_nonzero_failures() {
        let summary = RunSummary {
            node_type: "visit".to_string(),
            input: "visits.csv".to_string(),
            rows: 3,
            created: 1,
            updated: 1,
            tracked: 1,
            invalid: 1,
            invalid_sink: "visits_invalid_records.csv".to_string(),
            ..Default::default()
        };
        let lines = summary_lines(&summary);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "saved: 2 (created 1, updated 1), newly tracked: 1");
        assert_eq!(lines[2], "invalid: 1 -> visits_invalid_records.csv");
    }
}
