use std::io::{self, Write};

use serde::Serialize;

use crate::app::{DatasetStatus, RunSummary};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        let mut stdout = io::stdout();
        Self::write_summary(&mut stdout, summary)
    }

    pub fn write_summary<W: Write>(out: &mut W, summary: &RunSummary) -> io::Result<()> {
        writeln!(out, "icon-mirror summary for {}", summary.date)?;
        for outcome in &summary.datasets {
            match (&outcome.status, &outcome.report) {
                (DatasetStatus::Completed, Some(report)) => {
                    writeln!(
                        out,
                        "  {}: downloaded {}, already done {}, missing upstream {}, failed {}",
                        outcome.dataset,
                        report.downloaded.len(),
                        report.already_done,
                        report.missing_upstream,
                        report.failed.len()
                    )?;
                    if !report.skipped_runs.is_empty() {
                        writeln!(
                            out,
                            "    future runs skipped: {}",
                            report.skipped_runs.join(", ")
                        )?;
                    }
                }
                _ => {
                    writeln!(
                        out,
                        "  {}: aborted ({})",
                        outcome.dataset,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    )?;
                }
            }
        }
        Ok(())
    }
}
