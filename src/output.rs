use std::io::{self, Write};

use serde::Serialize;

use crate::finalizer::{FinalizeReport, PlanReport, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Console,
    Json,
}

/// Prints progress lines to stdout as they happen.
pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_report(report: &FinalizeReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for item in &report.items {
            writeln!(
                stdout,
                "{}: {:?} {} molecules, store now holds {} ({})",
                item.batch, item.action, item.molecules, item.total_molecules, item.store_path
            )?;
        }
        writeln!(stdout, "Done")
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        let line = match event.elapsed {
            Some(elapsed) => format!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => event.message,
        };
        println!("{line}");
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &FinalizeReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_plan(plan: &PlanReport) -> io::Result<()> {
        Self::print_json(plan)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
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
