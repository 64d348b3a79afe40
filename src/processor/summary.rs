//! Result aggregation and exit status.

use crate::models::Outcome;
use colored::*;
use tracing::{debug, error, info};

/// One evaluated check with the axis values it ran at
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRecord {
    pub test: String,
    pub forecast_type: String,
    pub lead_time: String,
    pub parameter: String,
    pub outcome: Outcome,
    pub message: String,
}

impl CheckRecord {
    /// Log line with full context
    pub fn describe(&self) -> String {
        format!(
            "Forecast type: {} Leadtime {} Parameter {} {}",
            self.forecast_type, self.lead_time, self.parameter, self.message
        )
    }
}

/// Counters and records of a single test
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestReport {
    pub success: usize,
    pub fail: usize,
    pub skip: usize,
    pub records: Vec<CheckRecord>,
}

impl TestReport {
    /// Count a combination or field that produced no evaluable sample
    pub fn skip_unevaluated(&mut self) {
        self.skip += 1;
    }

    pub fn record(&mut self, record: CheckRecord) {
        match record.outcome {
            Outcome::Pass => self.success += 1,
            Outcome::Fail => self.fail += 1,
            Outcome::Skip => self.skip += 1,
        }
        self.records.push(record);
    }

    /// Append a later combination's results
    pub fn merge(&mut self, other: TestReport) {
        self.success += other.success;
        self.fail += other.fail;
        self.skip += other.skip;
        self.records.extend(other.records);
    }
}

/// Totals over every test of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    success: usize,
    fail: usize,
    skip: usize,
    records: Vec<CheckRecord>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one test's report and log each of its checks
    pub fn absorb(&mut self, report: TestReport) {
        if report.records.is_empty() {
            info!("No grids checked");
        }

        for record in &report.records {
            match record.outcome {
                Outcome::Pass => info!("{}", record.describe()),
                Outcome::Skip => debug!("{}", record.describe()),
                Outcome::Fail => error!("{}", record.describe()),
            }
        }

        self.success += report.success;
        self.fail += report.fail;
        self.skip += report.skip;
        self.records.extend(report.records);
    }

    pub fn success(&self) -> usize {
        self.success
    }

    pub fn fail(&self) -> usize {
        self.fail
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    pub fn records(&self) -> &[CheckRecord] {
        &self.records
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckRecord> {
        self.records.iter().filter(|r| r.outcome == Outcome::Fail)
    }

    /// Process exit code: any failure is 1, strict mode also fails on skips
    pub fn exit_code(&self, strict: bool) -> i32 {
        if self.fail > 0 || (strict && self.skip > 0) {
            1
        } else {
            0
        }
    }

    /// Log the totals and every failing check
    pub fn log_summary(&self) {
        info!(
            "Total Summary: successful tests: {}, failed: {}, skipped: {}",
            self.success, self.fail, self.skip
        );

        if self.fail > 0 {
            error!("Summary of errors:");
            for record in self.failures() {
                error!("'{}': {}", record.test, record.describe());
            }
        }
    }

    /// Console summary block
    pub fn print_summary(&self, strict: bool) {
        println!("\n{}", "Check Summary".bright_green().bold());
        println!(
            "  {} {}",
            "Passed:".bright_cyan(),
            self.success.to_string().bright_white().bold()
        );
        if self.fail > 0 {
            println!(
                "  {} {}",
                "Failed:".bright_red(),
                self.fail.to_string().bright_red().bold()
            );
        } else {
            println!("  {} 0", "Failed:".bright_cyan());
        }
        println!(
            "  {} {}",
            "Skipped:".bright_cyan(),
            self.skip.to_string().bright_yellow()
        );
        if strict && self.skip > 0 && self.fail == 0 {
            println!("  {}", "Strict mode: skipped checks count as failures".yellow());
        }
    }
}
