//! Command-line argument definitions for grid-check
//!
//! This module defines the CLI interface using the clap derive API.

use crate::config::{CompressionAlgorithm, RunOptions};
use crate::error::{GridCheckError, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// CLI arguments for the forecast grid checker
///
/// Samples gridded forecast fields across forecast types and lead times,
/// runs the statistical checks of a YAML test suite and reports
/// pass/fail/skip per check.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "grid-check",
    version,
    about = "Statistical quality checks for GRIB2 forecast grids",
    long_about = "Runs a declarative YAML test suite against one or more GRIB2 files. \
                  Each test samples the requested fields for every forecast type and \
                  lead time and checks range, variance, mean, missing data or \
                  integrality. Exit code 0 means every check passed, 1 that at least \
                  one check failed (or, with --strict, was skipped) and 2 that the run \
                  could not be completed."
)]
pub struct Args {
    /// Test suite configuration file (YAML)
    #[arg(short = 'c', long = "configuration", value_name = "FILE")]
    pub configuration: PathBuf,

    /// Override a configuration value, e.g. `LeadTimes[0].Stop=24:00:00`
    ///
    /// May be given several times. The value `None` removes the element.
    #[arg(short = 'p', long = "patch", value_name = "PATCH")]
    pub patches: Vec<String>,

    /// Log level from 1 (critical) to 5 (debug)
    #[arg(
        short = 'd',
        long = "log-level",
        value_name = "LEVEL",
        default_value_t = 4,
        value_parser = clap::value_parser!(u8).range(1..=5)
    )]
    pub log_level: u8,

    /// Treat skipped checks as failures
    #[arg(long)]
    pub strict: bool,

    /// Seed for sampling; runs with the same seed draw the same samples
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Number of files or combinations processed at once (default: CPU count)
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<usize>,

    /// Write every check result to a .parquet or .csv file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Parquet report compression
    #[arg(long, value_enum, default_value_t = Compression::Snappy)]
    pub compression: Compression,

    /// Hide the indexing progress bar
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// GRIB2 files, directories (searched recursively) or glob patterns
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<String>,
}

/// Parquet compression choices exposed on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Compression {
    Snappy,
    Zstd,
    Lz4,
    None,
}

impl From<Compression> for CompressionAlgorithm {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Snappy => CompressionAlgorithm::Snappy,
            Compression::Zstd => CompressionAlgorithm::Zstd,
            Compression::Lz4 => CompressionAlgorithm::Lz4,
            Compression::None => CompressionAlgorithm::Uncompressed,
        }
    }
}

impl Args {
    /// Validate arguments that clap cannot check on its own
    pub fn validate(&self) -> Result<()> {
        if self.jobs == Some(0) {
            return Err(GridCheckError::configuration("--jobs must be at least 1"));
        }

        if let Some(report) = &self.report {
            let supported = report
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv") || e.eq_ignore_ascii_case("parquet"));
            if !supported {
                return Err(GridCheckError::configuration(format!(
                    "report file must end in .csv or .parquet: {}",
                    report.display()
                )));
            }
        }

        Ok(())
    }

    /// Tracing filter level for `--log-level`
    ///
    /// `tracing` has no critical level, so 1 and 2 both map to errors.
    pub fn get_log_level(&self) -> &'static str {
        match self.log_level {
            1 | 2 => "error",
            3 => "warn",
            4 => "info",
            _ => "debug",
        }
    }

    /// Progress bars only make sense when info output is shown
    pub fn show_progress(&self) -> bool {
        !self.quiet && self.log_level >= 4
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions::default()
            .with_strict(self.strict)
            .with_seed(self.seed)
            .with_jobs(self.jobs)
            .with_report(self.report.clone())
            .with_compression(self.compression.into())
            .with_progress(self.show_progress())
    }
}
