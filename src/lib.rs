//! grid-check library
//!
//! Statistical quality assurance for gridded forecast data stored as GRIB2
//! messages.
//!
//! This library provides tools for:
//! - Indexing messages by a fixed tuple of metadata dimensions
//! - Resolving test parameter requests into fully specified lookup keys
//! - Sampling fields with reproducible, seedable randomness
//! - Deriving fields with a small arithmetic expression language
//! - Evaluating range, variance, mean, missing-data and integer checks
//! - Aggregating pass/fail/skip outcomes into an exit status and report

pub mod checks;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod error;
pub mod index;
pub mod models;
pub mod preprocess;
pub mod processor;
pub mod reader;
pub mod report;
pub mod resolver;
pub mod sampler;

// CLI modules
pub mod cli {
    pub mod args;
    pub mod commands;
    pub mod input;
}

// Re-export commonly used types
pub use config::{CheckConfig, RunOptions};
pub use error::{GridCheckError, Result};
pub use models::{CheckResult, GridField, Outcome};
pub use processor::CheckRunner;
pub use processor::summary::RunSummary;
