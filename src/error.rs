//! Error handling for grid-check operations.
//!
//! Every error here aborts the run. Missing data and out-of-bounds
//! statistics are not errors; they surface as SKIP and FAIL outcomes.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridCheckError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Cannot open input file: {path} - {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid GRIB2 message in file: {path} at offset {offset} - {reason}")]
    InvalidMessage {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("Cannot decode message: {reason}")]
    Decode { reason: String },

    #[error("Malformed configuration file: {path} - {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("'{section}' must be defined")]
    MissingSection { section: &'static str },

    #[error("Required parameter is not defined: {name}")]
    UndefinedParameter { name: String },

    #[error("Unsupported test: {kind}")]
    UnsupportedTest { kind: String },

    #[error("Invalid preprocessing function: {expression}: {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Invalid patch '{patch}': {reason}")]
    InvalidPatch { patch: String, reason: String },

    #[error("Invalid duration '{value}': expected 'Nh' or 'HH:MM:SS'")]
    InvalidDuration { value: String },

    #[error("Invalid input path pattern '{pattern}': {reason}")]
    InvalidInput { pattern: String, reason: String },

    #[error("Background task failed: {reason}")]
    TaskFailed { reason: String },
}

impl GridCheckError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a preprocessing expression error
    pub fn expression(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Create a decode error
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GridCheckError>;
