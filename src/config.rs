//! Configuration loading and validation.
//!
//! The YAML test suite is read with `!include` resolution, patched from
//! the command line, deserialized into raw structs and then validated into
//! the typed model used by the runner. Run-level settings that do not come
//! from the file live in [`RunOptions`].

pub mod axes;
pub mod include;
pub mod patch;

use crate::error::{GridCheckError, Result};
use crate::models::{
    Bound, Condition, ForecastType, LeadTime, ParameterDefinition, ParameterRequest, Preprocess,
    SampleSize, TestDefinition, TestKind,
};
use axes::{RawCondition, RawForecastType, RawLeadTime};
use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfig {
    #[serde(default)]
    tests: Option<Vec<RawTest>>,
    #[serde(default)]
    parameters: Option<Vec<RawParameter>>,
    #[serde(default)]
    forecast_types: Option<Vec<RawForecastType>>,
    #[serde(default)]
    lead_times: Option<Vec<RawLeadTime>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawParameter {
    name: String,
    #[serde(default)]
    grib2_meta_data: Vec<RawCondition>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    lag: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawParameterRequest {
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    grib2_meta_data: Vec<RawCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPreprocess {
    function: String,
    #[serde(default)]
    rename: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTestBody {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(default)]
    min_allowed: Value,
    #[serde(default)]
    max_allowed: Value,
    #[serde(default)]
    min_variance: Value,
    #[serde(default)]
    max_variance: Value,
    #[serde(default)]
    month: Option<u32>,
    #[serde(default)]
    preprocess: Option<RawPreprocess>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTest {
    #[serde(default)]
    name: Option<String>,
    test: RawTestBody,
    #[serde(default)]
    sample: Value,
    #[serde(default)]
    parameters: RawParameterRequest,
}

/// Validated test suite
#[derive(Debug, Clone, PartialEq)]
pub struct CheckConfig {
    pub tests: Vec<TestDefinition>,
    pub parameters: Vec<ParameterDefinition>,
    pub forecast_types: Vec<ForecastType>,
    pub lead_times: Vec<LeadTime>,
}

impl CheckConfig {
    /// Load a configuration file, resolve includes and apply patches
    pub fn load(path: &Path, patches: &[String]) -> Result<Self> {
        let mut value = include::load_yaml(path)?;
        for p in patches {
            patch::apply_patch(&mut value, p)?;
        }

        if let Ok(dump) = serde_yaml::to_string(&value) {
            debug!("Effective configuration:\n{}", dump);
        }

        Self::from_value(value).map_err(|e| match e {
            GridCheckError::ConfigParse { source, .. } => GridCheckError::ConfigParse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Validate an already loaded configuration tree
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawConfig =
            serde_yaml::from_value(value).map_err(|source| GridCheckError::ConfigParse {
                path: PathBuf::new(),
                source,
            })?;

        let forecast_types = raw
            .forecast_types
            .ok_or(GridCheckError::MissingSection {
                section: "ForecastTypes",
            })?;
        let raw_tests = raw
            .tests
            .ok_or(GridCheckError::MissingSection { section: "Tests" })?;

        let parameters = parse_parameters(raw.parameters.unwrap_or_default())?;
        let tests = raw_tests
            .into_iter()
            .map(parse_test)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tests,
            parameters,
            forecast_types: axes::expand_forecast_types(&forecast_types)?,
            lead_times: axes::generate_lead_times(&raw.lead_times.unwrap_or_default())?,
        })
    }
}

fn conditions(raw: &[RawCondition]) -> Result<Vec<Condition>> {
    raw.iter()
        .map(|c| Ok(Condition::new(c.key.clone(), axes::integer(&c.value, &c.key)?)))
        .collect()
}

/// Resolve `Parent` inheritance in definition order
fn parse_parameters(raw: Vec<RawParameter>) -> Result<Vec<ParameterDefinition>> {
    let mut parameters: Vec<ParameterDefinition> = Vec::with_capacity(raw.len());

    for entry in raw {
        let own = conditions(&entry.grib2_meta_data)?;
        let mut definition = match &entry.parent {
            Some(parent) => {
                let inherited = parameters
                    .iter()
                    .find(|p| &p.name == parent)
                    .ok_or_else(|| {
                        GridCheckError::configuration(format!(
                            "parameter '{}' refers to unknown parent '{parent}'",
                            entry.name
                        ))
                    })?;
                let mut definition =
                    ParameterDefinition::new(entry.name.clone(), inherited.conditions.clone());
                for condition in own {
                    definition.set_condition(&condition.key, condition.value);
                }
                definition
            }
            None => ParameterDefinition::new(entry.name.clone(), own),
        };

        if let Some(lag) = &entry.lag {
            definition.lag = Some(axes::parse_duration(lag)?);
        }

        parameters.push(definition);
    }

    Ok(parameters)
}

fn parse_bound(value: &Value, field: &str, test: &str) -> Result<Option<Bound>> {
    let invalid = || {
        GridCheckError::configuration(format!("test '{test}': invalid {field} {value:?}"))
    };
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(|v| Some(Bound::Absolute(v))).ok_or_else(invalid),
        Value::String(s) => match s.trim().strip_suffix('%') {
            Some(pct) => pct
                .trim()
                .parse::<f64>()
                .map(|v| Some(Bound::Percentage(v)))
                .map_err(|_| invalid()),
            None => s
                .trim()
                .parse::<f64>()
                .map(|v| Some(Bound::Absolute(v)))
                .map_err(|_| invalid()),
        },
        _ => Err(invalid()),
    }
}

fn parse_sample_size(value: &Value, test: &str) -> Result<SampleSize> {
    let invalid = || {
        GridCheckError::configuration(format!("test '{test}': invalid Sample {value:?}"))
    };
    match value {
        Value::Null => Err(GridCheckError::configuration(format!(
            "test '{test}': 'Sample' must be defined"
        ))),
        Value::Number(n) => n
            .as_u64()
            .map(|v| SampleSize::Absolute(v as usize))
            .ok_or_else(invalid),
        Value::String(s) => match s.trim().strip_suffix('%') {
            Some(pct) => pct
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| *v >= 0.0)
                .map(SampleSize::Percentage)
                .ok_or_else(invalid),
            None => s
                .trim()
                .parse::<usize>()
                .map(SampleSize::Absolute)
                .map_err(|_| invalid()),
        },
        _ => Err(invalid()),
    }
}

fn parse_test(raw: RawTest) -> Result<TestDefinition> {
    let kind = TestKind::parse(&raw.test.kind).ok_or_else(|| GridCheckError::UnsupportedTest {
        kind: raw.test.kind.clone(),
    })?;
    let name = raw.name.unwrap_or_else(|| format!("{kind} test"));

    if let Some(month) = raw.test.month {
        if !(1..=12).contains(&month) {
            return Err(GridCheckError::configuration(format!(
                "test '{name}': Month must be between 1 and 12, got {month}"
            )));
        }
    }

    Ok(TestDefinition {
        kind,
        min: parse_bound(&raw.test.min_allowed, "MinAllowed", &name)?,
        max: parse_bound(&raw.test.max_allowed, "MaxAllowed", &name)?,
        min_variance: parse_bound(&raw.test.min_variance, "MinVariance", &name)?,
        max_variance: parse_bound(&raw.test.max_variance, "MaxVariance", &name)?,
        month: raw.test.month,
        sample: parse_sample_size(&raw.sample, &name)?,
        preprocess: raw.test.preprocess.map(|p| Preprocess {
            function: p.function,
            rename: p.rename,
        }),
        parameters: ParameterRequest {
            names: raw.parameters.names,
            conditions: conditions(&raw.parameters.grib2_meta_data)?,
        },
        name,
    })
}

/// Supported compression algorithms for the Parquet report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    /// Snappy compression - good balance of speed and compression
    #[default]
    Snappy,
    /// ZSTD compression - better compression ratio, slower
    Zstd,
    /// LZ4 compression - fastest, lower compression ratio
    Lz4,
    /// No compression
    Uncompressed,
}

impl CompressionAlgorithm {
    /// Convert to polars ParquetCompression type
    pub fn to_polars_compression(&self) -> ParquetCompression {
        match self {
            CompressionAlgorithm::Snappy => ParquetCompression::Snappy,
            CompressionAlgorithm::Zstd => ParquetCompression::Zstd(None),
            CompressionAlgorithm::Lz4 => ParquetCompression::Lz4Raw,
            CompressionAlgorithm::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

/// Settings for one run that do not come from the configuration file
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skipped checks make the run fail
    pub strict: bool,

    /// Sampling seed; derived from the clock when unset
    pub seed: Option<u64>,

    /// Maximum number of files or combinations processed at once
    pub jobs: Option<usize>,

    /// Write every check record to this Parquet or CSV file
    pub report: Option<PathBuf>,

    /// Compression used for a Parquet report
    pub compression: CompressionAlgorithm,

    /// Show a progress bar while indexing
    pub show_progress: bool,
}

impl RunOptions {
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_jobs(mut self, jobs: Option<usize>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_report(mut self, report: Option<PathBuf>) -> Self {
        self.report = report;
        self
    }

    pub fn with_compression(mut self, compression: CompressionAlgorithm) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Worker count, defaulting to the number of logical CPUs
    pub fn workers(&self) -> usize {
        self.jobs.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Seed for this run
    pub fn run_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            let now = chrono::Utc::now();
            now.timestamp_nanos_opt()
                .map_or(now.timestamp() as u64, |nanos| nanos as u64)
        })
    }
}
