//! Core data structures and types for grid checking.
//!
//! Defines the index key layout, message locations, parameter and test
//! definitions, forecast axes, grid fields and check outcomes shared by
//! the rest of the library.

use crate::constants::{INDEX_KEY_COUNT, INDEX_KEYS, keys, processed_data};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Composite index key, one slot per entry of [`INDEX_KEYS`]
///
/// `None` is the explicit absent marker for a dimension the message does
/// not define.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexKey(pub [Option<i64>; INDEX_KEY_COUNT]);

impl IndexKey {
    /// Build a lookup key from metadata conditions
    ///
    /// Returns `None` when a dimension has no condition at all. A condition
    /// whose value is absent matches messages that lack that dimension.
    pub fn from_conditions(conditions: &[Condition]) -> Option<Self> {
        let mut slots = [None; INDEX_KEY_COUNT];
        for (slot, key) in slots.iter_mut().zip(INDEX_KEYS) {
            let condition = conditions.iter().find(|c| c.key == key)?;
            *slot = condition.value;
        }
        Some(Self(slots))
    }
}

/// Byte location of one message inside an input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLocation {
    pub file: PathBuf,
    pub message_no: usize,
    pub offset: u64,
    pub length: u64,
}

/// A single `Key`/`Value` metadata condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value", default)]
    pub value: Option<i64>,
}

impl Condition {
    pub fn new(key: impl Into<String>, value: Option<i64>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Render conditions as `key=value` pairs for log messages
pub fn describe_conditions(conditions: &[Condition]) -> String {
    conditions
        .iter()
        .map(|c| match c.value {
            Some(v) => format!("{}={}", c.key, v),
            None => format!("{}=None", c.key),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Named set of metadata conditions selecting one field
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub conditions: Vec<Condition>,
    /// Valid time of the field trails the nominal forecast step by this much
    pub lag: Option<Duration>,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Self {
            name: name.into(),
            conditions,
            lag: None,
        }
    }

    pub fn with_lag(mut self, lag: Duration) -> Self {
        self.lag = Some(lag);
        self
    }

    /// Value of a condition, `None` if the key is not present at all
    pub fn condition(&self, key: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.key == key)
    }

    /// Replace the value of a same-keyed condition or append a new one
    pub fn set_condition(&mut self, key: &str, value: Option<i64>) {
        match self.conditions.iter_mut().find(|c| c.key == key) {
            Some(existing) => existing.value = value,
            None => self.conditions.push(Condition::new(key, value)),
        }
    }
}

/// Forecast type axis value: processing type plus optional ensemble member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForecastType {
    pub processing_type: Option<i64>,
    pub perturbation: Option<i64>,
}

impl ForecastType {
    /// Metadata overrides injected into every parameter for this axis value
    pub fn conditions(&self) -> Vec<Condition> {
        vec![
            Condition::new(keys::TYPE_OF_PROCESSED_DATA, self.processing_type),
            Condition::new(keys::PERTURBATION_NUMBER, self.perturbation),
        ]
    }

    /// Human readable name such as `deterministic` or `perturbation/3`
    pub fn label(&self) -> String {
        let member = self
            .perturbation
            .map_or_else(|| "None".to_string(), |p| p.to_string());
        match self.processing_type {
            Some(processed_data::ANALYSIS) => "analysis".to_string(),
            Some(processed_data::DETERMINISTIC) => "deterministic".to_string(),
            Some(processed_data::CONTROL) => format!("control/{member}"),
            Some(processed_data::PERTURBED) => format!("perturbation/{member}"),
            _ => "unknown".to_string(),
        }
    }
}

/// Lead time axis value, the offset of valid time from analysis time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeadTime(pub Duration);

impl LeadTime {
    pub fn hours(hours: i64) -> Self {
        Self(Duration::hours(hours))
    }

    /// Forecast step in whole hours, as stored in `endStep`
    pub fn end_step(&self) -> i64 {
        self.0.num_hours()
    }

    /// Metadata override injected into every parameter for this axis value
    pub fn conditions(&self) -> Vec<Condition> {
        vec![Condition::new(keys::END_STEP, Some(self.end_step()))]
    }
}

impl fmt::Display for LeadTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.0.num_seconds();
        let (hours, rest) = (total / 3600, total % 3600);
        if rest == 0 {
            write!(f, "{hours}h")
        } else {
            write!(f, "{:02}:{:02}:{:02}", hours, rest / 60, rest % 60)
        }
    }
}

/// Supported statistical check variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestKind {
    Envelope,
    Variance,
    Mean,
    Missing,
    Integer,
}

impl TestKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ENVELOPE" => Some(Self::Envelope),
            "VARIANCE" => Some(Self::Variance),
            "MEAN" => Some(Self::Mean),
            "MISSING" => Some(Self::Missing),
            "INTEGER" => Some(Self::Integer),
            _ => None,
        }
    }

    /// Whether samples for this check keep masked grid points
    pub fn keeps_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Envelope => "ENVELOPE",
            Self::Variance => "VARIANCE",
            Self::Mean => "MEAN",
            Self::Missing => "MISSING",
            Self::Integer => "INTEGER",
        };
        f.write_str(name)
    }
}

/// Limit of a check, either a plain number or a share of the sample size
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Absolute(f64),
    Percentage(f64),
}

impl Bound {
    /// Resolve against the number of elements the percentage refers to
    pub fn resolve(&self, denominator: usize) -> f64 {
        match *self {
            Self::Absolute(value) => value,
            Self::Percentage(pct) => (pct / 100.0 * denominator as f64).floor(),
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absolute(value) => write!(f, "{value}"),
            Self::Percentage(pct) => write!(f, "{pct}%"),
        }
    }
}

/// Requested sample size
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleSize {
    Absolute(usize),
    Percentage(f64),
}

impl SampleSize {
    /// Number of draws for a field with `available` candidate elements
    pub fn resolve(&self, available: usize) -> usize {
        match *self {
            Self::Absolute(n) => n,
            Self::Percentage(pct) => (pct / 100.0 * available as f64).floor() as usize,
        }
    }
}

/// Optional derivation of a single field from several parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocess {
    pub function: String,
    pub rename: Option<String>,
}

/// Parameters a test asks for: named definitions and/or inline conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterRequest {
    pub names: Vec<String>,
    pub conditions: Vec<Condition>,
}

/// One entry of the `Tests` section
#[derive(Debug, Clone, PartialEq)]
pub struct TestDefinition {
    pub name: String,
    pub kind: TestKind,
    pub min: Option<Bound>,
    pub max: Option<Bound>,
    /// Legacy VARIANCE limits, honoured only when both `min` and `max` are unset
    pub min_variance: Option<Bound>,
    pub max_variance: Option<Bound>,
    pub month: Option<u32>,
    pub sample: SampleSize,
    pub preprocess: Option<Preprocess>,
    pub parameters: ParameterRequest,
}

/// Decoded field values for one parameter at one axis combination
///
/// `None` marks a masked (missing) grid point.
#[derive(Debug, Clone, PartialEq)]
pub struct GridField {
    pub parameter: String,
    pub values: Vec<Option<f64>>,
    pub analysis_time: NaiveDateTime,
    pub forecast_time: NaiveDateTime,
}

impl GridField {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of unmasked elements
    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Unmasked values in grid order
    pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().filter_map(|v| *v)
    }
}

/// Tri-state check outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
}

impl Outcome {
    /// Numeric code: 0 pass, 1 fail, -1 skip
    pub fn code(&self) -> i32 {
        match self {
            Self::Pass => 0,
            Self::Fail => 1,
            Self::Skip => -1,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
        };
        f.write_str(name)
    }
}

/// Result of evaluating one check against one sample
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub outcome: Outcome,
    pub message: String,
}

impl CheckResult {
    pub fn new(outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
        }
    }
}
