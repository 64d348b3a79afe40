//! Statistical checks evaluated against drawn samples.

use crate::error::{GridCheckError, Result};
use crate::models::{Bound, CheckResult, GridField, Outcome, TestDefinition, TestKind};
use crate::sampler::MissingPolicy;
use chrono::Datelike;
use tracing::debug;

/// A test definition validated and ready to evaluate samples
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    name: String,
    kind: TestKind,
    min: Option<Bound>,
    max: Option<Bound>,
    month: Option<u32>,
}

impl Check {
    /// Validate bounds for the test kind
    ///
    /// Every kind but INTEGER needs at least one limit. Percentage limits
    /// only make sense for MISSING.
    pub fn from_definition(definition: &TestDefinition) -> Result<Self> {
        let (mut min, mut max) = (definition.min, definition.max);

        if definition.kind == TestKind::Variance && min.is_none() && max.is_none() {
            min = definition.min_variance;
            max = definition.max_variance;
        }

        if definition.kind != TestKind::Integer && min.is_none() && max.is_none() {
            return Err(GridCheckError::configuration(format!(
                "test '{}': at least one of MinAllowed or MaxAllowed must be defined",
                definition.name
            )));
        }

        if definition.kind != TestKind::Missing
            && [min, max].iter().any(|b| matches!(b, Some(Bound::Percentage(_))))
        {
            return Err(GridCheckError::configuration(format!(
                "test '{}': percentage limits are only supported by MISSING",
                definition.name
            )));
        }

        Ok(Self {
            name: definition.name.clone(),
            kind: definition.kind,
            min,
            max,
            // Only the range check is seasonal
            month: definition.month.filter(|_| definition.kind == TestKind::Envelope),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TestKind {
        self.kind
    }

    pub fn missing_policy(&self) -> MissingPolicy {
        if self.kind.keeps_missing() {
            MissingPolicy::Keep
        } else {
            MissingPolicy::Remove
        }
    }

    /// Evaluate one drawn sample
    pub fn evaluate(&self, sample: &GridField) -> CheckResult {
        let size = sample.len();

        if let Some(month) = self.month {
            let got = sample.forecast_time.month();
            if got != month {
                return CheckResult::new(
                    Outcome::Skip,
                    format!("Test skipped due to month mismatch (expected: {month}, got: {got})"),
                );
            }
        }

        debug!(
            "Executing {} test '{}', allowed range: [{} {}]",
            self.kind,
            self.name,
            describe(self.min),
            describe(self.max)
        );

        match self.kind {
            TestKind::Envelope => {
                let (lo, hi) = sample
                    .valid_values()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                        (lo.min(v), hi.max(v))
                    });
                if sample.valid_count() == 0 {
                    return CheckResult::new(Outcome::Skip, "Sample has no valid values");
                }
                let failed = self.below(lo, size) || self.above(hi, size);
                self.result(
                    failed,
                    format!(
                        "Min and max [{lo:.2} {hi:.2}], limits [{} {}], sample={size}",
                        describe(self.min),
                        describe(self.max)
                    ),
                )
            }
            TestKind::Variance | TestKind::Mean => {
                let values: Vec<f64> = sample.valid_values().collect();
                if values.is_empty() {
                    return CheckResult::new(Outcome::Skip, "Sample has no valid values");
                }
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let (label, statistic) = if self.kind == TestKind::Mean {
                    ("Mean", mean)
                } else {
                    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                        / values.len() as f64;
                    ("Variance", variance)
                };
                let failed = self.below(statistic, size) || self.above(statistic, size);
                self.result(
                    failed,
                    format!(
                        "{label} value {}, limits [{} {}], sample={size}",
                        general(statistic, 2),
                        describe(self.min),
                        describe(self.max)
                    ),
                )
            }
            TestKind::Missing => {
                let missing = size - sample.valid_count();
                let min = self.min.map(|b| b.resolve(size));
                let max = self.max.map(|b| b.resolve(size));
                let count = missing as f64;
                let failed = min.is_some_and(|m| count < m) || max.is_some_and(|m| count > m);
                self.result(
                    failed,
                    format!(
                        "Number of missing values {missing}, limits [{} {}], sample={size}",
                        describe(min.map(Bound::Absolute)),
                        describe(max.map(Bound::Absolute))
                    ),
                )
            }
            TestKind::Integer => {
                let failed = sample.valid_values().any(|v| v.fract() != 0.0);
                let verb = if failed { "did not contain" } else { "contained" };
                self.result(failed, format!("Data {verb} all integers, sample={size}"))
            }
        }
    }

    fn below(&self, value: f64, size: usize) -> bool {
        self.min.is_some_and(|b| value < b.resolve(size))
    }

    fn above(&self, value: f64, size: usize) -> bool {
        self.max.is_some_and(|b| value > b.resolve(size))
    }

    fn result(&self, failed: bool, message: String) -> CheckResult {
        let outcome = if failed { Outcome::Fail } else { Outcome::Pass };
        CheckResult::new(outcome, message)
    }
}

fn describe(bound: Option<Bound>) -> String {
    bound.map_or_else(|| "None".to_string(), |b| b.to_string())
}

/// Format with `digits` significant digits like C's `%g`
///
/// The exponent is taken after rounding, so 99.6 at two digits becomes
/// `1e+02` rather than `100`.
fn general(value: f64, digits: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return value.to_string();
    }
    let digits = digits.max(1);
    let scientific = format!("{:.*e}", digits - 1, value);
    let Some((mantissa, exp)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exp.parse().unwrap_or(0);

    if exponent < -4 || exponent >= digits as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_zeros(mantissa), exponent.abs())
    } else {
        let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
        trim_zeros(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}
