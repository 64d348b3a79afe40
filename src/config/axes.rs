//! Forecast type and lead time axes.

use crate::constants::keys;
use crate::error::{GridCheckError, Result};
use crate::models::{ForecastType, LeadTime};
use chrono::Duration;
use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use std::sync::LazyLock;

/// `Key`/`Value` pair as written in the config, value not yet typed
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawCondition {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawForecastType {
    #[serde(default)]
    pub grib2_meta_data: Vec<RawCondition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawLeadTime {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

const DURATION_PATTERN: &str =
    r"^(?:(?P<hours>\d+)h|(?P<h>\d+):(?P<m>\d{1,2}):(?P<s>\d{1,2}))$";

static DURATION_REGEX: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(DURATION_PATTERN));

/// Parse `"Nh"`, `"HH:MM:SS"` or a bare integer number of hours
///
/// Durations are never negative.
pub fn parse_duration(value: &Value) -> Result<Duration> {
    let invalid = |text: String| GridCheckError::InvalidDuration { value: text };

    let text = match value {
        Value::Number(n) => {
            return n
                .as_i64()
                .filter(|hours| *hours >= 0)
                .map(Duration::hours)
                .ok_or_else(|| invalid(n.to_string()));
        }
        Value::String(s) => s.trim(),
        other => return Err(invalid(format!("{other:?}"))),
    };

    let pattern = DURATION_REGEX
        .as_ref()
        .map_err(|e| GridCheckError::configuration(e.to_string()))?;
    let captures = pattern
        .captures(text)
        .ok_or_else(|| invalid(text.to_string()))?;
    let number = |name: &str| -> Result<i64> {
        captures
            .name(name)
            .map_or(Ok(0), |m| m.as_str().parse::<i64>())
            .map_err(|_| invalid(text.to_string()))
    };

    if captures.name("hours").is_some() {
        return Ok(Duration::hours(number("hours")?));
    }
    Ok(Duration::hours(number("h")?) + Duration::minutes(number("m")?) + Duration::seconds(number("s")?))
}

/// Expand every `{Start, Stop, Step}` range, inclusive of `Stop`, sorted
pub fn generate_lead_times(ranges: &[RawLeadTime]) -> Result<Vec<LeadTime>> {
    let mut lead_times = Vec::new();

    for range in ranges {
        let start = parse_duration(&range.start)?;
        let stop = parse_duration(&range.stop)?;
        let step = parse_duration(&range.step)?;
        if step <= Duration::zero() {
            return Err(GridCheckError::configuration(format!(
                "lead time step must be positive, got {}",
                LeadTime(step)
            )));
        }

        let mut current = start;
        while current <= stop {
            lead_times.push(LeadTime(current));
            current += step;
        }
    }

    lead_times.sort();
    Ok(lead_times)
}

pub(crate) fn integer(value: &Value, key: &str) -> Result<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_i64().map(Some).ok_or_else(|| {
            GridCheckError::configuration(format!("{key} must be an integer, got {n}"))
        }),
        Value::String(s) => s.trim().parse::<i64>().map(Some).map_err(|_| {
            GridCheckError::configuration(format!("{key} must be an integer, got '{s}'"))
        }),
        other => Err(GridCheckError::configuration(format!(
            "{key} must be an integer, got {other:?}"
        ))),
    }
}

/// Members selected by a `perturbationNumber` value: one number or `"a-b"`
fn perturbation_members(value: &Value) -> Result<Vec<Option<i64>>> {
    if let Value::String(text) = value {
        if let Some((start, stop)) = text.split_once('-') {
            let parse = |s: &str| {
                s.trim().parse::<i64>().map_err(|_| {
                    GridCheckError::configuration(format!(
                        "invalid perturbationNumber range '{text}'"
                    ))
                })
            };
            let (start, stop) = (parse(start)?, parse(stop)?);
            return Ok((start..=stop).map(Some).collect());
        }
    }
    Ok(vec![integer(value, keys::PERTURBATION_NUMBER)?])
}

/// Expand configured forecast types into axis values
///
/// Key order within an entry does not matter. Without a
/// `perturbationNumber` the axis value has no member.
pub fn expand_forecast_types(raw: &[RawForecastType]) -> Result<Vec<ForecastType>> {
    let mut forecast_types = Vec::new();

    for entry in raw {
        let mut processing_type = None;
        let mut members = vec![None];

        for condition in &entry.grib2_meta_data {
            match condition.key.as_str() {
                keys::TYPE_OF_PROCESSED_DATA => {
                    processing_type = integer(&condition.value, keys::TYPE_OF_PROCESSED_DATA)?;
                }
                keys::PERTURBATION_NUMBER => {
                    members = perturbation_members(&condition.value)?;
                }
                other => {
                    return Err(GridCheckError::configuration(format!(
                        "unsupported forecast type key '{other}'"
                    )));
                }
            }
        }

        forecast_types.extend(members.into_iter().map(|perturbation| ForecastType {
            processing_type,
            perturbation,
        }));
    }

    Ok(forecast_types)
}
