//! Application constants for grid-check
//!
//! This module contains the index dimensions, default values, sampling
//! thresholds and GRIB2 code tables used throughout the checker.

// =============================================================================
// Index Dimensions
// =============================================================================

/// Number of metadata dimensions used to address a message in the index
pub const INDEX_KEY_COUNT: usize = 9;

/// Ordered metadata dimensions that identify a single forecast field
///
/// Order is significant: it defines the slot layout of [`crate::models::IndexKey`].
pub const INDEX_KEYS: [&str; INDEX_KEY_COUNT] = [
    keys::TYPE_OF_PROCESSED_DATA,
    keys::TYPE_OF_FIRST_FIXED_SURFACE,
    keys::LEVEL,
    keys::DISCIPLINE,
    keys::PARAMETER_CATEGORY,
    keys::PARAMETER_NUMBER,
    keys::TYPE_OF_STATISTICAL_PROCESSING,
    keys::END_STEP,
    keys::PERTURBATION_NUMBER,
];

/// GRIB2 metadata key names as used in configuration files
pub mod keys {
    pub const TYPE_OF_PROCESSED_DATA: &str = "typeOfProcessedData";
    pub const TYPE_OF_FIRST_FIXED_SURFACE: &str = "typeOfFirstFixedSurface";
    pub const LEVEL: &str = "level";
    pub const DISCIPLINE: &str = "discipline";
    pub const PARAMETER_CATEGORY: &str = "parameterCategory";
    pub const PARAMETER_NUMBER: &str = "parameterNumber";
    pub const TYPE_OF_STATISTICAL_PROCESSING: &str = "typeOfStatisticalProcessing";
    pub const END_STEP: &str = "endStep";
    pub const PERTURBATION_NUMBER: &str = "perturbationNumber";

    // Not part of the index, read when the field values are extracted
    pub const DATA_DATE: &str = "dataDate";
    pub const DATA_TIME: &str = "dataTime";
    pub const FORECAST_TIME: &str = "forecastTime";
}

/// Position of a key in [`INDEX_KEYS`]
pub fn index_key_position(key: &str) -> Option<usize> {
    INDEX_KEYS.iter().position(|k| *k == key)
}

/// Default value for an index dimension a parameter leaves unspecified
///
/// Dimensions without a default stay absent.
pub fn default_index_value(key: &str) -> Option<i64> {
    match key {
        keys::TYPE_OF_PROCESSED_DATA => Some(processed_data::DETERMINISTIC),
        keys::TYPE_OF_FIRST_FIXED_SURFACE => Some(SURFACE_HEIGHT_ABOVE_GROUND),
        keys::LEVEL => Some(0),
        _ => None,
    }
}

// =============================================================================
// GRIB2 Code Tables
// =============================================================================

/// Code table 1.4, type of processed data
pub mod processed_data {
    pub const ANALYSIS: i64 = 0;
    pub const DETERMINISTIC: i64 = 1;
    pub const ANALYSIS_AND_FORECAST: i64 = 2;
    pub const CONTROL: i64 = 3;
    pub const PERTURBED: i64 = 4;
}

/// Code table 4.5, specified height level above ground
pub const SURFACE_HEIGHT_ABOVE_GROUND: i64 = 103;

/// Code table 4.5, isobaric surface (Pa)
pub const SURFACE_ISOBARIC: i64 = 100;

// =============================================================================
// Field Values and Sampling
// =============================================================================

/// Sentinel the decoder writes for masked grid points
pub const MISSING_VALUE: f64 = -1e19;

/// Smallest fraction of valid grid points that still gives a representative sample
pub const MIN_VALID_FRACTION: f64 = 0.40;

/// Memory usage ratio above which evaluation concurrency is halved
pub const MEMORY_PRESSURE_THRESHOLD: f64 = 0.8;

/// Prefix for parameters synthesized from inline metadata conditions
pub const ANONYMOUS_PARAMETER_PREFIX: &str = "anon_";

/// Maximum nesting depth of `!include` directives
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// File extensions picked up when an input path is a directory
pub const GRIB_EXTENSIONS: &[&str] = &["grib", "grib2", "grb", "grb2"];
