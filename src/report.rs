//! Tabular export of check records.
//!
//! Every evaluated check becomes one row. The format follows the report
//! file extension: `.csv` writes CSV, anything else Parquet.

use crate::config::CompressionAlgorithm;
use crate::error::Result;
use crate::processor::summary::CheckRecord;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use tracing::info;

/// Build a DataFrame with one row per check record
pub fn records_to_dataframe(records: &[CheckRecord]) -> Result<DataFrame> {
    let column = |f: fn(&CheckRecord) -> String| records.iter().map(f).collect::<Vec<_>>();

    let df = df!(
        "test" => column(|r| r.test.clone()),
        "forecast_type" => column(|r| r.forecast_type.clone()),
        "lead_time" => column(|r| r.lead_time.clone()),
        "parameter" => column(|r| r.parameter.clone()),
        "outcome" => column(|r| r.outcome.to_string()),
        "code" => records.iter().map(|r| r.outcome.code()).collect::<Vec<i32>>(),
        "message" => column(|r| r.message.clone()),
    )?;

    Ok(df)
}

/// Write the records to `path`
pub fn write_report(
    records: &[CheckRecord],
    path: &Path,
    compression: CompressionAlgorithm,
) -> Result<()> {
    let mut df = records_to_dataframe(records)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;

    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
    } else {
        ParquetWriter::new(file)
            .with_compression(compression.to_polars_compression())
            .with_statistics(StatisticsOptions::full())
            .finish(&mut df)?;
    }

    info!("Wrote {} check records to {}", df.height(), path.display());
    Ok(())
}
