//! Command implementation for the grid-check CLI
//!
//! Sets up logging, loads the test suite, discovers inputs, runs every
//! check and turns the outcome into a process exit code.

use crate::cli::args::Args;
use crate::cli::input::discover_inputs;
use crate::config::CheckConfig;
use crate::decoder::grib2::Grib2Decoder;
use crate::processor::CheckRunner;
use crate::report::write_report;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Run a full check and return the exit code
///
/// 1. Set up logging
/// 2. Load and patch the configuration
/// 3. Index the inputs and evaluate every test
/// 4. Log the summary and optionally write the report
pub async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    setup_logging(&args)?;
    debug!("Command line arguments: {:?}", args);

    args.validate()?;

    let config = CheckConfig::load(&args.configuration, &args.patches).with_context(|| {
        format!(
            "Failed to load configuration {}",
            args.configuration.display()
        )
    })?;
    info!(
        "Loaded {} test(s), {} forecast type(s), {} lead time(s)",
        config.tests.len(),
        config.forecast_types.len(),
        config.lead_times.len()
    );

    let files = discover_inputs(&args.inputs).context("Failed to resolve input files")?;
    let options = args.run_options();

    let mut runner = CheckRunner::new(config, Arc::new(Grib2Decoder::new())).with_options(options);
    let summary = runner.run(&files).await?;

    summary.log_summary();

    if let Some(path) = &runner.options().report {
        write_report(summary.records(), path, runner.options().compression)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
    }

    if !args.quiet {
        summary.print_summary(args.strict);
    }

    debug!("Finished in {:.2?}", start_time.elapsed());
    Ok(summary.exit_code(args.strict))
}

/// Set up tracing output on stderr
fn setup_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.get_log_level();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("grid_check={}", log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_timer(fmt::time::uptime())
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}
