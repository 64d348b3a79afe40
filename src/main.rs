use clap::Parser;
use grid_check::cli::{args::Args, commands};
use std::process;

/// Exit code for runs that could not be completed
const EXIT_FATAL: i32 = 2;

fn main() {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(EXIT_FATAL);
    });

    let result = runtime.block_on(async {
        let interrupted = async {
            if tokio::signal::ctrl_c().await.is_err() {
                // No signal handler available; never resolve
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            result = commands::run(args) => result,
            _ = interrupted => {
                eprintln!("\nReceived CTRL+C, aborting check run");
                Err(anyhow::anyhow!("Run interrupted by user"))
            }
        }
    });

    match result {
        Ok(code) => process::exit(code),
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(EXIT_FATAL);
        }
    }
}
