mod cli;
mod demo;
mod dispatcher;
mod provider;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Demo {
            success_rate,
            seed,
            dispatch,
        } => {
            if !(0.0..=1.0).contains(&success_rate) {
                eprintln!("masterad demo: --success-rate must be between 0 and 1");
                std::process::exit(1);
            }
            if let Err(e) = demo::walkthrough(success_rate, seed, dispatch.config()).await {
                tracing::error!(error = %e, "demo failed");
                eprintln!("masterad demo: {e}");
                std::process::exit(1);
            }
        }
        Command::Simulate {
            providers,
            slot,
            loads,
            latency_ms,
            seed,
            dispatch,
        } => {
            let latency = Duration::from_millis(latency_ms);
            if let Err(e) =
                demo::simulate(providers, slot, loads, latency, seed, dispatch.config()).await
            {
                tracing::error!(error = %e, "simulate failed");
                eprintln!("masterad simulate: {e}");
                std::process::exit(1);
            }
        }
        Command::Presets => demo::list_presets(),
    }
}
