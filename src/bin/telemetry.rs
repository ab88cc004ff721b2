//! Flight computer telemetry entry point.
//!
//! Loads the configuration, installs the syslog tee, brings up the
//! pipeline, and parks. Sensor drivers are expected to run alongside and
//! publish onto the bus.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use rockettelem::config::TelemetryConfig;
use rockettelem::pipeline::TelemetryPipeline;
use rockettelem::syslog;

#[derive(Parser)]
#[command(name = "telemetry", version, about = "Model-rocket flight computer telemetry core")]
struct Args {
    /// Path to the JSON configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match TelemetryConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("could not load {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => TelemetryConfig::default(),
    };

    if let Err(err) = syslog::init(&config.syslog_path) {
        eprintln!("could not set up logging: {err}");
        return ExitCode::FAILURE;
    }

    info!("telemetry core starting with call sign {}", config.call_sign);
    let pipeline = match TelemetryPipeline::start(&config) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            error!("bring-up failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    pipeline.join();
    ExitCode::SUCCESS
}
