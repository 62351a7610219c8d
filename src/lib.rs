//! Earshot - emergency sound classification with location-based alerts.
//!
//! Recordings are rendered as mel spectrogram images, embedded by a frozen
//! ONNX backbone and classified by a small trainable head. Detections can be
//! turned into geotagged alerts that nearby clients look up by radius.

#![warn(missing_docs)]

pub mod alerts;
pub mod audio;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod inference;
pub mod output;
pub mod spectrogram;
pub mod staging;
pub mod store;
pub mod training;

use clap::Parser;
use cli::{Cli, OutputMode};

pub use error::{Error, Result};

/// Main entry point for the earshot CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet);

    let json = cli.global.output_mode == OutputMode::Json;
    let result = cli::handle_command(cli.command, &cli.global);
    if json && let Err(e) = &result {
        output::emit_json_error(e);
    }
    result
}

fn init_logging(verbose: u8, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    // ORT logging is suppressed by default because CUDA fallback is expected in auto mode.
    let filter_str = if quiet {
        "warn,ort=off".to_string()
    } else {
        match verbose {
            0 => "info,ort=off".to_string(),
            1 => "debug,ort=warn".to_string(),
            2 => "trace,ort=info".to_string(),
            _ => "trace".to_string(),
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    // stdout is reserved for command results
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
