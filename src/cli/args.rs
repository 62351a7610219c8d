//! CLI argument definitions.

use crate::cli::validators::{
    parse_confidence, parse_latitude, parse_longitude, parse_positive_float,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Emergency sound classification and location-based alerts.
#[derive(Debug, Parser)]
#[command(name = "earshot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Suppress progress output and informational logs.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase verbosity (-v: debug, -vv: trace+ORT info, -vvv: trace+ORT debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable progress bars.
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// `SQLite` database path (overrides config).
    #[arg(long, global = true, env = "EARSHOT_DB")]
    pub db: Option<PathBuf>,

    /// Configuration file (default: platform config directory).
    #[arg(long, global = true, env = "EARSHOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output mode.
    #[arg(long, global = true, value_enum, default_value_t = OutputMode::Human, env = "EARSHOT_OUTPUT_MODE")]
    pub output_mode: OutputMode,
}

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Readable text.
    #[default]
    Human,
    /// One JSON envelope per result on stdout.
    Json,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classify a recording and store the prediction.
    Predict(PredictArgs),
    /// Train a classifier head on labelled recordings.
    Train(TrainArgs),
    /// Manage notifiable classes.
    Classes {
        /// Classes action to perform.
        #[command(subcommand)]
        action: ClassesAction,
    },
    /// Create and search alerts.
    Alerts {
        /// Alerts action to perform.
        #[command(subcommand)]
        action: AlertsAction,
    },
    /// Inspect stored predictions.
    Predictions {
        /// Predictions action to perform.
        #[command(subcommand)]
        action: PredictionsAction,
    },
    /// Record and summarize user evaluations.
    Evaluations {
        /// Evaluations action to perform.
        #[command(subcommand)]
        action: EvaluationsAction,
    },
    /// Manage configuration.
    Config {
        /// Configuration action to perform.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for the predict command.
#[derive(Debug, Args)]
pub struct PredictArgs {
    /// Recording to classify.
    pub input: PathBuf,

    /// ONNX backbone file (overrides config).
    #[arg(long, env = "EARSHOT_BACKBONE")]
    pub backbone: Option<PathBuf>,

    /// Classifier weights file (overrides config).
    #[arg(long, env = "EARSHOT_CLASSIFIER")]
    pub classifier: Option<PathBuf>,

    /// Enable CUDA GPU acceleration.
    #[arg(long, conflicts_with = "cpu")]
    pub gpu: bool,

    /// Force CPU inference.
    #[arg(long, conflicts_with = "gpu")]
    pub cpu: bool,

    /// Do not store the prediction.
    #[arg(long)]
    pub no_save: bool,
}

/// Arguments for the train command.
#[derive(Debug, Args)]
pub struct TrainArgs {
    /// Dataset directory with one subdirectory of recordings per class.
    pub dataset: PathBuf,

    /// Weights file to write (default: configured classifier path).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum epochs.
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Mini-batch size.
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// ONNX backbone file (overrides config).
    #[arg(long, env = "EARSHOT_BACKBONE")]
    pub backbone: Option<PathBuf>,

    /// Enable CUDA GPU acceleration.
    #[arg(long, conflicts_with = "cpu")]
    pub gpu: bool,

    /// Force CPU inference.
    #[arg(long, conflicts_with = "gpu")]
    pub cpu: bool,
}

/// Classes subcommand actions.
#[derive(Debug, Subcommand)]
pub enum ClassesAction {
    /// Add a notifiable class.
    Add {
        /// Class name (a classifier label).
        name: String,
        /// Free-text description.
        #[arg(short, long)]
        description: Option<String>,
        /// Minimum confidence that triggers an alert (default from config).
        #[arg(short = 'c', long, value_parser = parse_confidence)]
        min_confidence: Option<f64>,
        /// Create the class switched off.
        #[arg(long)]
        inactive: bool,
    },
    /// List notifiable classes.
    List {
        /// Include inactive classes.
        #[arg(short, long)]
        all: bool,
    },
    /// Show one class by id or name.
    Show {
        /// Class id or name.
        class: String,
    },
    /// Update a class.
    Update {
        /// Class id.
        id: i64,
        /// New name.
        #[arg(long)]
        name: Option<String>,
        /// New description.
        #[arg(long)]
        description: Option<String>,
        /// New minimum confidence.
        #[arg(short = 'c', long, value_parser = parse_confidence)]
        min_confidence: Option<f64>,
        /// Switch the class on.
        #[arg(long, conflicts_with = "deactivate")]
        activate: bool,
        /// Switch the class off.
        #[arg(long)]
        deactivate: bool,
    },
}

/// Alerts subcommand actions.
#[derive(Debug, Subcommand)]
pub enum AlertsAction {
    /// Create an alert if the class gate allows it.
    Create {
        /// Class id or name.
        class: String,
        /// Latitude of the detection.
        #[arg(long, value_parser = parse_latitude, allow_hyphen_values = true)]
        lat: f64,
        /// Longitude of the detection.
        #[arg(long, value_parser = parse_longitude, allow_hyphen_values = true)]
        lon: f64,
        /// Detection confidence.
        #[arg(short = 'c', long, value_parser = parse_confidence)]
        confidence: f64,
        /// Reporting device.
        #[arg(long)]
        device_id: Option<String>,
    },
    /// Find alerts around a location, nearest first.
    Nearby {
        /// Latitude of the search center.
        #[arg(long, value_parser = parse_latitude, allow_hyphen_values = true)]
        lat: f64,
        /// Longitude of the search center.
        #[arg(long, value_parser = parse_longitude, allow_hyphen_values = true)]
        lon: f64,
        /// Search radius in km (default from config).
        #[arg(short, long, value_parser = parse_positive_float)]
        radius: Option<f64>,
        /// Restrict to these class ids.
        #[arg(long, value_delimiter = ',')]
        class_ids: Option<Vec<i64>>,
        /// Only alerts created within this many hours.
        #[arg(long)]
        hours: Option<u32>,
    },
}

/// Predictions subcommand actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum PredictionsAction {
    /// List recent predictions, newest first.
    List {
        /// Maximum number of rows.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

/// Evaluations subcommand actions.
#[derive(Debug, Subcommand)]
pub enum EvaluationsAction {
    /// Record whether a detection was correct.
    Add {
        /// Recording file name.
        recording: String,
        /// Class the detection reported.
        #[arg(long)]
        class: String,
        /// Confidence of the detection.
        #[arg(short = 'c', long, value_parser = parse_confidence)]
        confidence: f64,
        /// The detection was correct.
        #[arg(long, conflicts_with = "wrong", required_unless_present = "wrong")]
        correct: bool,
        /// The detection was wrong.
        #[arg(long)]
        wrong: bool,
        /// Free-text feedback.
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Show overall and per-class evaluation statistics.
    Stats,
}

/// Config subcommand actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Create default configuration file.
    Init,
    /// Display current configuration.
    Show,
    /// Print configuration file path.
    Path,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_predict() {
        let cli = Cli::try_parse_from(["earshot", "predict", "clip.wav", "--cpu", "-q"]).unwrap();
        assert!(cli.global.quiet);
        match cli.command {
            Command::Predict(args) => {
                assert_eq!(args.input, PathBuf::from("clip.wav"));
                assert!(args.cpu);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_gpu_conflicts_with_cpu() {
        assert!(Cli::try_parse_from(["earshot", "predict", "a.wav", "--gpu", "--cpu"]).is_err());
    }

    #[test]
    fn test_cli_parse_nearby_with_negative_longitude() {
        let cli = Cli::try_parse_from([
            "earshot", "alerts", "nearby", "--lat", "40.7", "--lon", "-74.0", "-r", "2.5",
            "--class-ids", "1,3",
        ])
        .unwrap();
        match cli.command {
            Command::Alerts {
                action:
                    AlertsAction::Nearby {
                        lat,
                        lon,
                        radius,
                        class_ids,
                        ..
                    },
            } => {
                assert_eq!(lat, 40.7);
                assert_eq!(lon, -74.0);
                assert_eq!(radius, Some(2.5));
                assert_eq!(class_ids, Some(vec![1, 3]));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_out_of_range_values() {
        assert!(
            Cli::try_parse_from(["earshot", "alerts", "nearby", "--lat", "91", "--lon", "0"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from([
                "earshot", "alerts", "nearby", "--lat", "0", "--lon", "0", "-r", "0"
            ])
            .is_err()
        );
        assert!(Cli::try_parse_from(["earshot", "classes", "add", "siren", "-c", "1.5"]).is_err());
    }

    #[test]
    fn test_cli_evaluation_needs_verdict() {
        assert!(
            Cli::try_parse_from([
                "earshot", "evaluations", "add", "rec.wav", "--class", "siren", "-c", "0.9"
            ])
            .is_err()
        );
        assert!(
            Cli::try_parse_from([
                "earshot", "evaluations", "add", "rec.wav", "--class", "siren", "-c", "0.9",
                "--wrong"
            ])
            .is_ok()
        );
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "earshot", "classes", "list", "--db", "/tmp/x.db", "-vv", "--output-mode", "json",
        ])
        .unwrap();
        assert_eq!(cli.global.db, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(cli.global.verbose, 2);
        assert_eq!(cli.global.output_mode, OutputMode::Json);
    }

    #[test]
    fn test_cli_parse_config_subcommand() {
        assert!(Cli::try_parse_from(["earshot", "config", "show"]).is_ok());
    }
}
