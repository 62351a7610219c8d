//! CLI argument parsing and command handling.

mod args;
mod commands;
mod validators;

pub use args::{
    AlertsAction, ClassesAction, Cli, Command, ConfigAction, EvaluationsAction, GlobalArgs,
    OutputMode, PredictArgs, PredictionsAction, TrainArgs,
};
pub use commands::handle_command;
