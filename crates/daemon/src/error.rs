use std::path::PathBuf;
use thiserror::Error;

/// Typed failures that abort the boot sequence or reject operator input.
///
/// Per-file failures never surface here: they are logged by the job that hit
/// them and the file is skipped for the rest of the run.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("invalid time of day '{0}', expected HH:MM or HH:MM:SS")]
    InvalidTimeOfDay(String),

    #[error("working directory does not exist: {}", .0.display())]
    MissingWorkingDirectory(PathBuf),

    #[error(
        "found {count} leftover temporary output(s) in {} and deleting them is disabled; \
         stop the other encoder or remove them manually",
        dir.display()
    )]
    LeftoverTemporaryFiles { dir: PathBuf, count: usize },

    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}
