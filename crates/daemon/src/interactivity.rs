//! Operator commands: parsing, application to the orchestrator, and the two
//! sources they arrive from (stdin lines and a directory of JSON files).

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use crate::error::DaemonError;
use crate::orchestrator::Orchestrator;
use crate::progress::format_eta;

const COMMAND_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ForceAwake,
    ForceSleep,
    ClearForcedState,
    ScheduleStop,
    UnscheduleStop,
    QuitNow,
    IncrementWorkers,
    DecrementWorkers,
    Status,
    Help,
}

impl FromStr for Command {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "awake" | "wake" | "f1" => Ok(Command::ForceAwake),
            "sleep" | "f2" => Ok(Command::ForceSleep),
            "auto" | "clear" | "f3" => Ok(Command::ClearForcedState),
            "stop" | "f6" => Ok(Command::ScheduleStop),
            "unstop" | "f7" => Ok(Command::UnscheduleStop),
            "quit" | "exit" | "f8" => Ok(Command::QuitNow),
            "+" | "more" => Ok(Command::IncrementWorkers),
            "-" | "less" => Ok(Command::DecrementWorkers),
            "status" | "s" => Ok(Command::Status),
            "help" | "h" | "?" => Ok(Command::Help),
            _ => Err(DaemonError::UnknownCommand(s.trim().to_string())),
        }
    }
}

impl Command {
    /// Mutate orchestrator state for this command
    pub fn apply(self, orch: &Orchestrator) {
        match self {
            Command::ForceAwake => {
                info!("Forcing awakening");
                orch.force_activity(Some(true));
            }
            Command::ForceSleep => {
                info!("Forcing sleep");
                orch.force_activity(Some(false));
            }
            Command::ClearForcedState => {
                info!("Removing any forced state");
                orch.force_activity(None);
            }
            Command::ScheduleStop => {
                info!("Scheduling exit at next idle time");
                orch.schedule_stop(true);
            }
            Command::UnscheduleStop => {
                info!("Unscheduling exit");
                orch.schedule_stop(false);
            }
            Command::QuitNow => {
                info!("Exiting now...");
                orch.quit();
            }
            Command::IncrementWorkers => {
                let target = orch.increment_task_count();
                info!("➕ Concurrent tasks: {}", target);
            }
            Command::DecrementWorkers => {
                let target = orch.decrement_task_count();
                info!("➖ Concurrent tasks: {}", target);
            }
            Command::Status => log_status(orch),
            Command::Help => print_help(),
        }
    }
}

pub fn print_help() {
    info!("Commands (type and press enter):");
    info!("  awake  | f1   Force awake");
    info!("  sleep  | f2   Force sleep");
    info!("  auto   | f3   Restore scheduled state");
    info!("  stop   | f6   Schedule stop at next idle time");
    info!("  unstop | f7   Unschedule stop");
    info!("  quit   | f8   Exit now");
    info!("  + / -         Add or remove a concurrent task");
    info!("  status        Show running jobs");
}

fn log_status(orch: &Orchestrator) {
    let activity = orch.activity().state();
    let stats = orch.stats();
    info!(
        "📊 {} / {} task(s) running, active: {}, forced: {:?}, stop scheduled: {}, done: {}, failed: {}, skipped paths: {}",
        orch.count_tasks(),
        orch.target_task_count(),
        activity.is_active,
        activity.forced,
        orch.is_stop_scheduled(),
        stats.succeeded,
        stats.failed,
        orch.skip_set().len()
    );
    for job in orch.snapshots() {
        info!(
            "  Job {}: {:?} {:5.1}% {} {}",
            job.id,
            job.state,
            job.progress * 100.0,
            job.input.display(),
            job.eta.map(format_eta).unwrap_or_default()
        );
    }
}

/// Read one command per line from stdin until EOF or shutdown.
///
/// The blocking read lives on its own thread so an idle terminal never holds
/// the runtime open at exit.
pub fn spawn_stdin_listener(orch: Arc<Orchestrator>) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        let shutdown = orch.shutdown_token();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = rx.recv() => line,
            };

            match line {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match line.parse::<Command>() {
                    Ok(command) => command.apply(&orch),
                    Err(e) => warn!("{} (type 'help' for the list)", e),
                },
                None => {
                    debug!("Stdin closed, interactive commands disabled");
                    break;
                }
            }
        }
    })
}

/// Command file dropped by external tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandFile {
    pub action: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Apply every `*.json` command file in `command_dir`, deleting each one.
/// Returns how many commands were applied.
pub fn process_command_files(orch: &Orchestrator, command_dir: &Path) -> Result<usize> {
    if !command_dir.exists() {
        fs::create_dir_all(command_dir)
            .with_context(|| format!("Failed to create command directory: {}", command_dir.display()))?;
    }

    let mut paths: Vec<PathBuf> = match fs::read_dir(command_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect(),
        Err(e) => {
            debug!("Failed to read command directory {}: {}", command_dir.display(), e);
            return Ok(0);
        }
    };
    // File names usually carry the timestamp; keep submission order
    paths.sort();

    let mut processed_count = 0;
    for path in paths {
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read command file {}: {}", path.display(), e);
                continue;
            }
        };

        match serde_json::from_str::<CommandFile>(&content) {
            Ok(file) => match file.action.parse::<Command>() {
                Ok(command) => {
                    debug!("Command file {}: {:?}", path.display(), command);
                    command.apply(orch);
                    processed_count += 1;
                }
                Err(e) => warn!("Command file {}: {}", path.display(), e),
            },
            Err(e) => warn!("Failed to parse command file {}: {}", path.display(), e),
        }

        fs::remove_file(&path)
            .with_context(|| format!("Failed to delete processed command file: {}", path.display()))?;
    }

    if processed_count > 0 {
        info!("✅ Processed {} command file(s)", processed_count);
    }
    Ok(processed_count)
}

/// Poll `command_dir` until shutdown
pub fn spawn_command_dir_watcher(orch: Arc<Orchestrator>, command_dir: PathBuf) -> JoinHandle<()> {
    tokio::spawn(async move {
        let shutdown = orch.shutdown_token();
        info!("📂 Watching {} for command files", command_dir.display());
        loop {
            if let Err(e) = process_command_files(&orch, &command_dir) {
                warn!("Failed to process command files: {:#}", e);
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(COMMAND_POLL_INTERVAL) => {}
            }
        }
    })
}
