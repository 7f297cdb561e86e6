use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::NaiveTime;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use crate::activity::ActivityBounds;
use crate::error::DaemonError;

/// Configuration for the transcoding daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Root of the tree scanned for candidates
    pub working_dir: PathBuf,
    /// When set, outputs land in a mirror of the working tree rooted here
    pub destination_dir: Option<PathBuf>,
    /// Where partial outputs live while encoding (defaults to `<working_dir>/.ffdaemon-tmp`)
    pub temp_dir: Option<PathBuf>,
    /// Case-insensitive filename suffixes eligible for scanning
    pub allowed_inputs: Vec<String>,
    /// Extension of produced files
    pub output_extension: String,
    /// Codec name (as reported by ffprobe) considered compliant
    pub target_video_codec: String,
    /// ffmpeg encoder used to reach `target_video_codec`
    pub video_encoder: String,
    /// Arguments placed before `-i`
    pub base_input_args: String,
    /// Arguments placed before the output path
    pub base_output_args: String,
    /// Re-encode anything whose sample aspect ratio is not 1:1
    pub force_square_pixels: bool,
    /// Pick the audio encoder per stream from its channel layout
    pub smart_audio: bool,
    /// Keep only the first video stream
    pub keep_one_video_stream: bool,
    /// Delete the source once encoding succeeded
    pub remove_old_file: bool,
    /// Interrupt in-flight transcodes when the daemon exits
    pub kill_transcoder_on_exit: bool,
    /// Remove source directories left empty (only with `destination_dir`)
    pub delete_empty_directories: bool,
    /// Allow deleting leftover partial outputs at boot
    pub delete_temporary_files: bool,
    /// Capacity of the progress sample window used for ETA
    pub max_history_size: usize,
    /// Maximum characters of transcoder output kept per job
    pub max_console_buffer: usize,
    /// Sleep between idle poll cycles
    pub wait_time_secs: u64,
    /// Minimum interval between two progress log lines of one job
    pub progress_log_secs: u64,
    /// Daily wake-up time ("HH:MM" or "HH:MM:SS")
    pub start_at: Option<String>,
    /// Daily sleep time ("HH:MM" or "HH:MM:SS")
    pub stop_at: Option<String>,
    /// Shell command run after each wake-up
    pub after_start: Option<String>,
    /// Shell command run after each fall asleep
    pub after_stop: Option<String>,
    /// Initial number of concurrent jobs
    pub task_count: usize,
    /// Read operator commands from stdin
    pub interactive: bool,
    /// Directory polled for JSON command files
    pub command_dir: Option<PathBuf>,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Values bound from the command line; `None` keeps whatever the file or defaults said.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub working_dir: Option<PathBuf>,
    pub destination_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub output_extension: Option<String>,
    pub target_video_codec: Option<String>,
    pub video_encoder: Option<String>,
    pub base_input_args: Option<String>,
    pub base_output_args: Option<String>,
    pub force_square_pixels: Option<bool>,
    pub smart_audio: Option<bool>,
    pub keep_one_video_stream: Option<bool>,
    pub remove_old_file: Option<bool>,
    pub kill_transcoder_on_exit: Option<bool>,
    pub delete_empty_directories: Option<bool>,
    pub delete_temporary_files: Option<bool>,
    pub max_history_size: Option<usize>,
    pub max_console_buffer: Option<usize>,
    pub wait_time_secs: Option<u64>,
    pub start_at: Option<String>,
    pub stop_at: Option<String>,
    pub after_start: Option<String>,
    pub after_stop: Option<String>,
    pub task_count: Option<usize>,
    pub interactive: Option<bool>,
    pub command_dir: Option<PathBuf>,
}

impl TranscodeConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            destination_dir: None,
            temp_dir: None,
            allowed_inputs: [".mkv", ".avi", ".vp9", ".ts", ".mp4", ".webm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            output_extension: "mkv".to_string(),
            target_video_codec: "vp9".to_string(),
            video_encoder: "libvpx-vp9".to_string(),
            base_input_args: "-y -probesize 1000000000 -analyzeduration 100000000".to_string(),
            base_output_args: String::new(),
            force_square_pixels: true,
            smart_audio: true,
            keep_one_video_stream: true,
            remove_old_file: true,
            kill_transcoder_on_exit: true,
            delete_empty_directories: true,
            delete_temporary_files: true,
            max_history_size: 100,
            max_console_buffer: 25_000,
            wait_time_secs: 60,
            progress_log_secs: 30,
            start_at: None,
            stop_at: None,
            after_start: None,
            after_stop: None,
            task_count: 1,
            interactive: true,
            command_dir: None,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let Some(config_path) = path else {
            return Ok(Self::default_config());
        };

        if !config_path.exists() {
            warn!("Config file not found, using defaults: {}", config_path.display());
            return Ok(Self::default_config());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        // TOML by extension, JSON otherwise
        if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))
        }
    }

    /// Copy every value set on the command line over this configuration.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            working_dir,
            destination_dir,
            temp_dir,
            output_extension,
            target_video_codec,
            video_encoder,
            base_input_args,
            base_output_args,
            force_square_pixels,
            smart_audio,
            keep_one_video_stream,
            remove_old_file,
            kill_transcoder_on_exit,
            delete_empty_directories,
            delete_temporary_files,
            max_history_size,
            max_console_buffer,
            wait_time_secs,
            start_at,
            stop_at,
            after_start,
            after_stop,
            task_count,
            interactive,
            command_dir,
        } = overrides;

        if let Some(v) = working_dir { self.working_dir = v; }
        if let Some(v) = destination_dir { self.destination_dir = Some(v); }
        if let Some(v) = temp_dir { self.temp_dir = Some(v); }
        if let Some(v) = output_extension { self.output_extension = v; }
        if let Some(v) = target_video_codec { self.target_video_codec = v; }
        if let Some(v) = video_encoder { self.video_encoder = v; }
        if let Some(v) = base_input_args { self.base_input_args = v; }
        if let Some(v) = base_output_args { self.base_output_args = v; }
        if let Some(v) = force_square_pixels { self.force_square_pixels = v; }
        if let Some(v) = smart_audio { self.smart_audio = v; }
        if let Some(v) = keep_one_video_stream { self.keep_one_video_stream = v; }
        if let Some(v) = remove_old_file { self.remove_old_file = v; }
        if let Some(v) = kill_transcoder_on_exit { self.kill_transcoder_on_exit = v; }
        if let Some(v) = delete_empty_directories { self.delete_empty_directories = v; }
        if let Some(v) = delete_temporary_files { self.delete_temporary_files = v; }
        if let Some(v) = max_history_size { self.max_history_size = v; }
        if let Some(v) = max_console_buffer { self.max_console_buffer = v; }
        if let Some(v) = wait_time_secs { self.wait_time_secs = v; }
        if let Some(v) = start_at { self.start_at = Some(v); }
        if let Some(v) = stop_at { self.stop_at = Some(v); }
        if let Some(v) = after_start { self.after_start = Some(v); }
        if let Some(v) = after_stop { self.after_stop = Some(v); }
        if let Some(v) = task_count { self.task_count = v; }
        if let Some(v) = interactive { self.interactive = v; }
        if let Some(v) = command_dir { self.command_dir = Some(v); }
    }

    /// Check boot-time invariants and normalise bounded values.
    pub fn validate(&mut self) -> Result<()> {
        if !self.working_dir.is_dir() {
            return Err(DaemonError::MissingWorkingDirectory(self.working_dir.clone()).into());
        }
        if self.task_count == 0 {
            warn!("task_count must be at least 1, using 1");
            self.task_count = 1;
        }
        if self.max_history_size == 0 {
            warn!("max_history_size must be at least 1, using 1");
            self.max_history_size = 1;
        }
        self.activity_bounds()?;
        Ok(())
    }

    /// Daily activity window, `None` when either bound is missing (always active).
    pub fn activity_bounds(&self) -> Result<Option<ActivityBounds>, DaemonError> {
        match (self.start_at.as_deref(), self.stop_at.as_deref()) {
            (Some(start), Some(stop)) => Ok(Some(ActivityBounds::new(
                parse_time_of_day(start)?,
                parse_time_of_day(stop)?,
            ))),
            (None, None) => Ok(None),
            (start, stop) => {
                warn!(
                    "Only one activity bound configured (start: {:?}, stop: {:?}), staying always active",
                    start, stop
                );
                Ok(None)
            }
        }
    }

    /// Directory holding partial outputs
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.working_dir.join(".ffdaemon-tmp"))
    }

    pub fn wait_time(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.wait_time_secs)
    }

    /// Log the effective configuration once at boot
    pub fn log_summary(&self) {
        info!("Configuration loaded:");
        info!("  Working directory: {}", self.working_dir.display());
        info!("  Destination directory: {}", display_opt_path(self.destination_dir.as_deref()));
        info!("  Temporary directory: {}", self.temp_dir().display());
        info!("  Allowed inputs: {}", self.allowed_inputs.join(","));
        info!("  Output extension: {}", self.output_extension);
        info!("  Targeted video codec: {} (encoder {})", self.target_video_codec, self.video_encoder);
        info!("  Base input arguments: {}", self.base_input_args);
        info!("  Base output arguments: {}", self.base_output_args);
        info!("  Force square pixels: {}", self.force_square_pixels);
        info!("  Smart audio encoding: {}", self.smart_audio);
        info!("  Keep only one video stream: {}", self.keep_one_video_stream);
        info!("  Remove old file: {}", self.remove_old_file);
        info!("  Kill transcoder on exit: {}", self.kill_transcoder_on_exit);
        info!("  Delete empty directories: {}", self.delete_empty_directories);
        info!("  Delete temporary files at start: {}", self.delete_temporary_files);
        info!("  History max size: {}", self.max_history_size);
        info!("  Console buffer max size: {}", self.max_console_buffer);
        info!("  Idle time: {}s", self.wait_time_secs);
        info!("  Start time: {}", self.start_at.as_deref().unwrap_or("-"));
        info!("  Stop time: {}", self.stop_at.as_deref().unwrap_or("-"));
        info!("  Concurrent tasks: {}", self.task_count);
    }
}

fn display_opt_path(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Parse "HH:MM" or "HH:MM:SS" into a time of day
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, DaemonError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| DaemonError::InvalidTimeOfDay(value.to_string()))
}
