use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use daemon::{
    config::{ConfigOverrides, TranscodeConfig},
    fsops, interactivity,
    FfmpegTranscoder, Orchestrator,
};
use log::{info, warn};

/// Unattended transcoding daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory tree to scan
    #[arg(short = 'd', long)]
    directory: Option<PathBuf>,

    /// Mirror outputs into this directory instead of replacing in place
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for in-progress outputs
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Number of concurrent transcodes
    #[arg(short = 't', long)]
    tasks: Option<usize>,

    /// Daily start time (HH:MM)
    #[arg(long)]
    start_at: Option<String>,

    /// Daily stop time (HH:MM)
    #[arg(long)]
    stop_at: Option<String>,

    /// Shell command run after waking up
    #[arg(long)]
    after_start: Option<String>,

    /// Shell command run after falling asleep
    #[arg(long)]
    after_stop: Option<String>,

    /// Extension of produced files
    #[arg(long)]
    output_extension: Option<String>,

    /// Seconds to wait between idle poll cycles
    #[arg(long)]
    wait_time: Option<u64>,

    /// Keep source files after a successful encode
    #[arg(long)]
    keep_source: bool,

    /// Let running transcodes finish after the daemon exits
    #[arg(long)]
    no_kill_on_exit: bool,

    /// Refuse to start when leftover temporary outputs exist
    #[arg(long)]
    keep_temporary_files: bool,

    /// Do not read commands from stdin
    #[arg(long)]
    no_interactive: bool,

    /// Directory polled for JSON command files
    #[arg(long)]
    command_dir: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            working_dir: self.directory.clone(),
            destination_dir: self.output.clone(),
            temp_dir: self.temp_dir.clone(),
            output_extension: self.output_extension.clone(),
            task_count: self.tasks,
            start_at: self.start_at.clone(),
            stop_at: self.stop_at.clone(),
            after_start: self.after_start.clone(),
            after_stop: self.after_stop.clone(),
            wait_time_secs: self.wait_time,
            remove_old_file: self.keep_source.then_some(false),
            kill_transcoder_on_exit: self.no_kill_on_exit.then_some(false),
            delete_temporary_files: self.keep_temporary_files.then_some(false),
            interactive: self.no_interactive.then_some(false),
            command_dir: self.command_dir.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    info!("FFDaemon {} starting", env!("CARGO_PKG_VERSION"));

    let mut cfg = TranscodeConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    cfg.apply_overrides(args.overrides());
    cfg.validate().context("Invalid configuration")?;
    cfg.log_summary();

    fsops::prepare_destination(&cfg)?;
    let cleaned_count = fsops::prepare_temp_dir(&cfg)
        .context("Failed to prepare temporary directory")?;
    if cleaned_count > 0 {
        info!("✅ Cleaned up {} leftover temporary output(s)", cleaned_count);
    }

    let transcoder = FfmpegTranscoder::from_config(&cfg)
        .await
        .context("FFmpeg is not usable")?;

    let kill_on_exit = cfg.kill_transcoder_on_exit;
    let interactive = cfg.interactive;
    let command_dir = cfg.command_dir.clone();
    let orch = Orchestrator::new(cfg, Arc::new(transcoder))?;

    // Start asleep when booted outside the activity window
    orch.activity().disable_if_needed();

    if interactive {
        interactivity::print_help();
        interactivity::spawn_stdin_listener(orch.clone());
    }
    if let Some(dir) = command_dir {
        interactivity::spawn_command_dir_watcher(orch.clone(), dir);
    }

    tokio::spawn({
        let orch = orch.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received");
                orch.quit();
            }
        }
    });

    orch.clone().run().await;

    let running = orch.count_tasks();
    if running > 0 {
        if kill_on_exit {
            info!("⏹️  Interrupting {} running transcode(s)", running);
            orch.interrupt_all();
            orch.wait_for_jobs().await;
        } else {
            warn!("Leaving {} transcode(s) running", running);
        }
    }

    info!("FFDaemon stopped");
    Ok(())
}
