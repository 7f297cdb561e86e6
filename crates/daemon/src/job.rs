use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::{bail, Context, Result};
use humansize::{format_size, DECIMAL};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use crate::config::TranscodeConfig;
use crate::fsops;
use crate::progress::{format_eta, ProgressEstimator, ProgressReport};
use crate::selection::{should_encode, JobArguments, Selection};
use crate::transcoder::{EncodeEvent, EncodeOutcome, EncodeRequest, Transcoder};

/// Lifecycle of one file's transcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Accepted by selection, transcode not started yet
    Selecting,
    Encoding,
    Finalizing,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

/// Point-in-time view of a job for status output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub input: PathBuf,
    pub state: JobState,
    pub progress: f64,
    pub eta: Option<Duration>,
}

struct JobControl {
    state: JobState,
    // Only registered while Encoding
    cancel: Option<CancellationToken>,
}

struct JobProgress {
    estimator: ProgressEstimator,
    last: Option<ProgressReport>,
    last_logged: Option<Instant>,
    console: String,
}

/// One accepted candidate being encoded into a temporary output and then
/// moved into place.
pub struct EncodingJob {
    id: Uuid,
    input: PathBuf,
    output: PathBuf,
    arguments: JobArguments,
    config: Arc<TranscodeConfig>,
    control: Mutex<JobControl>,
    progress: Mutex<JobProgress>,
}

impl EncodingJob {
    pub fn new(config: Arc<TranscodeConfig>, input: PathBuf, selection: Selection) -> Self {
        let output = fsops::partial_output_path(&config.temp_dir(), &config.output_extension);
        let estimator = ProgressEstimator::new(selection.media.duration, config.max_history_size);
        Self {
            id: Uuid::new_v4(),
            input,
            output,
            arguments: selection.arguments,
            config,
            control: Mutex::new(JobControl { state: JobState::Selecting, cancel: None }),
            progress: Mutex::new(JobProgress {
                estimator,
                last: None,
                last_logged: None,
                console: String::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Temporary output the transcoder writes to
    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn state(&self) -> JobState {
        self.control.lock().state
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state();
        let progress = self.progress.lock();
        JobSnapshot {
            id: self.id,
            input: self.input.clone(),
            state,
            progress: progress.last.map(|r| r.relative).unwrap_or(0.0),
            eta: progress.last.and_then(|r| r.eta),
        }
    }

    /// Captured transcoder output (bounded)
    pub fn console(&self) -> String {
        self.progress.lock().console.clone()
    }

    /// Cancel the running transcode; no-op outside of Encoding
    pub fn interrupt_if_needed(&self) -> bool {
        let control = self.control.lock();
        match (&control.state, &control.cancel) {
            (JobState::Encoding, Some(token)) => {
                info!("Job {}: ⏹️  Interrupting transcode of {}", self.id, self.input.display());
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Drive the job to a terminal state. Never returns an error: every
    /// failure is logged and ends in `JobState::Failed`.
    pub async fn run(&self, transcoder: &dyn Transcoder, shutdown: &CancellationToken) -> JobState {
        if let Err(e) = fsops::free_destination(&self.config, &self.input) {
            error!("Job {}: ❌ Not converting {}: {:#}", self.id, self.input.display(), e);
            return self.set_state(JobState::Failed);
        }

        let token = CancellationToken::new();
        {
            let mut control = self.control.lock();
            if shutdown.is_cancelled() {
                debug!("Job {}: Shutdown requested before encoding {}", self.id, self.input.display());
                control.state = JobState::Failed;
                return JobState::Failed;
            }
            control.state = JobState::Encoding;
            control.cancel = Some(token.clone());
        }

        info!("Job {}: 🎬 Converting {}", self.id, self.input.display());

        let request = EncodeRequest {
            input: self.input.clone(),
            output: self.output.clone(),
            input_args: self.arguments.input_args.clone(),
            output_args: self.arguments.output_args.clone(),
        };
        debug!("Job {}: Input arguments: {}", self.id, request.input_args);
        debug!("Job {}: Output arguments: {}", self.id, request.output_args);

        let on_event = |event: EncodeEvent| self.handle_event(event);
        let outcome = transcoder.encode(&request, &on_event, token).await;
        self.control.lock().cancel = None;

        match outcome {
            Ok(EncodeOutcome::Completed) => {}
            Ok(EncodeOutcome::Cancelled) => {
                warn!("Job {}: Transcode of {} cancelled", self.id, self.input.display());
                return self.fail();
            }
            Ok(EncodeOutcome::Failed(code)) => {
                error!(
                    "Job {}: ❌ Encoding failed for {} (exit code {})",
                    self.id,
                    self.input.display(),
                    code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string())
                );
                debug!("Job {}: Transcoder output:\n{}", self.id, self.console());
                return self.fail();
            }
            Err(e) => {
                error!("Job {}: ❌ Encoding failed for {}: {:#}", self.id, self.input.display(), e);
                return self.fail();
            }
        }

        self.set_state(JobState::Finalizing);
        match self.finalize(transcoder).await {
            Ok(()) => self.set_state(JobState::Done),
            Err(e) => {
                error!("Job {}: ❌ Finalization failed for {}: {:#}", self.id, self.input.display(), e);
                if self.input.exists() {
                    return self.fail();
                }
                warn!("Job {}: Source is gone, keeping encoded output at {}", self.id, self.output.display());
                self.set_state(JobState::Failed)
            }
        }
    }

    fn set_state(&self, state: JobState) -> JobState {
        self.control.lock().state = state;
        state
    }

    fn fail(&self) -> JobState {
        self.discard_partial_output();
        self.set_state(JobState::Failed)
    }

    fn discard_partial_output(&self) {
        if !self.output.exists() {
            return;
        }
        match std::fs::remove_file(&self.output) {
            Ok(()) => info!("Job {}: 🗑️  Deleted partial output: {}", self.id, self.output.display()),
            Err(e) => warn!("Job {}: Failed to delete partial output {}: {}", self.id, self.output.display(), e),
        }
    }

    fn handle_event(&self, event: EncodeEvent) {
        match event {
            EncodeEvent::Progress(encoded) => self.record_progress(encoded),
            EncodeEvent::Output(line) | EncodeEvent::Error(line) => {
                let mut progress = self.progress.lock();
                if progress.console.len() < self.config.max_console_buffer {
                    progress.console.push_str(&line);
                    progress.console.push('\n');
                }
            }
        }
    }

    fn record_progress(&self, encoded: Duration) {
        let now = Instant::now();
        let interval = Duration::from_secs(self.config.progress_log_secs);
        let report = {
            let mut progress = self.progress.lock();
            let report = progress.estimator.record_at(now, encoded);
            progress.last = Some(report);
            let due = progress
                .last_logged
                .map(|t| now.duration_since(t) >= interval)
                .unwrap_or(true);
            if !due {
                return;
            }
            progress.last_logged = Some(now);
            report
        };

        let relative = self
            .input
            .strip_prefix(&self.config.working_dir)
            .unwrap_or(&self.input);
        match report.eta {
            Some(eta) => info!(
                "Job {}: ⏳ {:5.1}% {}, {} left",
                self.id,
                report.relative * 100.0,
                relative.display(),
                format_eta(eta)
            ),
            None => info!("Job {}: ⏳ {:5.1}% {}", self.id, report.relative * 100.0, relative.display()),
        }
    }

    async fn finalize(&self, transcoder: &dyn Transcoder) -> Result<()> {
        let cfg = &self.config;

        match transcoder.probe(&self.output).await {
            Ok(media) if should_encode(&media, cfg) => warn!(
                "Job {}: ⚠️  Analysis of {} still marks it as non-encoded",
                self.id,
                self.output.display()
            ),
            Ok(_) => {}
            Err(e) => warn!("Job {}: Cannot analyse output {}: {:#}", self.id, self.output.display(), e),
        }

        let destination = fsops::free_destination(cfg, &self.input)?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create destination directory: {}", parent.display()))?;
        }

        let original_size = fsops::file_size(&self.input);
        let new_size = fsops::file_size(&self.output);

        if cfg.remove_old_file {
            std::fs::remove_file(&self.input)
                .with_context(|| format!("Failed to remove source: {}", self.input.display()))?;
        }
        fsops::move_file(&self.output, &destination)?;
        if !destination.exists() {
            bail!("Move failed, cannot find any file at {}", destination.display());
        }

        if cfg.delete_empty_directories && cfg.destination_dir.is_some() {
            if let Some(dir) = self.input.parent().filter(|d| *d != cfg.working_dir.as_path()) {
                match fsops::remove_dir_if_empty(dir) {
                    Ok(true) => info!("Job {}: 🗑️  Removed empty directory {}", self.id, dir.display()),
                    Ok(false) => {}
                    Err(e) => warn!("Job {}: {:#}", self.id, e),
                }
            }
        }

        info!(
            "Job {}: ✅ File replaced successfully: {} ({} -> {})",
            self.id,
            destination.display(),
            format_size(original_size, DECIMAL),
            format_size(new_size, DECIMAL)
        );
        Ok(())
    }
}

impl std::fmt::Debug for EncodingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingJob")
            .field("id", &self.id)
            .field("input", &self.input)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::build_arguments;
    use crate::transcoder::testing::{media, ScriptedTranscoder};
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        cfg: Arc<TranscodeConfig>,
        input: PathBuf,
    }

    fn fixture(edit: impl FnOnce(&mut TranscodeConfig)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = TranscodeConfig {
            working_dir: dir.path().join("library"),
            progress_log_secs: 0,
            ..Default::default()
        };
        edit(&mut cfg);
        fs::create_dir_all(cfg.temp_dir()).unwrap();
        let input = cfg.working_dir.join("shows/ep1.avi");
        fs::create_dir_all(input.parent().unwrap()).unwrap();
        fs::write(&input, b"original source").unwrap();
        Fixture { _dir: dir, cfg: Arc::new(cfg), input }
    }

    fn job(f: &Fixture) -> Arc<EncodingJob> {
        let info = media("h264");
        let arguments = build_arguments(&info, &f.cfg);
        Arc::new(EncodingJob::new(f.cfg.clone(), f.input.clone(), Selection { media: info, arguments }))
    }

    #[tokio::test]
    async fn test_success_replaces_source() {
        let f = fixture(|_| {});
        let transcoder = ScriptedTranscoder::new();
        let job = job(&f);
        assert_eq!(job.state(), JobState::Selecting);
        assert!(!job.interrupt_if_needed());

        let state = job.run(&transcoder, &CancellationToken::new()).await;
        assert_eq!(state, JobState::Done);
        assert!(!f.input.exists());
        let dest = f.cfg.working_dir.join("shows/ep1.mkv");
        assert_eq!(fs::read(&dest).unwrap(), b"encoded output");
        assert!(!job.output().exists());

        let snapshot = job.snapshot();
        assert_eq!(snapshot.state, JobState::Done);
        assert!((snapshot.progress - 0.5).abs() < 1e-9);
        assert_eq!(snapshot.eta, None);
        assert!(job.console().contains("frame="));
    }

    #[tokio::test]
    async fn test_destination_tree_and_empty_dir_cleanup() {
        let f = fixture(|cfg| cfg.destination_dir = Some(cfg.working_dir.with_file_name("out")));
        let transcoder = ScriptedTranscoder::new();

        assert_eq!(job(&f).run(&transcoder, &CancellationToken::new()).await, JobState::Done);
        let dest = f.cfg.destination_dir.clone().unwrap().join("shows/ep1.mkv");
        assert!(dest.exists());
        assert!(!f.input.parent().unwrap().exists());
        assert!(f.cfg.working_dir.exists());
    }

    #[tokio::test]
    async fn test_encode_failure_discards_partial_output() {
        let f = fixture(|_| {});
        let transcoder = ScriptedTranscoder::new();
        transcoder.fail_encode(&f.input);
        let job = job(&f);

        assert_eq!(job.run(&transcoder, &CancellationToken::new()).await, JobState::Failed);
        assert!(f.input.exists());
        assert!(!job.output().exists());
    }

    #[tokio::test]
    async fn test_interrupt_while_encoding() {
        let f = fixture(|_| {});
        let transcoder = Arc::new(ScriptedTranscoder::holding());
        let job = job(&f);

        let handle = tokio::spawn({
            let job = job.clone();
            let transcoder = transcoder.clone();
            async move { job.run(transcoder.as_ref(), &CancellationToken::new()).await }
        });

        while job.state() != JobState::Encoding || !job.output().exists() {
            tokio::task::yield_now().await;
        }
        assert!(job.interrupt_if_needed());

        assert_eq!(handle.await.unwrap(), JobState::Failed);
        assert!(!job.output().exists());
        assert!(f.input.exists());
        assert!(!job.interrupt_if_needed());
    }

    #[tokio::test]
    async fn test_shutdown_before_encoding_never_starts() {
        let f = fixture(|_| {});
        let transcoder = ScriptedTranscoder::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert_eq!(job(&f).run(&transcoder, &shutdown).await, JobState::Failed);
        assert!(transcoder.encodes().is_empty());
    }

    #[tokio::test]
    async fn test_existing_destination_fails_without_losing_source() {
        let f = fixture(|cfg| cfg.remove_old_file = false);
        let dest = f.cfg.working_dir.join("shows/ep1.mkv");
        fs::write(&dest, b"someone else's file").unwrap();
        let transcoder = ScriptedTranscoder::new();
        let job = job(&f);

        assert_eq!(job.run(&transcoder, &CancellationToken::new()).await, JobState::Failed);
        assert_eq!(fs::read(&dest).unwrap(), b"someone else's file");
        assert!(f.input.exists());
        assert!(!job.output().exists());
    }

    #[tokio::test]
    async fn test_existing_sibling_keeps_source_when_removal_enabled() {
        let f = fixture(|_| {});
        assert!(f.cfg.remove_old_file);
        let dest = f.cfg.working_dir.join("shows/ep1.mkv");
        fs::write(&dest, b"someone else's file").unwrap();
        let transcoder = ScriptedTranscoder::new();
        let job = job(&f);

        assert_eq!(job.run(&transcoder, &CancellationToken::new()).await, JobState::Failed);
        assert_eq!(fs::read(&f.input).unwrap(), b"original source");
        assert_eq!(fs::read(&dest).unwrap(), b"someone else's file");
        assert!(transcoder.encodes().is_empty());
    }

    #[tokio::test]
    async fn test_collision_in_destination_tree_keeps_both_files() {
        let f = fixture(|cfg| cfg.destination_dir = Some(cfg.working_dir.with_file_name("out")));
        let mirrored = f.cfg.destination_dir.clone().unwrap().join("shows/ep1.mkv");
        fs::create_dir_all(mirrored.parent().unwrap()).unwrap();
        fs::write(&mirrored, b"earlier encode").unwrap();
        let transcoder = ScriptedTranscoder::new();
        let job = job(&f);

        assert_eq!(job.run(&transcoder, &CancellationToken::new()).await, JobState::Failed);
        assert_eq!(fs::read(&f.input).unwrap(), b"original source");
        assert_eq!(fs::read(&mirrored).unwrap(), b"earlier encode");
        assert!(transcoder.encodes().is_empty());
    }

    #[tokio::test]
    async fn test_collision_appearing_during_encode_keeps_source() {
        let f = fixture(|_| {});
        let transcoder = Arc::new(ScriptedTranscoder::holding());
        let job = job(&f);

        let handle = tokio::spawn({
            let job = job.clone();
            let transcoder = transcoder.clone();
            async move { job.run(transcoder.as_ref(), &CancellationToken::new()).await }
        });
        while transcoder.encodes().is_empty() {
            tokio::task::yield_now().await;
        }
        let dest = f.cfg.working_dir.join("shows/ep1.mkv");
        fs::write(&dest, b"late arrival").unwrap();
        transcoder.release(&f.input);

        assert_eq!(handle.await.unwrap(), JobState::Failed);
        assert_eq!(fs::read(&f.input).unwrap(), b"original source");
        assert_eq!(fs::read(&dest).unwrap(), b"late arrival");
        assert!(!job.output().exists());
    }

    #[tokio::test]
    async fn test_same_extension_replaced_in_place() {
        let f = fixture(|_| {});
        let input = f.cfg.working_dir.join("shows/ep2.mkv");
        fs::write(&input, b"old encode").unwrap();
        let info = media("h264");
        let arguments = build_arguments(&info, &f.cfg);
        let job = EncodingJob::new(f.cfg.clone(), input.clone(), Selection { media: info, arguments });
        let transcoder = ScriptedTranscoder::new();

        assert_eq!(job.run(&transcoder, &CancellationToken::new()).await, JobState::Done);
        assert_eq!(fs::read(&input).unwrap(), b"encoded output");
    }

    #[test]
    fn test_console_buffer_is_bounded() {
        let f = fixture(|cfg| cfg.max_console_buffer = 10);
        let job = job(&f);
        for _ in 0..5 {
            job.handle_event(EncodeEvent::Error("0123456789".to_string()));
        }
        assert_eq!(job.console(), "0123456789\n");
    }
}
