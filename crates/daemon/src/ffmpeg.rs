use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use crate::config::TranscodeConfig;
use crate::ffprobe;
use crate::transcoder::{EncodeEvent, EncodeOutcome, EncodeRequest, MediaInfo, Transcoder};

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// Parse version from the first line of `ffmpeg -version`
    /// Example: "ffmpeg version 6.1.1-3ubuntu5" -> 6.1.1
    pub fn parse(version_str: &str) -> Result<Self> {
        let version_part = version_str
            .split_whitespace()
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        // Drop distro suffixes such as "-3ubuntu5"
        let numeric = version_part.split(|c: char| c != '.' && !c.is_ascii_digit()).next().unwrap_or("");
        let mut parts = numeric.split('.').filter(|p| !p.is_empty());

        let major = parts
            .next()
            .ok_or_else(|| anyhow!("Invalid version format: {}", version_str))?
            .parse::<u32>()
            .with_context(|| format!("Failed to parse major version from: {}", version_str))?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

        Ok(FFmpegVersion { major, minor, patch })
    }
}

impl std::fmt::Display for FFmpegVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// `Transcoder` backed by local ffmpeg/ffprobe binaries
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    /// Build from configuration and check that ffmpeg actually runs
    pub async fn from_config(cfg: &TranscodeConfig) -> Result<Self> {
        let transcoder = Self::new(&cfg.ffmpeg_bin, &cfg.ffprobe_bin);
        let banner = transcoder.version_banner().await?;
        match FFmpegVersion::parse(&banner) {
            Ok(version) => info!("🎬 Using ffmpeg {} at {}", version, transcoder.ffmpeg_bin.display()),
            // Git builds report e.g. "N-113000-gabcdef"
            Err(_) => info!("🎬 Using {}", banner),
        }
        Ok(transcoder)
    }

    /// First line of `ffmpeg -version`
    pub async fn version_banner(&self) -> Result<String> {
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .output()
            .await
            .with_context(|| format!("Failed to execute FFmpeg at: {}", self.ffmpeg_bin.display()))?;

        if !output.status.success() {
            return Err(anyhow!("FFmpeg version check failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .next()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Empty output from FFmpeg -version"))
    }
}

/// Full ffmpeg argument list for a request; progress goes to stdout as key=value lines
pub fn build_encode_args(request: &EncodeRequest) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-nostats", "-progress", "pipe:1"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    args.extend(request.input_args.split_whitespace().map(str::to_string));
    args.push("-i".to_string());
    args.push(request.input.to_string_lossy().to_string());
    args.extend(request.output_args.split_whitespace().map(str::to_string));
    args.push(request.output.to_string_lossy().to_string());
    args
}

/// Encoded media time from a `-progress` line (`out_time_us=` or `out_time=`)
pub fn parse_progress_line(line: &str) -> Option<Duration> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // out_time_ms is microseconds as well
        "out_time_us" | "out_time_ms" => value.parse::<u64>().ok().map(Duration::from_micros),
        "out_time" => parse_timestamp(value),
        _ => None,
    }
}

/// "HH:MM:SS.micro" -> Duration
fn parse_timestamp(value: &str) -> Option<Duration> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    let base = Duration::from_secs(hours * 3600 + minutes * 60);
    Some(base + Duration::try_from_secs_f64(seconds).ok()?)
}

fn is_progress_key(line: &str) -> bool {
    matches!(
        line.split_once('=').map(|(k, _)| k),
        Some(
            "frame" | "fps" | "bitrate" | "total_size" | "out_time_us" | "out_time_ms" | "out_time"
                | "dup_frames" | "drop_frames" | "speed" | "progress"
        )
    ) || line.starts_with("stream_")
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        if !path.exists() {
            return Err(anyhow!("File does not exist: {}", path.display()));
        }

        debug!("Executing FFprobe for: {}", path.display());

        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path)
            .output()
            .await
            .with_context(|| format!(
                "Failed to execute FFprobe for: {}. Ensure FFprobe is installed and accessible at: {}",
                path.display(),
                self.ffprobe_bin.display()
            ))?;

        if !output.status.success() {
            return Err(anyhow!(
                "FFprobe failed (exit code {}) for {}:\nSTDERR: {}",
                output.status.code().unwrap_or(-1),
                path.display(),
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let json_str = String::from_utf8(output.stdout).context("FFprobe output is not valid UTF-8")?;
        ffprobe::parse_probe_output(&json_str)
            .with_context(|| format!("Failed to analyse {}", path.display()))
    }

    async fn encode(
        &self,
        request: &EncodeRequest,
        on_event: &(dyn Fn(EncodeEvent) + Send + Sync),
        cancel: CancellationToken,
    ) -> Result<EncodeOutcome> {
        let args = build_encode_args(request);
        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!(
                "Failed to spawn FFmpeg process at: {}. Ensure FFmpeg is installed and accessible.",
                self.ffmpeg_bin.display()
            ))?;

        let stdout = child.stdout.take().ok_or_else(|| anyhow!("Failed to capture FFmpeg stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| anyhow!("Failed to capture FFmpeg stderr"))?;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let (mut stdout_open, mut stderr_open) = (true, true);

        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Cancelling FFmpeg for {}", request.input.display());
                    child.kill().await.context("Failed to kill FFmpeg process")?;
                    return Ok(EncodeOutcome::Cancelled);
                }
                line = stdout_lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => match parse_progress_line(&line) {
                        Some(encoded) => on_event(EncodeEvent::Progress(encoded)),
                        None if is_progress_key(&line) => {}
                        None => on_event(EncodeEvent::Output(line)),
                    },
                    _ => stdout_open = false,
                },
                line = stderr_lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => on_event(EncodeEvent::Error(line)),
                    _ => stderr_open = false,
                },
                status = child.wait(), if !stdout_open && !stderr_open => {
                    break status.context("Failed to wait for FFmpeg process")?;
                }
            }
        };

        if status.success() {
            Ok(EncodeOutcome::Completed)
        } else {
            Ok(EncodeOutcome::Failed(status.code()))
        }
    }
}
