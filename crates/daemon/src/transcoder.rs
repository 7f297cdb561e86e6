use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A `num:den` ratio as reported by ffprobe ("16:9", "1:1", "0:1")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ratio {
    pub num: u32,
    pub den: u32,
}

impl Ratio {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (num, den) = value.split_once(':')?;
        Some(Self::new(num.trim().parse().ok()?, den.trim().parse().ok()?))
    }

    /// "0:0" / "0:1" mean the container carries no ratio
    pub fn is_unset(&self) -> bool {
        self.num == 0
    }

    pub fn is_square(&self) -> bool {
        self.num == 1 && self.den == 1
    }
}

impl std::fmt::Display for Ratio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.num, self.den)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStream {
    pub index: u32,
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: Ratio,
    pub display_aspect_ratio: Ratio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStream {
    pub index: u32,
    pub codec_name: String,
    pub channel_layout: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleStream {
    pub index: u32,
    pub codec_name: String,
}

/// What the transcoder knows about a media file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaInfo {
    pub duration: Duration,
    pub video_streams: Vec<VideoStream>,
    pub audio_streams: Vec<AudioStream>,
    pub subtitle_streams: Vec<SubtitleStream>,
}

impl MediaInfo {
    pub fn primary_video(&self) -> Option<&VideoStream> {
        self.video_streams.first()
    }
}

/// One transcoder invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub input_args: String,
    pub output_args: String,
}

/// Streamed while a transcode runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeEvent {
    /// Media time encoded so far
    Progress(Duration),
    Output(String),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    Completed,
    /// Process exited unsuccessfully (exit code when known)
    Failed(Option<i32>),
    Cancelled,
}

impl EncodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, EncodeOutcome::Completed)
    }
}

/// External media engine: probing and running transcodes.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Analyse a file; errors mean "unreadable or corrupt"
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Run one transcode to completion, failure, or cancellation through `cancel`
    async fn encode(
        &self,
        request: &EncodeRequest,
        on_event: &(dyn Fn(EncodeEvent) + Send + Sync),
        cancel: CancellationToken,
    ) -> Result<EncodeOutcome>;
}
