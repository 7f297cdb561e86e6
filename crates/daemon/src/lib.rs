pub mod activity;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod ffprobe;
pub mod fsops;
pub mod interactivity;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod scan;
pub mod selection;
pub mod skip;
pub mod transcoder;

pub use activity::{ActivityBounds, ActivityWindow};
pub use config::{ConfigOverrides, TranscodeConfig};
pub use error::DaemonError;
pub use ffmpeg::FfmpegTranscoder;
pub use interactivity::Command;
pub use job::{EncodingJob, JobSnapshot, JobState};
pub use orchestrator::{Frame, JobStats, Orchestrator};
pub use progress::{ProgressEstimator, ProgressReport};
pub use scan::{Candidate, CandidateScanner};
pub use skip::SkipSet;
pub use transcoder::{EncodeEvent, EncodeOutcome, EncodeRequest, MediaInfo, Transcoder};
