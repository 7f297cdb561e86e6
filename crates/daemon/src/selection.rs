use log::{debug, error, warn};
use crate::config::TranscodeConfig;
use crate::fsops;
use crate::scan::Candidate;
use crate::transcoder::{MediaInfo, Transcoder};

/// Subtitle codecs re-encoded to WebVTT instead of copied
const TEXT_SUBTITLE_CODECS: [&str; 3] = ["dvb_teletext", "ass", "mov_text"];

/// Extra ffmpeg arguments computed for one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobArguments {
    pub input_args: String,
    pub output_args: String,
}

/// An accepted candidate: its analysis and how to encode it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub media: MediaInfo,
    pub arguments: JobArguments,
}

/// Probe a candidate and decide whether it needs encoding.
///
/// Runs at most once per path per process lifetime (the caller claimed it).
pub async fn select_candidate(
    transcoder: &dyn Transcoder,
    cfg: &TranscodeConfig,
    candidate: &Candidate,
) -> Option<Selection> {
    if !candidate.path.exists() {
        debug!("Candidate vanished before analysis: {}", candidate.path.display());
        return None;
    }

    if let Err(e) = fsops::free_destination(cfg, &candidate.path) {
        warn!("⚠️  Skipping {}: {:#}", candidate.path.display(), e);
        return None;
    }

    let media = match transcoder.probe(&candidate.path).await {
        Ok(media) => media,
        Err(e) => {
            error!("❌ Cannot analyse {}: {:#}", candidate.path.display(), e);
            return None;
        }
    };

    if !should_encode(&media, cfg) {
        debug!("Already compliant: {}", candidate.path.display());
        return None;
    }

    let arguments = build_arguments(&media, cfg);
    Some(Selection { media, arguments })
}

/// Whether a probed file still needs a transcode
pub fn should_encode(media: &MediaInfo, cfg: &TranscodeConfig) -> bool {
    let Some(video) = media.primary_video() else {
        return false;
    };

    if cfg.keep_one_video_stream && media.video_streams.len() > 1 {
        debug!("Marked as non-encoded: found multiple video streams ({})", media.video_streams.len());
        return true;
    }

    if video.codec_name != cfg.target_video_codec {
        debug!("Marked as non-encoded: bad video codec found ({})", video.codec_name);
        return true;
    }

    if cfg.force_square_pixels && is_bad_aspect_ratio(media) {
        debug!("Marked as non-encoded: bad SAR found ({})", video.sample_aspect_ratio);
        return true;
    }

    false
}

/// Non-square sample aspect ratio on the primary video stream; an unset SAR is fine
pub fn is_bad_aspect_ratio(media: &MediaInfo) -> bool {
    match media.primary_video() {
        Some(video) => {
            let sar = video.sample_aspect_ratio;
            !sar.is_unset() && !sar.is_square()
        }
        None => false,
    }
}

/// Input/output arguments for a file that `should_encode` accepted
pub fn build_arguments(media: &MediaInfo, cfg: &TranscodeConfig) -> JobArguments {
    let mut input: Vec<String> = vec![cfg.base_input_args.clone()];
    let mut output: Vec<String> = vec![cfg.base_output_args.clone()];

    if cfg.keep_one_video_stream {
        output.push(format!("-map 0:v:0 -c:v {}", cfg.video_encoder));
    } else {
        output.push(format!("-map 0:v -c:v {}", cfg.video_encoder));
    }

    if cfg.force_square_pixels && is_bad_aspect_ratio(media) {
        if let Some(video) = media.primary_video() {
            let sar = video.sample_aspect_ratio;
            if sar.den != 0 {
                let width = (video.width as u64 * sar.num as u64 / sar.den as u64) as u32;
                output.push(format!(
                    "-vf scale={}:{} -aspect {}",
                    width, video.height, video.display_aspect_ratio
                ));
            }
        }
    }

    if !media.audio_streams.is_empty() {
        output.push("-map 0:a".to_string());
        if cfg.smart_audio {
            for (i, stream) in media.audio_streams.iter().enumerate() {
                let layout = stream.channel_layout.as_deref().unwrap_or("").to_lowercase();
                let encoder = if layout.ends_with("(side)") { "libvorbis" } else { "libopus" };
                output.push(format!("-c:a:{} {}", i, encoder));
            }
        } else {
            output.push("-c:a libvorbis".to_string());
        }
    }

    let mut converts_text = false;
    for (i, stream) in media.subtitle_streams.iter().enumerate() {
        output.push(format!("-map 0:s:{}", i));
        if TEXT_SUBTITLE_CODECS.contains(&stream.codec_name.as_str()) {
            converts_text = true;
            output.push(format!("-c:s:{} webvtt", i));
        } else {
            output.push(format!("-c:s:{} copy", i));
        }
    }
    if converts_text {
        input.push("-txt_format text -fix_sub_duration".to_string());
    }

    JobArguments {
        input_args: join_args(&input),
        output_args: join_args(&output),
    }
}

fn join_args(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
