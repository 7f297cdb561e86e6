use std::time::Duration;
use anyhow::{Context, Result};
use serde::Deserialize;
use crate::transcoder::{AudioStream, MediaInfo, Ratio, SubtitleStream, VideoStream};

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: Option<FFProbeFormat>,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    /// Seconds, as a decimal string
    pub duration: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: u32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_aspect_ratio: Option<String>,
    pub display_aspect_ratio: Option<String>,
    pub channel_layout: Option<String>,
    pub duration: Option<String>,
}

/// Parse `ffprobe -print_format json -show_streams -show_format` output
pub fn parse_probe_output(json: &str) -> Result<MediaInfo> {
    let data: FFProbeData = serde_json::from_str(json).context("Failed to parse ffprobe JSON")?;
    Ok(data.into_media_info())
}

fn parse_seconds(value: Option<&str>) -> Option<Duration> {
    let secs = value?.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

impl FFProbeData {
    /// Container duration, falling back to the longest stream
    pub fn duration(&self) -> Duration {
        self.format
            .as_ref()
            .and_then(|f| parse_seconds(f.duration.as_deref()))
            .or_else(|| {
                self.streams
                    .iter()
                    .filter_map(|s| parse_seconds(s.duration.as_deref()))
                    .max()
            })
            .unwrap_or_default()
    }

    pub fn into_media_info(self) -> MediaInfo {
        let duration = self.duration();
        let mut info = MediaInfo {
            duration,
            ..Default::default()
        };

        for stream in self.streams {
            let codec_name = stream.codec_name.clone().unwrap_or_default();
            match stream.codec_type.as_deref() {
                Some("video") => {
                    // Cover art is reported as a video stream
                    if codec_name == "mjpeg" || codec_name == "png" {
                        continue;
                    }
                    info.video_streams.push(VideoStream {
                        index: stream.index,
                        codec_name,
                        width: stream.width.unwrap_or(0),
                        height: stream.height.unwrap_or(0),
                        sample_aspect_ratio: stream
                            .sample_aspect_ratio
                            .as_deref()
                            .and_then(Ratio::parse)
                            .unwrap_or_default(),
                        display_aspect_ratio: stream
                            .display_aspect_ratio
                            .as_deref()
                            .and_then(Ratio::parse)
                            .unwrap_or_default(),
                    })
                }
                Some("audio") => info.audio_streams.push(AudioStream {
                    index: stream.index,
                    codec_name,
                    channel_layout: stream.channel_layout,
                }),
                Some("subtitle") => info.subtitle_streams.push(SubtitleStream {
                    index: stream.index,
                    codec_name,
                }),
                _ => {}
            }
        }

        info
    }
}
