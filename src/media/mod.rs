//! Media processing functions.
//!
//! Six stateless operations (audio extraction, concatenation, trimming,
//! resizing, audio segment extraction, metadata probing), each a thin
//! validating wrapper over a [`MediaBackend`]. The production backend is
//! [`FfmpegBackend`], which shells out to the system `ffmpeg`/`ffprobe`.
//!
//! Every operation answers with a [`ResultEnvelope`](crate::envelope::ResultEnvelope):
//! validation failures carry a specific code, backend failures carry the
//! operation's processing code.

pub mod ffmpeg;
pub mod functions;
pub mod prefabs;

pub use ffmpeg::FfmpegBackend;
pub use functions::{
    ConcatenateVideosParams, ExtractAudioSegmentParams, GetVideoInfoParams, ResizeVideoParams,
    TrimVideoParams, VideoToAudioParams, concatenate_videos, extract_audio_segment,
    get_video_info, resize_video, target_size, trim_video, video_to_audio,
};
pub use prefabs::{MediaOperation, MediaPrefab, media_registry, register_media_prefabs};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Probed properties of a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Length in seconds.
    pub duration: f64,
    /// Frames per second of the first video stream.
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_video: bool,
    pub has_audio: bool,
}

impl MediaInfo {
    /// Frame size of the first video stream.
    pub fn frame_size(&self) -> Option<FrameSize> {
        Some(FrameSize {
            width: self.width?,
            height: self.height?,
        })
    }
}

/// Video frame dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// A `[start, end)` window in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Audio output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEncoding {
    /// Container / extension, e.g. `mp3`.
    pub format: String,
    /// Target bitrate, e.g. `192k`.
    pub bitrate: String,
    /// Explicit encoder; `None` lets the tool pick from the extension.
    pub codec: Option<String>,
}

impl AudioEncoding {
    /// Settings for `format`, with an explicit encoder where one is needed.
    pub fn for_format(format: &str, bitrate: &str) -> Self {
        let codec = match format.to_ascii_lowercase().as_str() {
            "aac" | "m4a" => Some("aac"),
            "mp3" => Some("libmp3lame"),
            _ => None,
        };
        Self {
            format: format.to_string(),
            bitrate: bitrate.to_string(),
            codec: codec.map(str::to_string),
        }
    }
}

/// How concatenated clips are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatLayout {
    /// Frame size every clip is letterboxed onto.
    pub size: FrameSize,
    /// Include audio (requires every clip to have a track).
    pub with_audio: bool,
}

/// The media library the operations delegate to.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Backend name for logs and error messages.
    fn name(&self) -> &str;

    /// Reads duration, frame size, frame rate and stream presence.
    async fn probe(&self, input: &Path) -> Result<MediaInfo>;

    /// Writes the audio track of `input` to `output`.
    async fn extract_audio(&self, input: &Path, output: &Path, encoding: &AudioEncoding)
    -> Result<()>;

    /// Joins `inputs` end to end into `output`.
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path, layout: &ConcatLayout)
    -> Result<()>;

    /// Writes the `range` of a video to `output`.
    async fn trim_video(&self, input: &Path, output: &Path, range: TimeRange) -> Result<()>;

    /// Scales a video to `size`.
    async fn resize_video(&self, input: &Path, output: &Path, size: FrameSize) -> Result<()>;

    /// Writes the `range` of an audio file to `output`.
    async fn cut_audio(&self, input: &Path, output: &Path, range: TimeRange) -> Result<()>;
}
