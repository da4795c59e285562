//! The six media operations.
//!
//! Each operation validates its inputs in a fixed order (input file
//! existence, parameter checks, probe-based range checks), then delegates
//! to the backend and confirms the output file exists. Internally the steps
//! short-circuit through `Outcome`, whose `Err` side is already a failure
//! envelope.

use super::{AudioEncoding, ConcatLayout, FrameSize, MediaBackend, MediaInfo, TimeRange};
use crate::constants::{DEFAULT_AUDIO_BITRATE, DEFAULT_AUDIO_FORMAT, DEFAULT_CONCAT_OUTPUT};
use crate::context::{OutputsDirStrategy, RequestContext};
use crate::envelope::{ErrorCode, ResultEnvelope};
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::json;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

type Outcome = std::result::Result<ResultEnvelope, ResultEnvelope>;

// =============================================================================
// Parameters
// =============================================================================

fn default_audio_format() -> String {
    DEFAULT_AUDIO_FORMAT.to_string()
}

fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoToAudioParams {
    pub video_path: PathBuf,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcatenateVideosParams {
    #[serde(default)]
    pub video_paths: Vec<PathBuf>,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    /// Reserved; clips are always joined with a hard cut.
    #[serde(default)]
    pub transition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrimVideoParams {
    pub video_path: PathBuf,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResizeVideoParams {
    pub video_path: PathBuf,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractAudioSegmentParams {
    pub audio_path: PathBuf,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetVideoInfoParams {
    pub video_path: PathBuf,
}

// =============================================================================
// Operations
// =============================================================================

/// Extracts the audio track of a video.
pub async fn video_to_audio(
    backend: &dyn MediaBackend,
    params: VideoToAudioParams,
    ctx: &RequestContext,
) -> ResultEnvelope {
    settle(run_video_to_audio(backend, params, ctx).await)
}

async fn run_video_to_audio(
    backend: &dyn MediaBackend,
    params: VideoToAudioParams,
    ctx: &RequestContext,
) -> Outcome {
    const CODE: ErrorCode = ErrorCode::ConversionError;

    require_file(&params.video_path, "video")?;
    if !is_format_token(&params.audio_format) {
        return Err(ResultEnvelope::failure(
            CODE,
            format!("unsupported audio format '{}'", params.audio_format),
        ));
    }

    let default_name = format!("{}.{}", file_stem(&params.video_path), params.audio_format);
    let requested = params.output_path.as_deref();
    let output = output_target(ctx, &params.video_path, requested, &default_name)
        .await
        .map_err(fail(CODE))?;

    let info = backend.probe(&params.video_path).await.map_err(fail(CODE))?;
    if !info.has_audio {
        return Err(ResultEnvelope::failure(
            ErrorCode::NoAudioTrack,
            format!("{} has no audio track", params.video_path.display()),
        ));
    }

    let encoding = AudioEncoding::for_format(&params.audio_format, &params.audio_bitrate);
    backend
        .extract_audio(&params.video_path, &output, &encoding)
        .await
        .map_err(fail(CODE))?;
    ensure_output(backend, &output).map_err(fail(CODE))?;

    info!("Extracted audio to {}", output.display());
    Ok(ResultEnvelope::ok()
        .with_output_file("output_file", &output)
        .with_field("format", params.audio_format)
        .with_field("duration", info.duration))
}

/// Joins two or more videos end to end.
pub async fn concatenate_videos(
    backend: &dyn MediaBackend,
    params: ConcatenateVideosParams,
    ctx: &RequestContext,
) -> ResultEnvelope {
    settle(run_concatenate_videos(backend, params, ctx).await)
}

async fn run_concatenate_videos(
    backend: &dyn MediaBackend,
    params: ConcatenateVideosParams,
    ctx: &RequestContext,
) -> Outcome {
    const CODE: ErrorCode = ErrorCode::ConcatenationError;

    let inputs = params.video_paths;
    if inputs.len() < 2 {
        return Err(ResultEnvelope::failure(
            ErrorCode::InsufficientVideos,
            format!("at least 2 videos are required, got {}", inputs.len()),
        ));
    }
    for input in &inputs {
        require_file(input, "video")?;
    }
    if let Some(transition) = &params.transition {
        debug!("Ignoring transition '{}', clips are joined with a cut", transition);
    }

    let requested = params.output_path.as_deref();
    let output = output_target(ctx, &inputs[0], requested, DEFAULT_CONCAT_OUTPUT)
        .await
        .map_err(fail(CODE))?;

    let mut probes = Vec::with_capacity(inputs.len());
    for input in &inputs {
        probes.push(backend.probe(input).await.map_err(fail(CODE))?);
    }
    let size = probes[0].frame_size().ok_or_else(|| {
        ResultEnvelope::failure(
            CODE,
            format!("{} has no video stream", inputs[0].display()),
        )
    })?;
    let layout = ConcatLayout {
        size,
        with_audio: probes.iter().all(|p| p.has_audio),
    };
    let total_duration: f64 = probes.iter().map(|p| p.duration).sum();

    backend
        .concatenate(&inputs, &output, &layout)
        .await
        .map_err(fail(CODE))?;
    ensure_output(backend, &output).map_err(fail(CODE))?;

    info!("Concatenated {} videos into {}", inputs.len(), output.display());
    Ok(ResultEnvelope::ok()
        .with_output_file("output_file", &output)
        .with_field("total_duration", total_duration)
        .with_field("video_count", inputs.len()))
}

/// Cuts a time range out of a video.
pub async fn trim_video(
    backend: &dyn MediaBackend,
    params: TrimVideoParams,
    ctx: &RequestContext,
) -> ResultEnvelope {
    settle(run_trim_video(backend, params, ctx).await)
}

async fn run_trim_video(
    backend: &dyn MediaBackend,
    params: TrimVideoParams,
    ctx: &RequestContext,
) -> Outcome {
    const CODE: ErrorCode = ErrorCode::TrimError;

    require_file(&params.video_path, "video")?;
    let range = check_range(params.start_time, params.end_time)?;

    let default_name = format!("{}_trimmed.mp4", file_stem(&params.video_path));
    let requested = params.output_path.as_deref();
    let output = output_target(ctx, &params.video_path, requested, &default_name)
        .await
        .map_err(fail(CODE))?;

    let info = backend.probe(&params.video_path).await.map_err(fail(CODE))?;
    check_within(range, &info)?;

    backend
        .trim_video(&params.video_path, &output, range)
        .await
        .map_err(fail(CODE))?;
    ensure_output(backend, &output).map_err(fail(CODE))?;

    info!("Trimmed {} to {}", params.video_path.display(), output.display());
    Ok(ranged_success(&output, range))
}

/// Scales a video by factor or to explicit dimensions.
pub async fn resize_video(
    backend: &dyn MediaBackend,
    params: ResizeVideoParams,
    ctx: &RequestContext,
) -> ResultEnvelope {
    settle(run_resize_video(backend, params, ctx).await)
}

async fn run_resize_video(
    backend: &dyn MediaBackend,
    params: ResizeVideoParams,
    ctx: &RequestContext,
) -> Outcome {
    const CODE: ErrorCode = ErrorCode::ResizeError;

    require_file(&params.video_path, "video")?;
    if params.width.is_none() && params.height.is_none() && params.scale.is_none() {
        return Err(ResultEnvelope::failure(
            ErrorCode::MissingSizeParameter,
            "one of width, height or scale is required",
        ));
    }
    if let Some(scale) = params.scale
        && !(scale > 0.0 && scale.is_finite())
    {
        return Err(ResultEnvelope::failure(
            CODE,
            format!("scale must be positive, got {}", scale),
        ));
    }
    if params.width == Some(0) || params.height == Some(0) {
        return Err(ResultEnvelope::failure(CODE, "width and height must be positive"));
    }

    let default_name = format!("{}_resized.mp4", file_stem(&params.video_path));
    let requested = params.output_path.as_deref();
    let output = output_target(ctx, &params.video_path, requested, &default_name)
        .await
        .map_err(fail(CODE))?;

    let info = backend.probe(&params.video_path).await.map_err(fail(CODE))?;
    let original = info.frame_size().ok_or_else(|| {
        ResultEnvelope::failure(
            CODE,
            format!("{} has no video stream", params.video_path.display()),
        )
    })?;
    let new_size = target_size(original, params.width, params.height, params.scale);

    backend
        .resize_video(&params.video_path, &output, new_size)
        .await
        .map_err(fail(CODE))?;
    ensure_output(backend, &output).map_err(fail(CODE))?;

    info!(
        "Resized {} from {}x{} to {}x{}",
        params.video_path.display(),
        original.width,
        original.height,
        new_size.width,
        new_size.height
    );
    Ok(ResultEnvelope::ok()
        .with_output_file("output_file", &output)
        .with_field("original_size", size_object(original))
        .with_field("new_size", size_object(new_size)))
}

/// Cuts a time range out of an audio file.
pub async fn extract_audio_segment(
    backend: &dyn MediaBackend,
    params: ExtractAudioSegmentParams,
    ctx: &RequestContext,
) -> ResultEnvelope {
    settle(run_extract_audio_segment(backend, params, ctx).await)
}

async fn run_extract_audio_segment(
    backend: &dyn MediaBackend,
    params: ExtractAudioSegmentParams,
    ctx: &RequestContext,
) -> Outcome {
    const CODE: ErrorCode = ErrorCode::ExtractError;

    require_file(&params.audio_path, "audio")?;
    let range = check_range(params.start_time, params.end_time)?;

    let extension = params
        .audio_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let default_name = format!("{}_segment{}", file_stem(&params.audio_path), extension);
    let requested = params.output_path.as_deref();
    let output = output_target(ctx, &params.audio_path, requested, &default_name)
        .await
        .map_err(fail(CODE))?;

    let info = backend.probe(&params.audio_path).await.map_err(fail(CODE))?;
    check_within(range, &info)?;

    backend
        .cut_audio(&params.audio_path, &output, range)
        .await
        .map_err(fail(CODE))?;
    ensure_output(backend, &output).map_err(fail(CODE))?;

    info!("Extracted segment of {} to {}", params.audio_path.display(), output.display());
    Ok(ranged_success(&output, range))
}

/// Reports duration, frame rate, frame size, audio presence and file size.
pub async fn get_video_info(
    backend: &dyn MediaBackend,
    params: GetVideoInfoParams,
) -> ResultEnvelope {
    settle(run_get_video_info(backend, params).await)
}

async fn run_get_video_info(backend: &dyn MediaBackend, params: GetVideoInfoParams) -> Outcome {
    const CODE: ErrorCode = ErrorCode::InfoError;

    require_file(&params.video_path, "video")?;

    let info = backend.probe(&params.video_path).await.map_err(fail(CODE))?;
    let file_size = tokio::fs::metadata(&params.video_path)
        .await
        .map_err(|e| fail(CODE)(Error::Io(e)))?
        .len();
    let file_size_mb = (file_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;

    Ok(ResultEnvelope::ok().with_field(
        "info",
        json!({
            "duration": info.duration,
            "fps": info.fps,
            "size": [info.width, info.height],
            "width": info.width,
            "height": info.height,
            "has_audio": info.has_audio,
            "file_size_bytes": file_size,
            "file_size_mb": file_size_mb,
        }),
    ))
}

// =============================================================================
// Helpers
// =============================================================================

/// Output frame size for a resize request.
///
/// `scale` wins over explicit dimensions; a single dimension keeps the
/// aspect ratio. Both sides are rounded to the nearest even number
/// (minimum 2) as H.264 requires.
pub fn target_size(
    original: FrameSize,
    width: Option<u32>,
    height: Option<u32>,
    scale: Option<f64>,
) -> FrameSize {
    let (ow, oh) = (f64::from(original.width), f64::from(original.height));
    let (w, h) = match (scale, width, height) {
        (Some(s), _, _) => (ow * s, oh * s),
        (None, Some(w), Some(h)) => (f64::from(w), f64::from(h)),
        (None, Some(w), None) => (f64::from(w), oh * f64::from(w) / ow),
        (None, None, Some(h)) => (ow * f64::from(h) / oh, f64::from(h)),
        (None, None, None) => (ow, oh),
    };
    FrameSize {
        width: round_even(w),
        height: round_even(h),
    }
}

fn round_even(value: f64) -> u32 {
    ((value / 2.0).round() * 2.0).max(2.0) as u32
}

fn size_object(size: FrameSize) -> serde_json::Value {
    json!({ "width": size.width, "height": size.height })
}

/// An audio format is used as a file extension, so it must be a bare token.
fn is_format_token(format: &str) -> bool {
    !format.is_empty() && format.chars().all(|c| c.is_ascii_alphanumeric())
}

fn settle(outcome: Outcome) -> ResultEnvelope {
    match outcome {
        Ok(envelope) | Err(envelope) => envelope,
    }
}

/// Maps a backend error to a failure envelope with `code`.
fn fail(code: ErrorCode) -> impl Fn(Error) -> ResultEnvelope {
    move |e| ResultEnvelope::failure(code, e.to_string())
}

fn require_file(path: &Path, kind: &str) -> std::result::Result<(), ResultEnvelope> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ResultEnvelope::failure(
            ErrorCode::FileNotFound,
            format!("{} file not found: {}", kind, path.display()),
        ))
    }
}

fn check_range(start: f64, end: f64) -> std::result::Result<TimeRange, ResultEnvelope> {
    if start.is_nan() || start < 0.0 {
        return Err(ResultEnvelope::failure(
            ErrorCode::InvalidStartTime,
            format!("start time must be non-negative, got {}", start),
        ));
    }
    if end.is_nan() || end <= start {
        return Err(ResultEnvelope::failure(
            ErrorCode::InvalidTimeRange,
            format!("end time {} must be after start time {}", end, start),
        ));
    }
    Ok(TimeRange { start, end })
}

fn check_within(range: TimeRange, info: &MediaInfo) -> std::result::Result<(), ResultEnvelope> {
    if range.end > info.duration {
        return Err(ResultEnvelope::failure(
            ErrorCode::TimeOutOfRange,
            format!(
                "end time {} exceeds media duration {}",
                range.end, info.duration
            ),
        ));
    }
    Ok(())
}

fn ranged_success(output: &Path, range: TimeRange) -> ResultEnvelope {
    ResultEnvelope::ok()
        .with_output_file("output_file", output)
        .with_field("duration", range.duration())
        .with_field("start_time", range.start)
        .with_field("end_time", range.end)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}

/// Resolves where an operation writes its output and creates the directory.
///
/// The output always lands inside the outputs directory: absolute paths and
/// paths with `.` or `..` components are rejected.
async fn output_target(
    ctx: &RequestContext,
    input: &Path,
    requested: Option<&Path>,
    default_name: &str,
) -> Result<PathBuf> {
    let strategy = OutputsDirStrategy::select(ctx, input);
    let dir = strategy.resolve()?;
    debug!("Outputs directory {} ({})", dir.display(), strategy.name());

    let relative = requested.unwrap_or_else(|| Path::new(default_name));
    check_output_name(relative)?;

    let target = dir.join(relative);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(target)
}

fn check_output_name(path: &Path) -> Result<()> {
    let confined = path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if path.as_os_str().is_empty() || !confined {
        return Err(Error::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

fn ensure_output(backend: &dyn MediaBackend, output: &Path) -> Result<()> {
    if output.is_file() {
        Ok(())
    } else {
        Err(Error::MediaTool {
            tool: backend.name().to_string(),
            reason: format!("no output written to {}", output.display()),
        })
    }
}
