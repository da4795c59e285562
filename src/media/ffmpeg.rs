//! # ffmpeg Backend
//!
//! Implements [`MediaBackend`] by running the system `ffmpeg` and `ffprobe`
//! binaries. Nothing is linked; the tools are located by name on `PATH` or
//! by an absolute path from [`GatewayConfig`].
//!
//! ## Process Handling
//!
//! | Concern     | Handling                                              |
//! |-------------|-------------------------------------------------------|
//! | Hung tool   | `tokio::time::timeout`, child killed on drop          |
//! | Exit ≠ 0    | [`Error::MediaTool`] with the tail of stderr          |
//! | Missing bin | [`Error::MediaToolUnavailable`]                       |
//! | Prompts     | `-nostdin`, stdin closed, `-y` to overwrite outputs   |

use super::{AudioEncoding, ConcatLayout, FrameSize, MediaBackend, MediaInfo, TimeRange};
use crate::config::GatewayConfig;
use crate::constants::{
    DEFAULT_TOOL_TIMEOUT, PROBE_TIMEOUT, TOOL_STDERR_TAIL_BYTES, VIDEO_AUDIO_CODEC, VIDEO_CODEC,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

/// Arguments prepended to every ffmpeg run.
const FFMPEG_COMMON_ARGS: [&str; 5] = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y"];

/// Media backend driving the ffmpeg command-line tools.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Duration,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegBackend {
    /// Uses `ffmpeg` and `ffprobe` from `PATH`.
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Uses the tool paths and timeout from a gateway configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            timeout: config.tool_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns true if `ffmpeg -version` runs.
    pub async fn is_available(&self) -> bool {
        self.run_tool(&self.ffmpeg, vec!["-version".into()], PROBE_TIMEOUT)
            .await
            .is_ok()
    }

    /// Runs ffmpeg with the common arguments prepended.
    async fn ffmpeg(&self, args: Vec<OsString>) -> Result<()> {
        let mut full: Vec<OsString> = FFMPEG_COMMON_ARGS.into_iter().map(OsString::from).collect();
        full.extend(args);
        self.run_tool(&self.ffmpeg, full, self.timeout).await.map(|_| ())
    }

    /// Runs a tool to completion and returns its stdout.
    async fn run_tool(
        &self,
        tool: &Path,
        args: Vec<OsString>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let tool_name = tool
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| tool.display().to_string());

        debug!("Running {} {:?}", tool_name, args);

        let mut cmd = tokio::process::Command::new(tool);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::MediaToolUnavailable {
                    tool: tool_name,
                    reason: e.to_string(),
                });
            }
            Ok(Err(e)) => {
                return Err(Error::MediaTool {
                    tool: tool_name,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(Error::Timeout {
                    operation: tool_name,
                    duration: timeout,
                });
            }
        };

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(Error::MediaTool {
                tool: tool_name,
                reason: format!("exit {}: {}", code, stderr_tail(&output.stderr)),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe(&self, input: &Path) -> Result<MediaInfo> {
        let args = vec![
            "-v".into(),
            "error".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            "-show_streams".into(),
            input.as_os_str().to_owned(),
        ];
        let stdout = self.run_tool(&self.ffprobe, args, PROBE_TIMEOUT).await?;
        parse_probe_output(&stdout)
    }

    async fn extract_audio(
        &self,
        input: &Path,
        output: &Path,
        encoding: &AudioEncoding,
    ) -> Result<()> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            input.as_os_str().to_owned(),
            "-vn".into(),
            "-b:a".into(),
            encoding.bitrate.clone().into(),
        ];
        if let Some(codec) = &encoding.codec {
            args.push("-c:a".into());
            args.push(codec.into());
        }
        args.push(output.as_os_str().to_owned());
        self.ffmpeg(args).await
    }

    async fn concatenate(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        layout: &ConcatLayout,
    ) -> Result<()> {
        let mut args: Vec<OsString> = Vec::new();
        for input in inputs {
            args.push("-i".into());
            args.push(input.as_os_str().to_owned());
        }
        args.push("-filter_complex".into());
        args.push(concat_filter(inputs.len(), layout).into());
        args.push("-map".into());
        args.push("[v]".into());
        if layout.with_audio {
            args.push("-map".into());
            args.push("[a]".into());
            args.push("-c:a".into());
            args.push(VIDEO_AUDIO_CODEC.into());
        }
        args.push("-c:v".into());
        args.push(VIDEO_CODEC.into());
        args.push(output.as_os_str().to_owned());
        self.ffmpeg(args).await
    }

    async fn trim_video(&self, input: &Path, output: &Path, range: TimeRange) -> Result<()> {
        let args: Vec<OsString> = vec![
            "-i".into(),
            input.as_os_str().to_owned(),
            "-ss".into(),
            seconds(range.start).into(),
            "-to".into(),
            seconds(range.end).into(),
            "-c:v".into(),
            VIDEO_CODEC.into(),
            "-c:a".into(),
            VIDEO_AUDIO_CODEC.into(),
            output.as_os_str().to_owned(),
        ];
        self.ffmpeg(args).await
    }

    async fn resize_video(&self, input: &Path, output: &Path, size: FrameSize) -> Result<()> {
        let args: Vec<OsString> = vec![
            "-i".into(),
            input.as_os_str().to_owned(),
            "-vf".into(),
            format!("scale={}:{}", size.width, size.height).into(),
            "-c:v".into(),
            VIDEO_CODEC.into(),
            "-c:a".into(),
            VIDEO_AUDIO_CODEC.into(),
            output.as_os_str().to_owned(),
        ];
        self.ffmpeg(args).await
    }

    async fn cut_audio(&self, input: &Path, output: &Path, range: TimeRange) -> Result<()> {
        let args: Vec<OsString> = vec![
            "-i".into(),
            input.as_os_str().to_owned(),
            "-ss".into(),
            seconds(range.start).into(),
            "-to".into(),
            seconds(range.end).into(),
            "-vn".into(),
            output.as_os_str().to_owned(),
        ];
        self.ffmpeg(args).await
    }
}

// =============================================================================
// ffprobe Output
// =============================================================================

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parses `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(stdout: &[u8]) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_slice(stdout).map_err(|e| Error::MediaTool {
        tool: "ffprobe".to_string(),
        reason: format!("unreadable output: {}", e),
    })?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let format_duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());
    let stream_duration = probe
        .streams
        .iter()
        .filter_map(|s| s.duration.as_deref()?.parse::<f64>().ok())
        .reduce(f64::max);

    let duration = format_duration
        .or(stream_duration)
        .ok_or_else(|| Error::MediaTool {
            tool: "ffprobe".to_string(),
            reason: "media duration unknown".to_string(),
        })?;

    let fps = video.and_then(|v| {
        v.avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| v.r_frame_rate.as_deref().and_then(parse_frame_rate))
    });

    Ok(MediaInfo {
        duration,
        fps,
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        has_video: video.is_some(),
        has_audio,
    })
}

/// Parses `30000/1001` or `25`; `0/0` is unknown.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.parse::<f64>().ok()? / den
        }
        None => raw.parse().ok()?,
    };
    (rate > 0.0).then_some(rate)
}

/// Builds the concat filter graph, letterboxing every clip onto `layout.size`.
pub fn concat_filter(count: usize, layout: &ConcatLayout) -> String {
    let FrameSize { width, height } = layout.size;
    let mut graph = String::new();

    for i in 0..count {
        graph.push_str(&format!(
            "[{i}:v:0]scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1[v{i}];"
        ));
    }
    for i in 0..count {
        graph.push_str(&format!("[v{i}]"));
        if layout.with_audio {
            graph.push_str(&format!("[{i}:a:0]"));
        }
    }
    if layout.with_audio {
        graph.push_str(&format!("concat=n={count}:v=1:a=1[v][a]"));
    } else {
        graph.push_str(&format!("concat=n={count}:v=1:a=0[v]"));
    }
    graph
}

/// Formats seconds for `-ss` / `-to`.
fn seconds(value: f64) -> String {
    format!("{:.3}", value)
}

/// Last bytes of stderr, lossily decoded.
fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(TOOL_STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}
