//! Shared test fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use prefabrun::media::{AudioEncoding, ConcatLayout, FrameSize, MediaBackend, MediaInfo, TimeRange};
use prefabrun::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A 50 second 1920x1080 clip with audio.
pub fn hd_clip() -> MediaInfo {
    MediaInfo {
        duration: 50.0,
        fps: Some(30.0),
        width: Some(1920),
        height: Some(1080),
        has_video: true,
        has_audio: true,
    }
}

/// In-memory media backend that writes placeholder output files.
pub struct FakeBackend {
    default_info: MediaInfo,
    infos: Mutex<HashMap<PathBuf, MediaInfo>>,
    /// Fail every conversion call.
    pub fail: bool,
    /// Report success without writing the output.
    pub skip_output: bool,
    /// Fail every probe.
    pub fail_probe: bool,
    pub calls: Mutex<Vec<String>>,
    pub last_layout: Mutex<Option<ConcatLayout>>,
    pub last_size: Mutex<Option<FrameSize>>,
    pub last_encoding: Mutex<Option<AudioEncoding>>,
}

impl FakeBackend {
    pub fn new(default_info: MediaInfo) -> Self {
        Self {
            default_info,
            infos: Mutex::new(HashMap::new()),
            fail: false,
            skip_output: false,
            fail_probe: false,
            calls: Mutex::new(Vec::new()),
            last_layout: Mutex::new(None),
            last_size: Mutex::new(None),
            last_encoding: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(hd_clip())
        }
    }

    pub fn probe_failing() -> Self {
        Self {
            fail_probe: true,
            ..Self::new(hd_clip())
        }
    }

    pub fn silent() -> Self {
        Self {
            skip_output: true,
            ..Self::new(hd_clip())
        }
    }

    /// Overrides the probe result for one file (matched by file name).
    pub fn set_info(&self, file_name: &str, info: MediaInfo) {
        self.infos
            .lock()
            .unwrap()
            .insert(PathBuf::from(file_name), info);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn produce(&self, op: &str, output: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(op.to_string());
        if self.fail {
            return Err(Error::MediaTool {
                tool: "fake".to_string(),
                reason: format!("{} failed", op),
            });
        }
        if !self.skip_output {
            fs::write(output, op.as_bytes())?;
        }
        Ok(())
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn probe(&self, input: &Path) -> Result<MediaInfo> {
        self.calls.lock().unwrap().push("probe".to_string());
        if self.fail_probe {
            return Err(Error::MediaTool {
                tool: "fake".to_string(),
                reason: format!("cannot probe {}", input.display()),
            });
        }
        let key = PathBuf::from(input.file_name().unwrap_or_default());
        Ok(self
            .infos
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.default_info.clone()))
    }

    async fn extract_audio(
        &self,
        _input: &Path,
        output: &Path,
        encoding: &AudioEncoding,
    ) -> Result<()> {
        *self.last_encoding.lock().unwrap() = Some(encoding.clone());
        self.produce("extract_audio", output)
    }

    async fn concatenate(
        &self,
        _inputs: &[PathBuf],
        output: &Path,
        layout: &ConcatLayout,
    ) -> Result<()> {
        *self.last_layout.lock().unwrap() = Some(*layout);
        self.produce("concatenate", output)
    }

    async fn trim_video(&self, _input: &Path, output: &Path, _range: TimeRange) -> Result<()> {
        self.produce("trim_video", output)
    }

    async fn resize_video(&self, _input: &Path, output: &Path, size: FrameSize) -> Result<()> {
        *self.last_size.lock().unwrap() = Some(size);
        self.produce("resize_video", output)
    }

    async fn cut_audio(&self, _input: &Path, output: &Path, _range: TimeRange) -> Result<()> {
        self.produce("cut_audio", output)
    }
}

/// Creates `<root>/<request>/inputs/<name>` with some bytes and returns its path.
pub fn input_file(root: &Path, request: &str, name: &str) -> PathBuf {
    let inputs = root.join(request).join("inputs");
    fs::create_dir_all(&inputs).unwrap();
    let path = inputs.join(name);
    fs::write(&path, b"media").unwrap();
    path
}
