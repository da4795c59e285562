//! Media operations exposed as prefab functions.

use super::MediaBackend;
use super::functions;
use crate::context::RequestContext;
use crate::envelope::{ErrorCode, ResultEnvelope};
use crate::error::Result;
use crate::function::{FunctionRegistry, Params, PrefabFunction, decode_params};
use crate::manifest::{FunctionDecl, ParamDecl, ParamType};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

/// The media operations served by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOperation {
    VideoToAudio,
    ConcatenateVideos,
    TrimVideo,
    ResizeVideo,
    ExtractAudioSegment,
    GetVideoInfo,
}

impl MediaOperation {
    pub const ALL: [MediaOperation; 6] = [
        Self::VideoToAudio,
        Self::ConcatenateVideos,
        Self::TrimVideo,
        Self::ResizeVideo,
        Self::ExtractAudioSegment,
        Self::GetVideoInfo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::VideoToAudio => "video_to_audio",
            Self::ConcatenateVideos => "concatenate_videos",
            Self::TrimVideo => "trim_video",
            Self::ResizeVideo => "resize_video",
            Self::ExtractAudioSegment => "extract_audio_segment",
            Self::GetVideoInfo => "get_video_info",
        }
    }

    /// Parameter and return declaration for the manifest.
    pub fn declaration(&self) -> FunctionDecl {
        let output_path = ParamDecl::new("output_path", ParamType::String)
            .with_description("Output file path, relative to the outputs directory");

        match self {
            Self::VideoToAudio => {
                FunctionDecl::new(self.name(), "Extract the audio track of a video")
                    .param(ParamDecl::required("video_path", ParamType::InputFile))
                    .param(output_path)
                    .param(
                        ParamDecl::new("audio_format", ParamType::String)
                            .with_default(crate::constants::DEFAULT_AUDIO_FORMAT),
                    )
                    .param(
                        ParamDecl::new("audio_bitrate", ParamType::String)
                            .with_default(crate::constants::DEFAULT_AUDIO_BITRATE),
                    )
                    .returns("output_file", ParamType::OutputFile)
                    .returns("format", ParamType::String)
                    .returns("duration", ParamType::Number)
            }
            Self::ConcatenateVideos => {
                FunctionDecl::new(self.name(), "Join two or more videos end to end")
                    .param(ParamDecl::input_file_list("video_paths"))
                    .param(output_path)
                    .param(
                        ParamDecl::new("transition", ParamType::String)
                            .with_description("Reserved"),
                    )
                    .returns("output_file", ParamType::OutputFile)
                    .returns("total_duration", ParamType::Number)
                    .returns("video_count", ParamType::Integer)
            }
            Self::TrimVideo => FunctionDecl::new(self.name(), "Cut a time range out of a video")
                .param(ParamDecl::required("video_path", ParamType::InputFile))
                .param(ParamDecl::required("start_time", ParamType::Number))
                .param(ParamDecl::required("end_time", ParamType::Number))
                .param(output_path)
                .returns("output_file", ParamType::OutputFile)
                .returns("duration", ParamType::Number)
                .returns("start_time", ParamType::Number)
                .returns("end_time", ParamType::Number),
            Self::ResizeVideo => FunctionDecl::new(self.name(), "Scale a video")
                .param(ParamDecl::required("video_path", ParamType::InputFile))
                .param(ParamDecl::new("width", ParamType::Integer))
                .param(ParamDecl::new("height", ParamType::Integer))
                .param(ParamDecl::new("scale", ParamType::Number))
                .param(output_path)
                .returns("output_file", ParamType::OutputFile)
                .returns("original_size", ParamType::Object)
                .returns("new_size", ParamType::Object),
            Self::ExtractAudioSegment => {
                FunctionDecl::new(self.name(), "Cut a time range out of an audio file")
                    .param(ParamDecl::required("audio_path", ParamType::InputFile))
                    .param(ParamDecl::required("start_time", ParamType::Number))
                    .param(ParamDecl::required("end_time", ParamType::Number))
                    .param(output_path)
                    .returns("output_file", ParamType::OutputFile)
                    .returns("duration", ParamType::Number)
                    .returns("start_time", ParamType::Number)
                    .returns("end_time", ParamType::Number)
            }
            Self::GetVideoInfo => FunctionDecl::new(self.name(), "Probe video metadata")
                .param(ParamDecl::required("video_path", ParamType::InputFile))
                .returns("info", ParamType::Object),
        }
    }

    /// Decodes parameters and runs the operation.
    pub async fn run(
        &self,
        backend: &dyn MediaBackend,
        params: Params,
        ctx: &RequestContext,
    ) -> ResultEnvelope {
        match self {
            Self::VideoToAudio => match decode(self, params) {
                Ok(p) => functions::video_to_audio(backend, p, ctx).await,
                Err(envelope) => envelope,
            },
            Self::ConcatenateVideos => match decode(self, params) {
                Ok(p) => functions::concatenate_videos(backend, p, ctx).await,
                Err(envelope) => envelope,
            },
            Self::TrimVideo => match decode(self, params) {
                Ok(p) => functions::trim_video(backend, p, ctx).await,
                Err(envelope) => envelope,
            },
            Self::ResizeVideo => match decode(self, params) {
                Ok(p) => functions::resize_video(backend, p, ctx).await,
                Err(envelope) => envelope,
            },
            Self::ExtractAudioSegment => match decode(self, params) {
                Ok(p) => functions::extract_audio_segment(backend, p, ctx).await,
                Err(envelope) => envelope,
            },
            Self::GetVideoInfo => match decode(self, params) {
                Ok(p) => functions::get_video_info(backend, p).await,
                Err(envelope) => envelope,
            },
        }
    }
}

fn decode<T: DeserializeOwned>(
    op: &MediaOperation,
    params: Params,
) -> std::result::Result<T, ResultEnvelope> {
    decode_params(params).map_err(|e| {
        warn!("{}: {}", op.name(), e);
        ResultEnvelope::failure(ErrorCode::ProcessingError, e.to_string())
    })
}

/// A media operation bound to a backend.
pub struct MediaPrefab {
    op: MediaOperation,
    decl: FunctionDecl,
    backend: Arc<dyn MediaBackend>,
}

impl MediaPrefab {
    pub fn new(op: MediaOperation, backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            op,
            decl: op.declaration(),
            backend,
        }
    }

    pub fn operation(&self) -> MediaOperation {
        self.op
    }
}

#[async_trait]
impl PrefabFunction for MediaPrefab {
    fn declaration(&self) -> &FunctionDecl {
        &self.decl
    }

    async fn invoke(&self, params: Params, ctx: RequestContext) -> ResultEnvelope {
        self.op.run(self.backend.as_ref(), params, &ctx).await
    }
}

/// Registers every media operation on `registry`.
pub fn register_media_prefabs(
    registry: &mut FunctionRegistry,
    backend: Arc<dyn MediaBackend>,
) -> Result<()> {
    for op in MediaOperation::ALL {
        registry.register(Arc::new(MediaPrefab::new(op, Arc::clone(&backend))))?;
    }
    Ok(())
}

/// A registry holding only the media operations.
pub fn media_registry(backend: Arc<dyn MediaBackend>) -> Result<FunctionRegistry> {
    let mut registry = FunctionRegistry::new();
    register_media_prefabs(&mut registry, backend)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarations_are_valid() {
        for op in MediaOperation::ALL {
            let decl = op.declaration();
            assert_eq!(decl.name, op.name());
            decl.validate().unwrap();
        }
    }

    #[test]
    fn test_file_producing_operations_declare_output_file() {
        for op in MediaOperation::ALL {
            let decl = op.declaration();
            let outputs: Vec<_> = decl.output_file_fields().map(str::to_string).collect();
            if op == MediaOperation::GetVideoInfo {
                assert!(outputs.is_empty());
            } else {
                assert_eq!(outputs, vec!["output_file".to_string()]);
            }
        }
    }
}
