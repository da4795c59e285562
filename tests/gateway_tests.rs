//! Tests for the gateway invocation pipeline.
//!
//! Covers the request lifecycle (create, stage, invoke, collect, teardown),
//! staging rules for file parameters, failure handling and isolation of
//! concurrent requests.

mod common;

use async_trait::async_trait;
use common::{FakeBackend, hd_clip};
use prefabrun::{
    ArtifactStore, Error, ErrorCode, FunctionDecl, FunctionRegistry, Gateway, InvocationRequest,
    ParamDecl, ParamType, Params, PrefabFunction, RequestContext, ResultEnvelope, StagingSource,
    WorkspaceManager, media_registry, validate_request_id,
};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// =============================================================================
// Test Functions
// =============================================================================

/// Copies its input into the outputs directory.
struct CopyInput {
    decl: FunctionDecl,
    seen: Mutex<Option<(Params, RequestContext)>>,
}

impl CopyInput {
    fn new() -> Self {
        Self {
            decl: FunctionDecl::new("copy_input", "Copy the input")
                .param(ParamDecl::required("source", ParamType::InputFile))
                .param(ParamDecl::new("suffix", ParamType::String))
                .returns("output_file", ParamType::OutputFile),
            seen: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PrefabFunction for CopyInput {
    fn declaration(&self) -> &FunctionDecl {
        &self.decl
    }

    async fn invoke(&self, params: Params, ctx: RequestContext) -> ResultEnvelope {
        *self.seen.lock().unwrap() = Some((params.clone(), ctx.clone()));
        let source = PathBuf::from(params["source"].as_str().unwrap());
        let target = ctx.outputs_dir().unwrap().join("copy.bin");
        fs::copy(&source, &target).unwrap();
        ResultEnvelope::ok().with_output_file("output_file", &target)
    }
}

/// Writes an output and then reports failure anyway.
struct FailsWithOutput {
    decl: FunctionDecl,
}

#[async_trait]
impl PrefabFunction for FailsWithOutput {
    fn declaration(&self) -> &FunctionDecl {
        &self.decl
    }

    async fn invoke(&self, _params: Params, ctx: RequestContext) -> ResultEnvelope {
        let partial = ctx.outputs_dir().unwrap().join("partial.bin");
        fs::write(&partial, b"half").unwrap();
        ResultEnvelope::failure(ErrorCode::ProcessingError, "gave up")
            .with_output_file("output_file", &partial)
    }
}

/// Panics.
struct Explodes {
    decl: FunctionDecl,
}

#[async_trait]
impl PrefabFunction for Explodes {
    fn declaration(&self) -> &FunctionDecl {
        &self.decl
    }

    async fn invoke(&self, _params: Params, _ctx: RequestContext) -> ResultEnvelope {
        panic!("function exploded");
    }
}

/// Reports failure without a code.
struct SilentFailure {
    decl: FunctionDecl,
}

#[async_trait]
impl PrefabFunction for SilentFailure {
    fn declaration(&self) -> &FunctionDecl {
        &self.decl
    }

    async fn invoke(&self, _params: Params, _ctx: RequestContext) -> ResultEnvelope {
        serde_json::from_str(r#"{"success": false}"#).unwrap()
    }
}

/// Reports success for an output it never wrote.
struct ForgetsOutput {
    decl: FunctionDecl,
}

#[async_trait]
impl PrefabFunction for ForgetsOutput {
    fn declaration(&self) -> &FunctionDecl {
        &self.decl
    }

    async fn invoke(&self, _params: Params, ctx: RequestContext) -> ResultEnvelope {
        let never = ctx.outputs_dir().unwrap().join("never.bin");
        ResultEnvelope::ok().with_output_file("output_file", &never)
    }
}

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    temp: TempDir,
    gateway: Gateway,
    store: ArtifactStore,
    copy: Arc<CopyInput>,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let backend = Arc::new(FakeBackend::new(hd_clip()));
        let mut registry: FunctionRegistry = media_registry(backend).unwrap();

        let copy = Arc::new(CopyInput::new());
        registry.register(copy.clone()).unwrap();
        registry
            .register(Arc::new(FailsWithOutput {
                decl: FunctionDecl::new("fails_with_output", "")
                    .returns("output_file", ParamType::OutputFile),
            }))
            .unwrap();
        registry
            .register(Arc::new(Explodes {
                decl: FunctionDecl::new("explodes", ""),
            }))
            .unwrap();
        registry
            .register(Arc::new(SilentFailure {
                decl: FunctionDecl::new("silent_failure", ""),
            }))
            .unwrap();
        registry
            .register(Arc::new(ForgetsOutput {
                decl: FunctionDecl::new("forgets_output", "")
                    .returns("output_file", ParamType::OutputFile),
            }))
            .unwrap();

        let workspaces = WorkspaceManager::with_path(temp.path().join("ws")).unwrap();
        let artifacts = temp.path().join("artifacts");
        let gateway = Gateway::new(
            workspaces,
            Arc::new(ArtifactStore::with_path(artifacts.clone()).unwrap()),
            registry,
        );
        let store = ArtifactStore::with_path(artifacts).unwrap();

        Self {
            temp,
            gateway,
            store,
            copy,
        }
    }

    fn upload(&self, name: &str, data: &[u8]) -> StagingSource {
        let path = self.temp.path().join("uploads").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, data).unwrap();
        StagingSource::Path(path)
    }

    fn live_workspaces(&self) -> Vec<String> {
        self.gateway.workspaces().list_workspaces().unwrap()
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_invoke_stages_collects_and_tears_down() {
    let fx = Fixture::new();
    let request = InvocationRequest::new("copy_input")
        .with_request_id("req-copy")
        .with_input("source", fx.upload("clip.mov", b"movie"));

    let response = fx.gateway.invoke(request).await.unwrap();

    assert_eq!(response.request_id, "req-copy");
    assert!(response.envelope.success);
    assert_eq!(response.outputs.len(), 1);
    let artifact = &response.outputs[0].artifact;
    assert_eq!(fx.store.get_artifact(&artifact.digest).unwrap(), b"movie");
    assert!(fx.live_workspaces().is_empty(), "workspace removed after request");
}

#[tokio::test]
async fn test_function_sees_staged_path_and_context() {
    let fx = Fixture::new();
    let request = InvocationRequest::new("copy_input")
        .with_request_id("req-seen")
        .with_param("suffix", "x")
        .with_input("source", fx.upload("clip.mov", b"movie"));

    fx.gateway.invoke(request).await.unwrap();

    let (params, ctx) = fx.copy.seen.lock().unwrap().clone().unwrap();
    let root = fx.gateway.workspaces().root().join("req-seen");
    assert_eq!(
        params["source"],
        Value::String(root.join("inputs").join("clip.mov").to_string_lossy().into_owned())
    );
    assert_eq!(params["suffix"], "x");
    assert_eq!(ctx.outputs_dir(), Some(root.join("outputs").as_path()));
    assert_eq!(ctx.request_id.as_deref(), Some("req-seen"));
}

#[tokio::test]
async fn test_generated_request_id() {
    let fx = Fixture::new();
    let request =
        InvocationRequest::new("copy_input").with_input("source", fx.upload("a.bin", b"a"));

    let response = fx.gateway.invoke(request).await.unwrap();

    assert!(validate_request_id(&response.request_id).is_ok());
}

#[tokio::test]
async fn test_unknown_function_creates_no_workspace() {
    let fx = Fixture::new();

    let err = fx
        .gateway
        .invoke(InvocationRequest::new("nope").with_request_id("req-nope"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::FunctionNotFound(_)));
    assert!(fx.live_workspaces().is_empty());
}

#[tokio::test]
async fn test_request_id_collision_is_rejected() {
    let fx = Fixture::new();
    fx.gateway.workspaces().create("req-busy").unwrap();

    let err = fx
        .gateway
        .invoke(
            InvocationRequest::new("copy_input")
                .with_request_id("req-busy")
                .with_input("source", fx.upload("a.bin", b"a")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::WorkspaceCreation { .. }));
    assert_eq!(fx.live_workspaces(), vec!["req-busy"], "existing workspace untouched");
}

// =============================================================================
// Staging Rule Tests
// =============================================================================

#[tokio::test]
async fn test_undeclared_upload_aborts_request() {
    let fx = Fixture::new();

    let err = fx
        .gateway
        .invoke(
            InvocationRequest::new("copy_input")
                .with_input("source", fx.upload("a.bin", b"a"))
                .with_input("suffix", fx.upload("b.bin", b"b")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Staging { .. }));
    assert!(fx.copy.seen.lock().unwrap().is_none(), "function never ran");
    assert!(fx.live_workspaces().is_empty());
}

#[tokio::test]
async fn test_missing_required_file_aborts_request() {
    let fx = Fixture::new();

    let err = fx
        .gateway
        .invoke(InvocationRequest::new("copy_input"))
        .await
        .unwrap_err();

    match err {
        Error::Staging { parameter, .. } => assert_eq!(parameter, "source"),
        other => panic!("unexpected error: {}", other),
    }
    assert!(fx.live_workspaces().is_empty());
}

#[tokio::test]
async fn test_file_parameter_as_plain_value_is_rejected() {
    let fx = Fixture::new();

    let err = fx
        .gateway
        .invoke(InvocationRequest::new("copy_input").with_param("source", "/etc/passwd"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Staging { .. }));
}

#[tokio::test]
async fn test_two_files_for_single_file_parameter() {
    let fx = Fixture::new();

    let err = fx
        .gateway
        .invoke(
            InvocationRequest::new("copy_input")
                .with_input("source", fx.upload("a.bin", b"a"))
                .with_input("source", fx.upload("b.bin", b"b")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Staging { .. }));
}

// =============================================================================
// Failure Handling Tests
// =============================================================================

#[tokio::test]
async fn test_failure_envelope_has_no_output_files() {
    let fx = Fixture::new();

    let response = fx
        .gateway
        .invoke(InvocationRequest::new("fails_with_output"))
        .await
        .unwrap();

    assert!(!response.envelope.success);
    assert!(response.envelope.field("output_file").is_none());
    assert!(response.outputs.is_empty());
    assert!(fx.store.list_artifacts().unwrap().is_empty());
    assert!(fx.live_workspaces().is_empty());
}

#[tokio::test]
async fn test_panicking_function_becomes_processing_error() {
    let fx = Fixture::new();

    let response = fx
        .gateway
        .invoke(InvocationRequest::new("explodes").with_request_id("req-boom"))
        .await
        .unwrap();

    assert!(!response.envelope.success);
    assert_eq!(response.envelope.error_code, Some(ErrorCode::ProcessingError));
    assert!(fx.live_workspaces().is_empty(), "teardown runs after a panic");
}

#[tokio::test]
async fn test_failure_without_code_is_normalized() {
    let fx = Fixture::new();

    let response = fx
        .gateway
        .invoke(InvocationRequest::new("silent_failure"))
        .await
        .unwrap();

    assert_eq!(response.envelope.error_code, Some(ErrorCode::ProcessingError));
    assert!(response.envelope.error.is_some());
}

#[tokio::test]
async fn test_missing_output_still_tears_down() {
    let fx = Fixture::new();

    let err = fx
        .gateway
        .invoke(InvocationRequest::new("forgets_output").with_request_id("req-forgot"))
        .await
        .unwrap_err();

    match err {
        Error::MissingOutput { field, path } => {
            assert_eq!(field, "output_file");
            assert!(path.ends_with("req-forgot/outputs/never.bin"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(fx.live_workspaces().is_empty(), "workspace removed after failed collection");
    assert!(fx.store.list_artifacts().unwrap().is_empty());
}

// =============================================================================
// Media Function Tests
// =============================================================================

#[tokio::test]
async fn test_trim_out_of_range_through_gateway() {
    let fx = Fixture::new();

    let response = fx
        .gateway
        .invoke(
            InvocationRequest::new("trim_video")
                .with_param("start_time", 60.0)
                .with_param("end_time", 120.0)
                .with_input("video_path", fx.upload("clip.mp4", b"video")),
        )
        .await
        .unwrap();

    assert!(!response.envelope.success);
    assert_eq!(response.envelope.error_code, Some(ErrorCode::TimeOutOfRange));
    assert!(response.outputs.is_empty());
    assert!(fx.live_workspaces().is_empty());
}

#[tokio::test]
async fn test_trim_success_through_gateway() {
    let fx = Fixture::new();

    let response = fx
        .gateway
        .invoke(
            InvocationRequest::new("trim_video")
                .with_request_id("req-trim")
                .with_param("start_time", 5.0)
                .with_param("end_time", 15.0)
                .with_input("video_path", fx.upload("clip.mp4", b"video")),
        )
        .await
        .unwrap();

    assert!(response.envelope.success);
    let expected = fx
        .gateway
        .workspaces()
        .root()
        .join("req-trim/outputs/clip_trimmed.mp4");
    assert_eq!(response.envelope.output_file("output_file"), Some(expected));
    assert_eq!(response.outputs.len(), 1);
    assert_eq!(
        fx.store.get_artifact(&response.outputs[0].artifact.digest).unwrap(),
        b"trim_video"
    );
}

#[tokio::test]
async fn test_concatenate_without_uploads_is_insufficient() {
    let fx = Fixture::new();

    let response = fx
        .gateway
        .invoke(InvocationRequest::new("concatenate_videos"))
        .await
        .unwrap();

    assert_eq!(response.envelope.error_code, Some(ErrorCode::InsufficientVideos));
}

#[tokio::test]
async fn test_concatenate_multiple_uploads() {
    let fx = Fixture::new();

    let response = fx
        .gateway
        .invoke(
            InvocationRequest::new("concatenate_videos")
                .with_input("video_paths", fx.upload("a.mp4", b"a"))
                .with_input("video_paths", fx.upload("b.mp4", b"b"))
                .with_input("video_paths", fx.upload("a.mp4", b"again")),
        )
        .await
        .unwrap();

    assert!(response.envelope.success, "{:?}", response.envelope);
    assert_eq!(response.envelope.field("video_count"), Some(&Value::from(3)));
}

#[tokio::test]
async fn test_resize_without_size_through_gateway() {
    let fx = Fixture::new();

    let response = fx
        .gateway
        .invoke(
            InvocationRequest::new("resize_video")
                .with_input("video_path", fx.upload("clip.mp4", b"video")),
        )
        .await
        .unwrap();

    assert_eq!(response.envelope.error_code, Some(ErrorCode::MissingSizeParameter));
}

// =============================================================================
// Output Confinement Tests
// =============================================================================

#[tokio::test]
async fn test_absolute_output_path_is_rejected() {
    let fx = Fixture::new();
    let outside = fx.temp.path().join("escaped").join("evil.mp4");

    let response = fx
        .gateway
        .invoke(
            InvocationRequest::new("trim_video")
                .with_param("start_time", 0.0)
                .with_param("end_time", 1.0)
                .with_param("output_path", outside.to_string_lossy().into_owned())
                .with_input("video_path", fx.upload("clip.mp4", b"video")),
        )
        .await
        .unwrap();

    assert_eq!(response.envelope.error_code, Some(ErrorCode::TrimError));
    assert!(response.outputs.is_empty());
    assert!(!outside.exists(), "nothing written outside the workspace");
    assert!(!fx.temp.path().join("escaped").exists());
    assert!(fx.live_workspaces().is_empty());
}

#[tokio::test]
async fn test_parent_dir_output_path_is_rejected() {
    let fx = Fixture::new();

    let response = fx
        .gateway
        .invoke(
            InvocationRequest::new("resize_video")
                .with_param("scale", 0.5)
                .with_param("output_path", "../../../escaped/evil.mp4")
                .with_input("video_path", fx.upload("clip.mp4", b"video")),
        )
        .await
        .unwrap();

    assert_eq!(response.envelope.error_code, Some(ErrorCode::ResizeError));
    assert!(response.outputs.is_empty());
    assert!(!fx.temp.path().join("escaped").exists());
}

#[tokio::test]
async fn test_audio_format_must_be_bare_extension() {
    let fx = Fixture::new();

    let response = fx
        .gateway
        .invoke(
            InvocationRequest::new("video_to_audio")
                .with_param("audio_format", "mp3/../../../../escaped/x")
                .with_input("video_path", fx.upload("clip.mp4", b"video")),
        )
        .await
        .unwrap();

    assert_eq!(response.envelope.error_code, Some(ErrorCode::ConversionError));
    assert!(response.envelope.field("output_file").is_none());
    assert!(!fx.temp.path().join("escaped").exists());
}

#[tokio::test]
async fn test_resize_reports_sizes_as_objects() {
    let fx = Fixture::new();

    let response = fx
        .gateway
        .invoke(
            InvocationRequest::new("resize_video")
                .with_param("width", 1280)
                .with_input("video_path", fx.upload("clip.mp4", b"video")),
        )
        .await
        .unwrap();

    assert!(response.envelope.success, "{:?}", response.envelope);
    assert_eq!(
        response.envelope.field("original_size"),
        Some(&serde_json::json!({"width": 1920, "height": 1080}))
    );
    assert_eq!(
        response.envelope.field("new_size"),
        Some(&serde_json::json!({"width": 1280, "height": 720}))
    );
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    let fx = Fixture::new();
    let first = InvocationRequest::new("copy_input")
        .with_request_id("req-a")
        .with_input("source", fx.upload("same.bin", b"first"));
    let second = InvocationRequest::new("copy_input")
        .with_request_id("req-b")
        .with_input("source", fx.upload("other/same.bin", b"second"));

    let (a, b) = tokio::join!(fx.gateway.invoke(first), fx.gateway.invoke(second));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(fx.store.get_artifact(&a.outputs[0].artifact.digest).unwrap(), b"first");
    assert_eq!(fx.store.get_artifact(&b.outputs[0].artifact.digest).unwrap(), b"second");
    assert!(fx.live_workspaces().is_empty());
}
