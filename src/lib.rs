//! # prefabrun
//!
//! **Request Workspaces for Prefab Functions**
//!
//! A gateway that hosts small stateless "prefab" functions. Every invocation
//! runs inside a private directory tree that exists only for the duration of
//! the request: uploaded files are staged into it, the function writes its
//! results into it, declared output files are collected out of it, and then
//! the whole tree is removed.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             Gateway                                 │
//! │   lookup → create → stage → invoke → collect → teardown             │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────────────┐   ┌───────────────────────────────────┐  │
//! │  │   WorkspaceManager    │   │        FunctionRegistry           │  │
//! │  │  <root>/<request>/    │   │  PrefabFunction + FunctionDecl    │  │
//! │  │    inputs/ outputs/   │   │  RequestContext → ResultEnvelope  │  │
//! │  └───────────────────────┘   └───────────────┬───────────────────┘  │
//! │  ┌───────────────────────┐                   │                      │
//! │  │    ArtifactStore      │   ┌───────────────▼───────────────────┐  │
//! │  │  sha256/<xx>/<hash>   │   │      Media functions              │  │
//! │  │  (OutputSink)         │   │  MediaBackend → FfmpegBackend     │  │
//! │  └───────────────────────┘   └───────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Workspace Layout
//!
//! ```text
//! <root>/
//! └── <request_id>/
//!     ├── inputs/     staged uploads, one file per InputFile parameter entry
//!     └── outputs/    files written by the function
//! ```
//!
//! Functions find `outputs/` through the `_workspace.outputs_dir` field of
//! the injected [`RequestContext`]. Called without a context they derive it
//! from an input path as `parent(parent(input))/outputs`.
//!
//! # Result Envelopes
//!
//! Functions never raise: they answer with a [`ResultEnvelope`] carrying
//! `success`, an optional `error` and `error_code`, and their declared result
//! fields. A failed envelope never names an output file.
//!
//! # Example
//!
//! ```rust,ignore
//! use prefabrun::{FfmpegBackend, Gateway, GatewayConfig, InvocationRequest, StagingSource};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> prefabrun::Result<()> {
//!     let config = GatewayConfig::default();
//!     let registry = prefabrun::media_registry(Arc::new(FfmpegBackend::from_config(&config)))?;
//!     let gateway = Gateway::from_config(&config, registry)?;
//!
//!     let request = InvocationRequest::new("get_video_info")
//!         .with_input("video_path", StagingSource::Path("clip.mp4".into()));
//!     let response = gateway.invoke(request).await?;
//!     println!("{}", serde_json::to_string_pretty(&response.envelope)?);
//!     Ok(())
//! }
//! ```

pub mod collect;
pub mod config;
pub mod constants;
pub mod context;
pub mod envelope;
pub mod error;
pub mod function;
pub mod gateway;
pub mod manifest;
pub mod media;
pub mod storage;
pub mod workspace;

// Re-exports
pub use collect::{CollectedOutput, CollectionReport, OutputSink, collect_outputs};
pub use config::GatewayConfig;
pub use constants::*;
pub use context::{
    OutputsDirStrategy, RequestContext, WorkspaceContext, derive_outputs_dir, resolve_outputs_dir,
};
pub use envelope::{ErrorCategory, ErrorCode, ResultEnvelope};
pub use error::{Error, Result};
pub use function::{FunctionRegistry, Params, PrefabFunction, decode_params};
pub use gateway::{Gateway, InputUpload, InvocationRequest, InvocationResponse};
pub use manifest::{FunctionDecl, Manifest, ParamDecl, ParamType, ReturnDecl};
pub use media::{
    FfmpegBackend, MediaBackend, MediaInfo, MediaOperation, media_registry, register_media_prefabs,
};
pub use storage::{ArtifactRef, ArtifactStore};
pub use workspace::{
    StagedInput, StagingSource, SweepStats, TeardownGuard, Workspace, WorkspaceManager,
};
