//! Error types for the workspace gateway.
//!
//! These are infrastructure-level failures. Function-level failures never
//! surface here; they are reported inside a
//! [`ResultEnvelope`](crate::envelope::ResultEnvelope) with an
//! [`ErrorCode`](crate::envelope::ErrorCode).

use std::path::PathBuf;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the workspace gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Request Errors
    // =========================================================================
    /// Request identifier failed validation.
    #[error("invalid request ID '{id}': {reason}")]
    InvalidRequestId { id: String, reason: String },

    // =========================================================================
    // Workspace Errors
    // =========================================================================
    /// Workspace directories could not be allocated.
    #[error("failed to create workspace at {path}: {reason}")]
    WorkspaceCreation { path: PathBuf, reason: String },

    /// No workspace exists for the request.
    #[error("workspace not found for request: {0}")]
    WorkspaceNotFound(String),

    /// Workspace removal failed.
    #[error("failed to tear down workspace '{id}': {reason}")]
    TeardownFailed { id: String, reason: String },

    /// Outputs directory could not be derived from an input path.
    #[error("cannot derive outputs directory from input path {input}")]
    OutputsDirUnresolvable { input: PathBuf },

    // =========================================================================
    // Staging Errors
    // =========================================================================
    /// Input file could not be staged.
    #[error("failed to stage input '{parameter}': {reason}")]
    Staging { parameter: String, reason: String },

    /// Filename would escape the inputs directory.
    #[error("path traversal detected in filename: {path}")]
    PathTraversal { path: String },

    // =========================================================================
    // Collection Errors
    // =========================================================================
    /// A declared output was reported but is not on disk.
    #[error("declared output '{field}' missing at {path}")]
    MissingOutput { field: String, path: PathBuf },

    /// A present output could not be persisted.
    #[error("failed to collect output '{field}': {reason}")]
    CollectionFailed { field: String, reason: String },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Artifact store initialization failed.
    #[error("failed to initialize storage at {path}: {reason}")]
    StorageInitFailed { path: PathBuf, reason: String },

    /// Artifact not found in storage.
    #[error("artifact not found: {digest}")]
    ArtifactNotFound { digest: String },

    /// Storage write failed.
    #[error("failed to write to storage: {0}")]
    StorageWriteFailed(String),

    // =========================================================================
    // Function / Manifest Errors
    // =========================================================================
    /// No function registered under the name.
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    /// A function with the same name is already registered.
    #[error("function already registered: {0}")]
    FunctionAlreadyRegistered(String),

    /// Manifest failed validation.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Function parameters could not be decoded.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    // =========================================================================
    // Media Tool Errors
    // =========================================================================
    /// External media tool exited unsuccessfully.
    #[error("{tool} failed: {reason}")]
    MediaTool { tool: String, reason: String },

    /// External media tool could not be launched.
    #[error("{tool} not available: {reason}")]
    MediaToolUnavailable { tool: String, reason: String },

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
