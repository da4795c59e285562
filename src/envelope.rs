//! The uniform result envelope returned by every function.
//!
//! ```json
//! { "success": true, "output_file": "/ws/req/outputs/clip_trimmed.mp4", "duration": 20.0 }
//! { "success": false, "error": "end time exceeds media", "error_code": "TIME_OUT_OF_RANGE" }
//! ```
//!
//! A failed envelope must not reference collectible output files; see
//! [`ResultEnvelope::enforce_failure_invariant`].

use crate::manifest::FunctionDecl;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

// =============================================================================
// Error Codes
// =============================================================================

/// Enumerated function-level error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation
    FileNotFound,
    NoAudioTrack,
    InvalidStartTime,
    InvalidTimeRange,
    TimeOutOfRange,
    MissingSizeParameter,
    InsufficientVideos,
    // Processing
    ConversionError,
    ConcatenationError,
    TrimError,
    ResizeError,
    ExtractError,
    InfoError,
    ProcessingError,
}

/// Where in a function's flow an error was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before delegating to the media library.
    Validation,
    /// Raised by the media library (or the function runtime) while working.
    Processing,
}

impl ErrorCode {
    /// All codes, in declaration order.
    pub const ALL: [ErrorCode; 14] = [
        Self::FileNotFound,
        Self::NoAudioTrack,
        Self::InvalidStartTime,
        Self::InvalidTimeRange,
        Self::TimeOutOfRange,
        Self::MissingSizeParameter,
        Self::InsufficientVideos,
        Self::ConversionError,
        Self::ConcatenationError,
        Self::TrimError,
        Self::ResizeError,
        Self::ExtractError,
        Self::InfoError,
        Self::ProcessingError,
    ];

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::NoAudioTrack => "NO_AUDIO_TRACK",
            Self::InvalidStartTime => "INVALID_START_TIME",
            Self::InvalidTimeRange => "INVALID_TIME_RANGE",
            Self::TimeOutOfRange => "TIME_OUT_OF_RANGE",
            Self::MissingSizeParameter => "MISSING_SIZE_PARAMETER",
            Self::InsufficientVideos => "INSUFFICIENT_VIDEOS",
            Self::ConversionError => "CONVERSION_ERROR",
            Self::ConcatenationError => "CONCATENATION_ERROR",
            Self::TrimError => "TRIM_ERROR",
            Self::ResizeError => "RESIZE_ERROR",
            Self::ExtractError => "EXTRACT_ERROR",
            Self::InfoError => "INFO_ERROR",
            Self::ProcessingError => "PROCESSING_ERROR",
        }
    }

    /// Parses the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_str() == s)
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::FileNotFound
            | Self::NoAudioTrack
            | Self::InvalidStartTime
            | Self::InvalidTimeRange
            | Self::TimeOutOfRange
            | Self::MissingSizeParameter
            | Self::InsufficientVideos => ErrorCategory::Validation,
            Self::ConversionError
            | Self::ConcatenationError
            | Self::TrimError
            | Self::ResizeError
            | Self::ExtractError
            | Self::InfoError
            | Self::ProcessingError => ErrorCategory::Processing,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Result Envelope
// =============================================================================

/// Success flag, optional error, and declared result fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Declared result fields, flattened into the top-level object.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ResultEnvelope {
    /// An empty success envelope.
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            error_code: None,
            fields: Map::new(),
        }
    }

    /// A failure envelope with no fields.
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            error_code: Some(code),
            fields: Map::new(),
        }
    }

    /// Adds a result field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Adds a result field holding a file path.
    pub fn with_output_file(self, name: impl Into<String>, path: &Path) -> Self {
        let value = path.to_string_lossy().into_owned();
        self.with_field(name, value)
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Reads a result field as a path.
    pub fn output_file(&self, name: &str) -> Option<PathBuf> {
        self.fields.get(name)?.as_str().map(PathBuf::from)
    }

    /// Strips declared output-file fields from a failed envelope.
    ///
    /// Returns the names of the removed fields. Success envelopes are left
    /// untouched.
    pub fn enforce_failure_invariant(&mut self, decl: &FunctionDecl) -> Vec<String> {
        if self.success {
            return Vec::new();
        }

        let removed: Vec<String> = decl
            .output_file_fields()
            .filter(|name| self.fields.remove(*name).is_some())
            .map(str::to_string)
            .collect();

        if !removed.is_empty() {
            warn!(
                "{} reported failure with output files {:?}; dropped them",
                decl.name, removed
            );
        }
        removed
    }

    /// Checks that success and error reporting agree.
    pub fn is_well_formed(&self) -> bool {
        if self.success {
            self.error_code.is_none()
        } else {
            self.error_code.is_some() && self.error.is_some()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_names_match_as_str() {
        for code in ErrorCode::ALL {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, Value::String(code.as_str().to_string()));
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
    }

    #[test]
    fn test_fields_flatten() {
        let envelope = ResultEnvelope::ok().with_field("duration", 20.0);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["duration"], 20.0);
        assert!(json.get("error").is_none());
        assert!(json.get("fields").is_none());
    }
}
