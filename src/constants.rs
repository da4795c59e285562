//! # Gateway Constants
//!
//! Directory names, size limits, timeouts, and validation allowlists for the
//! request workspace layer. These constants are the **single source of truth**
//! for the bounds enforced by [`crate::workspace`], [`crate::collect`], and
//! [`crate::media`].
//!
//! ## Cross-References
//!
//! - [`crate::workspace`]: Uses directory names, request-id validation and
//!   input size limits
//! - [`crate::storage`]: Uses the artifact directory layout
//! - [`crate::media::ffmpeg`]: Uses tool timeouts

use std::time::Duration;

// =============================================================================
// Workspace Layout
// =============================================================================
//
// <root>/{request_id}/inputs/<staged filename>
// <root>/{request_id}/outputs/<function chosen filename>
// =============================================================================

/// Subdirectory of a request workspace holding staged input files.
pub const INPUTS_DIR: &str = "inputs";

/// Subdirectory of a request workspace exposed to functions for outputs.
pub const OUTPUTS_DIR: &str = "outputs";

/// Default directory name (under the home directory) for gateway state.
pub const GATEWAY_HOME_DIR: &str = ".prefabrun";

/// Directory under [`GATEWAY_HOME_DIR`] holding request workspaces.
pub const WORKSPACES_DIR: &str = "workspaces";

/// Directory under [`GATEWAY_HOME_DIR`] holding collected artifacts.
pub const ARTIFACTS_DIR: &str = "artifacts";

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum size of a single staged input file (4 GiB).
///
/// **Security**: Bounds disk usage per staged file. Checked against the source
/// metadata before copying, and against the buffer length for byte uploads.
pub const MAX_INPUT_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Maximum number of input files staged into a single workspace.
///
/// **Rationale**: Concatenation is the only operation taking a file list;
/// 64 clips is well beyond practical use.
pub const MAX_INPUTS_PER_REQUEST: usize = 64;

/// Maximum number of collision-suffixed names tried while staging.
pub const MAX_STAGING_NAME_ATTEMPTS: usize = 1024;

/// Number of stderr bytes kept from a failed media tool run.
pub const TOOL_STDERR_TAIL_BYTES: usize = 2048;

// =============================================================================
// Timeouts
// =============================================================================

/// Default timeout for a single ffmpeg/ffprobe invocation.
///
/// Transcoding a long source is slow; the bound exists to stop hung
/// processes, not to police normal work.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Timeout for ffprobe metadata reads.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Age after which an orphaned workspace is removed by a sweep.
pub const DEFAULT_STALE_WORKSPACE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Media Defaults
// =============================================================================

/// Default audio container for `video_to_audio`.
pub const DEFAULT_AUDIO_FORMAT: &str = "mp3";

/// Default audio bitrate for `video_to_audio`.
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";

/// Default output filename for `concatenate_videos`.
pub const DEFAULT_CONCAT_OUTPUT: &str = "concatenated_output.mp4";

/// Video codec used for every re-encoding operation.
pub const VIDEO_CODEC: &str = "libx264";

/// Audio codec used alongside [`VIDEO_CODEC`].
pub const VIDEO_AUDIO_CODEC: &str = "aac";

// =============================================================================
// Validation Patterns
// =============================================================================

/// Valid characters for request identifiers.
///
/// Includes: `a-z`, `A-Z`, `0-9`, `-`, `_`
///
/// **Security**: Excludes `/`, `.`, and other characters that could be used
/// for path traversal when request ids become directory names.
pub const REQUEST_ID_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

/// Maximum request identifier length.
///
/// **Rationale**: 128 characters accommodates UUIDs and caller-chosen ids.
pub const MAX_REQUEST_ID_LEN: usize = 128;

// =============================================================================
// Request ID Validation Helper
// =============================================================================

/// Validates a request identifier before it is used as a directory name.
///
/// # Returns
///
/// `Ok(())` if valid, `Err(reason)` with a description of the failure.
#[inline]
#[must_use = "validation result must be checked before building workspace paths"]
pub fn validate_request_id(id: &str) -> std::result::Result<(), &'static str> {
    if id.is_empty() {
        return Err("request ID cannot be empty");
    }
    if id.len() > MAX_REQUEST_ID_LEN {
        return Err("request ID exceeds maximum length");
    }
    if !id.chars().all(|c| REQUEST_ID_VALID_CHARS.contains(c)) {
        return Err("request ID contains invalid characters");
    }
    Ok(())
}

/// Generates a fresh, time-ordered request identifier.
pub fn generate_request_id() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}
