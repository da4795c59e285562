//! # Request Workspaces
//!
//! Per-request file isolation for function invocations. Every request gets a
//! private directory tree under the manager root:
//!
//! ```text
//! <root>/
//! └── <request_id>/
//!     ├── inputs/    (staged by the gateway, read-only for the function)
//!     │   └── clip.mov
//!     └── outputs/   (written by the function, collected by the gateway)
//!         └── clip_trimmed.mp4
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//!   create ──► stage_input* ──► (function runs) ──► collect ──► teardown
//!      │             │                                             ▲
//!      │             └──── staging failure ───────────────────────┤
//!      └──────────────────── any error / panic (TeardownGuard) ───┘
//! ```
//!
//! Workspaces are ephemeral. Nothing inside one survives [`WorkspaceManager::teardown`],
//! and teardown of an unknown or already-removed request is a no-op.
//!
//! ## Security Model
//!
//! - Request ids are validated against an allowlist before they become
//!   directory names (see [`crate::constants::validate_request_id`]).
//! - Staged filenames are reduced to a single path component; names that
//!   would escape `inputs/` are rejected.
//! - On Unix the request directory is created with mode `0o700`.
//! - Staged files are written to a temp name and renamed into place, so a
//!   function never sees a partially written input.
//!
//! ## Collisions
//!
//! Request directories are created non-recursively, so two requests using
//! the same id cannot share a workspace: the second `create` fails with
//! [`Error::WorkspaceCreation`]. Two inputs with the same filename in one
//! request are staged as `<stem>_1.<ext>`, `<stem>_2.<ext>`, ... so that all
//! inputs stay directly under `inputs/`.

use crate::config::GatewayConfig;
use crate::constants::{
    INPUTS_DIR, MAX_INPUT_FILE_SIZE, MAX_INPUTS_PER_REQUEST, MAX_STAGING_NAME_ATTEMPTS,
    OUTPUTS_DIR, validate_request_id,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

// =============================================================================
// Workspace
// =============================================================================

/// A live request workspace.
///
/// All paths are absolute. The workspace is owned by the gateway; functions
/// only ever receive paths into it.
#[derive(Debug, Clone, Serialize)]
pub struct Workspace {
    /// Request identifier (also the directory name).
    pub request_id: String,
    /// `<root>/<request_id>`.
    pub root: PathBuf,
    /// `<root>/<request_id>/inputs`.
    pub inputs_dir: PathBuf,
    /// `<root>/<request_id>/outputs`.
    pub outputs_dir: PathBuf,
    /// When the workspace was allocated.
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// Resolves an output path reported by a function.
    ///
    /// Relative paths are taken relative to `outputs/`.
    pub fn resolve_output_path(&self, value: &Path) -> PathBuf {
        if value.is_absolute() {
            value.to_path_buf()
        } else {
            self.outputs_dir.join(value)
        }
    }

    /// Returns true if an existing path lies inside this workspace.
    ///
    /// Symlinks are resolved first, so a link pointing outside the workspace
    /// is not considered contained.
    pub fn contains(&self, path: &Path) -> bool {
        match (fs::canonicalize(path), fs::canonicalize(&self.root)) {
            (Ok(path), Ok(root)) => path.starts_with(root),
            _ => false,
        }
    }
}

// =============================================================================
// Staging Types
// =============================================================================

/// Where a staged input's content comes from.
#[derive(Debug, Clone)]
pub enum StagingSource {
    /// Copy an existing file; its filename is kept.
    Path(PathBuf),
    /// Write an in-memory upload under the given original filename.
    Bytes {
        /// Original filename of the upload.
        filename: String,
        /// File content.
        data: Vec<u8>,
    },
}

/// An input file placed in a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedInput {
    /// Parameter the file was staged for.
    pub parameter: String,
    /// Absolute path under `inputs/`; this is the value passed to the function.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Statistics from a stale-workspace sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    /// Number of workspaces removed.
    pub removed_count: u64,
    /// Bytes freed.
    pub freed_bytes: u64,
}

// =============================================================================
// Workspace Manager
// =============================================================================

/// Allocates, populates and removes request workspaces under a single root.
///
/// ## Thread Safety
///
/// The filesystem is the only state. Requests are isolated by id, so one
/// manager can serve concurrent requests without locking.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    /// Absolute root directory for all request workspaces.
    root: PathBuf,
    /// Largest input that may be staged, in bytes.
    max_input_size: u64,
    /// Most inputs one request may stage.
    max_inputs: usize,
}

impl WorkspaceManager {
    /// Creates a manager at the default root.
    pub fn new() -> Result<Self> {
        Self::with_path(GatewayConfig::default().workspace_root)
    }

    /// Creates a manager rooted at `root`, creating it if necessary.
    ///
    /// Fails with [`Error::WorkspaceCreation`] if the root cannot be created.
    pub fn with_path(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).map_err(|e| Error::WorkspaceCreation {
            path: root.clone(),
            reason: e.to_string(),
        })?;
        let root = fs::canonicalize(&root).map_err(|e| Error::WorkspaceCreation {
            path: root.clone(),
            reason: e.to_string(),
        })?;

        info!("Workspace root initialized at: {}", root.display());

        Ok(Self {
            root,
            max_input_size: MAX_INPUT_FILE_SIZE,
            max_inputs: MAX_INPUTS_PER_REQUEST,
        })
    }

    /// Overrides the staging limits.
    pub fn with_input_limits(mut self, max_input_size: u64, max_inputs: usize) -> Self {
        self.max_input_size = max_input_size;
        self.max_inputs = max_inputs;
        self
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory for a request after validating its id.
    pub fn workspace_path(&self, request_id: &str) -> Result<PathBuf> {
        validate_request_id(request_id).map_err(|reason| Error::InvalidRequestId {
            id: request_id.to_string(),
            reason: reason.to_string(),
        })?;
        Ok(self.root.join(request_id))
    }

    /// Allocates `inputs/` and `outputs/` for a new request.
    ///
    /// Fails with [`Error::WorkspaceCreation`] if the location is not writable
    /// or a workspace with this id already exists.
    pub fn create(&self, request_id: &str) -> Result<Workspace> {
        let root = self.workspace_path(request_id)?;

        create_private_dir(&root).map_err(|e| Error::WorkspaceCreation {
            path: root.clone(),
            reason: if e.kind() == io::ErrorKind::AlreadyExists {
                "workspace already exists".to_string()
            } else {
                e.to_string()
            },
        })?;

        let inputs_dir = root.join(INPUTS_DIR);
        let outputs_dir = root.join(OUTPUTS_DIR);
        for dir in [&inputs_dir, &outputs_dir] {
            if let Err(e) = fs::create_dir(dir) {
                // Leave nothing half-built behind
                let _ = fs::remove_dir_all(&root);
                return Err(Error::WorkspaceCreation {
                    path: dir.clone(),
                    reason: e.to_string(),
                });
            }
        }

        info!("Created workspace {} at {}", request_id, root.display());

        Ok(Workspace {
            request_id: request_id.to_string(),
            root,
            inputs_dir,
            outputs_dir,
            created_at: Utc::now(),
        })
    }

    /// Opens an existing workspace.
    pub fn open(&self, request_id: &str) -> Result<Workspace> {
        let root = self.workspace_path(request_id)?;
        let inputs_dir = root.join(INPUTS_DIR);
        let outputs_dir = root.join(OUTPUTS_DIR);

        if !inputs_dir.is_dir() || !outputs_dir.is_dir() {
            return Err(Error::WorkspaceNotFound(request_id.to_string()));
        }

        let created_at = fs::metadata(&root)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Workspace {
            request_id: request_id.to_string(),
            root,
            inputs_dir,
            outputs_dir,
            created_at,
        })
    }

    /// Returns the absolute `outputs/` directory of an active request.
    pub fn outputs_dir(&self, request_id: &str) -> Result<PathBuf> {
        let outputs_dir = self.workspace_path(request_id)?.join(OUTPUTS_DIR);
        if !outputs_dir.is_dir() {
            return Err(Error::WorkspaceNotFound(request_id.to_string()));
        }
        Ok(outputs_dir)
    }

    /// Places an input file at `inputs/<original_filename>`.
    ///
    /// Returns the absolute path to pass to the function as the parameter
    /// value. Every failure, including a rejected filename or an input over
    /// the limits, is reported as [`Error::Staging`].
    pub fn stage_input(
        &self,
        workspace: &Workspace,
        parameter: &str,
        source: StagingSource,
    ) -> Result<StagedInput> {
        if parameter.is_empty() {
            return Err(Error::Staging {
                parameter: parameter.to_string(),
                reason: "parameter name cannot be empty".to_string(),
            });
        }

        let staging_err = |reason: String| Error::Staging {
            parameter: parameter.to_string(),
            reason,
        };

        let staged_count = fs::read_dir(&workspace.inputs_dir)
            .map_err(|e| staging_err(format!("inputs directory unavailable: {}", e)))?
            .count();
        if staged_count >= self.max_inputs {
            return Err(staging_err(format!(
                "too many inputs for one request (limit {})",
                self.max_inputs
            )));
        }

        let filename = match &source {
            StagingSource::Path(path) => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| staging_err(format!("no filename in {}", path.display())))?,
            StagingSource::Bytes { filename, .. } => {
                sanitize_filename(filename).map_err(|e| staging_err(e.to_string()))?
            }
        };

        let size = match &source {
            StagingSource::Path(path) => fs::metadata(path)
                .map_err(|e| staging_err(format!("cannot read {}: {}", path.display(), e)))?
                .len(),
            StagingSource::Bytes { data, .. } => data.len() as u64,
        };
        if size > self.max_input_size {
            return Err(staging_err(format!(
                "input is {} bytes, limit is {}",
                size, self.max_input_size
            )));
        }

        let target = unique_target(&workspace.inputs_dir, &filename)
            .ok_or_else(|| staging_err(format!("no free name for {}", filename)))?;

        // Write under a temp name, then rename into place
        let temp_path = workspace
            .inputs_dir
            .join(format!(".staging-{}", uuid::Uuid::now_v7()));
        let written = match source {
            StagingSource::Path(path) => fs::copy(&path, &temp_path).map(|_| ()),
            StagingSource::Bytes { data, .. } => fs::write(&temp_path, data),
        };
        if let Err(e) = written.and_then(|_| fs::rename(&temp_path, &target)) {
            let _ = fs::remove_file(&temp_path);
            return Err(staging_err(e.to_string()));
        }

        debug!(
            "Staged input '{}' for request {} at {} ({} bytes)",
            parameter,
            workspace.request_id,
            target.display(),
            size
        );

        Ok(StagedInput {
            parameter: parameter.to_string(),
            path: target,
            size,
        })
    }

    /// Recursively removes the request directory.
    ///
    /// Idempotent: tearing down a request that has no workspace succeeds.
    pub fn teardown(&self, request_id: &str) -> Result<()> {
        let root = self.workspace_path(request_id)?;

        match fs::remove_dir_all(&root) {
            Ok(()) => {
                info!("Tore down workspace {}", request_id);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Workspace {} already removed", request_id);
                Ok(())
            }
            Err(e) => Err(Error::TeardownFailed {
                id: request_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Lists the request ids that currently own a workspace.
    pub fn list_workspaces(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().is_dir()
                && let Some(id) = entry.file_name().to_str()
                && validate_request_id(id).is_ok()
            {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Removes workspaces older than `max_age`.
    ///
    /// Workspaces normally disappear at the end of their request; this
    /// catches the ones orphaned by a crashed process.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<SweepStats> {
        let now = SystemTime::now();
        let mut stats = SweepStats::default();

        for id in self.list_workspaces()? {
            let path = self.root.join(&id);
            let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }

            let size = dir_size(&path);
            match self.teardown(&id) {
                Ok(()) => {
                    stats.removed_count += 1;
                    stats.freed_bytes += size;
                }
                Err(e) => warn!("Failed to sweep workspace {}: {}", id, e),
            }
        }

        info!(
            "Sweep: removed {} workspaces, freed {} bytes",
            stats.removed_count, stats.freed_bytes
        );
        Ok(stats)
    }
}

// =============================================================================
// Teardown Guard
// =============================================================================

/// Tears a workspace down when dropped.
///
/// Holding a guard for the duration of a request makes cleanup run on every
/// exit path, including early returns and panics. Call [`TeardownGuard::finish`]
/// on the normal path to observe teardown errors.
#[must_use = "dropping the guard immediately tears the workspace down"]
pub struct TeardownGuard<'a> {
    manager: &'a WorkspaceManager,
    request_id: String,
    armed: bool,
}

impl<'a> TeardownGuard<'a> {
    /// Arms a guard for `request_id`.
    pub fn new(manager: &'a WorkspaceManager, request_id: impl Into<String>) -> Self {
        Self {
            manager,
            request_id: request_id.into(),
            armed: true,
        }
    }

    /// Tears down now and reports the outcome.
    pub fn finish(mut self) -> Result<()> {
        self.armed = false;
        self.manager.teardown(&self.request_id)
    }
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.manager.teardown(&self.request_id)
        {
            warn!("Teardown of workspace {} failed: {}", self.request_id, e);
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Creates a single directory, private to the current user on Unix.
fn create_private_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().mode(0o700).create(path)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir(path)
    }
}

/// Reduces an uploaded filename to its final path component.
///
/// Client-side directories are dropped; names that are empty, `.`, `..` or
/// contain NUL are rejected.
fn sanitize_filename(raw: &str) -> Result<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return Err(Error::PathTraversal {
            path: raw.to_string(),
        });
    }
    Ok(last.to_string())
}

/// Picks `dir/filename`, or `dir/<stem>_<n>.<ext>` if that is taken.
fn unique_target(dir: &Path, filename: &str) -> Option<PathBuf> {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return Some(candidate);
    }

    let as_path = Path::new(filename);
    let stem = as_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let ext = as_path.extension().and_then(|e| e.to_str());

    (1..=MAX_STAGING_NAME_ATTEMPTS)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{}_{}.{}", stem, n, ext)),
            None => dir.join(format!("{}_{}", stem, n)),
        })
        .find(|p| !p.exists())
}

/// Total size of regular files below `dir`.
fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                dir_size(&path)
            } else {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("clip.mov").unwrap(), "clip.mov");
        assert_eq!(sanitize_filename("../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\clips\\b.mp4").unwrap(), "b.mp4");
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("uploads/..").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("").is_err());
    }

    #[test]
    fn test_unique_target_suffixes() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("clip.mp4"), b"x").unwrap();
        fs::write(temp.path().join("clip_1.mp4"), b"x").unwrap();

        let target = unique_target(temp.path(), "clip.mp4").unwrap();
        assert_eq!(target, temp.path().join("clip_2.mp4"));

        fs::write(temp.path().join("README"), b"x").unwrap();
        let target = unique_target(temp.path(), "README").unwrap();
        assert_eq!(target, temp.path().join("README_1"));
    }

    #[test]
    fn test_dir_size_counts_nested_files() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("nested")).unwrap();
        fs::write(temp.path().join("a"), b"12345").unwrap();
        fs::write(temp.path().join("nested").join("b"), b"123").unwrap();
        assert_eq!(dir_size(temp.path()), 8);
    }
}
