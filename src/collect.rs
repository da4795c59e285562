//! Output collection.
//!
//! After a function returns, every field its declaration types as
//! `OutputFile` is read from the envelope, checked, and handed to an
//! [`OutputSink`] for persistence outside the workspace.
//!
//! ## Rules
//!
//! - A failed envelope collects nothing.
//! - Relative paths are resolved against the workspace's `outputs/`.
//! - Paths outside the request workspace are not collected (they are listed
//!   in [`CollectionReport::skipped`]).
//! - Every path is checked before anything is persisted, so a missing output
//!   fails the whole collection with [`Error::MissingOutput`] and leaves the
//!   sink untouched.
//! - Fields naming the same file are persisted once and share the artifact.

use crate::envelope::ResultEnvelope;
use crate::error::{Error, Result};
use crate::manifest::FunctionDecl;
use crate::storage::{ArtifactRef, ArtifactStore};
use crate::workspace::Workspace;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Destination for collected output files.
pub trait OutputSink: Send + Sync {
    /// Persists the file at `path`, produced for result field `field`.
    fn persist(&self, field: &str, path: &Path) -> Result<ArtifactRef>;
}

impl OutputSink for ArtifactStore {
    fn persist(&self, field: &str, path: &Path) -> Result<ArtifactRef> {
        self.put_file(path).map_err(|e| Error::CollectionFailed {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}

/// One collected output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectedOutput {
    /// Result field the file was declared under.
    pub field: String,
    /// Path the function reported.
    pub source: PathBuf,
    /// Where the file now lives.
    pub artifact: ArtifactRef,
}

/// Outcome of a collection pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionReport {
    pub collected: Vec<CollectedOutput>,
    /// Fields whose paths were outside the workspace.
    pub skipped: Vec<String>,
}

impl CollectionReport {
    /// Looks up the collected output for a field.
    pub fn get(&self, field: &str) -> Option<&CollectedOutput> {
        self.collected.iter().find(|c| c.field == field)
    }
}

/// Collects the declared output files of `envelope` into `sink`.
pub fn collect_outputs(
    workspace: &Workspace,
    envelope: &ResultEnvelope,
    decl: &FunctionDecl,
    sink: &dyn OutputSink,
) -> Result<CollectionReport> {
    let mut report = CollectionReport::default();
    if !envelope.success {
        return Ok(report);
    }

    // Plan and check every output before persisting any of them
    let mut planned: Vec<(String, PathBuf)> = Vec::new();
    for field in decl.output_file_fields() {
        let path = match envelope.field(field) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => workspace.resolve_output_path(Path::new(s)),
            Some(other) => {
                return Err(Error::CollectionFailed {
                    field: field.to_string(),
                    reason: format!("expected a path, got {}", other),
                });
            }
        };

        if !path.exists() {
            if path.starts_with(&workspace.root) {
                return Err(Error::MissingOutput {
                    field: field.to_string(),
                    path,
                });
            }
            warn!("Output '{}' at {} is outside the workspace", field, path.display());
            report.skipped.push(field.to_string());
            continue;
        }

        if !workspace.contains(&path) {
            warn!("Output '{}' at {} is outside the workspace", field, path.display());
            report.skipped.push(field.to_string());
            continue;
        }

        if !path.is_file() {
            return Err(Error::CollectionFailed {
                field: field.to_string(),
                reason: format!("{} is not a regular file", path.display()),
            });
        }

        planned.push((field.to_string(), path));
    }

    let mut persisted: HashMap<PathBuf, ArtifactRef> = HashMap::new();
    for (field, path) in planned {
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        let artifact = match persisted.get(&key) {
            Some(existing) => {
                debug!("Output '{}' shares file {}", field, path.display());
                existing.clone()
            }
            None => {
                let artifact = sink.persist(&field, &path)?;
                persisted.insert(key, artifact.clone());
                artifact
            }
        };

        report.collected.push(CollectedOutput {
            field,
            source: path,
            artifact,
        });
    }

    info!(
        "Collected {} outputs for request {} ({} skipped)",
        report.collected.len(),
        workspace.request_id,
        report.skipped.len()
    );

    Ok(report)
}
