//! Request context injected into function calls, and the outputs-directory
//! resolution policy built on it.
//!
//! The context travels as JSON with a single optional `_workspace` object:
//!
//! ```json
//! { "_workspace": { "outputs_dir": "/srv/ws/<req>/outputs" } }
//! ```
//!
//! A function that receives no context (or a context without `_workspace`)
//! falls back to deriving its outputs directory from an input path: the
//! sibling `outputs/` of the input's parent directory. Both behaviours are
//! exposed as [`OutputsDirStrategy`] variants.

use crate::constants::OUTPUTS_DIR;
use crate::error::{Error, Result};
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Workspace information visible to a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceContext {
    /// Absolute directory the function should write its outputs to.
    pub outputs_dir: PathBuf,
}

/// Context passed alongside a function's parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Request being served, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Workspace details; absent when the function runs outside a gateway.
    #[serde(
        rename = "_workspace",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub workspace: Option<WorkspaceContext>,
}

impl RequestContext {
    /// A context with no workspace; functions fall back to path derivation.
    pub fn detached() -> Self {
        Self::default()
    }

    /// A context exposing the given workspace.
    pub fn for_workspace(workspace: &Workspace) -> Self {
        Self {
            request_id: Some(workspace.request_id.clone()),
            workspace: Some(WorkspaceContext {
                outputs_dir: workspace.outputs_dir.clone(),
            }),
        }
    }

    /// The injected outputs directory, if any.
    pub fn outputs_dir(&self) -> Option<&Path> {
        self.workspace.as_ref().map(|w| w.outputs_dir.as_path())
    }
}

/// How a function locates its outputs directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputsDirStrategy {
    /// Use `_workspace.outputs_dir` from the injected context.
    Context(PathBuf),
    /// Use `parent_of(parent_of(input))/outputs`.
    DerivedFromInput(PathBuf),
}

impl OutputsDirStrategy {
    /// Picks the context strategy when available, else derivation from `input`.
    pub fn select(ctx: &RequestContext, input: &Path) -> Self {
        match ctx.outputs_dir() {
            Some(dir) => Self::Context(dir.to_path_buf()),
            None => Self::DerivedFromInput(input.to_path_buf()),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Context(_) => "context",
            Self::DerivedFromInput(_) => "derived-from-input",
        }
    }

    /// Resolves the outputs directory.
    pub fn resolve(&self) -> Result<PathBuf> {
        match self {
            Self::Context(dir) => Ok(dir.clone()),
            Self::DerivedFromInput(input) => derive_outputs_dir(input),
        }
    }
}

/// Derives `.../<req>/outputs` from `.../<req>/inputs/<file>`.
///
/// Relative inputs are made absolute against the current directory first.
pub fn derive_outputs_dir(input: &Path) -> Result<PathBuf> {
    let unresolvable = || Error::OutputsDirUnresolvable {
        input: input.to_path_buf(),
    };

    let absolute = std::path::absolute(input).map_err(|_| unresolvable())?;
    let request_dir = absolute
        .parent()
        .and_then(Path::parent)
        .ok_or_else(unresolvable)?;

    Ok(request_dir.join(OUTPUTS_DIR))
}

/// Resolves the outputs directory for `input` under `ctx`.
pub fn resolve_outputs_dir(ctx: &RequestContext, input: &Path) -> Result<PathBuf> {
    OutputsDirStrategy::select(ctx, input).resolve()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_serializes_under_workspace_key() {
        let ctx = RequestContext {
            request_id: None,
            workspace: Some(WorkspaceContext {
                outputs_dir: PathBuf::from("/ws/req/outputs"),
            }),
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["_workspace"]["outputs_dir"], "/ws/req/outputs");
        assert!(json.get("request_id").is_none());
    }

    #[test]
    fn test_detached_context_round_trips_empty() {
        let ctx: RequestContext = serde_json::from_str("{}").unwrap();
        assert_eq!(ctx, RequestContext::detached());
        assert!(ctx.outputs_dir().is_none());
    }

    #[test]
    fn test_root_level_input_is_unresolvable() {
        let err = derive_outputs_dir(Path::new("/video.mp4")).unwrap_err();
        assert!(matches!(err, Error::OutputsDirUnresolvable { .. }));
    }
}
