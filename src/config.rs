//! Gateway configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is
//! a valid configuration.

use crate::constants::{
    ARTIFACTS_DIR, DEFAULT_STALE_WORKSPACE_AGE, DEFAULT_TOOL_TIMEOUT, GATEWAY_HOME_DIR,
    WORKSPACES_DIR,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration for a [`Gateway`](crate::gateway::Gateway).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Root under which request workspaces are allocated.
    pub workspace_root: PathBuf,
    /// Root of the content-addressed artifact store.
    pub artifact_root: PathBuf,
    /// ffmpeg executable (name on `PATH` or absolute path).
    pub ffmpeg_path: PathBuf,
    /// ffprobe executable (name on `PATH` or absolute path).
    pub ffprobe_path: PathBuf,
    /// Timeout for a single media tool run, in seconds.
    pub tool_timeout_secs: u64,
    /// Age after which `sweep` removes a workspace, in seconds.
    pub stale_workspace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let home = gateway_home();
        Self {
            workspace_root: home.join(WORKSPACES_DIR),
            artifact_root: home.join(ARTIFACTS_DIR),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT.as_secs(),
            stale_workspace_secs: DEFAULT_STALE_WORKSPACE_AGE.as_secs(),
        }
    }
}

impl GatewayConfig {
    /// Loads a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Serialization(format!("failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parses a configuration from JSON text.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::Serialization(format!("invalid config: {}", e)))
    }

    /// Places both roots under a single base directory.
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        self.workspace_root = base.join(WORKSPACES_DIR);
        self.artifact_root = base.join(ARTIFACTS_DIR);
        self
    }

    /// Media tool timeout.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Stale workspace age.
    pub fn stale_workspace_age(&self) -> Duration {
        Duration::from_secs(self.stale_workspace_secs)
    }
}

/// Returns the default gateway home directory.
fn gateway_home() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        home.join(GATEWAY_HOME_DIR)
    } else {
        PathBuf::from(GATEWAY_HOME_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = GatewayConfig::from_json("{}").unwrap();
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{"ffmpeg_path": "/opt/ffmpeg/bin/ffmpeg", "tool_timeout_secs": 5}"#;
        let config = GatewayConfig::from_json(json).unwrap();
        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.tool_timeout(), Duration::from_secs(5));
        assert_eq!(config.ffprobe_path, PathBuf::from("ffprobe"));
    }

    #[test]
    fn test_with_base_dir() {
        let config = GatewayConfig::default().with_base_dir(Path::new("/srv/prefab"));
        assert_eq!(config.workspace_root, PathBuf::from("/srv/prefab/workspaces"));
        assert_eq!(config.artifact_root, PathBuf::from("/srv/prefab/artifacts"));
    }
}
