//! # Content-Addressed Artifact Storage
//!
//! Persists collected output files outside the request workspace, keyed by
//! the SHA-256 digest of their content. This is the default
//! [`OutputSink`](crate::collect::OutputSink): once a file is persisted here,
//! the workspace it came from can be torn down.
//!
//! ## Storage Model
//!
//! ```text
//! ~/.prefabrun/artifacts/
//! └── sha256/
//!     ├── ab/
//!     │   └── abcd1234...  (artifact content)
//!     └── cd/
//!         └── cdef5678...  (artifact content)
//! ```
//!
//! The first two hex characters form a shard directory.
//!
//! ## Integrity
//!
//! Files are hashed while being copied to a temp name inside the shard, then
//! renamed into place. Identical outputs from different requests share one
//! copy on disk.
//!
//! Digests are validated before constructing paths: the algorithm must be
//! `sha256` and the hash must be hexadecimal, so a digest can never name a
//! path outside the store.
//!
//! ## Garbage Collection
//!
//! [`ArtifactStore::gc`] removes artifacts not in the caller's referenced
//! set. It is not safe to run concurrently with collection.

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reference to a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// `sha256:<hex>` content digest.
    pub digest: String,
    /// Size in bytes.
    pub size: u64,
    /// Filename the function gave the output.
    pub file_name: String,
}

/// Content-addressed store for collected outputs.
pub struct ArtifactStore {
    /// Base directory for artifact storage.
    base_dir: PathBuf,
}

impl ArtifactStore {
    /// Creates a store at the default location.
    pub fn new() -> Result<Self> {
        Self::with_path(GatewayConfig::default().artifact_root)
    }

    /// Creates a store at the specified path.
    pub fn with_path(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir).map_err(|e| Error::StorageInitFailed {
            path: base_dir.clone(),
            reason: e.to_string(),
        })?;

        info!("Artifact store initialized at: {}", base_dir.display());

        Ok(Self { base_dir })
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Checks if an artifact exists.
    pub fn has_artifact(&self, digest: &str) -> bool {
        self.artifact_path(digest).is_some_and(|p| p.is_file())
    }

    /// Reads an artifact's content.
    pub fn get_artifact(&self, digest: &str) -> Result<Vec<u8>> {
        let not_found = || Error::ArtifactNotFound {
            digest: digest.to_string(),
        };
        let path = self.artifact_path(digest).ok_or_else(not_found)?;
        fs::read(&path).map_err(|_| not_found())
    }

    /// Returns the on-disk path for a digest, or `None` if the digest is malformed.
    pub fn artifact_path(&self, digest: &str) -> Option<PathBuf> {
        let (algo, hash) = digest.split_once(':')?;
        if algo != "sha256" {
            warn!("Rejected digest with algorithm '{}'", algo);
            return None;
        }
        if hash.len() < 2 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            warn!("Rejected malformed digest '{}'", digest);
            return None;
        }
        Some(self.base_dir.join("sha256").join(&hash[..2]).join(hash))
    }

    /// Copies a file into the store and returns its reference.
    pub fn put_file(&self, source: &Path) -> Result<ArtifactRef> {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let staging_dir = self.base_dir.join("sha256");
        fs::create_dir_all(&staging_dir).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;

        // Hash while copying so the file is read once
        let temp_path = staging_dir.join(format!("tmp.{}", uuid::Uuid::now_v7()));
        let (hash, size) = match copy_hashing(source, &temp_path) {
            Ok(result) => result,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(Error::StorageWriteFailed(format!(
                    "failed to copy {}: {}",
                    source.display(),
                    e
                )));
            }
        };

        let digest = format!("sha256:{}", hash);
        let path = self
            .artifact_path(&digest)
            .ok_or_else(|| Error::Internal(format!("computed invalid digest {}", digest)))?;

        if path.exists() {
            let _ = fs::remove_file(&temp_path);
            debug!("Artifact {} already stored", digest);
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
            }
            fs::rename(&temp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                Error::StorageWriteFailed(e.to_string())
            })?;
            debug!("Stored artifact {} ({} bytes)", digest, size);
        }

        Ok(ArtifactRef {
            digest,
            size,
            file_name,
        })
    }

    /// Removes an artifact.
    pub fn remove_artifact(&self, digest: &str) -> Result<()> {
        if let Some(path) = self.artifact_path(digest)
            && path.exists()
        {
            fs::remove_file(&path).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Returns the total size of all artifacts.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;
        Self::walk_dir(&self.base_dir, &mut |path| {
            if let Ok(meta) = fs::metadata(path)
                && meta.is_file()
            {
                total += meta.len();
            }
        })?;
        Ok(total)
    }

    /// Lists all artifact digests.
    pub fn list_artifacts(&self) -> Result<Vec<String>> {
        let mut digests = Vec::new();

        let sha256_dir = self.base_dir.join("sha256");
        Self::walk_dir(&sha256_dir, &mut |path| {
            if let Some(hash) = path.file_name().and_then(|n| n.to_str())
                && !hash.starts_with("tmp.")
            {
                digests.push(format!("sha256:{}", hash));
            }
        })?;

        digests.sort();
        Ok(digests)
    }

    /// Walks a directory recursively, calling `callback` for every file.
    fn walk_dir(dir: &Path, callback: &mut impl FnMut(&Path)) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }

        for entry in fs::read_dir(dir).map_err(|e| Error::StorageWriteFailed(e.to_string()))? {
            let entry = entry.map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
            let path = entry.path();

            if path.is_dir() {
                Self::walk_dir(&path, callback)?;
            } else {
                callback(&path);
            }
        }

        Ok(())
    }

    /// Garbage collects unreferenced artifacts.
    pub fn gc(&self, referenced: &[String]) -> Result<GcStats> {
        let mut removed = 0u64;
        let mut freed = 0u64;

        for digest in self.list_artifacts()? {
            if referenced.contains(&digest) {
                continue;
            }
            if let Some(path) = self.artifact_path(&digest)
                && let Ok(meta) = fs::metadata(&path)
                && fs::remove_file(&path).is_ok()
            {
                freed += meta.len();
                removed += 1;
            }
        }

        info!("GC: removed {} artifacts, freed {} bytes", removed, freed);
        Ok(GcStats {
            removed_count: removed,
            freed_bytes: freed,
        })
    }
}

/// Statistics from a garbage collection run.
#[derive(Debug, Clone)]
pub struct GcStats {
    /// Number of artifacts removed.
    pub removed_count: u64,
    /// Bytes freed.
    pub freed_bytes: u64,
}

/// Copies `source` to `dest`, returning the hex SHA-256 and byte count.
fn copy_hashing(source: &Path, dest: &Path) -> io::Result<(String, u64)> {
    let mut reader = File::open(source)?;
    let mut writer = File::create(dest)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        size += n as u64;
    }
    writer.sync_all()?;

    Ok((hex::encode(hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_file_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::with_path(temp.path().join("artifacts")).unwrap();

        let source = temp.path().join("out.mp3");
        fs::write(&source, b"hello world").unwrap();

        let artifact = store.put_file(&source).unwrap();
        let expected = format!("sha256:{}", hex::encode(Sha256::digest(b"hello world")));
        assert_eq!(artifact.digest, expected);
        assert_eq!(artifact.size, 11);
        assert_eq!(artifact.file_name, "out.mp3");

        assert!(store.has_artifact(&artifact.digest));
        assert_eq!(store.get_artifact(&artifact.digest).unwrap(), b"hello world");

        store.remove_artifact(&artifact.digest).unwrap();
        assert!(!store.has_artifact(&artifact.digest));
    }

    #[test]
    fn test_artifact_path_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::with_path(temp.path().to_path_buf()).unwrap();

        assert!(store.artifact_path("sha256:../../etc").is_none());
        assert!(store.artifact_path("md5:abcd").is_none());
        assert!(store.artifact_path("abcd").is_none());

        let path = store.artifact_path("sha256:abcd1234").unwrap();
        assert!(path.ends_with("sha256/ab/abcd1234"));
    }
}
