//! Artifact service — versioned named blobs scoped to a session.

use std::collections::HashMap;

use parking_lot::RwLock;

use aw_domain::{Error, Result};

use crate::session::SessionKey;

/// A stored artifact version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactVersion {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[async_trait::async_trait]
pub trait ArtifactService: Send + Sync {
    /// Store a new version; versions start at 0 and increment per filename.
    async fn save_artifact(
        &self,
        key: &SessionKey,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<u64>;

    /// Load a version; `None` loads the latest.
    async fn load_artifact(
        &self,
        key: &SessionKey,
        filename: &str,
        version: Option<u64>,
    ) -> Result<ArtifactVersion>;

    /// Filenames with at least one stored version, sorted.
    async fn list_artifact_keys(&self, key: &SessionKey) -> Result<Vec<String>>;

    async fn delete_artifact(&self, key: &SessionKey, filename: &str) -> Result<()>;

    async fn list_versions(&self, key: &SessionKey, filename: &str) -> Result<Vec<u64>>;
}

/// Reference implementation: `(session, filename) → version list` in memory.
#[derive(Default)]
pub struct InMemoryArtifactService {
    artifacts: RwLock<HashMap<(SessionKey, String), Vec<ArtifactVersion>>>,
}

impl InMemoryArtifactService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ArtifactService for InMemoryArtifactService {
    async fn save_artifact(
        &self,
        key: &SessionKey,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<u64> {
        let mut artifacts = self.artifacts.write();
        let versions = artifacts
            .entry((key.clone(), filename.to_owned()))
            .or_default();
        versions.push(ArtifactVersion {
            bytes,
            mime_type: mime_type.to_owned(),
        });
        Ok((versions.len() - 1) as u64)
    }

    async fn load_artifact(
        &self,
        key: &SessionKey,
        filename: &str,
        version: Option<u64>,
    ) -> Result<ArtifactVersion> {
        let artifacts = self.artifacts.read();
        let versions = artifacts
            .get(&(key.clone(), filename.to_owned()))
            .ok_or_else(|| Error::NotFound(format!("artifact {filename}")))?;
        let idx = match version {
            Some(v) => v as usize,
            None => versions.len() - 1,
        };
        versions
            .get(idx)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("artifact {filename} version {idx}")))
    }

    async fn list_artifact_keys(&self, key: &SessionKey) -> Result<Vec<String>> {
        let artifacts = self.artifacts.read();
        let mut names: Vec<String> = artifacts
            .keys()
            .filter(|(k, _)| k == key)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete_artifact(&self, key: &SessionKey, filename: &str) -> Result<()> {
        self.artifacts
            .write()
            .remove(&(key.clone(), filename.to_owned()));
        Ok(())
    }

    async fn list_versions(&self, key: &SessionKey, filename: &str) -> Result<Vec<u64>> {
        let artifacts = self.artifacts.read();
        let versions = artifacts
            .get(&(key.clone(), filename.to_owned()))
            .ok_or_else(|| Error::NotFound(format!("artifact {filename}")))?;
        Ok((0..versions.len() as u64).collect())
    }
}
