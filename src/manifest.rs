//! v2 buildpack manifest (manifest.yml)
//!
//! The v2 side of the bridge declares its downloadable dependencies — CNB
//! archives and the lifecycle bundle — in a YAML manifest at the buildpack
//! root. Version selection happens upstream when the shimmed artifact is
//! packaged, so lookups here must resolve to exactly one candidate.

use crate::error::{ShimError, ShimResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the lifecycle bundle dependency in the manifest
pub const LIFECYCLE_DEP: &str = "lifecycle";

/// Parsed manifest.yml plus the buildpack dir it came from
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub language: String,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    #[serde(skip)]
    buildpack_dir: PathBuf,
}

/// One downloadable dependency entry
#[derive(Debug, Clone, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    pub uri: String,
    pub sha256: String,
    #[serde(default)]
    pub cf_stacks: Vec<String>,
}

impl Manifest {
    /// Load `<buildpack_dir>/manifest.yml`
    pub async fn from_buildpack_dir(buildpack_dir: &Path) -> ShimResult<Self> {
        let path = buildpack_dir.join("manifest.yml");
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ShimError::io(format!("reading manifest {}", path.display()), e))?;

        let mut manifest: Manifest =
            serde_yaml::from_str(&content).map_err(|e| ShimError::ManifestInvalid {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        manifest.buildpack_dir = buildpack_dir.to_path_buf();

        debug!(
            "Loaded manifest for {} with {} dependencies",
            manifest.language,
            manifest.dependencies.len()
        );
        Ok(manifest)
    }

    /// All declared versions of a dependency, in manifest order
    pub fn all_dependency_versions(&self, name: &str) -> Vec<&Dependency> {
        self.dependencies
            .iter()
            .filter(|dep| dep.name == name)
            .collect()
    }

    /// Resolve a dependency that must have exactly one declared version
    pub fn unique_dependency(&self, name: &str) -> ShimResult<&Dependency> {
        let candidates = self.all_dependency_versions(name);
        match candidates.as_slice() {
            [only] => Ok(only),
            found => Err(ShimError::NoUniqueVersion {
                id: name.to_string(),
                found: found.len(),
            }),
        }
    }

    /// The buildpack's own version, from the VERSION file next to the manifest
    pub async fn buildpack_version(&self) -> String {
        match tokio::fs::read_to_string(self.buildpack_dir.join("VERSION")).await {
            Ok(content) => content.trim().to_string(),
            Err(_) => "unknown".to_string(),
        }
    }

    /// Persist language + version into the v2 cache for the platform's
    /// buildpack-version reporting
    pub async fn store_buildpack_metadata(&self, cache_dir: &Path) -> ShimResult<()> {
        let metadata = serde_json::json!({
            "language": self.language,
            "version": self.buildpack_version().await,
        });

        tokio::fs::create_dir_all(cache_dir)
            .await
            .map_err(|e| ShimError::io(format!("creating cache dir {}", cache_dir.display()), e))?;

        let path = cache_dir.join("BUILDPACK_METADATA");
        tokio::fs::write(&path, serde_json::to_vec(&metadata)?)
            .await
            .map_err(|e| ShimError::io(format!("writing {}", path.display()), e))
    }
}
