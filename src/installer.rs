//! CNB dependency resolution and installation
//!
//! Resolves every buildpack an order references to exactly one manifest
//! version, downloads and unpacks the ones not already on disk, recurses into
//! any sub-order an installed buildpack declares, and marks each installed
//! buildpack with a `latest` symlink. Re-running against the same install
//! root is a no-op, which is what makes retried phase invocations safe.

use crate::cnb::BuildpackToml;
use crate::config::{V3_BUILDER, V3_COMBINED, V3_DETECTOR, V3_LAUNCHER};
use crate::error::{ShimError, ShimResult};
use crate::fetch;
use crate::fsys;
use crate::manifest::{Dependency, Manifest, LIFECYCLE_DEP};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tracing::{debug, info};

/// Installer seam shared by the Detect and Finalize phases
///
/// Both phases only need these two operations; keeping them behind a trait
/// lets phase tests substitute an installer that stages stub binaries.
#[async_trait::async_trait]
pub trait Installer: Send + Sync {
    async fn install_cnbs(&self, order_file: &Path, install_dir: &Path) -> ShimResult<()>;
    async fn install_lifecycle(&self, dst: &Path) -> ShimResult<()>;
}

#[async_trait::async_trait]
impl Installer for CnbInstaller {
    async fn install_cnbs(&self, order_file: &Path, install_dir: &Path) -> ShimResult<()> {
        CnbInstaller::install_cnbs(self, order_file, install_dir).await
    }

    async fn install_lifecycle(&self, dst: &Path) -> ShimResult<()> {
        CnbInstaller::install_lifecycle(self, dst).await
    }
}

/// Download seam: fetches one verified dependency archive into a directory
pub trait Fetcher: Send + Sync {
    /// Download, verify, and unpack `dep` so its contents land under `dest`
    fn fetch(&self, dep: &Dependency, dest: &Path) -> ShimResult<()>;
}

/// Real fetcher: checksum-verified download followed by tgz extraction
pub struct ArchiveFetcher;

impl Fetcher for ArchiveFetcher {
    fn fetch(&self, dep: &Dependency, dest: &Path) -> ShimResult<()> {
        let staging = tempfile::tempdir()
            .map_err(|e| ShimError::io("creating download staging dir", e))?;

        let archive = staging.path().join("dependency.tgz");
        fetch::download(&dep.uri, &dep.sha256, &archive)?;
        fetch::extract_tgz(&archive, dest)
    }
}

/// Installer shared by the Detect and Finalize phases
pub struct CnbInstaller {
    manifest: Manifest,
    fetcher: Box<dyn Fetcher>,
}

impl CnbInstaller {
    pub fn new(manifest: Manifest) -> Self {
        Self::with_fetcher(manifest, Box::new(ArchiveFetcher))
    }

    pub fn with_fetcher(manifest: Manifest, fetcher: Box<dyn Fetcher>) -> Self {
        Self { manifest, fetcher }
    }

    /// Install every buildpack referenced by `order_file` under `install_dir`
    ///
    /// Newly installed buildpacks get a `<install_dir>/<id>/latest` symlink
    /// pointing at their version directory.
    pub async fn install_cnbs(&self, order_file: &Path, install_dir: &Path) -> ShimResult<()> {
        let buildpack = BuildpackToml::from_file(order_file).await?;
        let installed = self.install_order(&buildpack, install_dir).await?;

        for path in installed {
            let latest = path
                .parent()
                .unwrap_or(install_dir)
                .join("latest");
            #[cfg(unix)]
            std::os::unix::fs::symlink(&path, &latest)
                .map_err(|e| ShimError::io(format!("linking {}", latest.display()), e))?;
        }

        Ok(())
    }

    /// Resolve and install one order's buildpacks, returning new install paths
    fn install_order<'a>(
        &'a self,
        buildpack: &'a BuildpackToml,
        install_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = ShimResult<Vec<PathBuf>>> + Send + 'a>> {
        Box::pin(async move {
            let mut installed = Vec::new();

            for id in buildpack.referenced_ids() {
                let dep = self.manifest.unique_dependency(&id)?;
                let dest = install_dir.join(&id).join(&dep.version);

                // Idempotence: an existing install short-circuits, which also
                // terminates the recursion on cyclic meta-buildpacks
                if dest.exists() {
                    debug!("{} {} already installed, skipping", id, dep.version);
                    continue;
                }

                info!("Installing {} {}", id, dep.version);
                self.install_single_cnb(dep, &dest)?;
                installed.push(dest.clone());

                // A freshly installed meta-buildpack may declare its own order
                let nested = dest.join("buildpack.toml");
                if nested.exists() {
                    let next = BuildpackToml::from_file(&nested).await?;
                    let mut sub = self.install_order(&next, install_dir).await?;
                    installed.append(&mut sub);
                }
            }

            Ok(installed)
        })
    }

    /// Fetch one CNB archive and normalize it so buildpack.toml sits at `dest`
    fn install_single_cnb(&self, dep: &Dependency, dest: &Path) -> ShimResult<()> {
        let staging = tempfile::tempdir()
            .map_err(|e| ShimError::io("creating install staging dir", e))?;

        self.fetcher.fetch(dep, staging.path())?;
        let root = find_cnb_root(staging.path())?;
        fsys::move_dir(&root, dest)
    }

    /// Download the lifecycle bundle and place its binaries into `dst`
    ///
    /// Accepts both bundle layouts: the classic three binaries, and 0.7.x+
    /// bundles that additionally ship a combined `lifecycle` executable.
    pub async fn install_lifecycle(&self, dst: &Path) -> ShimResult<()> {
        let dep = self.manifest.unique_dependency(LIFECYCLE_DEP)?;

        let staging = tempfile::tempdir()
            .map_err(|e| ShimError::io("creating lifecycle staging dir", e))?;
        self.fetcher.fetch(dep, staging.path())?;

        let bundle_root = lifecycle_bundle_root(staging.path())?;

        tokio::fs::create_dir_all(dst)
            .await
            .map_err(|e| ShimError::io(format!("creating {}", dst.display()), e))?;

        for binary in [V3_DETECTOR, V3_BUILDER, V3_LAUNCHER] {
            let src = bundle_root.join(binary);
            std::fs::rename(&src, dst.join(binary))
                .map_err(|e| ShimError::io(format!("moving lifecycle binary {}", src.display()), e))?;
        }

        // 0.7.x+ bundles symlink the per-phase binaries to this one
        let combined = bundle_root.join(V3_COMBINED);
        if combined.exists() {
            std::fs::rename(&combined, dst.join(V3_COMBINED))
                .map_err(|e| ShimError::io(format!("moving {}", combined.display()), e))?;
        }

        Ok(())
    }
}

/// Locate the directory holding buildpack.toml inside an extracted archive
///
/// Archives either place buildpack.toml at the top level or nest everything
/// in a single versioned directory; anything else is a broken artifact.
pub fn find_cnb_root(extract_dir: &Path) -> ShimResult<PathBuf> {
    if extract_dir.join("buildpack.toml").exists() {
        return Ok(extract_dir.to_path_buf());
    }

    let entries = std::fs::read_dir(extract_dir)
        .map_err(|e| ShimError::io(format!("reading {}", extract_dir.display()), e))?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ShimError::io("reading extract dir", e))?;
        if entry.path().join("buildpack.toml").exists() {
            candidates.push(entry.path());
        }
    }

    match candidates.len() {
        0 => Err(ShimError::CnbRootNotFound(extract_dir.to_path_buf())),
        1 => Ok(candidates.remove(0)),
        _ => Err(ShimError::CnbRootAmbiguous(extract_dir.to_path_buf())),
    }
}

/// The single top-level directory a lifecycle bundle must unpack to
fn lifecycle_bundle_root(extract_dir: &Path) -> ShimResult<PathBuf> {
    let entries = std::fs::read_dir(extract_dir)
        .map_err(|e| ShimError::io(format!("reading {}", extract_dir.display()), e))?;

    let mut names = Vec::new();
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ShimError::io("reading lifecycle bundle", e))?;
        names.push(entry.file_name().to_string_lossy().to_string());
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }

    if dirs.len() == 1 {
        Ok(dirs.remove(0))
    } else {
        Err(ShimError::LifecycleBundleLayout { found: names })
    }
}
