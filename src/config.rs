//! Working-directory layout for the bridged v3 lifecycle
//!
//! Each phase runs as its own short-lived process. The v2 platform passes the
//! v2 directories as arguments; the v3 side of the bridge lives in a fixed
//! tree that every phase reconstructs from the paths here. The whole tree is
//! injectable so tests can relocate it under a tempdir.

use crate::error::{ShimError, ShimResult};
use std::path::{Path, PathBuf};

/// Name of the launch-profile script written into the profile dir
pub const LAUNCH_SCRIPT: &str = "0_shim.sh";

/// Version assigned to synthetic buildpacks standing in for v2 output
pub const FAKE_CNB_VERSION: &str = "0.0.1";

/// Dangling-symlink target left at the v2 app path while the app is moved
pub const MOVED_APP_MARKER: &str =
    "/tmp/app_has_been_moved_into_the_v3_lifecycle_see_cnbridge_supply";

/// Lifecycle binary names inside the downloaded bundle
pub const V3_DETECTOR: &str = "detector";
pub const V3_BUILDER: &str = "builder";
pub const V3_LAUNCHER: &str = "launcher";
pub const V3_COMBINED: &str = "lifecycle";

/// Which configuration channel the targeted lifecycle generation reads
///
/// Older lifecycle binaries take configuration from process environment
/// variables; newer ones read a platform-info directory and accept
/// `-platform` / `-log-level` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleApi {
    /// Pass CNB_* values through the child process environment
    #[default]
    EnvVars,
    /// Write CNB_* values as files under `<platform>/env/`
    PlatformDir,
}

impl LifecycleApi {
    /// Select the API generation from `SHIM_LIFECYCLE_API` (default: env vars)
    pub fn from_env() -> Self {
        match std::env::var("SHIM_LIFECYCLE_API").as_deref() {
            Ok("platform-dir") => Self::PlatformDir,
            _ => Self::EnvVars,
        }
    }
}

/// Fixed paths shared by every phase process of one build
#[derive(Debug, Clone)]
pub struct ShimPaths {
    /// Where the v3 lifecycle operates on the application
    pub v3_app_dir: PathBuf,
    /// Layers root the v3 builder writes into
    pub v3_layers_dir: PathBuf,
    /// Holds order.toml / group.toml / plan.toml between phases
    pub v3_metadata_dir: PathBuf,
    /// Order fragments, one per v2 buildpack supply invocation
    pub order_dir: PathBuf,
    /// Resolved CNB install root (`<id>/<version>` plus `latest` links)
    pub v3_buildpacks_dir: PathBuf,
    /// Platform-info dir for the `PlatformDir` lifecycle API generation
    pub v3_platform_dir: PathBuf,
    /// Lifecycle API generation in effect
    pub api: LifecycleApi,
}

impl ShimPaths {
    /// Layout rooted at an arbitrary directory (tests, alternate containers)
    pub fn under(root: &Path) -> Self {
        Self {
            v3_app_dir: root.join("app"),
            v3_layers_dir: root.join("deps"),
            v3_metadata_dir: root.join("metadata"),
            order_dir: root.join("order"),
            v3_buildpacks_dir: root.join("cnbs"),
            v3_platform_dir: root.join("platform"),
            api: LifecycleApi::default(),
        }
    }

    /// The droplet layout, honoring the `SHIM_V3_ROOT` override
    pub fn from_env() -> Self {
        match std::env::var("SHIM_V3_ROOT") {
            Ok(root) => {
                let mut paths = Self::under(Path::new(&root));
                paths.api = LifecycleApi::from_env();
                paths
            }
            Err(_) => Self::default(),
        }
    }

    pub fn order_metadata(&self) -> PathBuf {
        self.v3_metadata_dir.join("order.toml")
    }

    pub fn group_metadata(&self) -> PathBuf {
        self.v3_metadata_dir.join("group.toml")
    }

    pub fn plan_metadata(&self) -> PathBuf {
        self.v3_metadata_dir.join("plan.toml")
    }
}

impl Default for ShimPaths {
    /// The conventional droplet layout under the platform's home directory
    fn default() -> Self {
        let mut paths = Self::under(Path::new("/home/vcap"));
        paths.api = LifecycleApi::from_env();
        paths
    }
}

/// Locate the v2 buildpack's own directory
///
/// The shim binary ships at `<buildpack>/bin/cnbridge`, so the buildpack root
/// is two levels up from the running executable. `BUILDPACK_DIR` overrides
/// this for tests and unusual platform layouts.
pub fn buildpack_dir() -> ShimResult<PathBuf> {
    if let Ok(dir) = std::env::var("BUILDPACK_DIR") {
        return Ok(PathBuf::from(dir));
    }

    let exe = std::env::current_exe()
        .map_err(|e| ShimError::BuildpackDirUnknown(e.to_string()))?;
    exe.parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            ShimError::BuildpackDirUnknown(format!("executable at {} has no parent", exe.display()))
        })
}
