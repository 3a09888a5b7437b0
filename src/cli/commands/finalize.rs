//! Finalize command - run the v3 builder and rebuild the droplet layout

use crate::cli::args::FinalizeArgs;
use crate::config::{self, ShimPaths, V3_BUILDER, V3_DETECTOR};
use crate::error::{ShimError, ShimResult};
use crate::exec::LifecycleBinary;
use crate::installer::CnbInstaller;
use crate::manifest::Manifest;
use crate::phases::{Detector, Finalizer};
use crate::platform::Platform;
use std::sync::Arc;
use tracing::debug;

/// Execute the finalize command
pub async fn execute(args: FinalizeArgs) -> ShimResult<()> {
    let paths = ShimPaths::from_env();

    let lifecycle_dir =
        tempfile::tempdir().map_err(|e| ShimError::io("creating lifecycle dir", e))?;

    for dir in [
        &paths.v3_metadata_dir,
        &paths.v3_app_dir.join(".cloudfoundry"),
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ShimError::io(format!("creating {}", dir.display()), e))?;
    }

    let buildpack_dir = config::buildpack_dir()?;
    debug!("Finalizing from buildpack dir {}", buildpack_dir.display());
    let manifest = Manifest::from_buildpack_dir(&buildpack_dir).await?;

    let installer = Arc::new(CnbInstaller::new(manifest.clone()));
    let platform = Platform::from_env();

    let detector = Detector {
        app_dir: paths.v3_app_dir.clone(),
        v3_buildpacks_dir: paths.v3_buildpacks_dir.clone(),
        v3_lifecycle_dir: lifecycle_dir.path().to_path_buf(),
        v3_platform_dir: paths.v3_platform_dir.clone(),
        order_metadata: paths.order_metadata(),
        group_metadata: paths.group_metadata(),
        plan_metadata: paths.plan_metadata(),
        api: paths.api,
        installer: installer.clone(),
        platform: platform.clone(),
        executor: Box::new(LifecycleBinary::new(lifecycle_dir.path().join(V3_DETECTOR))),
    };

    let finalizer = Finalizer {
        v2_app_dir: args.build_dir,
        v2_deps_dir: args.deps_dir,
        v2_cache_dir: args.cache_dir,
        deps_index: args.deps_index,
        profile_dir: args.profile_dir,
        paths: paths.clone(),
        v3_lifecycle_dir: lifecycle_dir.path().to_path_buf(),
        manifest,
        platform,
        installer,
        detector: Box::new(detector),
        executor: Box::new(LifecycleBinary::new(lifecycle_dir.path().join(V3_BUILDER))),
    };

    let result = finalizer.finalize().await;

    // The v3 working tree must not leak into the droplet
    for dir in [
        &paths.order_dir,
        &paths.v3_buildpacks_dir,
        &paths.v3_metadata_dir,
    ] {
        if dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                debug!("Could not clean up {}: {e}", dir.display());
            }
        }
    }

    result
}
