//! Detect command - run v3 detection against this buildpack's own order

use crate::cli::args::DetectArgs;
use crate::config::{self, ShimPaths, V3_DETECTOR};
use crate::error::{ShimError, ShimResult};
use crate::exec::LifecycleBinary;
use crate::installer::CnbInstaller;
use crate::manifest::Manifest;
use crate::phases::Detector;
use crate::platform::Platform;
use std::sync::Arc;
use tracing::debug;

/// Execute the detect command
pub async fn execute(args: DetectArgs) -> ShimResult<()> {
    let paths = ShimPaths::from_env();

    let lifecycle_dir =
        tempfile::tempdir().map_err(|e| ShimError::io("creating lifecycle dir", e))?;

    for dir in [
        &paths.v3_buildpacks_dir,
        &paths.v3_metadata_dir,
        &paths.v3_platform_dir.join("env"),
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ShimError::io(format!("creating {}", dir.display()), e))?;
    }

    let buildpack_dir = config::buildpack_dir()?;
    debug!("Detecting from buildpack dir {}", buildpack_dir.display());
    let manifest = Manifest::from_buildpack_dir(&buildpack_dir).await?;

    let detector = Detector {
        app_dir: args.build_dir,
        v3_buildpacks_dir: paths.v3_buildpacks_dir.clone(),
        v3_lifecycle_dir: lifecycle_dir.path().to_path_buf(),
        v3_platform_dir: paths.v3_platform_dir.clone(),
        // Detection for a single shimmed buildpack runs against its own
        // declaration; the merged order only exists once finalize runs
        order_metadata: buildpack_dir.join("buildpack.toml"),
        group_metadata: paths.group_metadata(),
        plan_metadata: paths.plan_metadata(),
        api: paths.api,
        installer: Arc::new(CnbInstaller::new(manifest)),
        platform: Platform::from_env(),
        executor: Box::new(LifecycleBinary::new(lifecycle_dir.path().join(V3_DETECTOR))),
    };

    detector.detect().await
}
