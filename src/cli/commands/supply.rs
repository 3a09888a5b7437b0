//! Supply command - archive this buildpack's order fragment

use crate::cli::args::SupplyArgs;
use crate::config::{self, ShimPaths};
use crate::error::{ShimError, ShimResult};
use crate::phases::Supplier;
use crate::platform::Platform;
use tracing::debug;

/// Execute the supply command
pub async fn execute(args: SupplyArgs) -> ShimResult<()> {
    let paths = ShimPaths::from_env();

    for dir in [&paths.order_dir, &paths.v3_buildpacks_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ShimError::io(format!("creating {}", dir.display()), e))?;
    }

    let buildpack_dir = config::buildpack_dir()?;
    debug!("Supplying from buildpack dir {}", buildpack_dir.display());

    let supplier = Supplier {
        v2_app_dir: args.build_dir,
        v3_app_dir: paths.v3_app_dir,
        v2_deps_dir: args.deps_dir,
        deps_index: args.deps_index,
        v2_buildpack_dir: buildpack_dir,
        order_dir: paths.order_dir,
        platform: Platform::from_env(),
    };

    supplier.supply().await
}
