//! Supply phase: runs once per v2 buildpack in the group
//!
//! The first invocation relocates the application into the path the v3
//! lifecycle operates on and leaves a deliberately-broken symlink behind so
//! any non-CNB-aware buildpack that still reads the old app path fails loudly
//! instead of silently reading nothing. Every invocation archives its own
//! buildpack declaration as an order fragment for finalize to merge.

use crate::cnb::BuildpackToml;
use crate::config::MOVED_APP_MARKER;
use crate::error::{ShimError, ShimResult};
use crate::fsys;
use crate::platform::Platform;
use std::path::{Path, PathBuf};
use tracing::info;

/// Sentinel file marking a relocated app dir
const SENTINEL: &str = "sentinel";

/// The supply phase handler
pub struct Supplier {
    pub v2_app_dir: PathBuf,
    pub v3_app_dir: PathBuf,
    pub v2_deps_dir: PathBuf,
    pub deps_index: String,
    pub v2_buildpack_dir: PathBuf,
    pub order_dir: PathBuf,
    pub platform: Platform,
}

impl Supplier {
    /// The whole supply phase, in order
    pub async fn supply(&self) -> ShimResult<()> {
        self.set_up_first_v3_buildpack().await?;
        self.check_buildpack_valid().await?;
        self.remove_v2_deps_index().await?;
        self.save_buildpack_toml().await?;
        Ok(())
    }

    /// Move the app into the v3 tree, once per build
    ///
    /// Idempotent: a symlink at the v2 app path means an earlier supply
    /// invocation already performed the move.
    pub async fn set_up_first_v3_buildpack(&self) -> ShimResult<()> {
        if is_symlink(&self.v2_app_dir) {
            return Ok(());
        }

        info!(
            "Relocating app into v3 lifecycle dir {}",
            self.v3_app_dir.display()
        );
        fsys::move_dir(&self.v2_app_dir, &self.v3_app_dir)?;

        let marker_dir = self.v3_app_dir.join(".cloudfoundry");
        tokio::fs::create_dir_all(&marker_dir)
            .await
            .map_err(|e| ShimError::io(format!("creating {}", marker_dir.display()), e))?;
        tokio::fs::write(marker_dir.join(SENTINEL), "")
            .await
            .map_err(|e| ShimError::io("writing sentinel", e))?;

        // Any later v2 buildpack that reads the old app path now gets a
        // broken-symlink error naming the actual situation
        #[cfg(unix)]
        std::os::unix::fs::symlink(MOVED_APP_MARKER, &self.v2_app_dir)
            .map_err(|e| ShimError::io(format!("linking {}", self.v2_app_dir.display()), e))?;

        Ok(())
    }

    /// Parse this buildpack's declaration, log it, and check its stacks
    pub async fn check_buildpack_valid(&self) -> ShimResult<()> {
        let path = self.v2_buildpack_dir.join("buildpack.toml");
        let buildpack = BuildpackToml::from_file(&path).await?;

        info!(
            "-----> {} Buildpack version {}",
            buildpack.buildpack.name, buildpack.buildpack.version
        );

        // A declaration without a stacks stanza constrains nothing
        if let Some(stacks) = &buildpack.stacks {
            let stack_id = self.platform.stack_id();
            if !stacks.iter().any(|s| s.id == stack_id) {
                return Err(ShimError::StackMismatch {
                    buildpack: buildpack.buildpack.id,
                    stack: stack_id,
                });
            }
        }

        Ok(())
    }

    /// Delete this buildpack's v2 dependency slot; output lands in v3 layers
    pub async fn remove_v2_deps_index(&self) -> ShimResult<()> {
        let index_dir = self.v2_deps_dir.join(&self.deps_index);
        if index_dir.exists() {
            tokio::fs::remove_dir_all(&index_dir)
                .await
                .map_err(|e| ShimError::io(format!("removing {}", index_dir.display()), e))?;
        }
        Ok(())
    }

    /// Archive this buildpack's declaration as an order fragment
    ///
    /// Fragments are keyed by deps index so finalize merges them in supply
    /// order. Returns the fragment path.
    pub async fn save_buildpack_toml(&self) -> ShimResult<PathBuf> {
        tokio::fs::create_dir_all(&self.order_dir)
            .await
            .map_err(|e| ShimError::io(format!("creating {}", self.order_dir.display()), e))?;

        let fragment = self
            .order_dir
            .join(format!("buildpack{}.toml", self.deps_index));
        fsys::copy_file(&self.v2_buildpack_dir.join("buildpack.toml"), &fragment)?;
        Ok(fragment)
    }
}

fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn supplier_in(temp: &TempDir) -> Supplier {
        let v2_app_dir = temp.path().join("app");
        std::fs::create_dir_all(&v2_app_dir).unwrap();
        std::fs::write(v2_app_dir.join("index.js"), "// app").unwrap();

        let v2_deps_dir = temp.path().join("deps");
        std::fs::create_dir_all(v2_deps_dir.join("0")).unwrap();

        let v2_buildpack_dir = temp.path().join("buildpack");
        std::fs::create_dir_all(&v2_buildpack_dir).unwrap();
        std::fs::write(
            v2_buildpack_dir.join("buildpack.toml"),
            r#"
[buildpack]
id = "org.cloudfoundry.nodejs"
name = "SomeName"
version = "0.0.1"

[[stacks]]
id = "org.cloudfoundry.stacks.cflinuxfs3"

[[order]]
  [[order.group]]
  id = "org.cloudfoundry.node-engine"
  version = "0.0.5"
"#,
        )
        .unwrap();

        Supplier {
            v2_app_dir,
            v3_app_dir: temp.path().join("cnb-app"),
            v2_deps_dir,
            deps_index: "0".to_string(),
            v2_buildpack_dir,
            order_dir: temp.path().join("order"),
            platform: Platform {
                services: "{}".to_string(),
                stack: "cflinuxfs3".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn moves_app_and_writes_sentinel() {
        let temp = TempDir::new().unwrap();
        let supplier = supplier_in(&temp);

        supplier.set_up_first_v3_buildpack().await.unwrap();

        assert!(supplier.v3_app_dir.join("index.js").exists());
        assert!(supplier.v3_app_dir.join(".cloudfoundry/sentinel").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn leaves_error_symlink_at_old_app_path() {
        let temp = TempDir::new().unwrap();
        let supplier = supplier_in(&temp);

        supplier.set_up_first_v3_buildpack().await.unwrap();

        let target = std::fs::read_link(&supplier.v2_app_dir).unwrap();
        assert_eq!(target, Path::new(MOVED_APP_MARKER));
        // The link is intentionally dangling
        assert!(!supplier.v2_app_dir.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn does_nothing_when_app_already_moved() {
        let temp = TempDir::new().unwrap();
        let supplier = supplier_in(&temp);

        std::fs::remove_dir_all(&supplier.v2_app_dir).unwrap();
        std::os::unix::fs::symlink("some-file", &supplier.v2_app_dir).unwrap();

        supplier.set_up_first_v3_buildpack().await.unwrap();
        assert!(!supplier.v3_app_dir.exists());
    }

    #[tokio::test]
    async fn valid_buildpack_passes() {
        let temp = TempDir::new().unwrap();
        let supplier = supplier_in(&temp);
        supplier.check_buildpack_valid().await.unwrap();
    }

    #[tokio::test]
    async fn stack_mismatch_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut supplier = supplier_in(&temp);
        supplier.platform.stack = "cflinuxfs2".to_string();

        let err = supplier.check_buildpack_valid().await.unwrap_err();
        assert!(matches!(err, ShimError::StackMismatch { .. }));
    }

    #[tokio::test]
    async fn removes_own_deps_index() {
        let temp = TempDir::new().unwrap();
        let supplier = supplier_in(&temp);

        supplier.remove_v2_deps_index().await.unwrap();
        assert!(!supplier.v2_deps_dir.join("0").exists());

        // Missing index dir is fine on retry
        supplier.remove_v2_deps_index().await.unwrap();
    }

    #[tokio::test]
    async fn saves_fragment_keyed_by_index() {
        let temp = TempDir::new().unwrap();
        let mut supplier = supplier_in(&temp);
        supplier.deps_index = "2".to_string();

        let fragment = supplier.save_buildpack_toml().await.unwrap();
        assert_eq!(fragment, supplier.order_dir.join("buildpack2.toml"));
        assert!(fragment.exists());
    }

    #[tokio::test]
    async fn full_supply_runs_every_step() {
        let temp = TempDir::new().unwrap();
        let supplier = supplier_in(&temp);

        supplier.supply().await.unwrap();

        assert!(supplier.v3_app_dir.join("index.js").exists());
        assert!(!supplier.v2_deps_dir.join("0").exists());
        assert!(supplier.order_dir.join("buildpack0.toml").exists());
    }
}
