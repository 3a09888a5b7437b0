//! Finalize phase: run the v3 builder and translate its output back to v2
//!
//! This is the last supply-side phase, so it sees the complete picture: every
//! shimmed buildpack has archived its order fragment, and every plain v2
//! buildpack has left its layers in the deps dir. Finalize merges the
//! fragments, runs v3 detect if supply never did, folds the v2 layers into
//! the detected group as synthetic buildpacks, runs the v3 builder, and then
//! moves everything back into the layout the v2 platform expects to package
//! as a droplet.

use crate::cnb::{
    self, BuildpackInfo, BuildpackToml, GroupEntry, GroupToml, LayerMetadata, OrderToml, Stack,
};
use crate::config::{ShimPaths, FAKE_CNB_VERSION, LAUNCH_SCRIPT, V3_LAUNCHER};
use crate::error::{ShimError, ShimResult, StepContext};
use crate::exec::Executable;
use crate::fsys;
use crate::installer::Installer;
use crate::manifest::Manifest;
use crate::phases::detect::DetectRunner;
use crate::platform::Platform;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// The finalize phase handler
pub struct Finalizer {
    pub v2_app_dir: PathBuf,
    pub v2_deps_dir: PathBuf,
    pub v2_cache_dir: PathBuf,
    pub deps_index: String,
    pub profile_dir: PathBuf,
    pub paths: ShimPaths,
    pub v3_lifecycle_dir: PathBuf,
    pub manifest: Manifest,
    pub platform: Platform,
    pub installer: Arc<dyn Installer>,
    pub detector: Box<dyn DetectRunner>,
    pub executor: Box<dyn Executable>,
}

impl Finalizer {
    /// The whole finalize phase, in order
    pub async fn finalize(&self) -> ShimResult<()> {
        self.remove_v2_app_symlink()
            .await
            .step("failed to remove v2 app symlink")?;
        self.generate_order_toml()
            .await
            .step("failed to merge order fragments")?;
        self.run_v3_detect()
            .await
            .step("failed to run v3 detection")?;
        self.include_previous_v2_buildpacks()
            .await
            .step("failed to fold v2 buildpacks into the group")?;
        self.installer
            .install_lifecycle(&self.v3_lifecycle_dir)
            .await
            .step("failed to install v3 lifecycle binaries")?;
        self.restore_v3_cache()
            .await
            .step("failed to restore v3 cache")?;
        self.run_lifecycle_build()
            .await
            .step("failed to run v3 build")?;
        self.relocate_launcher()
            .await
            .step("failed to place the v3 launcher")?;
        self.move_v3_app_to_v2()
            .step("failed to move the app back")?;
        self.move_v3_layers()
            .await
            .step("failed to relocate v3 layers")?;
        self.manifest
            .store_buildpack_metadata(&self.v2_cache_dir)
            .await
            .step("failed to store buildpack metadata")?;
        self.write_profile_launch()
            .await
            .step("failed to write the launch profile")?;
        Ok(())
    }

    /// Drop the dangling marker link supply left at the v2 app path
    async fn remove_v2_app_symlink(&self) -> ShimResult<()> {
        let meta = match tokio::fs::symlink_metadata(&self.v2_app_dir).await {
            Ok(meta) => meta,
            Err(_) => return Ok(()),
        };
        if meta.file_type().is_symlink() {
            tokio::fs::remove_file(&self.v2_app_dir)
                .await
                .map_err(|e| {
                    ShimError::io(format!("removing {}", self.v2_app_dir.display()), e)
                })?;
        }
        Ok(())
    }

    /// Concatenate the supply-phase order fragments into one order.toml
    ///
    /// Fragments are named `buildpack<idx>.toml`; they merge in numeric index
    /// order so detection tries buildpacks in the order the platform supplied
    /// them.
    pub async fn generate_order_toml(&self) -> ShimResult<()> {
        let mut fragments: Vec<(u32, PathBuf)> = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.paths.order_dir)
            .await
            .map_err(|e| {
                ShimError::io(format!("reading {}", self.paths.order_dir.display()), e)
            })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ShimError::io("reading order fragments", e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(idx) = name
                .strip_prefix("buildpack")
                .and_then(|rest| rest.strip_suffix(".toml"))
                .and_then(|idx| idx.parse::<u32>().ok())
            {
                fragments.push((idx, entry.path()));
            }
        }
        fragments.sort_by_key(|(idx, _)| *idx);

        let mut merged = OrderToml::default();
        for (_, path) in &fragments {
            let fragment = BuildpackToml::from_file(path).await?;
            merged.order.extend(fragment.order);
        }

        tokio::fs::create_dir_all(&self.paths.v3_metadata_dir)
            .await
            .map_err(|e| {
                ShimError::io(
                    format!("creating {}", self.paths.v3_metadata_dir.display()),
                    e,
                )
            })?;
        cnb::write_toml(&self.paths.order_metadata(), &merged).await
    }

    /// Run v3 detect unless an earlier phase already produced its output
    async fn run_v3_detect(&self) -> ShimResult<()> {
        if self.paths.group_metadata().exists() && self.paths.plan_metadata().exists() {
            debug!("Detection already ran; reusing group and plan");
            return Ok(());
        }
        self.detector.run_lifecycle_detect().await
    }

    /// Fold the output of plain v2 buildpacks into the detected group
    ///
    /// Each earlier deps index becomes a `buildpack.<idx>` layer plus a
    /// synthetic no-op buildpack, prepended to the group so the real CNBs
    /// still run last.
    pub async fn include_previous_v2_buildpacks(&self) -> ShimResult<()> {
        let own_index: usize = self
            .deps_index
            .parse()
            .map_err(|_| ShimError::InvalidDepsIndex(self.deps_index.clone()))?;

        let own_dir = self.v2_deps_dir.join(&self.deps_index);
        if own_dir.exists() {
            tokio::fs::remove_dir_all(&own_dir)
                .await
                .map_err(|e| ShimError::io(format!("removing {}", own_dir.display()), e))?;
        }

        for idx in (0..own_index).rev() {
            let v2_layer = self.v2_deps_dir.join(idx.to_string());
            if !v2_layer.exists() {
                continue;
            }

            let buildpack_id = format!("buildpack.{idx}");
            let v3_layer = self.paths.v3_layers_dir.join(&buildpack_id).join("layer");

            info!("Folding v2 buildpack output at index {idx} into the group");
            self.move_v2_layers(&v2_layer, &v3_layer).await?;
            self.rename_env_dir(&v3_layer).await?;
            self.update_group_toml(&buildpack_id).await?;
            self.add_fake_cnb_buildpack(&buildpack_id).await?;
        }

        Ok(())
    }

    /// Relocate one v2 deps slot into the v3 layers tree, flagged for both
    /// build and launch so the builder exposes it and the droplet keeps it
    async fn move_v2_layers(&self, src: &Path, dst: &Path) -> ShimResult<()> {
        let metadata = LayerMetadata {
            build: true,
            launch: true,
            cache: false,
        };
        fsys::move_dir(src, dst)?;
        cnb::write_toml(&dst.with_extension("toml"), &metadata).await
    }

    /// v2 env dirs apply unconditionally; v3 scopes them to the build phase
    async fn rename_env_dir(&self, v3_layer: &Path) -> ShimResult<()> {
        let env_dir = v3_layer.join("env");
        if env_dir.exists() {
            tokio::fs::rename(&env_dir, v3_layer.join("env.build"))
                .await
                .map_err(|e| ShimError::io(format!("renaming {}", env_dir.display()), e))?;
        }
        Ok(())
    }

    /// Prepend a synthetic group entry so the builder picks the layer up
    async fn update_group_toml(&self, buildpack_id: &str) -> ShimResult<()> {
        let group_path = self.paths.group_metadata();
        let mut group: GroupToml = cnb::read_toml(&group_path).await?;
        group
            .group
            .insert(0, GroupEntry::new(buildpack_id, FAKE_CNB_VERSION));
        cnb::write_toml(&group_path, &group).await
    }

    /// Install a no-op buildpack backing a synthetic group entry
    async fn add_fake_cnb_buildpack(&self, buildpack_id: &str) -> ShimResult<()> {
        let buildpack_dir = self
            .paths
            .v3_buildpacks_dir
            .join(buildpack_id)
            .join(FAKE_CNB_VERSION);
        let bin_dir = buildpack_dir.join("bin");
        tokio::fs::create_dir_all(&bin_dir)
            .await
            .map_err(|e| ShimError::io(format!("creating {}", bin_dir.display()), e))?;

        let declaration = BuildpackToml {
            buildpack: BuildpackInfo {
                id: buildpack_id.to_string(),
                name: buildpack_id.to_string(),
                version: FAKE_CNB_VERSION.to_string(),
            },
            stacks: Some(vec![Stack {
                id: self.platform.stack_id(),
            }]),
            ..Default::default()
        };
        cnb::write_toml(&buildpack_dir.join("buildpack.toml"), &declaration).await?;

        let build = bin_dir.join("build");
        tokio::fs::write(&build, "#!/bin/bash\nexit 0\n")
            .await
            .map_err(|e| ShimError::io(format!("writing {}", build.display()), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&build, std::fs::Permissions::from_mode(0o777))
                .await
                .map_err(|e| ShimError::io(format!("chmod {}", build.display()), e))?;
        }
        Ok(())
    }

    /// Bring layers cached by a previous build back under the layers root
    pub async fn restore_v3_cache(&self) -> ShimResult<()> {
        let cached = self.v2_cache_dir.join("cnb");
        if !cached.exists() {
            debug!("No cached v3 layers to restore");
            return Ok(());
        }
        info!("Restoring cached v3 layers");
        fsys::move_dir_contents(&cached, &self.paths.v3_layers_dir)
    }

    /// Execute the v3 builder against the detected group
    async fn run_lifecycle_build(&self) -> ShimResult<()> {
        let args: Vec<String> = vec![
            "-app".into(),
            self.paths.v3_app_dir.display().to_string(),
            "-buildpacks".into(),
            self.paths.v3_buildpacks_dir.display().to_string(),
            "-group".into(),
            self.paths.group_metadata().display().to_string(),
            "-layers".into(),
            self.paths.v3_layers_dir.display().to_string(),
            "-plan".into(),
            self.paths.plan_metadata().display().to_string(),
        ];

        info!("Running v3 build");
        self.executor
            .execute(&args, &self.platform.lifecycle_env())
            .await
    }

    /// Ship the launcher inside the app dir so it survives into the droplet
    async fn relocate_launcher(&self) -> ShimResult<()> {
        let src = self.v3_lifecycle_dir.join(V3_LAUNCHER);
        let dst = self.paths.v3_app_dir.join(".cloudfoundry").join(V3_LAUNCHER);
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ShimError::io(format!("creating {}", parent.display()), e))?;
        }
        if tokio::fs::rename(&src, &dst).await.is_err() {
            fsys::copy_file(&src, &dst)?;
            tokio::fs::remove_file(&src)
                .await
                .map_err(|e| ShimError::io(format!("removing {}", src.display()), e))?;
        }
        Ok(())
    }

    /// Put the built app back where the v2 platform packages it from
    fn move_v3_app_to_v2(&self) -> ShimResult<()> {
        fsys::move_dir(&self.paths.v3_app_dir, &self.v2_app_dir)
    }

    /// Translate the built layers tree back into the v2 deps layout
    ///
    /// Layers flagged `cache = true` are mirrored into the v2 cache first so
    /// the next build can restore them; everything else moves under this
    /// buildpack's deps index. The lifecycle's own `config` output moves to
    /// `deps/config`, with run metadata copied into the app for release.
    pub async fn move_v3_layers(&self) -> ShimResult<()> {
        let mut entries = tokio::fs::read_dir(&self.paths.v3_layers_dir)
            .await
            .map_err(|e| {
                ShimError::io(format!("reading {}", self.paths.v3_layers_dir.display()), e)
            })?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ShimError::io("reading v3 layers", e))?
        {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "config" {
                self.move_v3_config(&entry.path()).await?;
            } else {
                self.move_buildpack_layers(&entry.path(), &name).await?;
            }
        }

        Ok(())
    }

    async fn move_v3_config(&self, config_dir: &Path) -> ShimResult<()> {
        let dst = self.v2_deps_dir.join("config");
        fsys::move_dir(config_dir, &dst)?;

        // Release reads the run metadata out of the droplet's app dir
        let metadata = dst.join("metadata.toml");
        if metadata.exists() {
            fsys::copy_file(
                &metadata,
                &self.v2_app_dir.join(".cloudfoundry").join("metadata.toml"),
            )?;
        }
        Ok(())
    }

    async fn move_buildpack_layers(&self, layers_dir: &Path, buildpack: &str) -> ShimResult<()> {
        let mut entries = tokio::fs::read_dir(layers_dir)
            .await
            .map_err(|e| ShimError::io(format!("reading {}", layers_dir.display()), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ShimError::io("reading layer metadata", e))?
        {
            let path = entry.path();
            if path.extension().map(|e| e == "toml") != Some(true) {
                continue;
            }
            let Some(layer) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            if layer == "launch" {
                continue;
            }

            let metadata: LayerMetadata = cnb::read_toml(&path).await?;
            if metadata.cache {
                self.cache_layer(&layers_dir.join(&layer), &path, buildpack, &layer)?;
            }
        }

        // Layers land directly under the deps root; the launch profile
        // exports it as CNB_LAYERS_DIR so launch-time paths keep working
        let dst = self.v2_deps_dir.join(buildpack);
        fsys::move_dir(layers_dir, &dst)
    }

    fn cache_layer(
        &self,
        layer_dir: &Path,
        layer_toml: &Path,
        buildpack: &str,
        layer: &str,
    ) -> ShimResult<()> {
        let mirror = self.v2_cache_dir.join("cnb").join(buildpack);
        debug!("Caching layer {buildpack}/{layer}");
        fsys::copy_dir(layer_dir, &mirror.join(layer))?;
        fsys::copy_file(layer_toml, &mirror.join(format!("{layer}.toml")))
    }

    /// Hand process startup over to the v3 launcher at run time
    async fn write_profile_launch(&self) -> ShimResult<()> {
        tokio::fs::create_dir_all(&self.profile_dir)
            .await
            .map_err(|e| {
                ShimError::io(format!("creating {}", self.profile_dir.display()), e)
            })?;

        let script = format!(
            "export CNB_STACK_ID=\"{}\"\n\
             export CNB_LAYERS_DIR=\"$DEPS_DIR\"\n\
             export CNB_APP_DIR=\"$HOME\"\n\
             exec $HOME/.cloudfoundry/{} \"$2\"\n",
            self.platform.stack_id(),
            V3_LAUNCHER,
        );

        let path = self.profile_dir.join(LAUNCH_SCRIPT);
        tokio::fs::write(&path, script)
            .await
            .map_err(|e| ShimError::io(format!("writing {}", path.display()), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666))
                .await
                .map_err(|e| ShimError::io(format!("chmod {}", path.display()), e))?;
        }
        Ok(())
    }
}
