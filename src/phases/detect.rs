//! Detect phase: run the v3 detector against the merged order
//!
//! Installs the buildpacks the order references, installs the lifecycle
//! binaries, and executes v3 detect as a subprocess. Detection failures are
//! returned verbatim; nothing here retries or interprets them.

use crate::config::LifecycleApi;
use crate::error::{ShimResult, StepContext};
use crate::exec::Executable;
use crate::installer::Installer;
use crate::platform::{self, Platform};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Runs only the detect subprocess, without reinstalling buildpacks
///
/// Finalize uses this when supply never triggered detection.
#[async_trait]
pub trait DetectRunner: Send + Sync {
    async fn run_lifecycle_detect(&self) -> ShimResult<()>;
}

/// The detect phase handler
pub struct Detector {
    pub app_dir: PathBuf,
    pub v3_buildpacks_dir: PathBuf,
    pub v3_lifecycle_dir: PathBuf,
    pub v3_platform_dir: PathBuf,
    pub order_metadata: PathBuf,
    pub group_metadata: PathBuf,
    pub plan_metadata: PathBuf,
    pub api: LifecycleApi,
    pub installer: Arc<dyn Installer>,
    pub platform: Platform,
    pub executor: Box<dyn Executable>,
}

impl Detector {
    /// Install the order's buildpacks, then run the v3 detector
    pub async fn detect(&self) -> ShimResult<()> {
        self.installer
            .install_cnbs(&self.order_metadata, &self.v3_buildpacks_dir)
            .await
            .step("failed to install buildpacks for detection")?;

        self.run_detect_subprocess().await
    }

    async fn run_detect_subprocess(&self) -> ShimResult<()> {
        self.installer
            .install_lifecycle(&self.v3_lifecycle_dir)
            .await
            .step("failed to install v3 lifecycle binaries")?;

        let mut args: Vec<String> = vec![
            "-app".into(),
            self.app_dir.display().to_string(),
            "-buildpacks".into(),
            self.v3_buildpacks_dir.display().to_string(),
            "-order".into(),
            self.order_metadata.display().to_string(),
            "-group".into(),
            self.group_metadata.display().to_string(),
            "-plan".into(),
            self.plan_metadata.display().to_string(),
        ];

        let env = self.platform.lifecycle_env();

        if self.api == LifecycleApi::PlatformDir {
            platform::write_platform_dir(&self.v3_platform_dir, &env).await?;
            args.push("-platform".into());
            args.push(self.v3_platform_dir.display().to_string());

            if let Ok(level) = std::env::var("CNB_LOG_LEVEL") {
                args.push("-log-level".into());
                args.push(level);
            }
        }

        info!("Running v3 detect");
        self.executor.execute(&args, &env).await
    }
}

#[async_trait]
impl DetectRunner for Detector {
    async fn run_lifecycle_detect(&self) -> ShimResult<()> {
        self.run_detect_subprocess().await
    }
}
