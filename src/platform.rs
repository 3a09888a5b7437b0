//! Environment bridge between the v2 platform and the v3 lifecycle
//!
//! The v2 platform exposes its facts as process environment variables; the
//! v3 lifecycle wants them either as `CNB_*` child-process variables or, for
//! newer lifecycle generations, as one file per variable in a platform-info
//! directory.

use crate::error::{ShimError, ShimResult};
use std::path::Path;

/// Platform facts captured once per phase invocation
#[derive(Debug, Clone)]
pub struct Platform {
    /// Services descriptor (JSON); `{}` when the platform binds none
    pub services: String,
    /// Bare stack name, e.g. `cflinuxfs3`
    pub stack: String,
}

impl Platform {
    /// Read `VCAP_SERVICES` and `CF_STACK` from the process environment
    pub fn from_env() -> Self {
        Self {
            services: std::env::var("VCAP_SERVICES").unwrap_or_else(|_| "{}".to_string()),
            stack: std::env::var("CF_STACK").unwrap_or_default(),
        }
    }

    /// The fully-qualified CNB stack ID for this platform
    pub fn stack_id(&self) -> String {
        format!("org.cloudfoundry.stacks.{}", self.stack)
    }

    /// The `KEY=VALUE` pairs the v3 lifecycle binaries consume
    pub fn lifecycle_env(&self) -> Vec<String> {
        vec![
            format!("CNB_SERVICES={}", self.services),
            format!("CNB_STACK_ID={}", self.stack_id()),
        ]
    }
}

/// Write `KEY=VALUE` pairs as `<platform_dir>/env/<KEY>` files
///
/// Used for lifecycle generations that read a platform-info directory
/// instead of process environment variables.
pub async fn write_platform_dir(platform_dir: &Path, pairs: &[String]) -> ShimResult<()> {
    let env_dir = platform_dir.join("env");
    tokio::fs::create_dir_all(&env_dir)
        .await
        .map_err(|e| ShimError::io(format!("creating env dir {}", env_dir.display()), e))?;

    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ShimError::MalformedEnvPair(pair.clone()))?;

        let path = env_dir.join(key);
        tokio::fs::write(&path, value)
            .await
            .map_err(|e| ShimError::io(format!("writing {} env file", key), e))?;
    }

    Ok(())
}
