//! Lifecycle binary execution
//!
//! The v3 lifecycle binaries are opaque subprocesses. The trait keeps them
//! substitutable so phase tests can run stub executables instead of real
//! lifecycle builds.

use crate::error::{ShimError, ShimResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Abstract execution of a v3 lifecycle binary
#[async_trait]
pub trait Executable: Send + Sync {
    /// Run the binary with `args`, appending `KEY=VALUE` pairs to the
    /// inherited environment; blocks until the child exits
    async fn execute(&self, args: &[String], extra_env: &[String]) -> ShimResult<()>;
}

/// A real lifecycle binary on disk
pub struct LifecycleBinary {
    path: PathBuf,
}

impl LifecycleBinary {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl Executable for LifecycleBinary {
    async fn execute(&self, args: &[String], extra_env: &[String]) -> ShimResult<()> {
        let command = self.path.display().to_string();
        debug!("Executing: {} {:?}", command, args);

        let mut cmd = Command::new(&self.path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        for pair in extra_env {
            if let Some((key, value)) = pair.split_once('=') {
                cmd.env(key, value);
            }
        }

        let status = cmd
            .status()
            .await
            .map_err(|e| ShimError::command_failed(&command, e))?;

        if status.success() {
            Ok(())
        } else {
            match status.code() {
                Some(code) => Err(ShimError::CommandExit { command, code }),
                None => Err(ShimError::CommandSignaled { command }),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::{Path, PathBuf};

    /// Write an executable shell script for use as a stub lifecycle binary
    pub fn stub_binary(dir: &Path, name: &str, script: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }
}
