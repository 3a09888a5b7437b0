//! cnbridge - run Cloud Native Buildpacks on a v2 buildpack platform
//!
//! Bridges the v2 staging contract (supply/detect/finalize/release scripts)
//! onto the v3 lifecycle binaries. Each phase runs as its own process and
//! hands state to the next one through a fixed directory layout.

pub mod cli;
pub mod cnb;
pub mod config;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod fsys;
pub mod installer;
pub mod manifest;
pub mod phases;
pub mod platform;

pub use error::{ShimError, ShimResult};
