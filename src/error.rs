//! Error types for cnbridge
//!
//! All modules use `ShimResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for shim operations
pub type ShimResult<T> = Result<T, ShimError>;

/// All errors that can occur in the shim
#[derive(Error, Debug)]
pub enum ShimError {
    // Dependency resolution errors
    #[error("unable to find a unique version of {id} in the manifest ({found} candidates)")]
    NoUniqueVersion { id: String, found: usize },

    #[error("dependency sha256 mismatch: expected sha256 {expected}, actual sha256 {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("could not download {uri}: status {status}")]
    DownloadFailed { uri: String, status: u16 },

    #[error("could not download {uri}: {reason}")]
    DownloadTransport { uri: String, reason: String },

    #[error("unsupported download uri: {0}")]
    UnsupportedUri(String),

    #[error("issue unpacking lifecycle: incorrect bundle format: {found:?}")]
    LifecycleBundleLayout { found: Vec<String> },

    #[error("failed to find cnb source: no buildpack.toml in {0}")]
    CnbRootNotFound(PathBuf),

    #[error("failed to find cnb source: found multiple buildpack.toml files in {0}")]
    CnbRootAmbiguous(PathBuf),

    // Buildpack validation errors
    #[error("buildpack {buildpack} does not support stack {stack}")]
    StackMismatch { buildpack: String, stack: String },

    #[error("invalid manifest at {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("buildpack directory could not be determined: {0}")]
    BuildpackDirUnknown(String),

    #[error("deps index {0} is not a number")]
    InvalidDepsIndex(String),

    // Platform bridge errors
    #[error("var fails to contain required key=value structure: {0}")]
    MalformedEnvPair(String),

    // Release errors
    #[error("no run metadata at {0}; finalize must run before release")]
    RunMetadataMissing(PathBuf),

    // Subprocess errors
    #[error("failed to launch {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed with exit code {code}")]
    CommandExit { command: String, code: i32 },

    #[error("{command} terminated by signal")]
    CommandSignaled { command: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // Step wrapper naming the failing phase step
    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<ShimError>,
    },
}

impl ShimError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command launch error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Wrap an error with the name of the failing step
    pub fn step(step: &'static str, source: ShimError) -> Self {
        Self::Step {
            step,
            source: Box::new(source),
        }
    }
}

/// Extension for wrapping step errors, used by the phase drivers
pub trait StepContext<T> {
    /// Prefix any error with a step-identifying message
    fn step(self, step: &'static str) -> ShimResult<T>;
}

impl<T> StepContext<T> for ShimResult<T> {
    fn step(self, step: &'static str) -> ShimResult<T> {
        self.map_err(|e| ShimError::step(step, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ShimError::NoUniqueVersion {
            id: "org.cloudfoundry.node-engine".to_string(),
            found: 2,
        };
        assert!(err.to_string().contains("unique version"));
        assert!(err.to_string().contains("org.cloudfoundry.node-engine"));
    }

    #[test]
    fn checksum_mismatch_display() {
        let err = ShimError::ChecksumMismatch {
            expected: "deadbeef".to_string(),
            actual: "cafebabe".to_string(),
        };
        assert!(err.to_string().contains("dependency sha256 mismatch"));
    }

    #[test]
    fn step_wraps_source() {
        let inner = ShimError::PathNotFound("/tmp/missing".into());
        let err = ShimError::step("failed to restore v3 cache", inner);
        let msg = err.to_string();
        assert!(msg.starts_with("failed to restore v3 cache"));
        assert!(msg.contains("/tmp/missing"));
    }
}
