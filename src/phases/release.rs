//! Release phase: emit the v2 start-command YAML
//!
//! The v3 builder's run metadata was copied into the app dir by finalize.
//! Release translates its process types into the YAML the v2 platform reads
//! from stdout, then consumes the metadata file so the droplet does not ship
//! it.

use crate::cnb::LaunchMetadata;
use crate::error::{ShimError, ShimResult};
use std::io::Write;
use std::path::{Path, PathBuf};

/// The release phase handler
pub struct Releaser {
    metadata_path: PathBuf,
}

impl Releaser {
    /// Read run metadata from the app dir finalize rebuilt
    pub fn new(v2_app_dir: &Path) -> Self {
        Self {
            metadata_path: v2_app_dir.join(".cloudfoundry").join("metadata.toml"),
        }
    }

    /// Write the process-type YAML to `out` and consume the metadata file
    pub async fn release(&self, out: &mut impl Write) -> ShimResult<()> {
        if !self.metadata_path.exists() {
            return Err(ShimError::RunMetadataMissing(self.metadata_path.clone()));
        }

        let metadata: LaunchMetadata = crate::cnb::read_toml(&self.metadata_path).await?;

        let mut processes = serde_yaml::Mapping::new();
        for process in &metadata.processes {
            processes.insert(
                serde_yaml::Value::String(process.process_type.clone()),
                serde_yaml::Value::String(process.command.clone()),
            );
        }
        let mut document = serde_yaml::Mapping::new();
        document.insert(
            serde_yaml::Value::String("default_process_types".to_string()),
            serde_yaml::Value::Mapping(processes),
        );

        let yaml = serde_yaml::to_string(&document)?;
        out.write_all(yaml.as_bytes())
            .map_err(|e| ShimError::io("writing release yaml", e))?;

        tokio::fs::remove_file(&self.metadata_path)
            .await
            .map_err(|e| {
                ShimError::io(format!("removing {}", self.metadata_path.display()), e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RUN_METADATA: &str = r#"
buildpacks = ["org.cloudfoundry.node-engine"]

[[processes]]
type = "web"
command = "npm start"
"#;

    fn app_with_metadata(temp: &TempDir) -> std::path::PathBuf {
        let app = temp.path().join("app");
        std::fs::create_dir_all(app.join(".cloudfoundry")).unwrap();
        std::fs::write(app.join(".cloudfoundry/metadata.toml"), RUN_METADATA).unwrap();
        app
    }

    #[tokio::test]
    async fn emits_process_types_as_yaml() {
        let temp = TempDir::new().unwrap();
        let app = app_with_metadata(&temp);

        let mut out = Vec::new();
        Releaser::new(&app).release(&mut out).await.unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "default_process_types:\n  web: npm start\n"
        );
    }

    #[tokio::test]
    async fn consumes_the_metadata_file() {
        let temp = TempDir::new().unwrap();
        let app = app_with_metadata(&temp);
        let releaser = Releaser::new(&app);

        let mut out = Vec::new();
        releaser.release(&mut out).await.unwrap();
        assert!(!app.join(".cloudfoundry/metadata.toml").exists());

        // A second release has nothing left to report
        let err = releaser.release(&mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, ShimError::RunMetadataMissing(_)));
    }

    #[tokio::test]
    async fn fails_before_finalize_ran() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        std::fs::create_dir_all(&app).unwrap();

        let err = Releaser::new(&app)
            .release(&mut Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ShimError::RunMetadataMissing(_)));
    }

    #[tokio::test]
    async fn multiple_process_types_keep_metadata_order() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        std::fs::create_dir_all(app.join(".cloudfoundry")).unwrap();
        std::fs::write(
            app.join(".cloudfoundry/metadata.toml"),
            "[[processes]]\ntype = \"web\"\ncommand = \"npm start\"\n\n[[processes]]\ntype = \"worker\"\ncommand = \"npm run work\"\n",
        )
        .unwrap();

        let mut out = Vec::new();
        Releaser::new(&app).release(&mut out).await.unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "default_process_types:\n  web: npm start\n  worker: npm run work\n"
        );
    }
}
