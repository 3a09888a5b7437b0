//! CNB metadata file model
//!
//! Everything the v3 lifecycle reads or writes on disk: buildpack.toml,
//! the order/group/plan files, per-layer metadata, and the run metadata the
//! launcher leaves in the app dir. All of it round-trips through `toml`.

use crate::error::{ShimError, ShimResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A v3 buildpack declaration (buildpack.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildpackToml {
    /// Buildpack API version; absent in older declarations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,

    #[serde(default)]
    pub buildpack: BuildpackInfo,

    /// Free-form metadata table, passed through untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<toml::Value>,

    /// Order-of-execution groups this buildpack wants run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<OrderGroup>,

    /// Declared stacks; `None` means the declaration carries no stanza,
    /// which is distinct from an explicitly empty list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacks: Option<Vec<Stack>>,
}

/// Identity section of a buildpack declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildpackInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// A stack a buildpack declares support for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    pub id: String,
}

/// One group inside an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderGroup {
    pub group: Vec<GroupEntry>,
}

/// A buildpack reference inside a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub id: String,
    pub version: String,
    /// Present only when the declaration spells it out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl GroupEntry {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            optional: None,
        }
    }
}

/// A complete order file: one or more groups in sequence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderToml {
    pub order: Vec<OrderGroup>,
}

/// The detector's chosen group, mutated by finalize to fold in v2 buildpacks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupToml {
    pub group: Vec<GroupEntry>,
}

/// Per-layer flags written next to each layer directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerMetadata {
    #[serde(default)]
    pub build: bool,
    #[serde(default)]
    pub launch: bool,
    #[serde(default)]
    pub cache: bool,
}

/// Run metadata the v3 lifecycle writes into the app dir
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchMetadata {
    #[serde(default)]
    pub processes: Vec<ProcessType>,
}

/// One process type entry in the run metadata
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessType {
    #[serde(rename = "type")]
    pub process_type: String,
    pub command: String,
}

impl BuildpackToml {
    pub async fn from_file(path: &Path) -> ShimResult<Self> {
        read_toml(path).await
    }

    /// The set of buildpack IDs referenced across all order groups
    pub fn referenced_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .order
            .iter()
            .flat_map(|order| order.group.iter().map(|entry| entry.id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Read and decode any TOML metadata file
pub async fn read_toml<T: DeserializeOwned>(path: &Path) -> ShimResult<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ShimError::io(format!("reading {}", path.display()), e))?;
    Ok(toml::from_str(&content)?)
}

/// Encode and write any TOML metadata file
pub async fn write_toml<T: Serialize>(path: &Path, value: &T) -> ShimResult<()> {
    let content = toml::to_string(value)?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| ShimError::io(format!("writing {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIMMED_BUILDPACK: &str = r#"
api = "0.2"

[buildpack]
id = "org.cloudfoundry.nodejs"
name = "Node.js Buildpack"
version = "1.2.3"

[[order]]
  [[order.group]]
  id = "org.cloudfoundry.node-engine"
  version = "0.0.5"

  [[order.group]]
  id = "org.cloudfoundry.npm"
  version = "0.0.3"
  optional = true
"#;

    #[test]
    fn parse_buildpack_with_order() {
        let bp: BuildpackToml = toml::from_str(SHIMMED_BUILDPACK).unwrap();
        assert_eq!(bp.buildpack.id, "org.cloudfoundry.nodejs");
        assert_eq!(bp.order.len(), 1);
        assert_eq!(bp.order[0].group.len(), 2);
        assert_eq!(bp.order[0].group[0].optional, None);
        assert_eq!(bp.order[0].group[1].optional, Some(true));
    }

    #[test]
    fn referenced_ids_are_deduplicated() {
        let mut bp: BuildpackToml = toml::from_str(SHIMMED_BUILDPACK).unwrap();
        bp.order.push(OrderGroup {
            group: vec![GroupEntry::new("org.cloudfoundry.npm", "0.0.3")],
        });
        assert_eq!(
            bp.referenced_ids(),
            vec!["org.cloudfoundry.node-engine", "org.cloudfoundry.npm"]
        );
    }

    #[test]
    fn absent_stacks_differ_from_empty() {
        let without: BuildpackToml = toml::from_str("[buildpack]\nid = \"a\"").unwrap();
        assert!(without.stacks.is_none());

        let with_empty: BuildpackToml =
            toml::from_str("stacks = []\n[buildpack]\nid = \"a\"").unwrap();
        assert_eq!(with_empty.stacks.as_deref(), Some(&[][..]));
    }

    #[test]
    fn layer_metadata_defaults_to_false() {
        let meta: LayerMetadata = toml::from_str("build = true").unwrap();
        assert!(meta.build);
        assert!(!meta.launch);
        assert!(!meta.cache);
    }

    #[test]
    fn launch_metadata_tolerates_extra_keys() {
        let content = r#"
buildpacks = ["some.buildpack"]

[[processes]]
type = "web"
command = "npm start"
"#;
        let meta: LaunchMetadata = toml::from_str(content).unwrap();
        assert_eq!(meta.processes.len(), 1);
        assert_eq!(meta.processes[0].process_type, "web");
        assert_eq!(meta.processes[0].command, "npm start");
    }
}
