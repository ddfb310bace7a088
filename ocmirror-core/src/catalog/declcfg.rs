//! File-based catalog (declarative config) model
//!
//! A catalog directory holds JSON streams and multi-document YAML files of
//! `olm.package`, `olm.channel` and `olm.bundle` objects, in any nesting.
//! Only the fields this crate consumes are typed; everything else rides along
//! in `extra` so a filtered catalog is written back without loss.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

pub const SCHEMA_PACKAGE: &str = "olm.package";
pub const SCHEMA_CHANNEL: &str = "olm.channel";
pub const SCHEMA_BUNDLE: &str = "olm.bundle";

/// Directory for schema objects that belong to no package
const GLOBAL_DIR: &str = "__global";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub default_channel: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub schema: String,
    pub package: String,
    pub name: String,
    #[serde(default)]
    pub entries: Vec<ChannelEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One node of a channel's upgrade graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replaces: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skips: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub skip_range: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub schema: String,
    pub name: String,
    pub package: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub related_images: Vec<BundleImage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An entry of a bundle's `relatedImages`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleImage {
    #[serde(default)]
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
}

/// Parsed contents of a catalog directory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeclarativeConfig {
    pub packages: Vec<Package>,
    pub channels: Vec<Channel>,
    pub bundles: Vec<Bundle>,
    /// Objects of any other schema, kept verbatim
    pub others: Vec<Value>,
}

impl DeclarativeConfig {
    /// Load every JSON and YAML file below `root`, in file name order
    pub fn load_dir(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            bail!("Catalog directory not found: {}", root.display());
        }

        let mut cfg = DeclarativeConfig::default();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk catalog: {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            let objects = match ext {
                "json" => read_json_stream(path)?,
                "yaml" | "yml" => read_yaml_documents(path)?,
                _ => continue,
            };
            for object in objects {
                cfg.push(object)
                    .with_context(|| format!("Invalid catalog object in {}", path.display()))?;
            }
        }

        tracing::debug!(
            packages = cfg.packages.len(),
            channels = cfg.channels.len(),
            bundles = cfg.bundles.len(),
            "Loaded declarative config from {}",
            root.display()
        );
        Ok(cfg)
    }

    /// Dispatch a schema object into its typed collection
    pub fn push(&mut self, object: Value) -> Result<()> {
        let schema = object
            .get("schema")
            .and_then(Value::as_str)
            .context("Catalog object has no schema")?
            .to_string();
        match schema.as_str() {
            SCHEMA_PACKAGE => self.packages.push(serde_json::from_value(object)?),
            SCHEMA_CHANNEL => self.channels.push(serde_json::from_value(object)?),
            SCHEMA_BUNDLE => self.bundles.push(serde_json::from_value(object)?),
            _ => self.others.push(object),
        }
        Ok(())
    }

    /// Write one `<package>/catalog.json` per package below `root`
    ///
    /// The tree is assembled in a sibling temporary directory and moved into
    /// place, replacing any previous contents of `root`.
    pub fn write_dir(&self, root: &Path) -> Result<()> {
        let parent = root
            .parent()
            .with_context(|| format!("Catalog directory has no parent: {}", root.display()))?;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        let staging = tempfile::tempdir_in(parent)?;

        for (package, objects) in self.objects_by_package()? {
            let dir = staging.path().join(&package);
            std::fs::create_dir_all(&dir)?;
            let mut content = String::new();
            for object in objects {
                content.push_str(&serde_json::to_string_pretty(&object)?);
                content.push('\n');
            }
            std::fs::write(dir.join("catalog.json"), content)
                .with_context(|| format!("Failed to write catalog for package {package}"))?;
        }

        if root.exists() {
            std::fs::remove_dir_all(root)
                .with_context(|| format!("Failed to replace catalog directory: {}", root.display()))?;
        }
        std::fs::rename(staging.keep(), root)
            .with_context(|| format!("Failed to move catalog into place: {}", root.display()))?;
        Ok(())
    }

    fn objects_by_package(&self) -> Result<BTreeMap<String, Vec<Value>>> {
        let mut by_package: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for pkg in &self.packages {
            by_package.entry(pkg.name.clone()).or_default().push(serde_json::to_value(pkg)?);
        }
        for ch in &self.channels {
            by_package.entry(ch.package.clone()).or_default().push(serde_json::to_value(ch)?);
        }
        for bundle in &self.bundles {
            by_package
                .entry(bundle.package.clone())
                .or_default()
                .push(serde_json::to_value(bundle)?);
        }
        for other in &self.others {
            let package = other
                .get("package")
                .and_then(Value::as_str)
                .filter(|p| !p.is_empty())
                .unwrap_or(GLOBAL_DIR);
            by_package.entry(package.to_string()).or_default().push(other.clone());
        }
        Ok(by_package)
    }
}

impl Bundle {
    pub fn has_property(&self, kind: &str) -> bool {
        self.properties.iter().any(|p| p.kind == kind)
    }
}

fn read_json_stream(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    serde_json::Deserializer::from_str(&content)
        .into_iter::<Value>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse JSON catalog file: {}", path.display()))
}

fn read_yaml_documents(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    let mut objects = Vec::new();
    for document in serde_yaml_ng::Deserializer::from_str(&content) {
        let value = Value::deserialize(document)
            .with_context(|| format!("Failed to parse YAML catalog file: {}", path.display()))?;
        if !value.is_null() {
            objects.push(value);
        }
    }
    Ok(objects)
}
