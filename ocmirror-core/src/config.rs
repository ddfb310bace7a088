//! Image set configuration and collector options
//!
//! Only the operator section of the image set configuration is modelled:
//!
//! ```yaml
//! kind: ImageSetConfiguration
//! apiVersion: mirror.openshift.io/v2alpha1
//! mirror:
//!   operators:
//!     - catalog: registry.redhat.io/redhat/redhat-operator-index:v4.15
//!       targetCatalog: mirrored/redhat-operator-index
//!       packages:
//!         - name: aws-load-balancer-operator
//!           channels:
//!             - name: stable-v1
//!               minVersion: 1.1.0
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::catalog::parse_tolerant;
use crate::error::CollectorError;
use crate::image::is_valid_path_component;

pub const DEFAULT_PARALLEL_IMAGES: usize = 8;

/// The image set configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSetConfig {
    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub mirror: MirrorSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorSpec {
    #[serde(default)]
    pub operators: Vec<CatalogEntry>,
}

/// One operator catalog to mirror
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Catalog image reference, `docker://` (default) or `oci://`
    pub catalog: String,

    /// Repository path to mirror the catalog to, replacing its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_catalog: Option<String>,

    /// Tag to mirror the catalog with, replacing its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tag: Option<String>,

    /// Mirror every bundle instead of channel heads
    #[serde(default)]
    pub full: bool,

    #[serde(default)]
    pub packages: Vec<PackageFilter>,
}

/// Package selection within a catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageFilter {
    pub name: String,

    /// Channel to promote as default when the catalog's default is filtered out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelFilter>,
}

/// Channel selection within a package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelFilter {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,
}

impl ImageSetConfig {
    /// Load configuration from a file path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read image set configuration: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse image set configuration: {}", path.display()))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml_ng::from_str(content).context("Invalid image set configuration YAML")
    }

    /// Validate every operator catalog entry
    pub fn validate(&self) -> Result<(), CollectorError> {
        self.mirror.operators.iter().try_for_each(CatalogEntry::validate)
    }
}

impl CatalogEntry {
    /// Reject filter combinations and bounds that cannot be honoured
    pub fn validate(&self) -> Result<(), CollectorError> {
        if let Some(target) = self.target_catalog.as_deref() {
            if !is_valid_path_component(target) {
                return Err(CollectorError::InvalidTargetCatalog {
                    catalog: self.catalog.clone(),
                    target: target.to_string(),
                });
            }
        }

        for pkg in &self.packages {
            let invalid = |reason: &str| CollectorError::InvalidFiltering {
                catalog: self.catalog.clone(),
                package: pkg.name.clone(),
                reason: reason.to_string(),
            };

            if pkg.has_bounds() && !pkg.channels.is_empty() {
                return Err(invalid(
                    "cannot use channels and package min/max versions at the same time",
                ));
            }
            if pkg.has_bounds() && self.full {
                return Err(invalid("cannot use full and min/max versions at the same time"));
            }

            check_bound(&pkg.name, "minVersion", pkg.min_version.as_deref())?;
            check_bound(&pkg.name, "maxVersion", pkg.max_version.as_deref())?;
            for channel in &pkg.channels {
                check_bound(&pkg.name, "minVersion", channel.min_version.as_deref())?;
                check_bound(&pkg.name, "maxVersion", channel.max_version.as_deref())?;
            }
        }

        Ok(())
    }

    /// A full catalog without package selection is mirrored untouched
    pub fn is_full_catalog(&self) -> bool {
        self.full && self.packages.is_empty()
    }

    /// Deterministic digest of the filter, ignoring target naming
    ///
    /// Used as the tag of the rebuilt catalog and as the directory name of the
    /// filtered declarative config.
    pub fn filter_digest(&self) -> Result<String> {
        let mut filter = self.clone();
        filter.target_catalog = None;
        filter.target_tag = None;
        let canonical = serde_json::to_vec(&filter).context("Failed to serialize catalog filter")?;
        let mut digest = hex::encode(Sha256::digest(&canonical));
        digest.truncate(32);
        Ok(digest)
    }

    pub fn find_package(&self, name: &str) -> Option<&PackageFilter> {
        self.packages.iter().find(|p| p.name == name)
    }
}

impl PackageFilter {
    pub fn has_bounds(&self) -> bool {
        non_empty(&self.min_version).is_some() || non_empty(&self.max_version).is_some()
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn check_bound(package: &str, field: &'static str, value: Option<&str>) -> Result<(), CollectorError> {
    match value.filter(|v| !v.is_empty()) {
        Some(v) => parse_tolerant(v).map(|_| ()).map_err(|source| CollectorError::InvalidVersionBound {
            package: package.to_string(),
            field,
            value: v.to_string(),
            source,
        }),
        None => Ok(()),
    }
}

/// Collection topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MirrorMode {
    MirrorToDisk,
    DiskToMirror,
    MirrorToMirror,
}

/// Options of one operator collection pass
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub mode: MirrorMode,

    /// Collecting for the delete workflow
    pub is_delete: bool,

    /// Root of the on-disk working tree
    pub working_dir: PathBuf,

    /// Host (and port) of the local cache registry
    pub local_storage_fqdn: String,

    /// Final destination, `docker://host[/namespace]`
    pub destination: String,

    /// Upper bound of concurrent per-image operations
    pub parallel_images: usize,
}

impl CollectorOptions {
    pub fn new(mode: MirrorMode, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            is_delete: false,
            working_dir: working_dir.into(),
            local_storage_fqdn: "localhost:55000".to_string(),
            destination: String::new(),
            parallel_images: DEFAULT_PARALLEL_IMAGES,
        }
    }

    pub fn is_mirror_to_disk(&self) -> bool {
        self.mode == MirrorMode::MirrorToDisk
    }

    pub fn is_mirror_to_mirror(&self) -> bool {
        self.mode == MirrorMode::MirrorToMirror
    }

    /// Disk-to-mirror, or any delete pass: the source registry may be unreachable
    pub fn reads_from_cache(&self) -> bool {
        self.mode == MirrorMode::DiskToMirror || self.is_delete
    }
}
