//! OCI layout documents read while unpacking a catalog image

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Label naming the directory of the file-based catalog inside the image
pub const CONFIGS_LABEL: &str = "operators.operatorframework.io.index.configs.v1";

/// An image index or an image manifest
///
/// Both documents share this shape: an index fills `manifests`, a manifest
/// fills `config` and `layers`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciSchema {
    #[serde(default)]
    pub schema_version: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,

    #[serde(default)]
    pub manifests: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<Descriptor>,
}

impl OciSchema {
    /// More than one manifest, typically one per architecture
    pub fn is_multi_manifest(&self) -> bool {
        self.manifests.len() > 1
    }

    /// A manifest list reached where an image manifest was expected
    pub fn is_manifest_list(&self) -> bool {
        !self.manifests.is_empty() && self.config.as_ref().map_or(true, |c| c.size == 0)
    }
}

/// Content descriptor - refers to a blob by digest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,

    #[serde(default)]
    pub digest: String,

    #[serde(default)]
    pub size: u64,
}

impl Descriptor {
    /// Hex part of `algorithm:hex`, the blob file name
    pub fn encoded(&self) -> Option<&str> {
        crate::image::is_valid_digest(&self.digest)
            .then(|| self.digest.split_once(':').map(|(_, hex)| hex))
            .flatten()
    }
}

/// Image configuration blob, only labels are consumed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfigSchema {
    #[serde(default)]
    pub architecture: String,

    #[serde(default)]
    pub os: String,

    #[serde(default)]
    pub config: OperatorConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    #[serde(rename = "Labels", default)]
    pub labels: BTreeMap<String, String>,
}

impl OperatorConfigSchema {
    /// Directory of the file-based catalog, relative to the image root
    pub fn configs_label(&self) -> Option<&str> {
        self.config
            .labels
            .get(CONFIGS_LABEL)
            .map(String::as_str)
            .filter(|l| !l.is_empty())
    }
}
