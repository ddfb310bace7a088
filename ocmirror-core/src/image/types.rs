//! Related images and copy instructions

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use crate::config::CatalogEntry;

/// Kind of image being mirrored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageType {
    #[default]
    Invalid,
    OcpReleaseContent,
    KubeVirtContainer,
    OcpRelease,
    Cincinnati,
    OperatorRelatedImage,
    Generic,
    Helm,
    OperatorBundle,
    OperatorCatalog,
}

impl ImageType {
    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            ImageType::OperatorRelatedImage | ImageType::OperatorBundle | ImageType::OperatorCatalog
        )
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageType::Invalid => "invalid",
            ImageType::OcpReleaseContent => "ocpReleaseContent",
            ImageType::KubeVirtContainer => "kubeVirtContainer",
            ImageType::OcpRelease => "ocpRelease",
            ImageType::Cincinnati => "cincinnati",
            ImageType::OperatorRelatedImage => "operatorRelatedImage",
            ImageType::Generic => "generic",
            ImageType::Helm => "helm",
            ImageType::OperatorBundle => "operatorBundle",
            ImageType::OperatorCatalog => "operatorCatalog",
        };
        f.write_str(name)
    }
}

/// An image referenced by a filtered bundle, or the catalog image itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedImage {
    pub name: String,
    pub image: String,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_catalog: Option<String>,
    /// Tag of the catalog image rebuilt from the filtered declarative config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebuilt_tag: Option<String>,
}

impl RelatedImage {
    pub fn new(name: impl Into<String>, image: impl Into<String>, image_type: ImageType) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            image_type,
            ..Default::default()
        }
    }
}

/// One copy instruction handed to the batch worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyImageSchema {
    /// Where to copy the image from, with transport
    pub source: String,
    /// Where to copy the image to, with transport
    pub destination: String,
    /// The image as written in the catalog or configuration
    pub origin: String,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebuilt_tag: Option<String>,
}

/// Provenance indices recorded while extracting related images
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyImageSchemaMap {
    /// Image (with transport) to the operators referencing it
    pub operators_by_image: BTreeMap<String, BTreeSet<String>>,
    /// Image (with transport) to bundle image to bundle name
    pub bundles_by_image: BTreeMap<String, BTreeMap<String, String>>,
}

impl CopyImageSchemaMap {
    pub fn record(&mut self, image: &str, operator: &str, bundle_image: &str, bundle_name: &str) {
        self.operators_by_image
            .entry(image.to_string())
            .or_default()
            .insert(operator.to_string());
        self.bundles_by_image
            .entry(image.to_string())
            .or_default()
            .entry(bundle_image.to_string())
            .or_insert_with(|| bundle_name.to_string());
    }
}

/// Outcome of filtering one catalog, consumed by the rebuild step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFilterResult {
    pub operator_filter: CatalogEntry,
    /// Directory holding the filtered declarative config, when one was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_config_path: Option<PathBuf>,
    pub to_rebuild: bool,
    /// Digest of the source catalog image
    pub digest: String,
}

/// Everything the operator collector hands back to the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorSchema {
    pub all_images: Vec<CopyImageSchema>,
    pub copy_image_schema_map: CopyImageSchemaMap,
    /// Keyed by the catalog reference with its transport, e.g. `docker://quay.io/ns/index:v1`
    pub catalog_to_fbc_map: BTreeMap<String, CatalogFilterResult>,
}

impl CollectorSchema {
    pub fn total_operator_images(&self) -> usize {
        self.all_images.iter().filter(|img| img.image_type.is_operator()).count()
    }
}
