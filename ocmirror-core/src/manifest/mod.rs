//! Manifest collaborator - abstraction over catalog image access
//!
//! The collector reads catalog images through this trait:
//! - OCI layout on disk ([`OciLayoutManifest`])
//! - Registry-backed sources supplied by the caller
//! - Mock (testing)

mod layout;
mod types;

pub use layout::OciLayoutManifest;
pub use types::{
    Descriptor, OciSchema, OperatorConfig, OperatorConfigSchema, CONFIGS_LABEL,
    MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST,
};

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::context::CollectContext;

/// Typed access to catalog image layouts and digests
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Read `index.json` of an OCI layout directory
    fn get_image_index(&self, layout_dir: &Path) -> Result<OciSchema>;

    /// Read an image manifest (or manifest list) blob
    fn get_image_manifest(&self, blob: &Path) -> Result<OciSchema>;

    /// Replace a multi-manifest `index.json` by an index pointing at the
    /// original index, stored as a blob
    fn convert_index_to_single_manifest(&self, layout_dir: &Path, index: &OciSchema) -> Result<()>;

    /// Read an image configuration blob
    fn get_operator_config(&self, blob: &Path) -> Result<OperatorConfigSchema>;

    /// Unpack the entries under `label` of every layer into `to_dir`
    ///
    /// Nothing happens when `to_dir/label` already exists.
    fn extract_layers(&self, blobs_dir: &Path, to_dir: &Path, label: &str, manifest: &OciSchema)
        -> Result<()>;

    /// Encoded manifest digest of an image reference (with transport)
    async fn image_digest(&self, ctx: &CollectContext, reference: &str) -> Result<String>;

    /// Source identifier for logging/debugging
    fn name(&self) -> &'static str;
}

/// Materializes a registry catalog image as an OCI layout
#[async_trait]
pub trait CatalogPuller: Send + Sync {
    async fn pull(&self, ctx: &CollectContext, reference: &str, layout_dir: &Path) -> Result<()>;
}
