//! Manifest access on an OCI image layout directory

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use super::{Descriptor, ManifestSource, OciSchema, OperatorConfigSchema, MEDIA_TYPE_OCI_INDEX};
use crate::context::CollectContext;
use crate::error::CollectorError;
use crate::image::ImageSpec;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Reads catalog images laid out as `index.json` plus `blobs/sha256/<hex>`
///
/// Digests resolve for `oci://` references and for references pinned by
/// digest; anything else needs a registry-backed source.
#[derive(Debug, Clone, Default)]
pub struct OciLayoutManifest;

impl OciLayoutManifest {
    pub fn new() -> Self {
        Self
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read {what}: {}", path.display()))?;
        serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse {what}: {}", path.display()))
    }
}

#[async_trait]
impl ManifestSource for OciLayoutManifest {
    fn get_image_index(&self, layout_dir: &Path) -> Result<OciSchema> {
        Self::read_json(&layout_dir.join("index.json"), "image index")
    }

    fn get_image_manifest(&self, blob: &Path) -> Result<OciSchema> {
        Self::read_json(blob, "image manifest")
    }

    fn convert_index_to_single_manifest(&self, layout_dir: &Path, index: &OciSchema) -> Result<()> {
        let index_path = layout_dir.join("index.json");
        let data = std::fs::read(&index_path)
            .with_context(|| format!("Failed to read image index: {}", index_path.display()))?;
        let digest = hex::encode(Sha256::digest(&data));

        let blobs = layout_dir.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs)?;
        std::fs::write(blobs.join(&digest), &data)
            .with_context(|| format!("Failed to store image index as blob {digest}"))?;

        let media_type = if index.media_type.is_empty() {
            MEDIA_TYPE_OCI_INDEX.to_string()
        } else {
            index.media_type.clone()
        };
        let single = OciSchema {
            schema_version: index.schema_version,
            manifests: vec![Descriptor {
                media_type,
                digest: format!("sha256:{digest}"),
                size: data.len() as u64,
            }],
            ..Default::default()
        };
        std::fs::write(&index_path, serde_json::to_vec(&single)?)
            .with_context(|| format!("Failed to write image index: {}", index_path.display()))?;

        tracing::debug!("converted {} to a single manifest index (sha256:{digest})", index_path.display());
        Ok(())
    }

    fn get_operator_config(&self, blob: &Path) -> Result<OperatorConfigSchema> {
        Self::read_json(blob, "image config")
    }

    fn extract_layers(
        &self,
        blobs_dir: &Path,
        to_dir: &Path,
        label: &str,
        manifest: &OciSchema,
    ) -> Result<()> {
        let label = label.trim_matches('/');
        if to_dir.join(label).exists() {
            tracing::debug!("extract directory exists (nop)");
            return Ok(());
        }
        std::fs::create_dir_all(to_dir)?;

        for layer in &manifest.layers {
            let encoded = layer.encoded().ok_or_else(|| CollectorError::InvalidDigest {
                digest: layer.digest.clone(),
            })?;
            let blob = blobs_dir.join(encoded);
            let file = File::open(&blob)
                .with_context(|| format!("Failed to open layer: {}", blob.display()))?;
            untar(file, to_dir, label)
                .with_context(|| format!("Failed to extract layer {}", layer.digest))?;
        }
        Ok(())
    }

    async fn image_digest(&self, _ctx: &CollectContext, reference: &str) -> Result<String> {
        let spec = ImageSpec::parse(reference)?;
        if spec.is_oci() {
            let index = self.get_image_index(Path::new(&spec.path_component))?;
            return match index.manifests.first().and_then(Descriptor::encoded) {
                Some(digest) => Ok(digest.to_string()),
                None => bail!("manifest unknown: no manifests in {reference}"),
            };
        }
        if spec.is_by_digest() {
            return Ok(spec.digest);
        }
        bail!("manifest unknown: {reference} cannot be resolved from an OCI layout")
    }

    fn name(&self) -> &'static str {
        "oci-layout"
    }
}

/// Unpack the entries whose path contains `label`, gzip or plain tar
fn untar(file: File, to_dir: &Path, label: &str) -> Result<()> {
    let mut reader = BufReader::new(file);
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    let stream: Box<dyn Read> = if is_gzip {
        Box::new(flate2::read::GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };

    let mut archive = tar::Archive::new(stream);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        if !(kind.is_dir() || kind.is_file()) {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        if !path.contains(label) {
            continue;
        }
        if !entry.unpack_in(to_dir)? {
            tracing::warn!("skipping layer entry outside of the target directory: {path}");
        }
    }
    Ok(())
}
