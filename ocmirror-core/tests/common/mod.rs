//! Test helpers shared by the integration tests
//!
//! Builds catalog images as OCI layouts on disk and provides collaborators
//! that resolve digests without a registry.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use ocmirror_core::context::CollectContext;
use ocmirror_core::manifest::{
    CatalogPuller, Descriptor, ManifestSource, OciLayoutManifest, OciSchema, OperatorConfigSchema,
    CONFIGS_LABEL, MEDIA_TYPE_OCI_MANIFEST,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Once;

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn sha(n: char) -> String {
    n.to_string().repeat(64)
}

pub fn operator_image(version: &str) -> String {
    let n = match version {
        "1.0.0" => '1',
        "1.1.0" => '2',
        "1.2.0" => '3',
        _ => 'a',
    };
    format!("quay.io/test/foo-operator@sha256:{}", sha(n))
}

pub fn bundle_image(version: &str) -> String {
    format!("quay.io/test/foo-bundle:v{version}")
}

/// File-based catalog with package `foo`: 1.0.0 ← 1.1.0 ← 1.2.0 on `stable`,
/// and package `bar` with a single bundle on `alpha`
pub fn foo_catalog() -> String {
    let mut objects = vec![
        json!({"schema": "olm.package", "name": "foo", "defaultChannel": "stable"}),
        json!({
            "schema": "olm.channel",
            "package": "foo",
            "name": "stable",
            "entries": [
                {"name": "foo.v1.0.0"},
                {"name": "foo.v1.1.0", "replaces": "foo.v1.0.0"},
                {"name": "foo.v1.2.0", "replaces": "foo.v1.1.0"}
            ]
        }),
    ];
    for version in ["1.0.0", "1.1.0", "1.2.0"] {
        objects.push(json!({
            "schema": "olm.bundle",
            "name": format!("foo.v{version}"),
            "package": "foo",
            "image": bundle_image(version),
            "properties": [
                {"type": "olm.package", "value": {"packageName": "foo", "version": version}}
            ],
            "relatedImages": [
                {"name": "operator", "image": operator_image(version)},
                {"name": "", "image": bundle_image(version)}
            ]
        }));
    }
    objects.into_iter().map(|o| o.to_string()).collect::<Vec<_>>().join("\n")
}

pub fn bar_catalog() -> String {
    [
        json!({"schema": "olm.package", "name": "bar", "defaultChannel": "alpha"}),
        json!({
            "schema": "olm.channel",
            "package": "bar",
            "name": "alpha",
            "entries": [{"name": "bar.v0.1.0"}]
        }),
        json!({
            "schema": "olm.bundle",
            "name": "bar.v0.1.0",
            "package": "bar",
            "image": "quay.io/test/bar-bundle:v0.1.0",
            "relatedImages": [
                {"name": "bar", "image": "quay.io/test/bar:v0.1.0"},
                {"name": "", "image": "quay.io/test/bar-bundle:v0.1.0"}
            ]
        }),
    ]
    .iter()
    .map(|o| o.to_string())
    .collect::<Vec<_>>()
    .join("\n")
}

fn write_blob(blobs: &Path, data: &[u8]) -> Descriptor {
    let digest = hex::encode(Sha256::digest(data));
    std::fs::write(blobs.join(&digest), data).unwrap();
    Descriptor {
        media_type: String::new(),
        digest: format!("sha256:{digest}"),
        size: data.len() as u64,
    }
}

/// Write a single-manifest catalog image layout holding `files` under
/// `configs/`, returning the manifest digest (hex)
pub fn write_catalog_layout(layout: &Path, files: &[(&str, String)]) -> String {
    let blobs = layout.join("blobs/sha256");
    std::fs::create_dir_all(&blobs).unwrap();

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("configs/{path}"), content.as_bytes())
            .unwrap();
    }
    let layer = write_blob(&blobs, &builder.into_inner().unwrap().finish().unwrap());

    let mut labels = serde_json::Map::new();
    labels.insert(CONFIGS_LABEL.to_string(), json!("/configs"));
    let config = json!({
        "architecture": "amd64",
        "os": "linux",
        "config": {"Labels": labels}
    });
    let config = write_blob(&blobs, config.to_string().as_bytes());

    let manifest = OciSchema {
        schema_version: 2,
        media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
        config: Some(config),
        layers: vec![layer],
        ..Default::default()
    };
    let mut manifest = write_blob(&blobs, &serde_json::to_vec(&manifest).unwrap());
    manifest.media_type = MEDIA_TYPE_OCI_MANIFEST.to_string();
    let digest = manifest.encoded().unwrap().to_string();

    let index = OciSchema {
        schema_version: 2,
        manifests: vec![manifest],
        ..Default::default()
    };
    std::fs::write(layout.join("index.json"), serde_json::to_vec(&index).unwrap()).unwrap();
    digest
}

pub fn catalog_files() -> Vec<(&'static str, String)> {
    vec![("foo/catalog.json", foo_catalog()), ("bar/catalog.json", bar_catalog())]
}

/// OCI layout access with digests looked up in a fixed table
pub struct ResolvingManifest {
    layout: OciLayoutManifest,
    digests: HashMap<String, String>,
}

impl ResolvingManifest {
    pub fn new(digests: &[(&str, &str)]) -> Self {
        Self {
            layout: OciLayoutManifest::new(),
            digests: digests
                .iter()
                .map(|(reference, digest)| (reference.to_string(), digest.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl ManifestSource for ResolvingManifest {
    fn get_image_index(&self, layout_dir: &Path) -> Result<OciSchema> {
        self.layout.get_image_index(layout_dir)
    }

    fn get_image_manifest(&self, blob: &Path) -> Result<OciSchema> {
        self.layout.get_image_manifest(blob)
    }

    fn convert_index_to_single_manifest(&self, layout_dir: &Path, index: &OciSchema) -> Result<()> {
        self.layout.convert_index_to_single_manifest(layout_dir, index)
    }

    fn get_operator_config(&self, blob: &Path) -> Result<OperatorConfigSchema> {
        self.layout.get_operator_config(blob)
    }

    fn extract_layers(
        &self,
        blobs_dir: &Path,
        to_dir: &Path,
        label: &str,
        manifest: &OciSchema,
    ) -> Result<()> {
        self.layout.extract_layers(blobs_dir, to_dir, label, manifest)
    }

    async fn image_digest(&self, _ctx: &CollectContext, reference: &str) -> Result<String> {
        match self.digests.get(reference) {
            Some(digest) => Ok(digest.clone()),
            None => bail!("manifest unknown: {reference}"),
        }
    }

    fn name(&self) -> &'static str {
        "resolving"
    }
}

/// Materializes the fixture catalog for any reference
#[derive(Default)]
pub struct FixturePuller {
    pub pulled: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl CatalogPuller for FixturePuller {
    async fn pull(&self, _ctx: &CollectContext, reference: &str, layout_dir: &Path) -> Result<()> {
        self.pulled.lock().unwrap().push(reference.to_string());
        write_catalog_layout(layout_dir, &catalog_files());
        Ok(())
    }
}
