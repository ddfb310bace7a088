//! Operator catalog collection
//!
//! Walks the configured catalogs in order, unpacks each catalog image from
//! its OCI layout, filters the packages it selects and turns the kept related
//! images into a copy batch for the configured topology.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::batch::{sort_operator_images, CopyBatchPreparer};
use crate::catalog::{extract_catalog, OperatorCatalog};
use crate::config::{non_empty, CatalogEntry};
use crate::context::CollectContext;
use crate::error::CollectorError;
use crate::image::{
    CatalogFilterResult, CollectorSchema, CopyImageSchemaMap, ImageSpec, ImageType, RelatedImage,
    DOCKER_PROTOCOL, OCI_PROTOCOL,
};
use crate::manifest::{CatalogPuller, ManifestSource, OciSchema};

pub const OPERATOR_CATALOGS_DIR: &str = "operator-catalogs";
pub const CATALOG_IMAGE_DIR: &str = "catalog-image";
pub const CATALOG_CONFIG_DIR: &str = "catalog-config";
pub const FILTERED_CATALOGS_DIR: &str = "filtered-catalogs";
/// Digest of the rebuilt catalog, written next to its filtered config
pub const FILTERED_DIGEST_FILE: &str = "digest";

const LATEST_TAG: &str = "latest";

/// Per-catalog working directories
///
/// `<workdir>/operator-catalogs/<component>/<digest>/` holds the catalog
/// image layout, the extracted declarative config and the filtered configs.
#[derive(Debug, Clone)]
pub struct CatalogDirs {
    pub image: PathBuf,
    pub config: PathBuf,
    pub filtered: PathBuf,
}

impl CatalogDirs {
    pub fn new(working_dir: &Path, component: &str, digest: &str) -> Self {
        let base = working_dir.join(OPERATOR_CATALOGS_DIR).join(component).join(digest);
        Self {
            image: base.join(CATALOG_IMAGE_DIR),
            config: base.join(CATALOG_CONFIG_DIR),
            filtered: base.join(FILTERED_CATALOGS_DIR),
        }
    }

    fn create(&self) -> Result<()> {
        for dir in [&self.image, &self.config, &self.filtered] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    fn blobs(&self) -> PathBuf {
        self.image.join("blobs").join("sha256")
    }
}

/// Collects operator images through the given collaborators
pub struct OperatorCollector<'a> {
    manifest: &'a dyn ManifestSource,
    puller: Option<&'a dyn CatalogPuller>,
}

impl<'a> OperatorCollector<'a> {
    pub fn new(manifest: &'a dyn ManifestSource) -> Self {
        Self {
            manifest,
            puller: None,
        }
    }

    /// Registry catalogs without a local layout are pulled through `puller`
    pub fn with_puller(mut self, puller: &'a dyn CatalogPuller) -> Self {
        self.puller = Some(puller);
        self
    }

    /// Run one collection pass
    pub async fn collect(&self, ctx: &CollectContext) -> Result<CollectorSchema> {
        ctx.config.validate().map_err(|e| {
            e.log();
            e
        })?;

        tracing::debug!(
            "[OperatorImageCollector] collecting {} catalogs with {}",
            ctx.config.mirror.operators.len(),
            self.manifest.name()
        );

        let mut related_images: BTreeMap<String, Vec<RelatedImage>> = BTreeMap::new();
        let mut provenance = CopyImageSchemaMap::default();
        let mut catalog_to_fbc_map = BTreeMap::new();

        for entry in &ctx.config.mirror.operators {
            ctx.check()?;
            let Some(collected) = self.collect_catalog(ctx, entry, &mut provenance).await? else {
                continue;
            };
            related_images.extend(collected.related_images);
            related_images.insert(collected.catalog_key, vec![collected.catalog_image]);
            catalog_to_fbc_map.insert(collected.reference, collected.filter_result);
        }

        let mut all_images = CopyBatchPreparer::new(&ctx.options, &ctx.config).prepare(&related_images)?;
        sort_operator_images(&mut all_images);

        tracing::info!(
            "[OperatorImageCollector] images to copy (before duplicates) {}",
            all_images.len()
        );

        Ok(CollectorSchema {
            all_images,
            copy_image_schema_map: provenance,
            catalog_to_fbc_map,
        })
    }

    async fn collect_catalog(
        &self,
        ctx: &CollectContext,
        entry: &CatalogEntry,
        provenance: &mut CopyImageSchemaMap,
    ) -> Result<Option<CollectedCatalog>> {
        let spec = ImageSpec::parse(&entry.catalog)
            .with_context(|| format!("Invalid catalog reference: {}", entry.catalog))?;

        let (source_ref, digest) = if ctx.options.reads_from_cache() {
            let cached = cached_catalog_reference(ctx, entry, &spec);
            let digest = self.manifest.image_digest(ctx, &cached).await.map_err(|e| {
                CollectorError::MissingCatalogDigest {
                    reference: cached.clone(),
                    message: format!("{e:#}"),
                }
            })?;
            (cached, digest)
        } else {
            match self.manifest.image_digest(ctx, &spec.reference_with_transport).await {
                Ok(digest) => (spec.reference_with_transport.clone(), digest),
                Err(e) => {
                    tracing::warn!(
                        "[OperatorImageCollector] unable to find digest of catalog {} : {e:#} : SKIPPING",
                        entry.catalog
                    );
                    return Ok(None);
                }
            }
        };

        let component = spec.component_name().to_string();
        let dirs = CatalogDirs::new(&ctx.options.working_dir, &component, &digest);
        dirs.create()?;

        if !dirs.image.join("index.json").exists() {
            if spec.is_oci() {
                copy_layout(Path::new(&spec.path_component), &dirs.image)?;
            } else {
                let puller = self
                    .puller
                    .ok_or_else(|| anyhow!("no catalog puller available to fetch {source_ref}"))?;
                puller.pull(ctx, &source_ref, &dirs.image).await?;
            }
        }

        let mut index = self.manifest.get_image_index(&dirs.image)?;
        let mut catalog_image = entry.catalog.clone();
        if spec.is_oci() && index.is_multi_manifest() {
            self.manifest.convert_index_to_single_manifest(&dirs.image, &index)?;
            index = self.manifest.get_image_index(&dirs.image)?;
            let absolute = std::fs::canonicalize(&dirs.image)
                .with_context(|| format!("Failed to resolve {}", dirs.image.display()))?;
            catalog_image = format!("{OCI_PROTOCOL}{}", absolute.display());
        }

        let manifest = self.catalog_manifest(&dirs, &index, &entry.catalog)?;
        let config_digest = manifest
            .config
            .as_ref()
            .ok_or_else(|| anyhow!("image manifest of catalog {} has no config", entry.catalog))?;
        let config = self.manifest.get_operator_config(&dirs.blobs().join(encoded(config_digest)?))?;
        let label = config
            .configs_label()
            .ok_or_else(|| anyhow!("catalog {} has no declarative config label", entry.catalog))?;

        self.manifest.extract_layers(&dirs.blobs(), &dirs.config, label, &manifest)?;
        let catalog = OperatorCatalog::build(&dirs.config.join(label.trim_start_matches('/')));

        ctx.check()?;
        let extraction = extract_catalog(entry, &catalog, provenance)?;
        tracing::debug!(
            "[OperatorImageCollector] catalog {} : {} related images",
            entry.catalog,
            extraction.image_count()
        );

        let (filter_result, rebuilt_tag) = if entry.is_full_catalog() {
            let result = CatalogFilterResult {
                operator_filter: entry.clone(),
                filtered_config_path: None,
                to_rebuild: false,
                digest: digest.clone(),
            };
            (result, None)
        } else {
            let filter_digest = entry.filter_digest()?;
            let filter_dir = dirs.filtered.join(&filter_digest);
            let path = filter_dir.join(CATALOG_CONFIG_DIR);

            let to_rebuild = if self
                .is_already_filtered(ctx, entry, &spec, &filter_dir, &filter_digest)
                .await
            {
                tracing::info!(
                    "[OperatorImageCollector] filtered catalog {} for {} is up to date",
                    filter_digest,
                    entry.catalog
                );
                false
            } else {
                let default_channels: BTreeMap<String, String> = entry
                    .packages
                    .iter()
                    .filter_map(|p| non_empty(&p.default_channel).map(|c| (p.name.clone(), c.to_string())))
                    .collect();

                std::fs::create_dir_all(&filter_dir).map_err(|source| CollectorError::FilteredCatalogWrite {
                    path: path.clone(),
                    source,
                })?;
                catalog
                    .filtered_config(&extraction.kept, &default_channels)
                    .write_dir(&path)
                    .with_context(|| format!("Failed to write filtered catalog for {}", entry.catalog))?;
                true
            };

            let result = CatalogFilterResult {
                operator_filter: entry.clone(),
                filtered_config_path: Some(path),
                to_rebuild,
                digest: digest.clone(),
            };
            (result, Some(filter_digest))
        };

        let name = match non_empty(&entry.target_catalog) {
            Some(target) => target.to_string(),
            None => component.clone(),
        };
        let target_tag = match non_empty(&entry.target_tag) {
            Some(tag) => Some(tag.to_string()),
            None if spec.is_oci() => Some(LATEST_TAG.to_string()),
            None => None,
        };
        let catalog_image = RelatedImage {
            target_tag,
            target_catalog: entry.target_catalog.clone(),
            rebuilt_tag,
            ..RelatedImage::new(name, catalog_image, ImageType::OperatorCatalog)
        };

        Ok(Some(CollectedCatalog {
            reference: spec.reference_with_transport,
            catalog_key: format!("{component}.{digest}"),
            catalog_image,
            related_images: extraction.related_images,
            filter_result,
        }))
    }

    /// Whether a previous pass already rebuilt this filter of the catalog
    ///
    /// True when the filtered config exists and the rebuilt catalog cached
    /// under the filter digest still has the digest recorded beside it.
    async fn is_already_filtered(
        &self,
        ctx: &CollectContext,
        entry: &CatalogEntry,
        spec: &ImageSpec,
        filter_dir: &Path,
        filter_digest: &str,
    ) -> bool {
        let Ok(recorded) = std::fs::read_to_string(filter_dir.join(FILTERED_DIGEST_FILE)) else {
            return false;
        };
        if !filter_dir.join(CATALOG_CONFIG_DIR).is_dir() {
            return false;
        }

        let reference = rebuilt_catalog_reference(ctx, entry, spec, filter_digest);
        match self.manifest.image_digest(ctx, &reference).await {
            Ok(digest) => digest == recorded.trim(),
            Err(e) => {
                tracing::debug!("rebuilt catalog {reference} not found in cache: {e:#}");
                false
            }
        }
    }

    /// Image manifest of the catalog, descending into a manifest list
    fn catalog_manifest(&self, dirs: &CatalogDirs, index: &OciSchema, catalog: &str) -> Result<OciSchema> {
        let first = index.manifests.first().ok_or_else(|| CollectorError::NoManifests {
            catalog: catalog.to_string(),
        })?;
        let manifest = self.manifest.get_image_manifest(&dirs.blobs().join(encoded(first)?))?;
        if !manifest.is_manifest_list() {
            return Ok(manifest);
        }
        let Some(child) = manifest.manifests.first() else {
            bail!(CollectorError::NoManifests {
                catalog: catalog.to_string()
            });
        };
        self.manifest.get_image_manifest(&dirs.blobs().join(encoded(child)?))
    }
}

/// Entry point for the orchestrator
pub async fn collect_operator_images(
    ctx: &CollectContext,
    manifest: &dyn ManifestSource,
    puller: Option<&dyn CatalogPuller>,
) -> Result<CollectorSchema> {
    let mut collector = OperatorCollector::new(manifest);
    if let Some(puller) = puller {
        collector = collector.with_puller(puller);
    }
    collector.collect(ctx).await
}

struct CollectedCatalog {
    reference: String,
    catalog_key: String,
    catalog_image: RelatedImage,
    related_images: BTreeMap<String, Vec<RelatedImage>>,
    filter_result: CatalogFilterResult,
}

fn encoded(descriptor: &crate::manifest::Descriptor) -> Result<&str, CollectorError> {
    descriptor.encoded().ok_or_else(|| CollectorError::InvalidDigest {
        digest: descriptor.digest.clone(),
    })
}

fn cached_catalog_repository<'s>(entry: &'s CatalogEntry, spec: &'s ImageSpec) -> &'s str {
    match non_empty(&entry.target_catalog) {
        Some(target) => target,
        None if spec.is_oci() => spec.component_name(),
        None => spec.path_component.as_str(),
    }
}

/// Reference of a catalog already mirrored into the local cache registry
pub fn cached_catalog_reference(ctx: &CollectContext, entry: &CatalogEntry, spec: &ImageSpec) -> String {
    let repository = cached_catalog_repository(entry, spec);
    let tag = match non_empty(&entry.target_tag) {
        Some(tag) => tag,
        None if spec.is_by_digest_only() => spec.digest_tag(),
        None if spec.is_oci() => LATEST_TAG,
        None => spec.tag.as_str(),
    };
    format!(
        "{DOCKER_PROTOCOL}{}/{repository}:{tag}",
        ctx.options.local_storage_fqdn
    )
}

/// Reference of the rebuilt catalog cached under a filter digest tag
pub fn rebuilt_catalog_reference(
    ctx: &CollectContext,
    entry: &CatalogEntry,
    spec: &ImageSpec,
    filter_digest: &str,
) -> String {
    format!(
        "{DOCKER_PROTOCOL}{}/{}:{filter_digest}",
        ctx.options.local_storage_fqdn,
        cached_catalog_repository(entry, spec)
    )
}

/// Copy an OCI layout directory tree
fn copy_layout(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to read OCI layout: {}", from.display()))?;
        let relative = entry.path().strip_prefix(from)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}
