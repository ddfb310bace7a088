//! Copy-batch preparation
//!
//! Turns the related images of every collected catalog into copy
//! instructions for the configured topology:
//!
//! ```text
//! mirrorToDisk    source registry ──────────────▶ cache registry
//! mirrorToMirror  source registry ──▶ cache ────▶ destination   (catalogs)
//!                 source registry ──────────────▶ destination   (others)
//! diskToMirror    cache registry  ──────────────▶ destination
//! ```

use anyhow::Result;
use std::collections::{BTreeMap, HashSet};

use crate::config::{CollectorOptions, ImageSetConfig, MirrorMode};
use crate::error::CollectorError;
use crate::image::{CopyImageSchema, ImageSpec, ImageType, RelatedImage, DOCKER_PROTOCOL};

const LATEST_TAG: &str = "latest";

/// Builds copy instructions for one collection pass
pub struct CopyBatchPreparer<'a> {
    options: &'a CollectorOptions,
    config: &'a ImageSetConfig,
}

impl<'a> CopyBatchPreparer<'a> {
    pub fn new(options: &'a CollectorOptions, config: &'a ImageSetConfig) -> Self {
        Self { options, config }
    }

    /// One or more copies per distinct image, depending on the topology
    pub fn prepare(&self, images: &BTreeMap<String, Vec<RelatedImage>>) -> Result<Vec<CopyImageSchema>> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut skipped_empty = 0usize;
        let mut result = Vec::new();

        for img in images.values().flatten() {
            // Empty images are a known defect of some catalogs
            if img.image.is_empty() {
                skipped_empty += 1;
                continue;
            }
            if seen.contains(img.image.as_str()) {
                continue;
            }

            let spec = match ImageSpec::parse(&img.image) {
                Ok(spec) => spec,
                Err(e) => {
                    tracing::warn!("{e:#} : SKIPPING");
                    continue;
                }
            };

            let copies = match self.options.mode {
                _ if self.options.is_delete => self.disk_to_mirror(img, &spec)?,
                MirrorMode::MirrorToDisk => vec![self.mirror_to_disk(img, &spec)],
                MirrorMode::MirrorToMirror => self.mirror_to_mirror(img, &spec),
                MirrorMode::DiskToMirror => self.disk_to_mirror(img, &spec)?,
            };
            for copy in &copies {
                tracing::debug!("source {}", copy.source);
                tracing::debug!("destination {}", copy.destination);
            }
            result.extend(copies);
            seen.insert(img.image.as_str());
        }

        if skipped_empty > 0 {
            tracing::debug!("[OperatorImageCollector] skipped {skipped_empty} empty related images");
        }
        Ok(result)
    }

    fn cache_registry(&self) -> String {
        format!("{DOCKER_PROTOCOL}{}", self.options.local_storage_fqdn)
    }

    fn destination_registry(&self) -> String {
        let destination = self.options.destination.trim_end_matches('/');
        if destination.contains("://") {
            destination.to_string()
        } else {
            format!("{DOCKER_PROTOCOL}{destination}")
        }
    }

    /// Repository path at the receiving registry
    fn repository<'s>(img: &'s RelatedImage, spec: &'s ImageSpec) -> &'s str {
        match img.target_catalog.as_deref() {
            Some(target) if img.image_type == ImageType::OperatorCatalog && !target.is_empty() => {
                target
            }
            _ if spec.is_oci() => img.name.as_str(),
            _ => spec.path_component.as_str(),
        }
    }

    /// Tag at the receiving registry
    fn destination_tag<'s>(img: &'s RelatedImage, spec: &'s ImageSpec) -> &'s str {
        match img.target_tag.as_deref() {
            Some(tag) if img.image_type == ImageType::OperatorCatalog && !tag.is_empty() => tag,
            _ if spec.tag.is_empty() && spec.is_oci() => LATEST_TAG,
            _ if spec.is_by_digest_only() => spec.digest_tag(),
            _ => spec.tag.as_str(),
        }
    }

    /// Source reference for a pull from the original registry
    ///
    /// Images carrying both a tag and a digest are pulled by digest.
    fn pull_source(spec: &ImageSpec) -> String {
        if spec.is_by_tag_and_digest() {
            tracing::warn!(
                "[OperatorImageCollector] {} has both tag and digest : using digest to pull, but tag only for mirroring",
                spec.reference
            );
            spec.by_digest_reference()
        } else {
            spec.reference_with_transport.clone()
        }
    }

    fn mirror_to_disk(&self, img: &RelatedImage, spec: &ImageSpec) -> CopyImageSchema {
        let destination = format!(
            "{}/{}:{}",
            self.cache_registry(),
            Self::repository(img, spec),
            Self::destination_tag(img, spec)
        );
        CopyImageSchema {
            source: Self::pull_source(spec),
            destination,
            origin: spec.reference_with_transport.clone(),
            image_type: img.image_type,
            rebuilt_tag: img.rebuilt_tag.clone(),
        }
    }

    fn mirror_to_mirror(&self, img: &RelatedImage, spec: &ImageSpec) -> Vec<CopyImageSchema> {
        let repository = Self::repository(img, spec);
        let tag = Self::destination_tag(img, spec);
        let destination = format!("{}/{repository}:{tag}", self.destination_registry());

        if img.image_type != ImageType::OperatorCatalog {
            return vec![CopyImageSchema {
                source: Self::pull_source(spec),
                destination,
                origin: spec.reference_with_transport.clone(),
                image_type: img.image_type,
                rebuilt_tag: None,
            }];
        }

        // The original catalog is kept in the cache so the delete workflow
        // finds it; the destination receives the rebuilt one when available
        let cached = format!("{}/{repository}", self.cache_registry());
        let rebuilt_source = match img.rebuilt_tag.as_deref().filter(|t| !t.is_empty()) {
            Some(rebuilt) => format!("{cached}:{rebuilt}"),
            None => format!("{cached}:{tag}"),
        };
        vec![
            CopyImageSchema {
                source: spec.reference_with_transport.clone(),
                destination: format!("{cached}:{tag}"),
                origin: spec.reference_with_transport.clone(),
                image_type: img.image_type,
                rebuilt_tag: img.rebuilt_tag.clone(),
            },
            CopyImageSchema {
                source: rebuilt_source,
                destination,
                origin: spec.reference_with_transport.clone(),
                image_type: img.image_type,
                rebuilt_tag: img.rebuilt_tag.clone(),
            },
        ]
    }

    fn disk_to_mirror(&self, img: &RelatedImage, spec: &ImageSpec) -> Result<Vec<CopyImageSchema>> {
        if img.image_type == ImageType::OperatorCatalog && self.options.is_delete {
            tracing::debug!("delete mode, catalog index {} : SKIPPED", img.image);
            return Ok(Vec::new());
        }

        let repository = Self::repository(img, spec);
        let rebuilt = img.rebuilt_tag.as_deref().filter(|t| !t.is_empty());
        let target_tag = img.target_tag.as_deref().filter(|t| !t.is_empty());
        let is_catalog = img.image_type == ImageType::OperatorCatalog;

        let (source_tag, destination_tag) = match target_tag {
            Some(tag) if is_catalog => (rebuilt.unwrap_or(tag).to_string(), tag.to_string()),
            _ if is_catalog && spec.is_by_digest_only() => {
                (self.cached_catalog_tag(img, spec)?, spec.digest_tag().to_string())
            }
            _ => {
                let tag = match spec.tag_or_digest_tag() {
                    "" => LATEST_TAG,
                    tag => tag,
                };
                (rebuilt.unwrap_or(tag).to_string(), tag.to_string())
            }
        };

        Ok(vec![CopyImageSchema {
            source: format!("{}/{repository}:{source_tag}", self.cache_registry()),
            destination: format!("{}/{repository}:{destination_tag}", self.destination_registry()),
            origin: spec.reference_with_transport.clone(),
            image_type: img.image_type,
            rebuilt_tag: img.rebuilt_tag.clone(),
        }])
    }

    /// Cache tag of a digest-only catalog without target tag
    fn cached_catalog_tag(&self, img: &RelatedImage, spec: &ImageSpec) -> Result<String> {
        if let Some(rebuilt) = img.rebuilt_tag.as_deref().filter(|t| !t.is_empty()) {
            return Ok(rebuilt.to_string());
        }
        let entry = self
            .config
            .mirror
            .operators
            .iter()
            .rev()
            .find(|op| op.catalog == img.image || op.catalog == spec.reference)
            .ok_or_else(|| CollectorError::UnknownCatalog {
                catalog: img.image.clone(),
            })?;
        if entry.is_full_catalog() {
            Ok(spec.digest_tag().to_string())
        } else {
            entry.filter_digest()
        }
    }
}
