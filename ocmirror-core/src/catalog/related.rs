//! Related-image extraction from filtered bundles

use std::collections::{BTreeMap, BTreeSet};

use super::{filter_bundles, Bundle, OperatorCatalog};
use crate::config::{non_empty, CatalogEntry, PackageFilter};
use crate::error::CollectorError;
use crate::image::{CopyImageSchemaMap, ImageSpec, ImageType, RelatedImage};

/// Package name to channel name to the bundle names kept in that channel
pub type KeptBundles = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

/// Related images of the kept bundles of one or more packages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Bundle name to its related images
    pub related_images: BTreeMap<String, Vec<RelatedImage>>,

    /// Kept bundle names, per package and channel
    pub kept: KeptBundles,
}

impl Extraction {
    fn merge(&mut self, other: Extraction) {
        self.related_images.extend(other.related_images);
        for (package, channels) in other.kept {
            let merged = self.kept.entry(package).or_default();
            for (channel, bundles) in channels {
                merged.entry(channel).or_default().extend(bundles);
            }
        }
    }

    pub fn image_count(&self) -> usize {
        self.related_images.values().map(Vec::len).sum()
    }

    /// Kept bundle names of one package across all its channels
    pub fn kept_bundles(&self, package: &str) -> BTreeSet<&str> {
        self.kept
            .get(package)
            .into_iter()
            .flat_map(|channels| channels.values().flatten())
            .map(String::as_str)
            .collect()
    }
}

/// Extract related images for every package a catalog entry selects
///
/// Without package selection every package of the catalog is considered.
/// Unknown packages and packages without matching bundles are skipped with a
/// warning.
pub fn extract_catalog(
    entry: &CatalogEntry,
    catalog: &OperatorCatalog,
    provenance: &mut CopyImageSchemaMap,
) -> Result<Extraction, CollectorError> {
    let mut extraction = Extraction::default();

    if entry.packages.is_empty() {
        let unfiltered = PackageFilter::default();
        for package in catalog.packages.keys() {
            let found = extract(&entry.catalog, package, catalog, &unfiltered, entry.full, provenance)?;
            extraction.merge(found);
        }
        return Ok(extraction);
    }

    for pkg in &entry.packages {
        if catalog.bundles(&pkg.name).is_none() {
            tracing::warn!(
                "[OperatorImageCollector] package {} not found in catalog {}",
                pkg.name,
                entry.catalog
            );
            continue;
        }
        let found = extract(&entry.catalog, &pkg.name, catalog, pkg, entry.full, provenance)?;
        if found.related_images.is_empty() {
            tracing::warn!(
                "[OperatorImageCollector] no bundles matching filtering for {} in catalog {}",
                pkg.name,
                entry.catalog
            );
            continue;
        }
        extraction.merge(found);
    }

    Ok(extraction)
}

/// Extract related images of one package's filtered bundles
///
/// Each configured channel is filtered with its own bounds; without channel
/// selection the package's default channel is filtered with the package
/// bounds. A full package without a usable channel selection keeps every
/// channel whole. Every kept image is recorded in `provenance`.
pub fn extract(
    catalog_ref: &str,
    package: &str,
    catalog: &OperatorCatalog,
    filter: &PackageFilter,
    full: bool,
    provenance: &mut CopyImageSchemaMap,
) -> Result<Extraction, CollectorError> {
    if (!filter.channels.is_empty() || full) && filter.has_bounds() {
        return Err(CollectorError::InvalidFiltering {
            catalog: catalog_ref.to_string(),
            package: package.to_string(),
            reason: "cannot use channels/full and min/max versions at the same time".to_string(),
        });
    }

    let mut by_channel: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    if filter.channels.is_empty() {
        let channel = catalog.default_channel(package).unwrap_or_default();
        let entries = catalog.entries(package, channel);
        let bundles = filter_bundles(
            package,
            &entries,
            non_empty(&filter.min_version),
            non_empty(&filter.max_version),
            full,
        )?;
        tracing::debug!("adding bundles from default channel {channel}: {bundles:?}");
        by_channel.entry(channel.to_string()).or_default().extend(bundles);
    } else {
        for channel in &filter.channels {
            let entries = catalog.entries(package, &channel.name);
            let bundles = filter_bundles(
                package,
                &entries,
                non_empty(&channel.min_version),
                non_empty(&channel.max_version),
                full,
            )?;
            tracing::debug!("adding bundles from channel {}: {bundles:?}", channel.name);
            by_channel.entry(channel.name.clone()).or_default().extend(bundles);
        }
    }

    let mut extraction = Extraction::default();
    let Some(bundles) = catalog.bundles(package) else {
        return Ok(extraction);
    };

    let selected = by_channel.values().any(|names| !names.is_empty());
    let restrict = !full || (selected && !filter.channels.is_empty());
    if !restrict {
        by_channel = catalog
            .channel_entries
            .get(package)
            .into_iter()
            .flatten()
            .map(|(channel, entries)| (channel.clone(), entries.keys().cloned().collect()))
            .collect();
    }

    let mut kept: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (channel, names) in by_channel {
        let names: BTreeSet<String> = names.into_iter().filter(|n| bundles.contains_key(n)).collect();
        if !names.is_empty() {
            kept.insert(channel, names);
        }
    }

    for bundle in bundles.values() {
        if restrict && !kept.values().any(|names| names.contains(&bundle.name)) {
            continue;
        }
        let images = handle_related_images(bundle, package, provenance);
        extraction.related_images.insert(bundle.name.clone(), images);
    }
    if !kept.is_empty() {
        extraction.kept.insert(package.to_string(), kept);
    }

    Ok(extraction)
}

/// Classify a bundle's related images and record their provenance
fn handle_related_images(
    bundle: &Bundle,
    operator: &str,
    provenance: &mut CopyImageSchemaMap,
) -> Vec<RelatedImage> {
    let mut images = Vec::with_capacity(bundle.related_images.len());

    for related in &bundle.related_images {
        if related.image.contains("oci://") {
            tracing::warn!(
                "{} 'oci' is not supported in operator catalogs : SKIPPING",
                related.image
            );
            continue;
        }

        let image_type = if related.image == bundle.image {
            ImageType::OperatorBundle
        } else {
            ImageType::OperatorRelatedImage
        };

        match ImageSpec::parse(&related.image) {
            Ok(spec) => provenance.record(
                &spec.reference_with_transport,
                operator,
                &bundle.image,
                &bundle.name,
            ),
            Err(e) => tracing::warn!("error parsing image {} : {e:#}", related.image),
        }

        images.push(RelatedImage::new(&related.name, &related.image, image_type));
    }

    images
}
