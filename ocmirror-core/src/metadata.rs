//! Channel-head metadata hydration
//!
//! Clients render a catalog's packages from the metadata embedded in each
//! channel head. Heads of a filtered catalog that carry no such metadata get
//! it from their bundle's ClusterServiceVersion before the catalog is rebuilt.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use futures::{StreamExt, TryStreamExt};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashSet};

use crate::catalog::{Bundle, Channel, DeclarativeConfig, Property};
use crate::context::CollectContext;
use crate::error::CollectorError;
use crate::image::{CatalogFilterResult, ImageSpec, DOCKER_PROTOCOL};

pub const PROPERTY_BUNDLE_OBJECT: &str = "olm.bundle.object";
pub const PROPERTY_CSV_METADATA: &str = "olm.csv.metadata";

/// CSV spec fields carried by `olm.csv.metadata`
const CSV_METADATA_FIELDS: &[&str] = &[
    "apiservicedefinitions",
    "customresourcedefinitions",
    "description",
    "displayName",
    "installModes",
    "keywords",
    "links",
    "maintainers",
    "maturity",
    "minKubeVersion",
    "nativeAPIs",
    "provider",
];

/// Fetches the ClusterServiceVersion manifest of a bundle image
#[async_trait]
pub trait BundleMetadataFetcher: Send + Sync {
    async fn fetch_csv(&self, ctx: &CollectContext, reference: &str) -> Result<Value>;
}

/// Hydrates the channel heads of filtered catalogs
pub struct MetadataPopulator<'a> {
    fetcher: &'a dyn BundleMetadataFetcher,
}

impl<'a> MetadataPopulator<'a> {
    pub fn new(fetcher: &'a dyn BundleMetadataFetcher) -> Self {
        Self { fetcher }
    }

    /// Add metadata to every channel head lacking it and rewrite the catalog
    ///
    /// Returns the number of hydrated bundles. Catalogs mirrored untouched
    /// have no filtered config and are left alone.
    pub async fn populate(&self, ctx: &CollectContext, result: &CatalogFilterResult) -> Result<usize> {
        let Some(path) = result.filtered_config_path.as_deref() else {
            return Ok(0);
        };
        let mut cfg = DeclarativeConfig::load_dir(path)
            .with_context(|| format!("Failed to load filtered catalog {}", path.display()))?;

        let targets = heads_without_metadata(&cfg)?;
        if targets.is_empty() {
            tracing::debug!("all channel heads of {} carry metadata", path.display());
            return Ok(0);
        }

        let mut requests = Vec::with_capacity(targets.len());
        for index in targets {
            requests.push((index, self.source_reference(ctx, &cfg.bundles[index])?));
        }

        let fetched: Vec<(usize, Value)> = futures::stream::iter(requests)
            .map(|(index, reference)| async move {
                ctx.check()?;
                tracing::debug!("fetching bundle metadata from {reference}");
                let csv = self
                    .fetcher
                    .fetch_csv(ctx, &reference)
                    .await
                    .with_context(|| format!("Failed to fetch bundle metadata from {reference}"))?;
                Ok::<_, anyhow::Error>((index, csv))
            })
            .buffer_unordered(ctx.options.parallel_images.max(1))
            .try_collect()
            .await?;

        let use_csv_metadata = cfg
            .bundles
            .iter()
            .any(|b| b.has_property(PROPERTY_CSV_METADATA));
        for (index, csv) in &fetched {
            let property = if use_csv_metadata {
                Property {
                    kind: PROPERTY_CSV_METADATA.to_string(),
                    value: csv_metadata(csv),
                }
            } else {
                let data = serde_json::to_vec(csv)?;
                Property {
                    kind: PROPERTY_BUNDLE_OBJECT.to_string(),
                    value: json!({ "data": base64::engine::general_purpose::STANDARD.encode(data) }),
                }
            };
            cfg.bundles[*index].properties.push(property);
        }

        cfg.write_dir(path)?;
        tracing::info!(
            "[OperatorImageCollector] added metadata to {} channel heads of {}",
            fetched.len(),
            result.operator_filter.catalog
        );
        Ok(fetched.len())
    }

    /// Where the bundle image can be read during this pass
    fn source_reference(&self, ctx: &CollectContext, bundle: &Bundle) -> Result<String> {
        let spec = ImageSpec::parse(&bundle.image)
            .with_context(|| format!("Invalid image of bundle {}", bundle.name))?;
        if ctx.options.is_mirror_to_mirror() {
            return Ok(spec.reference_with_transport);
        }
        Ok(format!(
            "{DOCKER_PROTOCOL}{}/{}:{}",
            ctx.options.local_storage_fqdn,
            spec.path_component,
            spec.tag_or_digest_tag()
        ))
    }
}

/// Positions in `cfg.bundles` of channel heads without embedded metadata
fn heads_without_metadata(cfg: &DeclarativeConfig) -> Result<Vec<usize>, CollectorError> {
    let mut heads = BTreeSet::new();
    for channel in &cfg.channels {
        heads.insert((channel.package.as_str(), channel_head(channel)?));
    }

    Ok(cfg
        .bundles
        .iter()
        .enumerate()
        .filter(|(_, b)| heads.contains(&(b.package.as_str(), b.name.as_str())))
        .filter(|(_, b)| {
            !b.has_property(PROPERTY_BUNDLE_OBJECT) && !b.has_property(PROPERTY_CSV_METADATA)
        })
        .map(|(index, _)| index)
        .collect())
}

/// The single entry no other entry replaces or skips
pub fn channel_head(channel: &Channel) -> Result<&str, CollectorError> {
    let replaced: HashSet<&str> = channel
        .entries
        .iter()
        .flat_map(|e| std::iter::once(e.replaces.as_str()).chain(e.skips.iter().map(String::as_str)))
        .filter(|name| !name.is_empty())
        .collect();

    let heads: Vec<&str> = channel
        .entries
        .iter()
        .map(|e| e.name.as_str())
        .filter(|name| !replaced.contains(name))
        .collect();

    match heads.as_slice() {
        [head] => Ok(*head),
        [] => Err(CollectorError::NoChannelHead {
            package: channel.package.clone(),
            channel: channel.name.clone(),
        }),
        _ => Err(CollectorError::MultipleChannelHeads {
            package: channel.package.clone(),
            channel: channel.name.clone(),
            heads: heads.iter().map(|h| h.to_string()).collect(),
        }),
    }
}

/// Subset of a CSV exposed as `olm.csv.metadata`
fn csv_metadata(csv: &Value) -> Value {
    let mut metadata = Map::new();
    for key in ["annotations", "labels"] {
        if let Some(value) = csv.pointer(&format!("/metadata/{key}")) {
            metadata.insert(key.to_string(), value.clone());
        }
    }
    for key in CSV_METADATA_FIELDS {
        if let Some(value) = csv.pointer(&format!("/spec/{key}")) {
            let name = match *key {
                "apiservicedefinitions" => "apiServiceDefinitions",
                "customresourcedefinitions" => "crdDescriptions",
                other => other,
            };
            metadata.insert(name.to_string(), value.clone());
        }
    }
    Value::Object(metadata)
}
