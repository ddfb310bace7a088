//! In-memory index of an extracted catalog

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::{Bundle, Channel, ChannelEntry, DeclarativeConfig, KeptBundles, Package};

/// Catalog contents keyed for filtering
///
/// Built once per catalog and dropped after related images were extracted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperatorCatalog {
    /// Package name to package
    pub packages: BTreeMap<String, Package>,

    /// Package name to its channels
    pub channels: BTreeMap<String, Vec<Channel>>,

    /// Package name to channel name to bundle name to channel entry
    pub channel_entries: BTreeMap<String, BTreeMap<String, BTreeMap<String, ChannelEntry>>>,

    /// Package name to bundle name to bundle
    pub bundles_by_pkg_and_name: BTreeMap<String, BTreeMap<String, Bundle>>,

    /// Objects of other schemas, carried into the filtered catalog
    pub others: Vec<serde_json::Value>,
}

impl OperatorCatalog {
    /// Build the index from a catalog directory
    ///
    /// An unreadable or invalid catalog yields an empty index and a warning.
    pub fn build(path: &Path) -> Self {
        match DeclarativeConfig::load_dir(path) {
            Ok(cfg) => Self::from_config(cfg),
            Err(e) => {
                tracing::warn!("[GetCatalog] invalid catalog {} : SKIPPING ({e:#})", path.display());
                Self::default()
            }
        }
    }

    pub fn from_config(cfg: DeclarativeConfig) -> Self {
        let mut catalog = Self::default();

        for pkg in cfg.packages {
            catalog.packages.insert(pkg.name.clone(), pkg);
        }

        for ch in cfg.channels {
            let entries = catalog
                .channel_entries
                .entry(ch.package.clone())
                .or_default()
                .entry(ch.name.clone())
                .or_default();
            for e in &ch.entries {
                entries.insert(e.name.clone(), e.clone());
            }
            catalog.channels.entry(ch.package.clone()).or_default().push(ch);
        }

        // First occurrence wins on duplicate bundle names
        for bundle in cfg.bundles {
            catalog
                .bundles_by_pkg_and_name
                .entry(bundle.package.clone())
                .or_default()
                .entry(bundle.name.clone())
                .or_insert(bundle);
        }

        catalog.others = cfg.others;
        catalog
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.bundles_by_pkg_and_name.is_empty()
    }

    pub fn default_channel(&self, package: &str) -> Option<&str> {
        self.packages
            .get(package)
            .map(|p| p.default_channel.as_str())
            .filter(|c| !c.is_empty())
    }

    /// Entries of one channel; empty when the package or channel is unknown
    pub fn entries(&self, package: &str, channel: &str) -> BTreeMap<String, ChannelEntry> {
        self.channel_entries
            .get(package)
            .and_then(|channels| channels.get(channel))
            .cloned()
            .unwrap_or_default()
    }

    pub fn bundles(&self, package: &str) -> Option<&BTreeMap<String, Bundle>> {
        self.bundles_by_pkg_and_name.get(package)
    }

    /// Declarative config holding only the kept bundles
    ///
    /// Each kept channel is reduced to its own kept entries so its upgrade
    /// graph keeps a single head. Channels absent from `kept` are dropped, as
    /// are empty channels and packages without kept bundles.
    /// `default_channels` names the channel to fall back on when a package's
    /// default channel was dropped.
    pub fn filtered_config(
        &self,
        kept: &KeptBundles,
        default_channels: &BTreeMap<String, String>,
    ) -> DeclarativeConfig {
        let mut cfg = DeclarativeConfig::default();

        for (package, kept_channels) in kept {
            let Some(pkg) = self.packages.get(package) else {
                tracing::warn!("[OperatorImageCollector] package {package} has no olm.package object");
                continue;
            };

            let channels: Vec<Channel> = self
                .channels
                .get(package)
                .into_iter()
                .flatten()
                .filter_map(|ch| {
                    let names = kept_channels.get(&ch.name)?;
                    let entries: Vec<ChannelEntry> = ch
                        .entries
                        .iter()
                        .filter(|e| names.contains(&e.name))
                        .cloned()
                        .collect();
                    (!entries.is_empty()).then(|| Channel {
                        entries,
                        ..ch.clone()
                    })
                })
                .collect();
            if channels.is_empty() {
                continue;
            }
            let bundle_names: BTreeSet<String> = channels
                .iter()
                .flat_map(|ch| ch.entries.iter().map(|e| e.name.clone()))
                .collect();

            let mut pkg = pkg.clone();
            if !channels.iter().any(|ch| ch.name == pkg.default_channel) {
                let fallback = default_channels
                    .get(package)
                    .filter(|c| channels.iter().any(|ch| &ch.name == *c))
                    .cloned()
                    .unwrap_or_else(|| channels[0].name.clone());
                tracing::warn!(
                    "[OperatorImageCollector] default channel {} of package {} was filtered out, using {}",
                    pkg.default_channel,
                    package,
                    fallback
                );
                pkg.default_channel = fallback;
            }

            cfg.packages.push(pkg);
            cfg.channels.extend(channels);
            if let Some(bundles) = self.bundles(package) {
                cfg.bundles.extend(
                    bundles
                        .values()
                        .filter(|b| bundle_names.contains(&b.name))
                        .cloned(),
                );
            }
            cfg.others.extend(
                self.others
                    .iter()
                    .filter(|o| o.get("package").and_then(|p| p.as_str()) == Some(package.as_str()))
                    .cloned(),
            );
        }

        cfg
    }
}
