//! Version filtering of a channel's bundles
//!
//! Bundle names carry their version after the first dot (`pkg.v1.2.3`).
//! Without bounds only the channel head is kept; with bounds every version in
//! `[min, max]` is kept, plus prereleases of kept versions.

use anyhow::{bail, Result};
use semver::{BuildMetadata, Version};
use std::collections::BTreeMap;

use super::ChannelEntry;
use crate::error::CollectorError;

/// Lenient semver parsing
///
/// Accepts a leading `v`, surrounding whitespace, leading zeros and short
/// versions (`1`, `1.2`). A short version cannot carry prerelease or build
/// metadata.
pub fn parse_tolerant(value: &str) -> Result<Version, semver::Error> {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

    let mut parts: Vec<String> = trimmed.splitn(3, '.').map(str::to_string).collect();
    for part in parts.iter_mut() {
        if part.len() > 1 {
            let stripped = part.trim_start_matches('0');
            *part = if stripped.starts_with(|c: char| c.is_ascii_digit()) {
                stripped.to_string()
            } else {
                format!("0{stripped}")
            };
        }
    }

    if parts.len() < 3 {
        if parts.last().is_some_and(|p| p.contains(['+', '-'])) {
            // Rejected by the strict parser as it lacks a patch component
            return Version::parse(&parts.join("."));
        }
        parts.resize(3, "0".to_string());
    }

    Version::parse(&parts.join("."))
}

/// Version encoded in a channel entry name such as `pkg.v1.2.3`
pub fn channel_entry_version(name: &str) -> Result<Version> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() < 4 {
        bail!("incorrect version format {name}");
    }
    match parse_tolerant(&parts[1..].join(".")) {
        Ok(version) => Ok(precedence(version)),
        Err(e) => bail!("{name} {e}"),
    }
}

/// Build metadata does not take part in version precedence
fn precedence(version: Version) -> Version {
    Version {
        build: BuildMetadata::EMPTY,
        ..version
    }
}

/// Version bounds applied to one channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleFilter {
    pub min: Option<Version>,
    pub max: Option<Version>,
    pub full: bool,
}

impl BundleFilter {
    /// Parse bounds; empty strings count as unset
    pub fn new(
        package: &str,
        min: Option<&str>,
        max: Option<&str>,
        full: bool,
    ) -> Result<Self, CollectorError> {
        let parse = |field: &'static str, value: Option<&str>| {
            value
                .filter(|v| !v.is_empty())
                .map(|v| {
                    parse_tolerant(v).map(precedence).map_err(|source| {
                        CollectorError::InvalidVersionBound {
                            package: package.to_string(),
                            field,
                            value: v.to_string(),
                            source,
                        }
                    })
                })
                .transpose()
        };
        Ok(Self {
            min: parse("minVersion", min)?,
            max: parse("maxVersion", max)?,
            full,
        })
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    fn in_range(&self, version: &Version) -> bool {
        self.min.as_ref().map_or(true, |min| version >= min)
            && self.max.as_ref().map_or(true, |max| version <= max)
    }

    /// Names of the channel entries to keep
    pub fn apply(&self, entries: &BTreeMap<String, ChannelEntry>) -> Vec<String> {
        let zero = Version::new(0, 0, 0);
        let mut head = zero.clone();
        let mut head_name = String::new();
        let mut filtered: Vec<String> = Vec::new();
        let mut prereleases: Vec<(Version, &ChannelEntry)> = Vec::new();

        for entry in entries.values() {
            let version = match channel_entry_version(&entry.name) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!("skipping channel entry: {e}");
                    continue;
                }
            };

            if !version.pre.is_empty() {
                prereleases.push((version.clone(), entry));
            }

            if version > head {
                head = version.clone();
                head_name = entry.name.clone();
            }

            if self.in_range(&version) {
                // Without bounds only the head is kept, resolved below
                if self.is_unbounded() && !self.full {
                    continue;
                }
                filtered.push(entry.name.clone());
            }
        }

        // Single hop: only edges pointing at the nominal head promote a prerelease
        prereleases.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
        let nominal_head = head_name.clone();
        for (version, entry) in prereleases {
            if is_prerelease_head(entry, &nominal_head) {
                head_name = entry.name.clone();
            }
            if is_prerelease_of_filtered(&version, &entry.name, &filtered) {
                filtered.push(entry.name.clone());
            }
        }

        if self.is_unbounded() && head != zero && !self.full {
            return vec![head_name];
        }
        filtered
    }
}

/// Filter one channel's entries, see [`BundleFilter::apply`]
pub fn filter_bundles(
    package: &str,
    entries: &BTreeMap<String, ChannelEntry>,
    min: Option<&str>,
    max: Option<&str>,
    full: bool,
) -> Result<Vec<String>, CollectorError> {
    Ok(BundleFilter::new(package, min, max, full)?.apply(entries))
}

fn is_prerelease_head(entry: &ChannelEntry, head: &str) -> bool {
    !head.is_empty() && (entry.skips.iter().any(|s| s == head) || entry.replaces == head)
}

fn is_prerelease_of_filtered(version: &Version, name: &str, filtered: &[String]) -> bool {
    if filtered.iter().any(|f| f == name) {
        return false;
    }
    let train = format!("{}.{}.{}", version.major, version.minor, version.patch);
    filtered.iter().any(|f| f.contains(&train))
}
