//! Collector error types
//!
//! Fatal, classifiable failures of an operator collection pass. Everything else
//! travels as `anyhow::Error` with context attached at the I/O boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal operator collector errors
#[derive(Error, Debug)]
pub enum CollectorError {
    /// A package filter mixes settings that cannot be combined
    #[error("invalid filter for catalog {catalog}, package {package}: {reason}")]
    InvalidFiltering {
        catalog: String,
        package: String,
        reason: String,
    },

    /// `targetCatalog` is not a valid repository path component
    #[error("invalid targetCatalog {target} for catalog {catalog}: must be a lowercase path component without tag or digest")]
    InvalidTargetCatalog { catalog: String, target: String },

    /// A min/max version bound does not parse as semver
    #[error("invalid {field} {value:?} for package {package}")]
    InvalidVersionBound {
        package: String,
        field: &'static str,
        value: String,
        #[source]
        source: semver::Error,
    },

    /// Disk-to-mirror needs the catalog to already be in the local cache
    #[error("unable to find digest of cached catalog {reference}: {message}")]
    MissingCatalogDigest { reference: String, message: String },

    /// The catalog image index lists no manifests
    #[error("no manifests found for catalog {catalog}")]
    NoManifests { catalog: String },

    /// A descriptor digest is not `<algorithm>:<hex>`
    #[error("the digest format is not correct {digest}")]
    InvalidDigest { digest: String },

    /// A digest-only catalog has no matching configuration entry
    #[error("unable to find catalog {catalog} in the image set configuration")]
    UnknownCatalog { catalog: String },

    /// The collection context was cancelled
    #[error("operator collection cancelled")]
    Cancelled,

    /// A channel has more than one entry that nothing replaces or skips
    #[error("multiple channel heads found in package {package}, channel {channel}: {heads:?}")]
    MultipleChannelHeads {
        package: String,
        channel: String,
        heads: Vec<String>,
    },

    /// Every entry of a channel is replaced or skipped by another
    #[error("no channel head found in package {package}, channel {channel}")]
    NoChannelHead { package: String, channel: String },

    /// The filtered declarative config could not be written
    #[error("failed to write filtered catalog to {path}")]
    FilteredCatalogWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CollectorError {
    /// Configuration errors are detected before any catalog I/O
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CollectorError::InvalidFiltering { .. }
                | CollectorError::InvalidTargetCatalog { .. }
                | CollectorError::InvalidVersionBound { .. }
        )
    }

    pub fn log(&self) {
        if self.is_config_error() {
            tracing::error!(target: "config", "[OperatorImageCollector] {}", self);
        } else {
            tracing::error!("[OperatorImageCollector] {}", self);
        }
    }
}
