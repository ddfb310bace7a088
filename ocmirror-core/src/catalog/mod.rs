//! Operator catalogs - indexing, version filtering and related-image extraction
//!
//! # Overview
//!
//! An extracted catalog directory is loaded into an [`OperatorCatalog`], each
//! configured package is filtered channel by channel, and the related images
//! of the kept bundles are collected for mirroring.
//!
//! ```text
//! catalog-config/<label>/      ← file-based catalog (JSON / YAML)
//!        │
//!        ▼
//! OperatorCatalog::build       ← packages, channels, entries, bundles
//!        │
//!        ▼
//! filter_bundles (per channel) ← min/max bounds, channel head, prereleases
//!        │
//!        ▼
//! extract_catalog              ← related images + provenance indices
//! ```

mod declcfg;
mod filter;
mod index;
mod related;

pub use declcfg::{
    Bundle, BundleImage, Channel, ChannelEntry, DeclarativeConfig, Package, Property,
    SCHEMA_BUNDLE, SCHEMA_CHANNEL, SCHEMA_PACKAGE,
};
pub use filter::{channel_entry_version, filter_bundles, parse_tolerant, BundleFilter};
pub use index::OperatorCatalog;
pub use related::{extract, extract_catalog, Extraction, KeptBundles};
