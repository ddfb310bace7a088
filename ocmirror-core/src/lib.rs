//! Operator catalog collection for image mirroring
//!
//! Filters operator catalogs down to the configured packages, channels and
//! version ranges, and produces the ordered copy batch that mirrors the kept
//! bundles, their related images and the catalogs themselves.

pub mod batch;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod image;
pub mod manifest;
pub mod metadata;

pub use collector::{collect_operator_images, OperatorCollector};
pub use config::{CatalogEntry, CollectorOptions, ImageSetConfig, MirrorMode};
pub use context::{CancelHandle, CollectContext};
pub use error::CollectorError;
pub use image::{CollectorSchema, CopyImageSchema, ImageType, RelatedImage};
pub use metadata::{BundleMetadataFetcher, MetadataPopulator};
