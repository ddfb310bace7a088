//! End-to-end collection over catalog images laid out on disk

mod common;

use common::{
    bundle_image, catalog_files, init_test_logging, operator_image, sha, write_catalog_layout,
    FixturePuller, ResolvingManifest,
};
use ocmirror_core::catalog::DeclarativeConfig;
use ocmirror_core::config::{CatalogEntry, ChannelFilter, PackageFilter};
use ocmirror_core::manifest::OciLayoutManifest;
use ocmirror_core::{
    collect_operator_images, CollectContext, CollectorError, CollectorOptions, ImageSetConfig,
    ImageType, MirrorMode, OperatorCollector,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::TempDir;

const CATALOG: &str = "quay.io/test/catalog:v1";

fn package(name: &str) -> PackageFilter {
    PackageFilter {
        name: name.to_string(),
        ..Default::default()
    }
}

fn config(entries: Vec<CatalogEntry>) -> ImageSetConfig {
    let mut config = ImageSetConfig {
        kind: "ImageSetConfiguration".to_string(),
        api_version: "mirror.openshift.io/v2alpha1".to_string(),
        ..Default::default()
    };
    config.mirror.operators = entries;
    config
}

fn options(mode: MirrorMode, working_dir: &Path) -> CollectorOptions {
    let mut options = CollectorOptions::new(mode, working_dir);
    options.destination = "docker://mirror.example.com/ns".to_string();
    options
}

/// An `oci://` catalog whose layout directory is named `my-catalog`
fn oci_catalog(dir: &TempDir) -> String {
    let layout = dir.path().join("my-catalog");
    write_catalog_layout(&layout, &catalog_files());
    format!("oci://{}", layout.display())
}

fn destinations(schema: &ocmirror_core::CollectorSchema) -> Vec<&str> {
    schema.all_images.iter().map(|i| i.destination.as_str()).collect()
}

#[tokio::test]
async fn test_mirror_to_disk_keeps_channel_head() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let catalog = oci_catalog(&dir);
    let entry = CatalogEntry {
        catalog: catalog.clone(),
        packages: vec![package("foo")],
        ..Default::default()
    };
    let (ctx, _cancel) = CollectContext::new(
        config(vec![entry.clone()]),
        options(MirrorMode::MirrorToDisk, &dir.path().join("work")),
    );

    let schema = collect_operator_images(&ctx, &OciLayoutManifest::new(), None)
        .await
        .unwrap();

    let filter_digest = entry.filter_digest().unwrap();
    assert_eq!(
        destinations(&schema),
        vec![
            format!("docker://localhost:55000/test/foo-operator:{}", sha('3')).as_str(),
            "docker://localhost:55000/test/foo-bundle:v1.2.0",
            "docker://localhost:55000/my-catalog:latest",
        ]
    );
    let types: Vec<ImageType> = schema.all_images.iter().map(|i| i.image_type).collect();
    assert_eq!(
        types,
        vec![
            ImageType::OperatorRelatedImage,
            ImageType::OperatorBundle,
            ImageType::OperatorCatalog
        ]
    );
    let catalog_copy = &schema.all_images[2];
    assert_eq!(catalog_copy.source, catalog);
    assert_eq!(catalog_copy.rebuilt_tag.as_deref(), Some(filter_digest.as_str()));

    let operators = &schema.copy_image_schema_map.operators_by_image
        [&format!("docker://{}", operator_image("1.2.0"))];
    assert!(operators.contains("foo"));
    assert_eq!(
        schema.copy_image_schema_map.bundles_by_image[&format!("docker://{}", bundle_image("1.2.0"))]
            [&bundle_image("1.2.0")],
        "foo.v1.2.0"
    );

    let result = &schema.catalog_to_fbc_map[&catalog];
    assert!(result.to_rebuild);
    let path = result.filtered_config_path.as_ref().unwrap();
    assert!(path.ends_with(format!("filtered-catalogs/{filter_digest}/catalog-config")));

    let filtered = DeclarativeConfig::load_dir(path).unwrap();
    let bundles: Vec<&str> = filtered.bundles.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(bundles, vec!["foo.v1.2.0"]);
    assert_eq!(filtered.packages.len(), 1);
    assert_eq!(filtered.channels[0].entries.len(), 1);
}

#[tokio::test]
async fn test_full_catalog_is_not_rebuilt() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let catalog = oci_catalog(&dir);
    let entry = CatalogEntry {
        catalog: catalog.clone(),
        full: true,
        ..Default::default()
    };
    let (ctx, _cancel) = CollectContext::new(
        config(vec![entry]),
        options(MirrorMode::MirrorToDisk, &dir.path().join("work")),
    );

    let schema = collect_operator_images(&ctx, &OciLayoutManifest::new(), None)
        .await
        .unwrap();

    let count = |t: ImageType| schema.all_images.iter().filter(|i| i.image_type == t).count();
    assert_eq!(count(ImageType::OperatorRelatedImage), 4);
    assert_eq!(count(ImageType::OperatorBundle), 4);
    assert_eq!(count(ImageType::OperatorCatalog), 1);
    assert_eq!(schema.total_operator_images(), 9);

    let result = &schema.catalog_to_fbc_map[&catalog];
    assert!(!result.to_rebuild);
    assert!(result.filtered_config_path.is_none());
    assert_eq!(schema.all_images[8].rebuilt_tag, None);
}

#[tokio::test]
async fn test_mirror_to_mirror_catalog_copies() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let reference = format!("docker://{CATALOG}");
    let digest = sha('c');
    let manifest = ResolvingManifest::new(&[(reference.as_str(), digest.as_str())]);
    let puller = FixturePuller::default();
    let entry = CatalogEntry {
        catalog: CATALOG.to_string(),
        packages: vec![package("bar")],
        ..Default::default()
    };
    let (ctx, _cancel) = CollectContext::new(
        config(vec![entry.clone()]),
        options(MirrorMode::MirrorToMirror, dir.path()),
    );

    let schema = OperatorCollector::new(&manifest)
        .with_puller(&puller)
        .collect(&ctx)
        .await
        .unwrap();

    assert_eq!(*puller.pulled.lock().unwrap(), vec![reference.clone()]);
    assert!(dir
        .path()
        .join("operator-catalogs/catalog")
        .join(&digest)
        .join("catalog-image/index.json")
        .is_file());

    assert_eq!(schema.all_images.len(), 4);
    assert_eq!(schema.all_images[0].source, "docker://quay.io/test/bar:v0.1.0");
    assert_eq!(
        schema.all_images[0].destination,
        "docker://mirror.example.com/ns/test/bar:v0.1.0"
    );

    let catalogs: Vec<_> = schema
        .all_images
        .iter()
        .filter(|i| i.image_type == ImageType::OperatorCatalog)
        .collect();
    assert_eq!(catalogs.len(), 2);
    assert!(catalogs.iter().all(|c| c.origin == reference));
    assert_eq!(catalogs[0].source, reference);
    assert_eq!(catalogs[0].destination, "docker://localhost:55000/test/catalog:v1");
    assert_eq!(
        catalogs[1].source,
        format!("docker://localhost:55000/test/catalog:{}", entry.filter_digest().unwrap())
    );
    assert_eq!(catalogs[1].destination, "docker://mirror.example.com/ns/test/catalog:v1");

    // Catalogs configured without a transport are keyed with one
    let keys: Vec<&String> = schema.catalog_to_fbc_map.keys().collect();
    assert_eq!(keys, vec![&reference]);
}

#[tokio::test]
async fn test_already_filtered_catalog_is_reused() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let entry = CatalogEntry {
        catalog: CATALOG.to_string(),
        packages: vec![package("foo")],
        ..Default::default()
    };
    let filter_digest = entry.filter_digest().unwrap();
    let reference = format!("docker://{CATALOG}");
    let rebuilt = format!("docker://localhost:55000/test/catalog:{filter_digest}");
    let manifest = ResolvingManifest::new(&[
        (reference.as_str(), sha('c').as_str()),
        (rebuilt.as_str(), sha('d').as_str()),
    ]);
    let puller = FixturePuller::default();
    let (ctx, _cancel) = CollectContext::new(
        config(vec![entry]),
        options(MirrorMode::MirrorToDisk, dir.path()),
    );
    let collector = OperatorCollector::new(&manifest).with_puller(&puller);

    let first = collector.collect(&ctx).await.unwrap();
    assert!(first.catalog_to_fbc_map[&reference].to_rebuild);

    let digest_file = dir
        .path()
        .join("operator-catalogs/catalog")
        .join(sha('c'))
        .join("filtered-catalogs")
        .join(&filter_digest)
        .join("digest");
    std::fs::write(&digest_file, format!("{}\n", sha('d'))).unwrap();

    let second = collector.collect(&ctx).await.unwrap();
    let result = &second.catalog_to_fbc_map[&reference];
    assert!(!result.to_rebuild);
    assert!(result.filtered_config_path.as_ref().unwrap().is_dir());
    let catalog_copy = second
        .all_images
        .iter()
        .find(|i| i.image_type == ImageType::OperatorCatalog)
        .unwrap();
    assert_eq!(catalog_copy.rebuilt_tag.as_deref(), Some(filter_digest.as_str()));

    // A stale digest rebuilds again
    std::fs::write(&digest_file, sha('e')).unwrap();
    let third = collector.collect(&ctx).await.unwrap();
    assert!(third.catalog_to_fbc_map[&reference].to_rebuild);
    assert_eq!(*puller.pulled.lock().unwrap(), vec![reference.clone()]);
}

#[tokio::test]
async fn test_disk_to_mirror_reads_cached_catalog() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let cached = "docker://localhost:55000/test/catalog:v1";
    let manifest = ResolvingManifest::new(&[(cached, sha('c').as_str())]);
    let puller = FixturePuller::default();
    let entry = CatalogEntry {
        catalog: CATALOG.to_string(),
        packages: vec![package("foo")],
        ..Default::default()
    };
    let (ctx, _cancel) = CollectContext::new(
        config(vec![entry.clone()]),
        options(MirrorMode::DiskToMirror, dir.path()),
    );

    let schema = OperatorCollector::new(&manifest)
        .with_puller(&puller)
        .collect(&ctx)
        .await
        .unwrap();

    assert_eq!(*puller.pulled.lock().unwrap(), vec![cached.to_string()]);
    assert_eq!(
        destinations(&schema),
        vec![
            format!("docker://mirror.example.com/ns/test/foo-operator:{}", sha('3')).as_str(),
            "docker://mirror.example.com/ns/test/foo-bundle:v1.2.0",
            "docker://mirror.example.com/ns/test/catalog:v1",
        ]
    );
    assert_eq!(
        schema.all_images[0].source,
        format!("docker://localhost:55000/test/foo-operator:{}", sha('3'))
    );
    assert_eq!(
        schema.all_images[2].source,
        format!("docker://localhost:55000/test/catalog:{}", entry.filter_digest().unwrap())
    );
}

#[tokio::test]
async fn test_delete_leaves_catalog_out() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let manifest = ResolvingManifest::new(&[("docker://localhost:55000/test/catalog:v1", "cc")]);
    let puller = FixturePuller::default();
    let mut opts = options(MirrorMode::DiskToMirror, dir.path());
    opts.is_delete = true;
    let entry = CatalogEntry {
        catalog: CATALOG.to_string(),
        packages: vec![package("bar")],
        ..Default::default()
    };
    let (ctx, _cancel) = CollectContext::new(config(vec![entry]), opts);

    let schema = OperatorCollector::new(&manifest)
        .with_puller(&puller)
        .collect(&ctx)
        .await
        .unwrap();

    assert_eq!(schema.all_images.len(), 2);
    assert!(schema
        .all_images
        .iter()
        .all(|i| i.image_type != ImageType::OperatorCatalog));
}

#[tokio::test]
async fn test_disk_to_mirror_missing_digest_is_fatal() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let entry = CatalogEntry {
        catalog: CATALOG.to_string(),
        ..Default::default()
    };
    let (ctx, _cancel) = CollectContext::new(
        config(vec![entry]),
        options(MirrorMode::DiskToMirror, dir.path()),
    );

    let err = collect_operator_images(&ctx, &ResolvingManifest::new(&[]), None)
        .await
        .unwrap_err();
    match err.downcast_ref::<CollectorError>() {
        Some(CollectorError::MissingCatalogDigest { reference, .. }) => {
            assert_eq!(reference, "docker://localhost:55000/test/catalog:v1")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_mirror_to_disk_unknown_digest_skips_catalog() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let entry = CatalogEntry {
        catalog: CATALOG.to_string(),
        ..Default::default()
    };
    let (ctx, _cancel) = CollectContext::new(
        config(vec![entry]),
        options(MirrorMode::MirrorToDisk, dir.path()),
    );

    let schema = collect_operator_images(&ctx, &ResolvingManifest::new(&[]), None)
        .await
        .unwrap();
    assert!(schema.all_images.is_empty());
    assert!(schema.catalog_to_fbc_map.is_empty());
}

#[tokio::test]
async fn test_invalid_filter_fails_before_io() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let entry = CatalogEntry {
        catalog: oci_catalog(&dir),
        packages: vec![PackageFilter {
            name: "foo".to_string(),
            min_version: Some("1.0.0".to_string()),
            channels: vec![ChannelFilter {
                name: "stable".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    };
    let work = dir.path().join("work");
    let (ctx, _cancel) = CollectContext::new(config(vec![entry]), options(MirrorMode::MirrorToDisk, &work));

    let err = collect_operator_images(&ctx, &OciLayoutManifest::new(), None)
        .await
        .unwrap_err();
    let err = err.downcast_ref::<CollectorError>().unwrap();
    assert!(err.is_config_error());
    assert!(matches!(err, CollectorError::InvalidFiltering { .. }));
    assert!(!work.join("operator-catalogs").exists());
}

#[tokio::test]
async fn test_cancelled_pass_stops() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let entry = CatalogEntry {
        catalog: oci_catalog(&dir),
        ..Default::default()
    };
    let (ctx, cancel) = CollectContext::new(
        config(vec![entry]),
        options(MirrorMode::MirrorToDisk, &dir.path().join("work")),
    );
    cancel.cancel();

    let err = collect_operator_images(&ctx, &OciLayoutManifest::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CollectorError>(),
        Some(CollectorError::Cancelled)
    ));
}
