//! Copy ordering by image type
//!
//! Everything a manifest references is pushed before the manifest itself:
//! related images, then bundles, then catalogs.

use crate::image::{CopyImageSchema, ImageType};

/// Priority within the operator collector's own output
pub fn operator_priority(image_type: ImageType) -> u8 {
    match image_type {
        ImageType::OperatorRelatedImage => 1,
        ImageType::OperatorBundle => 2,
        ImageType::OperatorCatalog => 3,
        _ => 0,
    }
}

/// Priority across the output of every collector
pub fn global_priority(image_type: ImageType) -> u8 {
    match image_type {
        ImageType::OcpReleaseContent => 1,
        ImageType::KubeVirtContainer => 2,
        ImageType::OcpRelease => 3,
        ImageType::Cincinnati => 4,
        ImageType::OperatorRelatedImage => 5,
        ImageType::Generic => 6,
        ImageType::Helm => 7,
        ImageType::OperatorBundle => 8,
        ImageType::OperatorCatalog => 9,
        ImageType::Invalid => 0,
    }
}

/// Stable sort of operator copies
pub fn sort_operator_images(images: &mut [CopyImageSchema]) {
    images.sort_by_key(|img| operator_priority(img.image_type));
}

/// Stable sort of the combined copies of all collectors
pub fn sort_all_images(images: &mut [CopyImageSchema]) {
    images.sort_by_key(|img| global_priority(img.image_type));
}
