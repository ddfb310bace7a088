//! Image references and the copy instructions built from them

mod reference;
mod types;

pub use reference::{
    is_valid_digest, is_valid_path_component, ImageSpec, DOCKER_PROTOCOL, OCI_PROTOCOL,
};
pub use types::{
    CatalogFilterResult, CollectorSchema, CopyImageSchema, CopyImageSchemaMap, ImageType,
    RelatedImage,
};
