//! Image definition resolver and manifest planner.
//!
//! This crate turns the definitions loaded by `imgplan-defs` into a
//! three-level namespace (`Registry` → `Distro` → `Architecture` →
//! `ImageType`) and, for one image type, validates a blueprint and image
//! options, resolves package-set chains and the partition table, projects OS
//! customizations and assembles the pipeline manifest consumed by the
//! external image builder. Nothing here builds an image, depsolves packages or
//! pulls containers: the manifest carries the package-set chains and source
//! references a resolver must fill in before `Manifest::serialize`.

pub mod customizations;
pub mod disk;
pub mod fips;
pub mod image_type;
pub mod kickstart;
pub mod manifest;
pub mod ostree;
pub mod pkgsets;
pub mod policy;
pub mod registry;
pub mod validator;

pub use disk::{effective_partitioning_mode, PartitionError};
pub use image_type::ImageType;
pub use manifest::{
    CommitSpec, ContainerSpec, Manifest, PackageSpec, Pipeline, ResolvedContent, Stage,
};
pub use ostree::{make_parent_commit, make_payload_commit, OstreeError, SourceSpec};
pub use pkgsets::{PackageSetChains, PackageSetStage};
pub use registry::{Architecture, Distro, Registry};
pub use validator::{ValidationError, ValidationTarget};

use imgplan_defs::DefinitionError;
use imgplan_schema::SchemaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("unknown distro: {0}")]
    Distro(String),
    #[error("architecture '{arch}' is not supported by {distro}")]
    Arch { distro: String, arch: String },
    #[error("image type '{image_type}' is not supported by {distro} on {arch}")]
    ImageType {
        distro: String,
        arch: String,
        image_type: String,
    },
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error(transparent)]
    Ostree(#[from] OstreeError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cannot assemble manifest for image type \"{image_type}\": {message}")]
    Manifest { image_type: String, message: String },
}
