//! User-facing input types for imgplan.
//!
//! This crate defines the schema layer: blueprint parsing (`Blueprint`) from
//! TOML, JSON or YAML, the customization tree it carries, per-request image
//! options (`ImageOptions`), package repositories (`Repository`), distro
//! identifiers (`DistroId`) and the dotted version type used by conditional
//! definitions (`Version`).

pub mod blueprint;
pub mod customizations;
pub mod datasize;
pub mod disk;
pub mod distro_id;
pub mod options;
pub mod repository;
pub mod types;
pub mod version;

pub use blueprint::{
    parse_blueprint_file, parse_blueprint_str, Blueprint, BlueprintFormat, Container, Group,
    Package,
};
pub use customizations::{
    Customizations, DirectoryCustomization, FdoCustomization, FileCustomization,
    FirewallCustomization, GroupCustomization, IgnitionCustomization, InstallerCustomization,
    KernelCustomization, LocaleCustomization, OpenScapCustomization, RepositoryCustomization,
    RhsmCustomization, ServicesCustomization, TimezoneCustomization, UserCustomization,
};
pub use disk::{
    DiskCustomization, FilesystemCustomization, LogicalVolumeCustomization,
    PartitionCustomization, SubvolumeCustomization,
};
pub use distro_id::DistroId;
pub use options::{ImageOptions, OstreeImageOptions, PartitioningMode, SubscriptionOptions};
pub use repository::Repository;
pub use types::{Arch, ContentDigest, OstreeRef};
pub use version::{Version, VersionParseError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read blueprint file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse blueprint TOML: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to parse blueprint JSON: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("failed to parse blueprint YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("unsupported blueprint file extension: '{0}' (expected .toml, .json, .yaml or .yml)")]
    UnknownFormat(String),
    #[error(transparent)]
    Version(#[from] VersionParseError),
    #[error("invalid data size '{0}'")]
    InvalidSize(String),
    #[error("unknown architecture '{0}'")]
    UnknownArch(String),
}
