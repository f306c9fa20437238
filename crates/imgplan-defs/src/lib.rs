//! Image-type definitions for imgplan.
//!
//! This crate owns the definition store: the YAML tree compiled into the
//! binary (`embedded`), the on-disk override selected through
//! `IMAGE_BUILDER_EXPERIMENTAL` (`DefsRoot`), strict decoding with YAML merge
//! key expansion (`loader`), the process-wide definition cache (`cache`), the
//! condition resolver (`conditions`) and the YAML shapes themselves: the
//! distros index, per-distro top-level files, image types, package sets,
//! partition tables and image/installer configs.

pub mod cache;
pub mod conditions;
pub mod distros;
pub mod embedded;
pub mod fsroot;
pub mod image_config;
pub mod image_type;
pub mod loader;
pub mod package_sets;
pub mod partition;

pub use conditions::{ConditionContext, Conditions};
pub use distros::{DistroDefinition, DistroYaml, DistrosIndex, OscapYaml, RunnerYaml};
pub use fsroot::{DefsRoot, ExperimentalFlags, EXPERIMENTAL_ENV};
pub use image_config::{
    ConditionalImageConfig, ConditionalInstallerConfig, ImageConfig, InstallerConfig,
};
pub use image_type::{
    BlueprintRules, BootMode, Compression, ImageFormat, ImageKind, ImageTypeYaml, PlatformYaml,
};
pub use loader::{load_distro_image_config, load_distros, load_top_level, TopLevel};
pub use package_sets::{PackageSetDef, ResolvedPackageSet};
pub use partition::{
    Btrfs, BtrfsSubvolume, Filesystem, LogicalVolume, Luks, Partition, PartitionTable,
    PartitionTableType, Payload, Swap, VolumeGroup,
};

use imgplan_schema::VersionParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("cannot read definition '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("definition file not found: {0}")]
    NotFound(String),
    #[error("cannot decode '{path}': {message}")]
    Decode { path: String, message: String },
    #[error("cannot use {pattern}: {message}")]
    BadRegex { pattern: String, message: String },
    #[error("invalid template '{template}': {message}")]
    Template { template: String, message: String },
    #[error("no definition directory known for distro '{0}'")]
    UnknownDistroDir(String),
    #[error(transparent)]
    Version(#[from] VersionParseError),
    #[error("image type '{image_type}': {message}")]
    InvalidImageType { image_type: String, message: String },
    #[error("alias '{alias}' of image type '{image_type}' collides with existing image type '{existing}'")]
    AliasCollision {
        alias: String,
        image_type: String,
        existing: String,
    },
}
