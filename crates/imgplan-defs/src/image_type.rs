use crate::conditions::{ConditionContext, Conditions};
use crate::image_config::{ConditionalImageConfig, ConditionalInstallerConfig};
use crate::package_sets::PackageSetDef;
use crate::partition::PartitionTable;
use crate::DefinitionError;
use imgplan_schema::{datasize, Arch};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nesting limit for image-type conditions.
const MAX_CONDITION_DEPTH: usize = 8;

/// Assembler strategy of an image type. Unknown tags fail at definition load.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ImageKind {
    Disk,
    Container,
    Archive,
    OstreeCommit,
    OstreeContainer,
    OstreeInstaller,
    OstreeDisk,
    OstreeSimplifiedInstaller,
    TarInstaller,
    LiveInstaller,
    BootableContainer,
}

impl ImageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Disk => "disk",
            ImageKind::Container => "container",
            ImageKind::Archive => "archive",
            ImageKind::OstreeCommit => "ostree-commit",
            ImageKind::OstreeContainer => "ostree-container",
            ImageKind::OstreeInstaller => "ostree-installer",
            ImageKind::OstreeDisk => "ostree-disk",
            ImageKind::OstreeSimplifiedInstaller => "ostree-simplified-installer",
            ImageKind::TarInstaller => "tar-installer",
            ImageKind::LiveInstaller => "live-installer",
            ImageKind::BootableContainer => "bootable-container",
        }
    }

    pub fn is_ostree(self) -> bool {
        matches!(
            self,
            ImageKind::OstreeCommit
                | ImageKind::OstreeContainer
                | ImageKind::OstreeInstaller
                | ImageKind::OstreeDisk
                | ImageKind::OstreeSimplifiedInstaller
        )
    }

    /// Kinds that build a new commit and may take a parent.
    pub fn builds_commit(self) -> bool {
        matches!(self, ImageKind::OstreeCommit | ImageKind::OstreeContainer)
    }

    /// Kinds that deploy an existing commit and need its URL.
    pub fn needs_payload_commit(self) -> bool {
        matches!(
            self,
            ImageKind::OstreeInstaller
                | ImageKind::OstreeDisk
                | ImageKind::OstreeSimplifiedInstaller
        )
    }

    /// Kinds that write a raw disk image through the `image` pipeline.
    pub fn has_disk_pipeline(self) -> bool {
        matches!(
            self,
            ImageKind::Disk | ImageKind::OstreeDisk | ImageKind::OstreeSimplifiedInstaller
        )
    }

    pub fn is_installer(self) -> bool {
        matches!(
            self,
            ImageKind::OstreeInstaller
                | ImageKind::OstreeSimplifiedInstaller
                | ImageKind::TarInstaller
                | ImageKind::LiveInstaller
        )
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Xz,
    Gzip,
    Zstd,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Compression::Xz => "xz",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Raw,
    Qcow2,
    Vhd,
    Vmdk,
    Ova,
    Tar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    None,
    Legacy,
    Uefi,
    Hybrid,
}

impl fmt::Display for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BootMode::None => "none",
            BootMode::Legacy => "legacy",
            BootMode::Uefi => "uefi",
            BootMode::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// Firmware and output format of an image type on one architecture.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PlatformYaml {
    /// GRUB legacy platform, e.g. `i386-pc` or `powerpc-ieee1275`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bios_platform: Option<String>,
    /// Vendor directory under `/boot/efi/EFI`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uefi_vendor: Option<String>,
    #[serde(default)]
    pub zipl: bool,
    #[serde(default)]
    pub image_format: ImageFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qcow2_compat: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_packages: Vec<String>,
}

impl PlatformYaml {
    pub fn boot_mode(&self) -> BootMode {
        match (self.bios_platform.is_some() || self.zipl, self.uefi_vendor.is_some()) {
            (true, true) => BootMode::Hybrid,
            (false, true) => BootMode::Uefi,
            (true, false) => BootMode::Legacy,
            (false, false) => BootMode::None,
        }
    }
}

/// `blueprint:` block of an image type; when absent the kind defaults apply.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BlueprintRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_options: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct Size(#[serde(deserialize_with = "datasize::deserialize")] pub u64);

/// One image type as written in a distro's `image_types` map.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImageTypeYaml {
    #[serde(default)]
    pub aliases: Vec<String>,
    pub filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub compression: Option<Compression>,
    #[serde(default)]
    pub bootable: bool,
    #[serde(default)]
    pub boot_iso: bool,
    #[serde(default)]
    pub rpm_ostree: bool,
    #[serde(default, deserialize_with = "datasize::deserialize")]
    pub default_size: u64,
    pub image_kind: ImageKind,
    /// Suffix rendered into the distro's ISO label template.
    #[serde(default)]
    pub iso_label: Option<String>,
    #[serde(default)]
    pub build_pipelines: Vec<String>,
    #[serde(default)]
    pub payload_pipelines: Vec<String>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub platforms: IndexMap<Arch, PlatformYaml>,
    #[serde(default)]
    pub partition_tables: IndexMap<Arch, PartitionTable>,
    #[serde(default)]
    pub required_partition_sizes: IndexMap<String, Size>,
    #[serde(default)]
    pub package_sets: IndexMap<String, Vec<PackageSetDef>>,
    #[serde(default)]
    pub image_config: Option<ConditionalImageConfig>,
    #[serde(default)]
    pub installer_config: Option<ConditionalInstallerConfig>,
    #[serde(default)]
    pub blueprint: Option<BlueprintRules>,
    /// Default ostree ref override; the distro template is used otherwise.
    #[serde(default)]
    pub ostree_ref: Option<String>,
    /// Raw partitioning is refused and `lvm` is promoted to `auto-lvm`.
    #[serde(default)]
    pub lvm_as_auto_lvm: bool,
    #[serde(default)]
    pub conditions: Option<Box<Conditions<ImageTypeYaml>>>,
}

impl ImageTypeYaml {
    /// Apply image-type conditions: the first match replaces the node and is
    /// itself resolved again. A resolved node carries no conditions, so
    /// resolving it again returns it unchanged.
    pub fn resolve(&self, name: &str, ctx: &ConditionContext) -> Result<ImageTypeYaml, DefinitionError> {
        let mut current = self.clone();
        for _ in 0..MAX_CONDITION_DEPTH {
            let Some(conditions) = current.conditions.take() else {
                return Ok(current);
            };
            match conditions.first_match(ctx)? {
                Some(sub) => {
                    tracing::debug!(
                        "image type {name}: condition matched for {} {}",
                        ctx.distro_name_ver,
                        ctx.arch
                    );
                    let mut next = sub.clone();
                    // Merge-key copies of the parent repeat its conditions.
                    if next.conditions.as_ref() == Some(&conditions) {
                        next.conditions = None;
                    }
                    current = next;
                }
                None => return Ok(current),
            }
        }
        Err(DefinitionError::InvalidImageType {
            image_type: name.to_owned(),
            message: format!("conditions nested deeper than {MAX_CONDITION_DEPTH} levels"),
        })
    }

    pub fn platform(&self, arch: Arch) -> Option<&PlatformYaml> {
        self.platforms.get(&arch)
    }

    pub fn partition_table(&self, arch: Arch) -> Option<&PartitionTable> {
        self.partition_tables.get(&arch)
    }

    pub fn boot_mode(&self, arch: Arch) -> BootMode {
        if !self.bootable && !self.boot_iso {
            return BootMode::None;
        }
        self.platform(arch).map_or(BootMode::None, PlatformYaml::boot_mode)
    }

    /// Structural checks that do not depend on a request.
    pub fn check(&self, name: &str, arch: Arch) -> Result<(), DefinitionError> {
        let invalid = |message: String| DefinitionError::InvalidImageType {
            image_type: name.to_owned(),
            message,
        };
        if self.bootable {
            if self.boot_mode(arch) == BootMode::None {
                return Err(invalid(format!("bootable but no boot mode on {arch}")));
            }
            if self.partition_table(arch).is_none() {
                return Err(invalid(format!("bootable but no partition table for {arch}")));
            }
        }
        Ok(())
    }
}
