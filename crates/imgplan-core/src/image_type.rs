//! One image type resolved for a distro and architecture.

use crate::customizations::{self, OsCustomizations};
use crate::disk::{self, DiskRequest};
use crate::manifest::{assembler, Manifest};
use crate::ostree::{self, SourceSpec};
use crate::pkgsets::{self, ChainRequest, PackageSetChains};
use crate::{fips, validator, ImageError};
use imgplan_defs::package_sets::resolve_all;
use imgplan_defs::{
    BlueprintRules, BootMode, Compression, ConditionContext, DefinitionError, DistroDefinition,
    ImageConfig, ImageFormat, ImageKind, ImageTypeYaml, InstallerConfig, PartitionTable,
    PartitionTableType, PlatformYaml, ResolvedPackageSet,
};
use imgplan_schema::datasize::MIB;
use imgplan_schema::{Arch, Blueprint, Customizations, ImageOptions, Repository};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ImageType {
    name: String,
    arch: Arch,
    distro: Arc<DistroDefinition>,
    yaml: ImageTypeYaml,
    platform: PlatformYaml,
    image_config: ImageConfig,
    installer_config: InstallerConfig,
    package_sets: IndexMap<String, ResolvedPackageSet>,
    build_pipelines: Vec<String>,
    payload_pipelines: Vec<String>,
    exports: Vec<String>,
}

fn format_pipelines(format: ImageFormat) -> &'static [&'static str] {
    match format {
        ImageFormat::Raw => &[],
        ImageFormat::Qcow2 => &["qcow2"],
        ImageFormat::Vhd => &["vpc"],
        ImageFormat::Vmdk => &["vmdk"],
        ImageFormat::Ova => &["vmdk", "ovf", "archive"],
        ImageFormat::Tar => &["archive"],
    }
}

/// Payload pipelines an assembler emits for `kind`, in order.
pub fn payload_pipelines_for(
    kind: ImageKind,
    format: ImageFormat,
    compression: Option<Compression>,
) -> Vec<String> {
    let disk = |head: &[&str]| -> Vec<String> {
        head.iter()
            .chain(format_pipelines(format))
            .map(|s| (*s).to_owned())
            .chain(compression.map(|c| c.as_str().to_owned()))
            .collect()
    };
    let fixed = |names: &[&str]| names.iter().map(|s| (*s).to_owned()).collect();
    match kind {
        ImageKind::Disk => disk(&["os", "image"]),
        ImageKind::OstreeDisk => disk(&["ostree-deployment", "image"]),
        ImageKind::Container | ImageKind::BootableContainer => fixed(&["os", "container"]),
        ImageKind::Archive => fixed(&["os", "archive"]),
        ImageKind::OstreeCommit => fixed(&["os", "ostree-commit", "commit-archive"]),
        ImageKind::OstreeContainer => {
            fixed(&["os", "ostree-commit", "container-tree", "container"])
        }
        ImageKind::OstreeInstaller => {
            fixed(&["anaconda-tree", "efiboot-tree", "bootiso-tree", "bootiso"])
        }
        ImageKind::OstreeSimplifiedInstaller => fixed(&[
            "ostree-deployment",
            "image",
            "xz",
            "coi-tree",
            "efiboot-tree",
            "bootiso-tree",
            "bootiso",
        ]),
        ImageKind::TarInstaller => fixed(&[
            "anaconda-tree",
            "rootfs-image",
            "efiboot-tree",
            "os",
            "bootiso-tree",
            "bootiso",
        ]),
        ImageKind::LiveInstaller => fixed(&[
            "anaconda-tree",
            "rootfs-image",
            "efiboot-tree",
            "bootiso-tree",
            "bootiso",
        ]),
    }
}

impl ImageType {
    /// Build from an already condition-resolved definition. Declared pipeline
    /// lists must agree with what the assembler for the kind emits.
    pub fn new(
        name: &str,
        yaml: ImageTypeYaml,
        arch: Arch,
        distro: Arc<DistroDefinition>,
        ctx: &ConditionContext,
        distro_image_config: &ImageConfig,
        distro_installer_config: &InstallerConfig,
    ) -> Result<Self, DefinitionError> {
        let invalid = |message: String| DefinitionError::InvalidImageType {
            image_type: name.to_owned(),
            message,
        };
        yaml.check(name, arch)?;
        let platform = yaml
            .platform(arch)
            .cloned()
            .ok_or_else(|| invalid(format!("no platform for {arch}")))?;

        let build_pipelines = vec!["build".to_owned()];
        let payload_pipelines =
            payload_pipelines_for(yaml.image_kind, platform.image_format, yaml.compression);
        let exports: Vec<String> = payload_pipelines.last().cloned().into_iter().collect();
        for (field, declared, derived) in [
            ("build_pipelines", &yaml.build_pipelines, &build_pipelines),
            ("payload_pipelines", &yaml.payload_pipelines, &payload_pipelines),
            ("exports", &yaml.exports, &exports),
        ] {
            if !declared.is_empty() && declared != derived {
                return Err(invalid(format!(
                    "{field} {declared:?} do not match the {} assembler on {arch} ({derived:?})",
                    yaml.image_kind
                )));
            }
        }

        let image_config = match &yaml.image_config {
            Some(config) => config.resolve(ctx)?.inherit_from(distro_image_config),
            None => distro_image_config.clone(),
        };
        let installer_config = match &yaml.installer_config {
            Some(config) => config.resolve(ctx)?.inherit_from(distro_installer_config),
            None => distro_installer_config.clone(),
        };
        let mut package_sets = IndexMap::new();
        for (set, defs) in &yaml.package_sets {
            package_sets.insert(set.clone(), resolve_all(defs, ctx)?);
        }
        debug!(
            "image type {name} on {} {arch}: payload pipelines {payload_pipelines:?}",
            distro.name
        );

        Ok(Self {
            name: name.to_owned(),
            arch,
            distro,
            yaml,
            platform,
            image_config,
            installer_config,
            package_sets,
            build_pipelines,
            payload_pipelines,
            exports,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.yaml.aliases
    }

    pub fn kind(&self) -> ImageKind {
        self.yaml.image_kind
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn distro(&self) -> &DistroDefinition {
        &self.distro
    }

    pub fn filename(&self) -> &str {
        &self.yaml.filename
    }

    pub fn mime_type(&self) -> &str {
        &self.yaml.mime_type
    }

    pub fn compression(&self) -> Option<Compression> {
        self.yaml.compression
    }

    pub fn bootable(&self) -> bool {
        self.yaml.bootable
    }

    pub fn boot_iso(&self) -> bool {
        self.yaml.boot_iso
    }

    pub fn rpm_ostree(&self) -> bool {
        self.yaml.rpm_ostree
    }

    pub fn platform(&self) -> &PlatformYaml {
        &self.platform
    }

    pub fn definition(&self) -> &ImageTypeYaml {
        &self.yaml
    }

    pub fn image_config(&self) -> &ImageConfig {
        &self.image_config
    }

    pub fn installer_config(&self) -> &InstallerConfig {
        &self.installer_config
    }

    pub fn package_sets(&self) -> &IndexMap<String, ResolvedPackageSet> {
        &self.package_sets
    }

    /// Image size for a request: `requested`, or the default when zero.
    /// VHD images are rounded up to whole MiB.
    pub fn size(&self, requested: u64) -> u64 {
        let size = if requested == 0 {
            self.yaml.default_size
        } else {
            requested
        };
        if self.platform.image_format == ImageFormat::Vhd {
            size.div_ceil(MIB).saturating_mul(MIB)
        } else {
            size
        }
    }

    pub fn partition_table(&self) -> Option<&PartitionTable> {
        self.yaml.partition_table(self.arch)
    }

    pub fn partition_type(&self) -> Option<PartitionTableType> {
        self.partition_table().map(|pt| pt.table_type)
    }

    pub fn boot_mode(&self) -> BootMode {
        self.yaml.boot_mode(self.arch)
    }

    pub fn build_pipelines(&self) -> &[String] {
        &self.build_pipelines
    }

    pub fn payload_pipelines(&self) -> &[String] {
        &self.payload_pipelines
    }

    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    pub fn blueprint_rules(&self) -> Option<&BlueprintRules> {
        self.yaml.blueprint.as_ref()
    }

    /// The ref a commit is built under, or deployed from, by default.
    pub fn default_ostree_ref(&self) -> String {
        self.yaml
            .ostree_ref
            .clone()
            .or_else(|| self.distro.ostree_ref(self.arch))
            .unwrap_or_default()
    }

    pub fn iso_label(&self) -> Option<String> {
        let label = self.yaml.iso_label.as_deref().unwrap_or_default();
        self.distro.iso_label(self.arch, label)
    }

    /// Pipeline that receives the blueprint package stage.
    fn blueprint_pipeline(&self) -> Option<&'static str> {
        match self.kind() {
            ImageKind::OstreeInstaller
            | ImageKind::OstreeDisk
            | ImageKind::OstreeSimplifiedInstaller => None,
            ImageKind::LiveInstaller => Some("anaconda-tree"),
            _ => Some("os"),
        }
    }

    /// Package-set chains for a request.
    pub fn package_set_chains(
        &self,
        bp: &Blueprint,
        custom: &Customizations,
        repositories: &[Repository],
        os: &OsCustomizations,
    ) -> PackageSetChains {
        let mut pipelines: Vec<String> = self.build_pipelines.clone();
        pipelines.extend(self.payload_pipelines.iter().cloned());

        let mut extra: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let build = extra.entry("build".to_owned()).or_default();
        build.extend(self.distro.runner.build_packages.iter().cloned());
        build.extend(self.platform.build_packages.iter().cloned());
        let os_pipeline = match self.kind() {
            ImageKind::LiveInstaller => "anaconda-tree",
            _ => "os",
        };
        let os_extra = extra.entry(os_pipeline.to_owned()).or_default();
        if self.yaml.bootable {
            os_extra.extend(self.platform.packages.iter().cloned());
        }
        os_extra.extend(os.extra_packages.iter().cloned());

        let mut repos: Vec<Repository> = repositories.to_vec();
        repos.extend(
            custom
                .repositories
                .iter()
                .filter(|r| r.install_from)
                .map(Repository::from),
        );

        pkgsets::build_chains(&ChainRequest {
            package_sets: &self.package_sets,
            pipelines: &pipelines,
            extra,
            blueprint_pipeline: self.blueprint_pipeline(),
            blueprint_packages: bp.package_specs(),
            repositories: &repos,
        })
    }

    /// Validate a request and assemble its manifest. Returns the manifest and
    /// any non-fatal warnings.
    pub fn manifest(
        &self,
        bp: &Blueprint,
        options: &ImageOptions,
        repositories: &[Repository],
        seed: u64,
    ) -> Result<(Manifest, Vec<String>), ImageError> {
        info!(
            "assembling {} for {} {} (seed {seed})",
            self.name, self.distro.name, self.arch
        );
        validator::validate(self, bp, options)?;

        let default_custom = Customizations::default();
        let custom = bp.customizations().unwrap_or(&default_custom);
        let mut warnings = Vec::new();
        if custom.fips_enabled() {
            warnings.extend(fips::host_warning());
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mode = disk::effective_partitioning_mode(self, options.partitioning_mode)?;
        let platform = format!("{} {}", self.distro.name, self.arch);
        let partition_table = match self.partition_table() {
            Some(base) if self.kind().has_disk_pipeline() => Some(disk::resolve(
                &DiskRequest {
                    image_type: &self.name,
                    base,
                    mode,
                    filesystems: &custom.filesystem,
                    disk: custom.disk.as_ref(),
                    required_sizes: &self.yaml.required_partition_sizes,
                    size: self.size(options.size),
                    default_fs_type: &self.distro.default_fs_type,
                    platform: &platform,
                    swap_supported: !self.distro.swap_unsupported_arches.contains(&self.arch),
                    ostree: self.kind().is_ostree(),
                },
                &mut rng,
            )?),
            _ => None,
        };

        let os = customizations::project(self, bp, options)?;
        let chains = self.package_set_chains(bp, custom, repositories, &os);

        let default_ref = self.default_ostree_ref();
        let mut ostree_sources: BTreeMap<String, SourceSpec> = BTreeMap::new();
        let mut commit_ref = None;
        if self.kind().builds_commit() {
            let (parent, new_ref) = ostree::make_parent_commit(options.ostree.as_ref(), &default_ref)?;
            if let Some(parent) = parent {
                ostree_sources.insert("ostree-commit".to_owned(), parent);
            }
            commit_ref = Some(new_ref);
        } else if self.kind().needs_payload_commit() {
            let payload = ostree::make_payload_commit(options.ostree.as_ref(), &default_ref)?;
            let pipeline = match self.kind() {
                ImageKind::OstreeInstaller => "bootiso-tree",
                _ => "ostree-deployment",
            };
            commit_ref = Some(payload.reference.clone());
            ostree_sources.insert(pipeline.to_owned(), payload);
        }

        let manifest = assembler::assemble(&assembler::Request {
            image_type: self,
            blueprint: bp,
            customizations: custom,
            options,
            os: &os,
            partition_table: partition_table.as_ref(),
            partitioning_mode: mode,
            chains,
            ostree_sources,
            commit_ref,
            seed,
        })?;
        Ok((manifest, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_pipelines_follow_format_and_compression() {
        assert_eq!(
            payload_pipelines_for(ImageKind::Disk, ImageFormat::Qcow2, None),
            vec!["os", "image", "qcow2"]
        );
        assert_eq!(
            payload_pipelines_for(ImageKind::Disk, ImageFormat::Raw, Some(Compression::Xz)),
            vec!["os", "image", "xz"]
        );
        assert_eq!(
            payload_pipelines_for(ImageKind::Disk, ImageFormat::Ova, None),
            vec!["os", "image", "vmdk", "ovf", "archive"]
        );
        assert_eq!(
            payload_pipelines_for(ImageKind::OstreeDisk, ImageFormat::Raw, Some(Compression::Xz)),
            vec!["ostree-deployment", "image", "xz"]
        );
    }

    #[test]
    fn fixed_pipelines_ignore_format() {
        assert_eq!(
            payload_pipelines_for(ImageKind::OstreeCommit, ImageFormat::Qcow2, None),
            vec!["os", "ostree-commit", "commit-archive"]
        );
        assert_eq!(
            payload_pipelines_for(ImageKind::LiveInstaller, ImageFormat::Raw, None)
                .last()
                .map(String::as_str),
            Some("bootiso")
        );
    }
}
