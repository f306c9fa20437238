//! Pipeline assembly for each image kind.
//!
//! Pipelines are emitted in the image type's build-then-payload order, so
//! the last one is always the export. Each payload pipeline is built from its
//! name; what it contains depends on the kind and on what came before it.

use super::stages::{self, Grub2Options};
use super::{Manifest, Pipeline, Stage};
use crate::customizations::{users_with_keys, OsCustomizations};
use crate::disk::{self, FsEntry};
use crate::image_type::ImageType;
use crate::kickstart::{self, Kickstart, KickstartRequest, OstreePayload, ISO_ROOT_PATH};
use crate::ostree::SourceSpec;
use crate::pkgsets::PackageSetChains;
use crate::ImageError;
use imgplan_defs::{ImageKind, PartitionTable};
use imgplan_schema::datasize::{GIB, MIB};
use imgplan_schema::{Arch, Blueprint, Customizations, DirectoryCustomization, ImageOptions, PartitioningMode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

const ROOTFS_SIZE: u64 = 4 * GIB;
const EFIBOOT_SIZE: u64 = 20 * MIB;
const OSTREE_REPO: &str = "/ostree/repo";
const COMMIT_REPO: &str = "/repo";
const NGINX_REPO: &str = "/usr/share/nginx/html/repo";
const BOOTC_CONFIG: &str = "/usr/lib/bootc/install/00-imgplan.toml";
const FDO_ROOT_CERTS: &str = "/fdo_diun_pub_key_root_certs.pem";

const NGINX_CONF: &str = "events {}
http {
    server {
        listen 8080;
        root /usr/share/nginx/html;
    }
}
pid /var/run/nginx.pid;
daemon off;
";

const ANACONDA_MODULES: [&str; 3] = [
    "org.fedoraproject.Anaconda.Modules.Network",
    "org.fedoraproject.Anaconda.Modules.Payloads",
    "org.fedoraproject.Anaconda.Modules.Storage",
];

const ANACONDA_DRACUT_MODULES: [&str; 9] = [
    "anaconda", "rdma", "rngd", "multipath", "fcoe", "fcoe-uefi", "iscsi", "lunmask", "nfs",
];

const LIVE_DRACUT_MODULES: [&str; 2] = ["dmsquash-live", "livenet"];
const COI_DRACUT_MODULES: [&str; 2] = ["coreos-installer", "fdo"];

pub struct Request<'a> {
    pub image_type: &'a ImageType,
    pub blueprint: &'a Blueprint,
    pub customizations: &'a Customizations,
    pub options: &'a ImageOptions,
    pub os: &'a OsCustomizations,
    pub partition_table: Option<&'a PartitionTable>,
    pub partitioning_mode: PartitioningMode,
    pub chains: PackageSetChains,
    /// Commits to fetch, keyed by consuming pipeline.
    pub ostree_sources: BTreeMap<String, SourceSpec>,
    /// Ref of the commit built or deployed, for ostree kinds.
    pub commit_ref: Option<String>,
    pub seed: u64,
}

#[derive(Serialize)]
struct BootcConfig {
    install: BootcInstall,
}

#[derive(Serialize)]
struct BootcInstall {
    #[serde(rename = "root-fs-type", skip_serializing_if = "Option::is_none")]
    root_fs_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    kargs: Vec<String>,
}

fn goarch(arch: Arch) -> &'static str {
    match arch {
        Arch::X86_64 => "amd64",
        Arch::Aarch64 => "arm64",
        Arch::Ppc64le => "ppc64le",
        Arch::S390x => "s390x",
        Arch::Riscv64 => "riscv64",
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

struct Assembler<'r, 'a> {
    req: &'r Request<'a>,
    manifest: Manifest,
    rng: StdRng,
    entries: Vec<FsEntry>,
    /// Output file of each pipeline that writes one.
    files: BTreeMap<String, String>,
    kickstart: Option<Kickstart>,
    iso_label: String,
}

impl<'r, 'a> Assembler<'r, 'a> {
    fn new(req: &'r Request<'a>) -> Self {
        let it = req.image_type;
        let distro = it.distro();
        let iso_label = it.iso_label().unwrap_or_else(|| {
            format!("{}-{}-{}", distro.product.replace(' ', "-"), distro.os_version, it.arch())
        });
        Self {
            req,
            manifest: Manifest {
                package_set_chains: req.chains.clone(),
                ostree_sources: req.ostree_sources.clone(),
                ..Default::default()
            },
            rng: StdRng::seed_from_u64(req.seed.wrapping_add(1)),
            entries: req.partition_table.map(disk::filesystems).unwrap_or_default(),
            files: BTreeMap::new(),
            kickstart: None,
            iso_label,
        }
    }

    fn it(&self) -> &'a ImageType {
        self.req.image_type
    }

    fn kind(&self) -> ImageKind {
        self.req.image_type.kind()
    }

    fn osname(&self) -> &str {
        &self.it().distro().id.name
    }

    fn commit_ref(&self) -> &str {
        self.req.commit_ref.as_deref().unwrap_or_default()
    }

    fn kernel(&self) -> &str {
        &self.req.os.kernel_name
    }

    fn err(&self, message: impl Into<String>) -> ImageError {
        ImageError::Manifest {
            image_type: self.it().name().to_owned(),
            message: message.into(),
        }
    }

    fn entry(&self, mountpoint: &str) -> Option<&FsEntry> {
        self.entries.iter().find(|e| e.mountpoint == mountpoint)
    }

    /// Output filename for `pipeline`: the image filename on the export.
    fn output(&mut self, pipeline: &str, default: &str) -> String {
        let name = if self.it().exports().iter().any(|e| e == pipeline) {
            self.it().filename().to_owned()
        } else {
            default.to_owned()
        };
        self.files.insert(pipeline.to_owned(), name.clone());
        name
    }

    fn file_of(&self, pipeline: &str) -> Result<String, ImageError> {
        self.files
            .get(pipeline)
            .cloned()
            .ok_or_else(|| self.err(format!("pipeline {pipeline} has no output file")))
    }

    fn random_uuid(&mut self) -> String {
        uuid::Builder::from_random_bytes(self.rng.random())
            .into_uuid()
            .to_string()
    }

    fn has_chain(&self, pipeline: &str) -> bool {
        self.manifest.package_set_chains.contains_key(pipeline)
    }

    fn rpm(&self, pipeline: &str) -> Option<Stage> {
        let os = self.req.os;
        self.has_chain(pipeline).then(|| {
            stages::rpm(
                pipeline,
                &os.gpg_key_files,
                os.exclude_docs,
                pipeline == "os" && self.it().rpm_ostree(),
            )
        })
    }

    fn installer_tree(&self) -> &'static str {
        if self.kind() == ImageKind::OstreeSimplifiedInstaller {
            "coi-tree"
        } else {
            "anaconda-tree"
        }
    }

    fn add_files(&mut self, p: &mut Pipeline, files: &[(String, String)]) {
        if files.is_empty() {
            return;
        }
        let ids: Vec<_> = files
            .iter()
            .map(|(path, data)| (self.manifest.add_inline(data), path.clone()))
            .collect();
        p.add(stages::copy_inline(&ids));
    }

    fn build(&mut self) -> Pipeline {
        let mut p = Pipeline::new("build", None);
        p.runner = Some(self.it().distro().runner.name.clone());
        p.extend(self.rpm("build"));
        if let Some(policy) = &self.req.os.selinux {
            p.add(stages::selinux(policy, false));
        }
        p
    }

    fn os_tree(&mut self) -> Result<Pipeline, ImageError> {
        let it = self.it();
        let os = self.req.os;
        let kind = self.kind();
        let mut p = Pipeline::new("os", Some("build"));
        let disk_booted = it.bootable() && !self.entries.is_empty() && !kind.is_ostree();

        if disk_booted {
            if let Some(root) = self.entry("/") {
                p.add(stages::kernel_cmdline(&root.uuid, &os.kernel_options));
            }
        }
        p.extend(self.rpm("os"));

        if !os.containers.is_empty() {
            self.manifest
                .container_sources
                .insert("os".to_owned(), os.containers.clone());
            p.add(stages::skopeo("os", os.container_storage.as_deref()));
            if let Some(storage) = &os.container_storage {
                p.add(stages::containers_storage_conf(storage));
            }
        }

        p.extend(os.language.as_deref().map(stages::locale));
        p.extend(os.keyboard.as_deref().map(stages::keymap));
        p.extend(os.hostname.as_deref().map(stages::hostname));
        p.extend(os.timezone.as_deref().map(stages::timezone));
        if !os.ntp_servers.is_empty() {
            p.add(stages::chrony(&os.ntp_servers));
        }
        if !os.sysconfig.is_empty() || os.default_kernel.is_some() {
            p.add(stages::sysconfig(
                &os.sysconfig,
                os.default_kernel.as_deref(),
                os.update_default_kernel,
            ));
        }
        if !os.groups.is_empty() {
            p.add(stages::groups(&os.groups));
        }
        if !os.users.is_empty() {
            p.add(stages::users(&os.users));
        }
        if os.lock_root_user {
            p.add(stages::lock_root());
        }
        p.extend(os.firewall.as_ref().map(stages::firewall));
        if !os.enabled_services.is_empty()
            || !os.disabled_services.is_empty()
            || !os.masked_services.is_empty()
            || os.default_target.is_some()
        {
            p.add(stages::systemd(
                &os.enabled_services,
                &os.disabled_services,
                &os.masked_services,
                os.default_target.as_deref(),
            ));
        }
        p.extend(os.rhsm.as_ref().map(stages::rhsm));
        if !os.facts.is_empty() {
            p.add(stages::rhsm_facts(&os.facts));
        }

        if !os.directories.is_empty() {
            p.add(stages::mkdir(&os.directories));
        }
        let mut files: Vec<(String, String)> = os
            .files
            .iter()
            .filter_map(|f| f.data.as_ref().map(|d| (f.path.clone(), d.clone())))
            .collect();
        if kind == ImageKind::BootableContainer {
            files.push((BOOTC_CONFIG.to_owned(), self.bootc_config()?));
        }
        self.add_files(&mut p, &files);
        p.extend(stages::chown(&os.directories, &os.files));
        p.extend(stages::chmod(&os.files));

        if let Some(oscap) = &os.oscap {
            p.extend(stages::oscap_autotailor(oscap));
            p.add(stages::oscap_remediation(oscap));
        }
        if os.fips {
            p.extend(stages::fips());
        }
        if os.machine_id_uninitialized {
            p.add(stages::machine_id_uninitialized());
        }

        if disk_booted {
            p.add(stages::fstab(&self.entries, None));
            let platform = it.platform();
            if platform.zipl {
                p.add(stages::zipl());
            } else if let Some(root) = self.entry("/") {
                p.add(stages::grub2(&Grub2Options {
                    root_fs_uuid: &root.uuid,
                    boot_fs_uuid: self.entry("/boot").map(|b| b.uuid.as_str()),
                    kernel_options: &os.kernel_options,
                    bios_platform: platform.bios_platform.as_deref(),
                    uefi_vendor: platform.uefi_vendor.as_deref(),
                    timeout: os.grub_timeout,
                    ..Default::default()
                }));
            }
        }
        if os.bootupd {
            p.add(stages::bootupd(it.platform().bios_platform.is_some()));
        }
        if it.rpm_ostree() {
            p.add(stages::ostree_preptree());
        }
        if let Some(policy) = &os.selinux {
            p.add(stages::selinux(policy, os.selinux_force_relabel));
        }
        Ok(p)
    }

    fn bootc_config(&self) -> Result<String, ImageError> {
        let config = BootcConfig {
            install: BootcInstall {
                root_fs_type: Some(self.it().distro().default_fs_type.clone())
                    .filter(|t| !t.is_empty()),
                kargs: self.req.os.kernel_options.clone(),
            },
        };
        toml::to_string(&config).map_err(|e| self.err(format!("bootc install config: {e}")))
    }

    fn ostree_deployment(&mut self) -> Result<Pipeline, ImageError> {
        let os = self.req.os;
        let source = self
            .req
            .ostree_sources
            .get("ostree-deployment")
            .ok_or_else(|| self.err("no ostree commit to deploy"))?;
        let osname = self.osname().to_owned();
        let reference = self.commit_ref().to_owned();
        let remote_url = self
            .req
            .options
            .ostree
            .as_ref()
            .map(|o| o.content_url.as_str())
            .filter(|u| !u.is_empty())
            .unwrap_or(&source.url)
            .to_owned();
        let root = self
            .entry("/")
            .map(|e| e.uuid.clone())
            .ok_or_else(|| self.err("partition table has no root filesystem"))?;

        let mut p = Pipeline::new("ostree-deployment", Some("build"));
        p.add(stages::ostree_init_fs());
        p.add(stages::ostree_pull(OSTREE_REPO, Some(&osname), "ostree-deployment"));
        p.add(stages::ostree_os_init(&osname));
        p.add(stages::ostree_config(OSTREE_REPO));
        p.add(stages::mkdir(&[DirectoryCustomization {
            path: "/boot/efi".to_owned(),
            mode: Some("0700".to_owned()),
            ..Default::default()
        }]));
        let mut kernel_options = vec![format!("root=UUID={root}")];
        kernel_options.extend(os.kernel_options.iter().cloned());
        p.add(stages::ostree_deploy(
            &osname,
            &reference,
            &osname,
            &kernel_options,
            &["/boot", "/boot/efi"],
        ));
        p.add(stages::ostree_remotes(OSTREE_REPO, &osname, &remote_url));
        p.add(stages::ostree_fillvar(&osname, &reference));
        p.add(stages::fstab(&self.entries, Some((&osname, &reference))));
        if !os.groups.is_empty() {
            p.add(stages::groups(&os.groups));
        }
        if !os.users.is_empty() {
            p.add(stages::users(&os.users));
        }
        if os.lock_root_user {
            p.add(stages::lock_root());
        }
        if os.ignition_platform.is_some() {
            p.add(stages::ignition());
        }
        let platform = self.it().platform();
        p.add(stages::grub2(&Grub2Options {
            root_fs_uuid: &root,
            boot_fs_uuid: self.entry("/boot").map(|b| b.uuid.as_str()),
            kernel_options: &os.kernel_options,
            bios_platform: platform.bios_platform.as_deref(),
            uefi_vendor: platform.uefi_vendor.as_deref(),
            timeout: os.grub_timeout,
            greenboot: true,
            ignition: os.ignition_platform.is_some(),
        }));
        p.add(stages::ostree_selinux(&osname, &reference));
        Ok(p)
    }

    fn disk_image(&mut self) -> Result<Pipeline, ImageError> {
        let table = self
            .req
            .partition_table
            .ok_or_else(|| self.err("no partition table"))?;
        let source = match self.kind() {
            ImageKind::Disk => "os",
            _ => "ostree-deployment",
        };
        let filename = self.output("image", "disk.img");
        let mut p = Pipeline::new("image", Some("build"));
        p.add(stages::truncate(&filename, table.size));
        p.add(stages::sfdisk(table, &filename));
        p.extend(stages::lvm2_create(table, &filename));
        p.extend(stages::mkfs(table, &filename, &self.entries));
        p.extend(stages::btrfs_subvolumes(table, &filename, &self.entries));
        p.add(stages::copy_tree_to_disk(source, table, &filename, &self.entries));
        let platform = self.it().platform();
        if let Some(bios) = &platform.bios_platform {
            p.extend(stages::grub2_inst(table, &filename, bios, &self.entries));
        }
        if platform.zipl {
            p.extend(stages::zipl_inst(table, &filename, &self.entries, "os", self.kernel()));
        }
        for part in &table.partitions {
            if let Some(imgplan_defs::Payload::Lvm(vg)) = &part.payload {
                p.extend(stages::lvm2_metadata(&vg.name, table, &filename));
            }
        }
        Ok(p)
    }

    fn qemu(&mut self, name: &str, prev: &str) -> Result<Pipeline, ImageError> {
        let (default, format) = match name {
            "qcow2" => (
                "disk.qcow2",
                json!({"type": "qcow2", "compat": self.it().platform().qcow2_compat.as_deref().unwrap_or("1.1")}),
            ),
            "vpc" => ("disk.vhd", json!({"type": "vpc", "force_size": true})),
            _ => ("disk.vmdk", json!({"type": "vmdk", "subformat": "streamOptimized"})),
        };
        let source_file = self.file_of(prev)?;
        let filename = self.output(name, default);
        let mut p = Pipeline::new(name, Some("build"));
        p.add(stages::qemu(&filename, format, prev, &source_file));
        Ok(p)
    }

    fn ovf(&mut self) -> Result<Pipeline, ImageError> {
        let vmdk = self.file_of("vmdk")?;
        let mut p = Pipeline::new("ovf", Some("build"));
        p.add(stages::copy_file("vmdk", &vmdk, &format!("/{vmdk}")));
        p.add(stages::ovf(&vmdk));
        Ok(p)
    }

    fn archive(&mut self) -> Result<Pipeline, ImageError> {
        let mut p = Pipeline::new("archive", Some("build"));
        if self.kind() == ImageKind::Archive {
            let filename = self.output("archive", "archive.tar");
            p.add(stages::tar(&filename, "os", &[]));
        } else {
            let vmdk = self.file_of("vmdk")?;
            let stem = vmdk.trim_end_matches(".vmdk").to_owned();
            let filename = self.output("archive", "image.ova");
            let (ovf, mf) = (format!("{stem}.ovf"), format!("{stem}.mf"));
            p.add(stages::tar(&filename, "ovf", &[ovf.as_str(), mf.as_str(), vmdk.as_str()]));
        }
        Ok(p)
    }

    fn compress(&mut self, method: &str, prev: &str) -> Result<Pipeline, ImageError> {
        let source_file = self.file_of(prev)?;
        let filename = self.output(method, &format!("{source_file}.{}", extension(method)));
        let mut p = Pipeline::new(method, Some("build"));
        p.add(stages::compress(method, &filename, prev, &source_file));
        Ok(p)
    }

    fn container(&mut self) -> Pipeline {
        let arch = goarch(self.it().arch());
        let filename = self.output("container", "container.tar");
        let mut p = Pipeline::new("container", Some("build"));
        if self.kind() == ImageKind::OstreeContainer {
            let config = json!({
                "Cmd": ["nginx", "-c", "/etc/nginx.conf"],
                "ExposedPorts": ["8080"],
            });
            p.add(stages::oci_archive(&filename, arch, "container-tree", Some(config)));
        } else {
            p.add(stages::oci_archive(&filename, arch, "os", None));
        }
        p
    }

    fn ostree_commit(&mut self) -> Pipeline {
        let has_parent = self.req.ostree_sources.contains_key("ostree-commit");
        let reference = self.commit_ref().to_owned();
        let os_version = self.it().distro().os_version.clone();
        let mut p = Pipeline::new("ostree-commit", Some("build"));
        p.add(stages::ostree_init(COMMIT_REPO));
        if has_parent {
            p.add(stages::ostree_pull(COMMIT_REPO, None, "ostree-commit"));
        }
        p.add(stages::ostree_commit(
            &reference,
            &os_version,
            "os",
            has_parent.then_some("ostree-commit"),
        ));
        p
    }

    fn commit_archive(&mut self) -> Pipeline {
        let filename = self.output("commit-archive", "commit.tar");
        let mut p = Pipeline::new("commit-archive", Some("build"));
        p.add(stages::tar(&filename, "ostree-commit", &[]));
        p
    }

    fn container_tree(&mut self) -> Pipeline {
        let reference = self.commit_ref().to_owned();
        let mut p = Pipeline::new("container-tree", Some("build"));
        p.extend(self.rpm("container-tree"));
        self.add_files(&mut p, &[("/etc/nginx.conf".to_owned(), NGINX_CONF.to_owned())]);
        p.add(stages::ostree_init(NGINX_REPO));
        p.add(stages::ostree_pull_local(NGINX_REPO, "ostree-commit", &reference));
        p
    }

    fn anaconda_modules(&self) -> Vec<String> {
        let mut modules = strings(&ANACONDA_MODULES);
        let os = self.req.os;
        let ks_accounts = !self.req.customizations.user.is_empty()
            || !self.req.customizations.group.is_empty()
            || !self.req.customizations.sshkey.is_empty();
        if ks_accounts {
            modules.push("org.fedoraproject.Anaconda.Modules.Users".to_owned());
        }
        for m in &self.it().installer_config().additional_anaconda_modules {
            if !modules.contains(m) {
                modules.push(m.clone());
            }
        }
        if let Some(custom) = os.installer.as_ref().and_then(|i| i.modules.as_ref()) {
            for m in &custom.enable {
                if !modules.contains(m) {
                    modules.push(m.clone());
                }
            }
            modules.retain(|m| !custom.disable.contains(m));
        }
        modules
    }

    fn dracut_modules(&self, defaults: &[&str]) -> Vec<String> {
        let mut modules = strings(defaults);
        modules.extend(
            self.it()
                .installer_config()
                .additional_dracut_modules
                .iter()
                .cloned(),
        );
        modules
    }

    fn anaconda_tree(&mut self) -> Pipeline {
        let it = self.it();
        let distro = it.distro();
        let arch = it.arch().as_str();
        let live = self.kind() == ImageKind::LiveInstaller;
        let mut p = Pipeline::new("anaconda-tree", Some("build"));
        p.extend(self.rpm("anaconda-tree"));
        let variant = it.definition().iso_label.clone().unwrap_or_default();
        p.add(stages::buildstamp(arch, &distro.product, &distro.os_version, &variant));
        p.add(stages::locale(
            self.req.os.language.as_deref().unwrap_or("en_US.UTF-8"),
        ));
        let modules = if live {
            self.dracut_modules(&LIVE_DRACUT_MODULES)
        } else {
            p.add(stages::installer_users());
            p.add(stages::anaconda(&self.anaconda_modules()));
            p.add(stages::lorax_script(arch));
            self.dracut_modules(&ANACONDA_DRACUT_MODULES)
        };
        p.add(stages::dracut(
            "anaconda-tree",
            self.kernel(),
            &modules,
            &it.installer_config().additional_drivers,
        ));
        if let Some(ks) = self.kickstart.clone().filter(|k| k.path != ISO_ROOT_PATH) {
            self.add_files(&mut p, &[(ks.path, ks.contents)]);
        }
        if live {
            if let Some(policy) = &self.req.os.selinux {
                p.add(stages::selinux(policy, false));
            }
        }
        p
    }

    fn coi_tree(&mut self) -> Pipeline {
        let mut p = Pipeline::new("coi-tree", Some("build"));
        p.extend(self.rpm("coi-tree"));
        let certs = self
            .req
            .os
            .fdo
            .as_ref()
            .map(|f| f.diun_pub_key_root_certs.clone())
            .filter(|c| !c.is_empty());
        if let Some(certs) = certs {
            self.add_files(&mut p, &[(FDO_ROOT_CERTS.to_owned(), certs)]);
        }
        let modules = self.dracut_modules(&COI_DRACUT_MODULES);
        p.add(stages::dracut(
            "coi-tree",
            self.kernel(),
            &modules,
            &self.it().installer_config().additional_drivers,
        ));
        p
    }

    fn rootfs_image(&mut self) -> Pipeline {
        let uuid = self.random_uuid();
        let mut p = Pipeline::new("rootfs-image", Some("build"));
        p.add(stages::mkdir(&[DirectoryCustomization {
            path: "/LiveOS".to_owned(),
            ..Default::default()
        }]));
        p.extend(stages::filesystem_image(
            "ext4",
            "LiveOS/rootfs.img",
            ROOTFS_SIZE,
            &uuid,
            "Anaconda",
            "anaconda-tree",
        ));
        p
    }

    /// `squashfs-ext4` (an ext4 image inside squashfs), `squashfs` or `erofs`.
    fn rootfs_type(&self) -> &str {
        let it = self.it();
        match it.image_config().iso_rootfs_type.as_deref() {
            Some(t) => t,
            None if it.installer_config().squashfs_rootfs.unwrap_or(false) => "squashfs",
            None => "squashfs-ext4",
        }
    }

    fn boot_kernel_options(&self) -> Vec<String> {
        let label = &self.iso_label;
        let installer = self.it().installer_config();
        let mut opts = match self.kind() {
            ImageKind::LiveInstaller => vec![
                format!("root=live:CDLABEL={label}"),
                "rd.live.image".to_owned(),
                "quiet".to_owned(),
                "rhgb".to_owned(),
            ],
            ImageKind::OstreeSimplifiedInstaller => self.coreos_installer_options(),
            _ => vec![format!("inst.stage2=hd:LABEL={}", label.replace(' ', "\\x20"))],
        };
        if self.kickstart.as_ref().is_some_and(|k| k.path == ISO_ROOT_PATH) {
            opts.push(kickstart::kernel_option(label, ISO_ROOT_PATH));
        }
        opts.extend(installer.kickstart_kernel_options.iter().cloned());
        opts
    }

    fn coreos_installer_options(&self) -> Vec<String> {
        let os = self.req.os;
        let mut opts = vec![
            "rd.neednet=1".to_owned(),
            "coreos.inst.crypt_root=1".to_owned(),
            format!("coreos.inst.isoroot={}", self.iso_label),
        ];
        if let Some(device) = &os.installation_device {
            opts.push(format!("coreos.inst.install_dev={device}"));
        }
        if let Some(file) = self.files.get("xz") {
            opts.push(format!("coreos.inst.image_file=/run/media/iso/{file}"));
        }
        opts.push("coreos.inst.insecure".to_owned());
        if let Some(fdo) = &os.fdo {
            opts.push(format!("fdo.manufacturing_server_url={}", fdo.manufacturing_server_url));
            if fdo.diun_pub_key_insecure == "true" {
                opts.push("fdo.diun_pub_key_insecure=true".to_owned());
            }
            if !fdo.diun_pub_key_hash.is_empty() {
                opts.push(format!("fdo.diun_pub_key_hash={}", fdo.diun_pub_key_hash));
            }
            if !fdo.diun_pub_key_root_certs.is_empty() {
                opts.push(format!("fdo.diun_pub_key_root_certs={FDO_ROOT_CERTS}"));
            }
            if !fdo.di_mfg_string_type_mac_iface.is_empty() {
                opts.push(format!("fdo.di_mfg_string_type_mac_iface={}", fdo.di_mfg_string_type_mac_iface));
            }
        }
        opts
    }

    fn efiboot_tree(&mut self) -> Pipeline {
        let it = self.it();
        let distro = it.distro();
        let mut p = Pipeline::new("efiboot-tree", Some("build"));
        p.add(stages::grub2_iso(
            &distro.product,
            &distro.os_version,
            &self.iso_label,
            it.arch().as_str(),
            &distro.vendor,
            &self.boot_kernel_options(),
            it.installer_config().default_menu,
        ));
        p
    }

    fn bootiso_tree(&mut self) -> Result<Pipeline, ImageError> {
        let it = self.it();
        let distro = it.distro();
        let tree = self.installer_tree();
        let kind = self.kind();
        let mut p = Pipeline::new("bootiso-tree", Some("build"));
        match kind {
            ImageKind::OstreeInstaller => {
                let osname = self.osname().to_owned();
                p.add(stages::ostree_init(OSTREE_REPO));
                p.add(stages::ostree_pull(OSTREE_REPO, Some(&osname), "bootiso-tree"));
            }
            ImageKind::TarInstaller => {
                p.add(stages::tar("liveimg.tar.gz", "os", &[]));
            }
            ImageKind::OstreeSimplifiedInstaller => {
                let file = self.file_of("xz")?;
                p.add(stages::copy_file("xz", &file, &format!("/{file}")));
            }
            _ => {}
        }
        p.add(stages::copy_boot_files(tree, "/images/pxeboot", tree, self.kernel()));

        match kind {
            ImageKind::OstreeInstaller => p.add(stages::squashfs("images/install.img", tree)),
            ImageKind::TarInstaller | ImageKind::LiveInstaller => {
                let path = if kind == ImageKind::LiveInstaller {
                    "LiveOS/squashfs.img"
                } else {
                    "images/install.img"
                };
                match self.rootfs_type() {
                    "erofs" => p.add(stages::erofs(path, tree)),
                    "squashfs" => p.add(stages::squashfs(path, tree)),
                    _ => p.add(stages::squashfs(path, "rootfs-image")),
                }
            }
            _ => {}
        }

        if let Some(ks) = self.kickstart.clone().filter(|k| k.path == ISO_ROOT_PATH) {
            self.add_files(&mut p, &[(ks.path, ks.contents)]);
        }

        let volid = format!("{}-EFI", distro.product.split_whitespace().next().unwrap_or("EFI"))
            .to_uppercase();
        p.add(stages::copy_tree("efiboot-tree", "/"));
        p.extend(stages::filesystem_image(
            "vfat",
            "images/efiboot.img",
            EFIBOOT_SIZE,
            "7B7795E7",
            &volid,
            "efiboot-tree",
        ));
        if it.arch() == Arch::X86_64 {
            p.add(stages::isolinux(
                &distro.product,
                &distro.os_version,
                &self.boot_kernel_options(),
                tree,
            ));
        }
        p.add(stages::discinfo(it.arch().as_str(), &distro.release_version));
        Ok(p)
    }

    fn bootiso(&mut self) -> Pipeline {
        let filename = self.output("bootiso", "installer.iso");
        let mut p = Pipeline::new("bootiso", Some("build"));
        p.add(stages::xorrisofs(
            &filename,
            &self.iso_label,
            "bootiso-tree",
            self.it().arch() == Arch::X86_64,
        ));
        p.add(stages::implantisomd5(&filename));
        p
    }

    fn prepare_kickstart(&mut self) {
        let kind = self.kind();
        if !matches!(kind, ImageKind::OstreeInstaller | ImageKind::TarInstaller) {
            return;
        }
        let it = self.it();
        let os = self.req.os;
        let users = users_with_keys(self.req.customizations);
        let ostree = (kind == ImageKind::OstreeInstaller).then(|| OstreePayload {
            osname: self.osname().to_owned(),
            remote: self.osname().to_owned(),
            reference: self.commit_ref().to_owned(),
        });
        self.kickstart = kickstart::render(&KickstartRequest {
            kind: Some(kind),
            users: &users,
            groups: &self.req.customizations.group,
            installer: os.installer.as_ref(),
            ostree,
            iso_root: it.installer_config().iso_root_kickstart.unwrap_or(false),
            language: os.language.as_deref(),
            keyboard: os.keyboard.as_deref(),
            timezone: os.timezone.as_deref(),
            fs_type: &it.distro().default_fs_type,
        });
    }

    fn payload(&mut self, name: &str, prev: Option<&str>) -> Result<Pipeline, ImageError> {
        let prev = prev.unwrap_or_default();
        match name {
            "os" => self.os_tree(),
            "image" => self.disk_image(),
            "qcow2" | "vpc" | "vmdk" => self.qemu(name, prev),
            "ovf" => self.ovf(),
            "archive" => self.archive(),
            "xz" | "gzip" | "zstd" => self.compress(name, prev),
            "container" => Ok(self.container()),
            "ostree-commit" => Ok(self.ostree_commit()),
            "commit-archive" => Ok(self.commit_archive()),
            "container-tree" => Ok(self.container_tree()),
            "ostree-deployment" => self.ostree_deployment(),
            "anaconda-tree" => Ok(self.anaconda_tree()),
            "coi-tree" => Ok(self.coi_tree()),
            "rootfs-image" => Ok(self.rootfs_image()),
            "efiboot-tree" => Ok(self.efiboot_tree()),
            "bootiso-tree" => self.bootiso_tree(),
            "bootiso" => Ok(self.bootiso()),
            other => Err(self.err(format!("no assembler for pipeline {other}"))),
        }
    }
}

fn extension(method: &str) -> &str {
    match method {
        "gzip" => "gz",
        "zstd" => "zst",
        other => other,
    }
}

/// Assemble the manifest for a validated request.
pub fn assemble(req: &Request<'_>) -> Result<Manifest, ImageError> {
    let mut asm = Assembler::new(req);
    asm.prepare_kickstart();
    let mut pipelines = Vec::new();
    for name in req.image_type.build_pipelines() {
        if name != "build" {
            return Err(asm.err(format!("unknown build pipeline {name}")));
        }
        pipelines.push(asm.build());
    }
    let mut prev: Option<&str> = None;
    for name in req.image_type.payload_pipelines() {
        pipelines.push(asm.payload(name, prev)?);
        prev = Some(name);
    }
    debug!(
        "{} ({}): {} pipelines, partitioning {}, blueprint '{}'",
        req.image_type.name(),
        req.image_type.kind(),
        pipelines.len(),
        req.partitioning_mode,
        req.blueprint.name
    );
    let mut manifest = asm.manifest;
    manifest.pipelines = pipelines;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_names() {
        assert_eq!(extension("xz"), "xz");
        assert_eq!(extension("gzip"), "gz");
        assert_eq!(extension("zstd"), "zst");
        assert_eq!(goarch(Arch::Aarch64), "arm64");
    }

    #[test]
    fn bootc_config_is_toml() {
        let config = BootcConfig {
            install: BootcInstall {
                root_fs_type: Some("xfs".to_owned()),
                kargs: vec!["rw".to_owned(), "console=ttyS0".to_owned()],
            },
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(text, "[install]\nroot-fs-type = \"xfs\"\nkargs = [\"rw\", \"console=ttyS0\"]\n");
    }
}
