//! OS customizations: the image type's default image config with the
//! blueprint and image options projected on top.
//!
//! The result is flat and owned; the assembler turns each field into stages
//! without looking at the blueprint again.

use crate::image_type::ImageType;
use crate::ImageError;
use imgplan_defs::ImageConfig;
use imgplan_schema::customizations::{
    DnfPluginsCustomization, RhsmConfigCustomization, SubManCustomization,
};
use imgplan_schema::{
    Blueprint, Container, Customizations, DirectoryCustomization, FdoCustomization,
    FileCustomization, FirewallCustomization, GroupCustomization, ImageOptions,
    InstallerCustomization, RepositoryCustomization, SubscriptionOptions, UserCustomization,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

pub const CONTAINER_STORAGE: &str = "/usr/share/containers/storage";
pub const OSCAP_DATA_DIR: &str = "/oscap_data";
const REPOS_DIR: &str = "/etc/yum.repos.d";
const GPG_KEY_DIR: &str = "/etc/pki/rpm-gpg";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OscapConfig {
    pub datastream: String,
    pub profile_id: String,
    /// Tailoring file and the profile id it defines, when rules are tailored.
    pub tailoring: Option<OscapTailoring>,
    pub data_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OscapTailoring {
    pub path: String,
    pub new_profile: String,
    pub selected: Vec<String>,
    pub unselected: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OsCustomizations {
    pub kernel_name: String,
    pub kernel_options: Vec<String>,
    /// Packages the customizations themselves need installed.
    pub extra_packages: Vec<String>,
    pub hostname: Option<String>,
    pub timezone: Option<String>,
    pub ntp_servers: Vec<String>,
    pub language: Option<String>,
    pub keyboard: Option<String>,
    pub users: Vec<UserCustomization>,
    pub groups: Vec<GroupCustomization>,
    pub enabled_services: Vec<String>,
    pub disabled_services: Vec<String>,
    pub masked_services: Vec<String>,
    pub default_target: Option<String>,
    pub firewall: Option<FirewallCustomization>,
    pub selinux: Option<String>,
    pub selinux_force_relabel: bool,
    pub gpg_key_files: Vec<String>,
    pub exclude_docs: bool,
    pub install_weak_deps: bool,
    pub sysconfig: BTreeMap<String, String>,
    pub rhsm: Option<RhsmConfigCustomization>,
    pub subscription: Option<SubscriptionOptions>,
    pub facts: BTreeMap<String, String>,
    pub containers: Vec<Container>,
    pub container_storage: Option<String>,
    pub oscap: Option<OscapConfig>,
    pub directories: Vec<DirectoryCustomization>,
    pub files: Vec<FileCustomization>,
    pub ignition_platform: Option<String>,
    pub ignition_embedded: Option<String>,
    pub fips: bool,
    pub fdo: Option<FdoCustomization>,
    pub installation_device: Option<String>,
    pub installer: Option<InstallerCustomization>,
    pub default_kernel: Option<String>,
    pub update_default_kernel: bool,
    pub grub_timeout: Option<u32>,
    pub machine_id_uninitialized: bool,
    pub lock_root_user: bool,
    pub bootupd: bool,
    pub mount_units: bool,
}

fn merge_option<T: Clone>(base: &mut Option<T>, over: &Option<T>, merge: impl FnOnce(&mut T, &T)) {
    match (base.as_mut(), over) {
        (_, None) => {}
        (None, Some(value)) => *base = Some(value.clone()),
        (Some(current), Some(value)) => merge(current, value),
    }
}

fn set_if_some<T: Clone>(base: &mut Option<T>, over: &Option<T>) {
    if over.is_some() {
        base.clone_from(over);
    }
}

/// Layer the blueprint's RHSM settings over a template, leaf by leaf.
pub fn merge_rhsm(
    template: Option<&RhsmConfigCustomization>,
    over: Option<&RhsmConfigCustomization>,
) -> Option<RhsmConfigCustomization> {
    let Some(over) = over else {
        return template.cloned();
    };
    let mut out = template.cloned().unwrap_or_default();
    merge_option(&mut out.dnf_plugins, &over.dnf_plugins, |base: &mut DnfPluginsCustomization, over| {
        merge_option(&mut base.product_id, &over.product_id, |b, o| {
            set_if_some(&mut b.enabled, &o.enabled);
        });
        merge_option(&mut base.subscription_manager, &over.subscription_manager, |b, o| {
            set_if_some(&mut b.enabled, &o.enabled);
        });
    });
    merge_option(
        &mut out.subscription_manager,
        &over.subscription_manager,
        |base: &mut SubManCustomization, over| {
            merge_option(&mut base.rhsm, &over.rhsm, |b, o| {
                set_if_some(&mut b.manage_repos, &o.manage_repos);
                set_if_some(&mut b.auto_enable_yum_plugins, &o.auto_enable_yum_plugins);
            });
            merge_option(&mut base.rhsmcertd, &over.rhsmcertd, |b, o| {
                set_if_some(&mut b.auto_registration, &o.auto_registration);
            });
        },
    );
    Some(out)
}

fn bool_flag(value: Option<bool>) -> u8 {
    u8::from(value.unwrap_or(false))
}

fn is_inline_key(key: &str) -> bool {
    key.trim_start().starts_with("-----BEGIN PGP PUBLIC KEY BLOCK-----")
}

/// The `.repo` file for a blueprint repository plus any inline GPG keys it
/// carries, which are written next to it and referenced by path.
pub fn repository_files(repo: &RepositoryCustomization) -> Vec<FileCustomization> {
    let mut files = Vec::new();
    let mut key_refs = Vec::new();
    for (i, key) in repo.gpgkeys.iter().enumerate() {
        if is_inline_key(key) {
            let path = format!("{GPG_KEY_DIR}/RPM-GPG-KEY-{}-{i}", repo.id);
            key_refs.push(format!("file://{path}"));
            files.push(FileCustomization {
                path,
                mode: Some("0644".to_owned()),
                data: Some(key.clone()),
                ..Default::default()
            });
        } else {
            key_refs.push(key.clone());
        }
    }

    let mut lines = vec![format!("[{}]", repo.id)];
    lines.push(format!("name={}", repo.name.as_deref().unwrap_or(&repo.id)));
    if !repo.baseurls.is_empty() {
        lines.push(format!("baseurl={}", repo.baseurls.join(",")));
    }
    if let Some(metalink) = &repo.metalink {
        lines.push(format!("metalink={metalink}"));
    }
    if let Some(mirrorlist) = &repo.mirrorlist {
        lines.push(format!("mirrorlist={mirrorlist}"));
    }
    lines.push(format!("enabled={}", u8::from(repo.enabled.unwrap_or(true))));
    lines.push(format!("gpgcheck={}", bool_flag(repo.gpgcheck)));
    if let Some(check) = repo.repo_gpgcheck {
        lines.push(format!("repo_gpgcheck={}", u8::from(check)));
    }
    if let Some(verify) = repo.sslverify {
        lines.push(format!("sslverify={}", u8::from(verify)));
    }
    if let Some(priority) = repo.priority {
        lines.push(format!("priority={priority}"));
    }
    if let Some(hotfixes) = repo.module_hotfixes {
        lines.push(format!("module_hotfixes={}", u8::from(hotfixes)));
    }
    if !key_refs.is_empty() {
        lines.push(format!("gpgkey={}", key_refs.join("\n\t")));
    }
    let mut data = lines.join("\n");
    data.push('\n');
    files.push(FileCustomization {
        path: format!("{REPOS_DIR}/{}", repo.repo_filename()),
        mode: Some("0644".to_owned()),
        data: Some(data),
        ..Default::default()
    });
    files
}

/// Blueprint users with `sshkey` entries folded in.
pub fn users_with_keys(c: &Customizations) -> Vec<UserCustomization> {
    let mut users = c.user.clone();
    for sshkey in &c.sshkey {
        match users.iter_mut().find(|u| u.name == sshkey.user) {
            Some(user) if user.key.is_none() => user.key = Some(sshkey.key.clone()),
            Some(_) => {}
            None => users.push(UserCustomization {
                name: sshkey.user.clone(),
                key: Some(sshkey.key.clone()),
                ..Default::default()
            }),
        }
    }
    users
}

fn oscap_config(
    config: &ImageConfig,
    c: &Customizations,
    image_type: &ImageType,
) -> Result<Option<OscapConfig>, ImageError> {
    let Some(oscap) = &c.openscap else {
        return Ok(None);
    };
    let datastream = if oscap.datastream.is_empty() {
        config
            .default_oscap_datastream
            .clone()
            .ok_or_else(|| ImageError::Manifest {
                image_type: image_type.name().to_owned(),
                message: format!("no default OpenSCAP datastream for {}", image_type.distro().name),
            })?
    } else {
        oscap.datastream.clone()
    };
    let tailoring = oscap
        .tailoring
        .as_ref()
        .filter(|t| !t.selected.is_empty() || !t.unselected.is_empty())
        .map(|t| OscapTailoring {
            path: format!("{OSCAP_DATA_DIR}/tailoring.xml"),
            new_profile: format!("{}_imgplan_tailoring", oscap.profile_id),
            selected: t.selected.clone(),
            unselected: t.unselected.clone(),
        });
    Ok(Some(OscapConfig {
        datastream,
        profile_id: oscap.profile_id.clone(),
        tailoring,
        data_dir: OSCAP_DATA_DIR.to_owned(),
    }))
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_owned());
    }
}

/// Project the image config, blueprint and options into OS customizations.
pub fn project(
    image_type: &ImageType,
    bp: &Blueprint,
    options: &ImageOptions,
) -> Result<OsCustomizations, ImageError> {
    let config = image_type.image_config();
    let default_custom = Customizations::default();
    let c = bp.customizations().unwrap_or(&default_custom);
    let kind = image_type.kind();
    let mut os = OsCustomizations::default();

    os.kernel_name = c
        .kernel_name()
        .map(str::to_owned)
        .or_else(|| config.default_kernel.clone())
        .unwrap_or_else(|| "kernel".to_owned());
    if c.kernel_name().is_some() {
        os.extra_packages.push(os.kernel_name.clone());
    }
    os.kernel_options = config.kernel_options.clone();
    if let Some(append) = c.kernel_append() {
        os.kernel_options
            .extend(append.split_whitespace().map(str::to_owned));
    }
    os.ignition_platform = config.ignition_platform.clone();
    if kind.is_ostree() && config.ignition_platform.as_deref() == Some("metal") {
        if let Some(url) = c.firstboot_ignition_url() {
            os.kernel_options.push(format!("ignition.config.url={url}"));
        }
    }
    os.ignition_embedded = c
        .ignition
        .as_ref()
        .and_then(|i| i.embedded.as_ref())
        .map(|e| e.config.clone());

    os.fips = c.fips_enabled();
    if os.fips {
        push_unique(&mut os.kernel_options, "fips=1");
    }

    os.hostname = c.hostname.clone().or_else(|| config.hostname.clone());
    let timezone = c.timezone.as_ref();
    os.timezone = timezone
        .and_then(|t| t.timezone.clone())
        .or_else(|| config.timezone.clone());
    os.ntp_servers = match timezone.filter(|t| !t.ntpservers.is_empty()) {
        Some(t) => t.ntpservers.clone(),
        None => config.ntp_servers.clone(),
    };
    if !os.ntp_servers.is_empty() {
        os.extra_packages.push("chrony".to_owned());
    }
    let locale = c.locale.as_ref();
    os.language = locale
        .and_then(|l| l.languages.first().cloned())
        .or_else(|| config.locale.clone());
    os.keyboard = locale
        .and_then(|l| l.keyboard.clone())
        .or_else(|| config.keyboard.clone());

    // Boot ISOs create accounts through kickstart instead.
    if !image_type.boot_iso() {
        os.users = users_with_keys(c);
        os.groups = c.group.clone();
    }

    os.enabled_services = config.enabled_services.clone();
    os.disabled_services = config.disabled_services.clone();
    os.masked_services = config.masked_services.clone();
    if let Some(services) = &c.services {
        os.enabled_services.extend(services.enabled.iter().cloned());
        os.disabled_services.extend(services.disabled.iter().cloned());
        os.masked_services.extend(services.masked.iter().cloned());
    }
    os.default_target = config.default_target.clone();

    os.firewall = c.firewall.clone();
    if os.firewall.is_some() && kind.has_disk_pipeline() {
        os.extra_packages.push("firewalld".to_owned());
    }

    if !config.no_selinux.unwrap_or(false) {
        os.selinux = Some(
            config
                .selinux_policy
                .clone()
                .unwrap_or_else(|| "targeted".to_owned()),
        );
        os.selinux_force_relabel = config.selinux_force_relabel.unwrap_or(false);
    }

    os.gpg_key_files = config.gpgkey_files.clone();
    for key in c.rpm_import_keys() {
        push_unique(&mut os.gpg_key_files, key);
    }
    os.exclude_docs = config.exclude_docs.unwrap_or(false);
    os.install_weak_deps = config.install_weak_deps.unwrap_or(true);
    os.sysconfig = config
        .sysconfig
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let template_key = if options.subscription.is_some() {
        "with-subscription"
    } else {
        "no-subscription"
    };
    os.rhsm = merge_rhsm(
        config.rhsm_config.get(template_key),
        c.rhsm.as_ref().and_then(|r| r.config.as_ref()),
    );
    os.subscription = options.subscription.clone();
    os.facts = options.facts.clone();

    os.containers = bp.containers.clone();
    if kind.is_ostree() && !bp.containers.is_empty() {
        os.container_storage = Some(CONTAINER_STORAGE.to_owned());
    }

    os.oscap = oscap_config(config, c, image_type)?;
    os.directories = c.directories.clone();
    if let Some(oscap) = &os.oscap {
        os.extra_packages
            .extend(["openscap-scanner", "scap-security-guide"].map(str::to_owned));
        os.directories.push(DirectoryCustomization {
            path: oscap.data_dir.clone(),
            ensure_parents: true,
            ..Default::default()
        });
    }

    os.files = c.files.clone();
    for repo in &c.repositories {
        os.files.extend(repository_files(repo));
    }

    os.fdo = c.fdo.clone();
    os.installation_device = c.installation_device.clone();
    os.installer = c.installer.clone();
    os.default_kernel = config.default_kernel.clone();
    os.update_default_kernel = config.update_default_kernel.unwrap_or(false);
    os.grub_timeout = config.grub_timeout;
    os.machine_id_uninitialized = config.machine_id_uninitialized.unwrap_or(false);
    os.lock_root_user = config.lock_root_user.unwrap_or(false);
    os.bootupd = config.bootupd.unwrap_or(false);
    os.mount_units = config.mount_units.unwrap_or(false);

    debug!(
        "{}: {} kernel options, {} users, {} extra packages",
        image_type.name(),
        os.kernel_options.len(),
        os.users.len(),
        os.extra_packages.len()
    );
    Ok(os)
}
