use crate::disk::{DiskCustomization, FilesystemCustomization};
use serde::{Deserialize, Serialize};

/// The `[customizations]` table of a blueprint.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Customizations {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub kernel: Option<KernelCustomization>,
    #[serde(default)]
    pub sshkey: Vec<SshKeyCustomization>,
    #[serde(default)]
    pub user: Vec<UserCustomization>,
    #[serde(default)]
    pub group: Vec<GroupCustomization>,
    #[serde(default)]
    pub timezone: Option<TimezoneCustomization>,
    #[serde(default)]
    pub locale: Option<LocaleCustomization>,
    #[serde(default)]
    pub firewall: Option<FirewallCustomization>,
    #[serde(default)]
    pub services: Option<ServicesCustomization>,
    #[serde(default)]
    pub filesystem: Vec<FilesystemCustomization>,
    #[serde(default)]
    pub disk: Option<DiskCustomization>,
    #[serde(default)]
    pub installation_device: Option<String>,
    #[serde(default)]
    pub fdo: Option<FdoCustomization>,
    #[serde(default)]
    pub openscap: Option<OpenScapCustomization>,
    #[serde(default)]
    pub ignition: Option<IgnitionCustomization>,
    #[serde(default)]
    pub directories: Vec<DirectoryCustomization>,
    #[serde(default)]
    pub files: Vec<FileCustomization>,
    #[serde(default)]
    pub repositories: Vec<RepositoryCustomization>,
    #[serde(default)]
    pub fips: Option<bool>,
    #[serde(default)]
    pub installer: Option<InstallerCustomization>,
    #[serde(default)]
    pub rpm: Option<RpmCustomization>,
    #[serde(default)]
    pub rhsm: Option<RhsmCustomization>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KernelCustomization {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub append: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SshKeyCustomization {
    pub user: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UserCustomization {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub expiredate: Option<u64>,
    #[serde(default)]
    pub force_password_reset: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GroupCustomization {
    pub name: String,
    #[serde(default)]
    pub gid: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TimezoneCustomization {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub ntpservers: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LocaleCustomization {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub keyboard: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FirewallCustomization {
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub services: Option<FirewallServices>,
    #[serde(default)]
    pub zones: Vec<FirewallZone>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FirewallServices {
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FirewallZone {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServicesCustomization {
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub disabled: Vec<String>,
    #[serde(default)]
    pub masked: Vec<String>,
}

/// FIDO device onboarding for simplified installers.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FdoCustomization {
    #[serde(default)]
    pub manufacturing_server_url: String,
    #[serde(default)]
    pub diun_pub_key_insecure: String,
    #[serde(default)]
    pub diun_pub_key_hash: String,
    #[serde(default)]
    pub diun_pub_key_root_certs: String,
    #[serde(default)]
    pub di_mfg_string_type_mac_iface: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OpenScapCustomization {
    #[serde(default)]
    pub datastream: String,
    #[serde(default)]
    pub profile_id: String,
    #[serde(default)]
    pub tailoring: Option<OpenScapTailoring>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OpenScapTailoring {
    #[serde(default)]
    pub selected: Vec<String>,
    #[serde(default)]
    pub unselected: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IgnitionCustomization {
    #[serde(default)]
    pub embedded: Option<EmbeddedIgnition>,
    #[serde(default)]
    pub firstboot: Option<FirstbootIgnition>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EmbeddedIgnition {
    #[serde(default)]
    pub config: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FirstbootIgnition {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DirectoryCustomization {
    pub path: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub ensure_parents: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileCustomization {
    pub path: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

/// A custom yum repository written to the image, optionally also used to
/// install blueprint packages (`install_from`).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RepositoryCustomization {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub baseurls: Vec<String>,
    #[serde(default)]
    pub metalink: Option<String>,
    #[serde(default)]
    pub mirrorlist: Option<String>,
    #[serde(default)]
    pub gpgkeys: Vec<String>,
    #[serde(default)]
    pub gpgcheck: Option<bool>,
    #[serde(default)]
    pub repo_gpgcheck: Option<bool>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub sslverify: Option<bool>,
    #[serde(default)]
    pub module_hotfixes: Option<bool>,
    #[serde(default)]
    pub install_from: bool,
}

impl RepositoryCustomization {
    /// File name under `/etc/yum.repos.d`, defaulting to `<id>.repo`.
    pub fn repo_filename(&self) -> String {
        match self.filename.as_deref() {
            Some(f) if f.ends_with(".repo") => f.to_owned(),
            Some(f) if !f.is_empty() => format!("{f}.repo"),
            _ => format!("{}.repo", self.id),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstallerCustomization {
    #[serde(default)]
    pub unattended: bool,
    #[serde(default, rename = "sudo-nopasswd")]
    pub sudo_nopasswd: Vec<String>,
    #[serde(default)]
    pub kickstart: Option<KickstartCustomization>,
    #[serde(default)]
    pub modules: Option<AnacondaModules>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KickstartCustomization {
    #[serde(default)]
    pub contents: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AnacondaModules {
    #[serde(default)]
    pub enable: Vec<String>,
    #[serde(default)]
    pub disable: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RpmCustomization {
    #[serde(default)]
    pub import_keys: Option<RpmImportKeys>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RpmImportKeys {
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RhsmCustomization {
    #[serde(default)]
    pub config: Option<RhsmConfigCustomization>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RhsmConfigCustomization {
    #[serde(default)]
    pub dnf_plugins: Option<DnfPluginsCustomization>,
    #[serde(default)]
    pub subscription_manager: Option<SubManCustomization>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DnfPluginsCustomization {
    #[serde(default)]
    pub product_id: Option<DnfPluginToggle>,
    #[serde(default)]
    pub subscription_manager: Option<DnfPluginToggle>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DnfPluginToggle {
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubManCustomization {
    #[serde(default)]
    pub rhsm: Option<SubManRhsm>,
    #[serde(default)]
    pub rhsmcertd: Option<SubManRhsmcertd>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubManRhsm {
    #[serde(default)]
    pub manage_repos: Option<bool>,
    #[serde(default)]
    pub auto_enable_yum_plugins: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubManRhsmcertd {
    #[serde(default)]
    pub auto_registration: Option<bool>,
}

impl Customizations {
    pub fn kernel_append(&self) -> Option<&str> {
        self.kernel
            .as_ref()
            .map(|k| k.append.trim())
            .filter(|a| !a.is_empty())
    }

    pub fn kernel_name(&self) -> Option<&str> {
        self.kernel
            .as_ref()
            .map(|k| k.name.trim())
            .filter(|n| !n.is_empty())
    }

    pub fn fips_enabled(&self) -> bool {
        self.fips.unwrap_or(false)
    }

    /// Blueprint `rpm.import_keys.files`.
    pub fn rpm_import_keys(&self) -> &[String] {
        self.rpm
            .as_ref()
            .and_then(|r| r.import_keys.as_ref())
            .map_or(&[], |k| k.files.as_slice())
    }

    pub fn firstboot_ignition_url(&self) -> Option<&str> {
        self.ignition
            .as_ref()
            .and_then(|i| i.firstboot.as_ref())
            .map(|f| f.url.as_str())
            .filter(|u| !u.is_empty())
    }

    pub fn has_filesystem_or_disk(&self) -> bool {
        !self.filesystem.is_empty() || self.disk.is_some()
    }
}
