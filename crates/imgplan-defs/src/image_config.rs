//! Default OS and installer configuration carried by distros and image types.
//!
//! Configs inherit parent to child: an unset child option falls back to the
//! parent, list fields concatenate parent then child, map fields merge with
//! the child winning on key conflicts.

use crate::conditions::{ConditionContext, Conditions};
use crate::DefinitionError;
use imgplan_schema::customizations::RhsmConfigCustomization;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

macro_rules! inherit {
    ($child:ident, $parent:ident; options: $($opt:ident),*; lists: $($list:ident),*; maps: $($map:ident),*) => {{
        $(
            if $child.$opt.is_none() {
                $child.$opt = $parent.$opt.clone();
            }
        )*
        $(
            let mut merged = $parent.$list.clone();
            merged.append(&mut $child.$list);
            $child.$list = merged;
        )*
        $(
            let mut merged = $parent.$map.clone();
            merged.extend(std::mem::take(&mut $child.$map));
            $child.$map = merged;
        )*
    }};
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ntp_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_services: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_services: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masked_services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_kernel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_default_kernel: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpgkey_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_docs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_weak_deps: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_selinux: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selinux_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selinux_force_relabel: Option<bool>,
    /// RHSM templates keyed by `with-subscription` / `no-subscription`.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub rhsm_config: IndexMap<String, RhsmConfigCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignition_platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_oscap_datastream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id_uninitialized: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_root_user: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grub_timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_rootfs_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootupd: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_units: Option<bool>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub sysconfig: IndexMap<String, String>,
}

impl ImageConfig {
    /// Fill unset fields from `parent`.
    #[must_use]
    pub fn inherit_from(mut self, parent: &ImageConfig) -> ImageConfig {
        let child = &mut self;
        inherit!(child, parent;
            options: timezone, locale, keyboard, hostname, default_target, default_kernel,
                update_default_kernel, exclude_docs, install_weak_deps, no_selinux,
                selinux_policy, selinux_force_relabel, ignition_platform,
                default_oscap_datastream, machine_id_uninitialized, lock_root_user,
                grub_timeout, iso_rootfs_type, bootupd, mount_units;
            lists: ntp_servers, enabled_services, disabled_services, masked_services,
                kernel_options, gpgkey_files;
            maps: rhsm_config, sysconfig);
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstallerConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_dracut_modules: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_drivers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_anaconda_modules: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kickstart_kernel_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_root_kickstart: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub squashfs_rootfs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_menu: Option<u32>,
}

impl InstallerConfig {
    #[must_use]
    pub fn inherit_from(mut self, parent: &InstallerConfig) -> InstallerConfig {
        let child = &mut self;
        inherit!(child, parent;
            options: iso_root_kickstart, squashfs_rootfs, default_menu;
            lists: additional_dracut_modules, additional_drivers,
                additional_anaconda_modules, kickstart_kernel_options;
            maps: );
        self
    }
}

/// `image_config:` block: a default plus conditional overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConditionalImageConfig {
    #[serde(default)]
    pub default: ImageConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions<ImageConfig>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConditionalInstallerConfig {
    #[serde(default)]
    pub default: InstallerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions<InstallerConfig>>,
}

impl ConditionalImageConfig {
    /// The default with every matching condition layered on top in scan order.
    pub fn resolve(&self, ctx: &ConditionContext) -> Result<ImageConfig, DefinitionError> {
        let mut config = self.default.clone();
        if let Some(conditions) = &self.conditions {
            for matched in conditions.all_matches(ctx)? {
                config = matched.clone().inherit_from(&config);
            }
        }
        Ok(config)
    }
}

impl ConditionalInstallerConfig {
    pub fn resolve(&self, ctx: &ConditionContext) -> Result<InstallerConfig, DefinitionError> {
        let mut config = self.default.clone();
        if let Some(conditions) = &self.conditions {
            for matched in conditions.all_matches(ctx)? {
                config = matched.clone().inherit_from(&config);
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgplan_schema::Arch;

    #[test]
    fn child_options_win_and_lists_concatenate() {
        let parent = ImageConfig {
            timezone: Some("UTC".to_owned()),
            locale: Some("C.UTF-8".to_owned()),
            enabled_services: vec!["sshd".to_owned()],
            kernel_options: vec!["console=tty0".to_owned()],
            ..Default::default()
        };
        let child = ImageConfig {
            timezone: Some("Europe/Berlin".to_owned()),
            enabled_services: vec!["cloud-init".to_owned()],
            ..Default::default()
        };
        let merged = child.inherit_from(&parent);
        assert_eq!(merged.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(merged.locale.as_deref(), Some("C.UTF-8"));
        assert_eq!(merged.enabled_services, vec!["sshd", "cloud-init"]);
        assert_eq!(merged.kernel_options, vec!["console=tty0"]);
    }

    #[test]
    fn maps_are_right_biased() {
        let mut parent = ImageConfig::default();
        parent.sysconfig.insert("a".to_owned(), "1".to_owned());
        parent.sysconfig.insert("b".to_owned(), "1".to_owned());
        let mut child = ImageConfig::default();
        child.sysconfig.insert("b".to_owned(), "2".to_owned());
        let merged = child.inherit_from(&parent);
        assert_eq!(merged.sysconfig["a"], "1");
        assert_eq!(merged.sysconfig["b"], "2");
    }

    #[test]
    fn conditional_config_layers_matches() {
        let config: ConditionalImageConfig = serde_yaml::from_str(
            r"
default:
  locale: C.UTF-8
  kernel_options: [quiet]
conditions:
  architecture:
    aarch64:
      kernel_options: ['console=ttyAMA0']
  version_greater_or_equal:
    '9.6':
      locale: en_US.UTF-8
",
        )
        .unwrap();
        let ctx = ConditionContext::new(&"rhel-9.6".parse().unwrap(), Arch::Aarch64);
        let resolved = config.resolve(&ctx).unwrap();
        assert_eq!(resolved.locale.as_deref(), Some("en_US.UTF-8"));
        assert_eq!(resolved.kernel_options, vec!["quiet", "console=ttyAMA0"]);
    }

    #[test]
    fn installer_config_inherits() {
        let parent = InstallerConfig {
            additional_dracut_modules: vec!["nvdimm".to_owned()],
            squashfs_rootfs: Some(true),
            ..Default::default()
        };
        let child = InstallerConfig {
            additional_dracut_modules: vec!["ifcfg".to_owned()],
            ..Default::default()
        };
        let merged = child.inherit_from(&parent);
        assert_eq!(merged.additional_dracut_modules, vec!["nvdimm", "ifcfg"]);
        assert_eq!(merged.squashfs_rootfs, Some(true));
    }
}
