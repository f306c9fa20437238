use crate::customizations::RepositoryCustomization;
use serde::{Deserialize, Serialize};

/// Package set tag that scopes a repository to blueprint package installs.
pub const BLUEPRINT_PACKAGE_SET: &str = "blueprint";

/// A package repository handed to the depsolver alongside a package set.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(deny_unknown_fields)]
pub struct Repository {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub baseurls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(default)]
    pub gpgkeys: Vec<String>,
    #[serde(default)]
    pub check_gpg: bool,
    #[serde(default)]
    pub check_repo_gpg: bool,
    #[serde(default)]
    pub ignore_ssl: bool,
    #[serde(default)]
    pub rhsm: bool,
    #[serde(default)]
    pub module_hotfixes: bool,
    /// Stages this repository is attached to; empty means every stage.
    #[serde(default)]
    pub package_sets: Vec<String>,
}

impl Repository {
    pub fn is_global(&self) -> bool {
        self.package_sets.is_empty()
    }

    pub fn is_blueprint_only(&self) -> bool {
        self.package_sets.iter().any(|s| s == BLUEPRINT_PACKAGE_SET)
    }

    pub fn applies_to(&self, stage: &str) -> bool {
        self.is_global() || self.package_sets.iter().any(|s| s == stage)
    }
}

impl From<&RepositoryCustomization> for Repository {
    /// A blueprint `install_from` repository, usable for blueprint packages only.
    fn from(custom: &RepositoryCustomization) -> Self {
        Repository {
            id: custom.id.clone(),
            name: custom.name.clone().unwrap_or_else(|| custom.id.clone()),
            baseurls: custom.baseurls.clone(),
            metalink: custom.metalink.clone(),
            mirrorlist: custom.mirrorlist.clone(),
            gpgkeys: custom.gpgkeys.clone(),
            check_gpg: custom.gpgcheck.unwrap_or(false),
            check_repo_gpg: custom.repo_gpgcheck.unwrap_or(false),
            ignore_ssl: custom.sslverify.is_some_and(|v| !v),
            rhsm: false,
            module_hotfixes: custom.module_hotfixes.unwrap_or(false),
            package_sets: vec![BLUEPRINT_PACKAGE_SET.to_owned()],
        }
    }
}
