//! Blueprint and image option validation.
//!
//! Each image type declares dotted paths it supports and requires (see
//! `rules`). `validate_supported` rejects any set leaf whose path is not
//! covered by a supported entry; `validate_required` rejects required paths
//! that resolve to nothing. Family rules that cannot be expressed as paths
//! run afterwards. The first violation wins.

pub mod rules;
pub mod walk;

use crate::image_type::ImageType;
use crate::policy::PathPolicies;
use imgplan_defs::ImageKind;
use imgplan_schema::{Blueprint, Customizations, ImageOptions};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use walk::{to_node, Leaf};

pub const REQUIRED: &str = "required, there is no default available";
pub const NOT_SUPPORTED: &str = "not supported";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationTarget {
    Blueprint,
    Options,
}

impl fmt::Display for ValidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationTarget::Blueprint => f.write_str("blueprint"),
            ValidationTarget::Options => f.write_str("options"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{target} validation failed for image type \"{image_type}\": {path}: {reason}")]
pub struct ValidationError {
    pub target: ValidationTarget,
    pub image_type: String,
    pub path: String,
    pub reason: String,
}

/// A rule violation before it is attributed to an image type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub reason: String,
}

impl Violation {
    fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }

    fn attribute(self, target: ValidationTarget, image_type: &str) -> ValidationError {
        ValidationError {
            target,
            image_type: image_type.to_owned(),
            path: self.path,
            reason: self.reason,
        }
    }
}

fn covers(entry: &str, path: &str) -> bool {
    path == entry
        || path
            .strip_prefix(entry)
            .is_some_and(|rest| rest.starts_with(['.', '[', '{']))
}

fn is_supported(leaf: &Leaf, supported: &[String]) -> bool {
    supported
        .iter()
        .any(|entry| covers(entry, &leaf.path) || (leaf.presence && covers(&leaf.path, entry)))
}

/// Every set leaf of `value` must fall under a `supported` entry.
pub fn validate_supported<T: Serialize + ?Sized>(
    supported: &[String],
    value: &T,
) -> Result<(), Violation> {
    let node = to_node(value).map_err(|e| Violation::new("", e.to_string()))?;
    match node.leaves().into_iter().find(|l| !is_supported(l, supported)) {
        Some(leaf) => Err(Violation::new(leaf.path, NOT_SUPPORTED)),
        None => Ok(()),
    }
}

/// Every `required` path must resolve to a set leaf or a non-empty list/map.
pub fn validate_required<T: Serialize + ?Sized>(
    required: &[String],
    value: &T,
) -> Result<(), Violation> {
    let node = to_node(value).map_err(|e| Violation::new("", e.to_string()))?;
    match required
        .iter()
        .find(|path| !node.get(path).is_some_and(walk::Node::is_set))
    {
        Some(path) => Err(Violation::new(path.as_str(), REQUIRED)),
        None => Ok(()),
    }
}

/// Validate a request against the image type's declared rules and family
/// constraints.
pub fn validate(
    image_type: &ImageType,
    bp: &Blueprint,
    options: &ImageOptions,
) -> Result<(), ValidationError> {
    let name = image_type.name();
    let rules = rules::rules_for(image_type.kind(), image_type.blueprint_rules());
    let blueprint = |v: Violation| v.attribute(ValidationTarget::Blueprint, name);
    let opts = |v: Violation| v.attribute(ValidationTarget::Options, name);

    validate_supported(&rules.supported, bp).map_err(blueprint)?;
    validate_required(&rules.required, bp).map_err(blueprint)?;
    validate_supported(&rules.supported_options, options).map_err(opts)?;
    validate_required(&rules.required_options, options).map_err(opts)?;

    if let Some(c) = bp.customizations() {
        check_customizations(image_type, c).map_err(blueprint)?;
    }
    Ok(())
}

fn check_customizations(image_type: &ImageType, c: &Customizations) -> Result<(), Violation> {
    check_installer(image_type.kind(), c)?;
    check_fdo(c)?;
    check_ignition(c)?;
    check_openscap(image_type, c)?;
    check_paths(c)?;
    check_repositories(c)?;
    if let Some(device) = c.installation_device.as_deref() {
        if !device.starts_with("/dev/") {
            return Err(Violation::new(
                "customizations.installation_device",
                "must be a device path under /dev",
            ));
        }
    }
    Ok(())
}

fn check_installer(kind: ImageKind, c: &Customizations) -> Result<(), Violation> {
    if kind != ImageKind::OstreeInstaller {
        return Ok(());
    }
    let custom_kickstart = c
        .installer
        .as_ref()
        .and_then(|i| i.kickstart.as_ref())
        .is_some_and(|k| !k.contents.trim().is_empty());
    if custom_kickstart && (!c.user.is_empty() || !c.group.is_empty()) {
        return Err(Violation::new(
            "customizations.installer.kickstart.contents",
            "cannot be combined with user or group customizations",
        ));
    }
    Ok(())
}

fn check_fdo(c: &Customizations) -> Result<(), Violation> {
    let Some(fdo) = &c.fdo else {
        return Ok(());
    };
    if fdo.manufacturing_server_url.is_empty() {
        return Err(Violation::new(
            "customizations.fdo.manufacturing_server_url",
            REQUIRED,
        ));
    }
    let diun = [
        &fdo.diun_pub_key_insecure,
        &fdo.diun_pub_key_hash,
        &fdo.diun_pub_key_root_certs,
    ]
    .iter()
    .filter(|v| !v.is_empty())
    .count();
    if diun != 1 {
        return Err(Violation::new(
            "customizations.fdo",
            "exactly one DIUN public key option must be set",
        ));
    }
    Ok(())
}

fn check_ignition(c: &Customizations) -> Result<(), Violation> {
    let Some(ignition) = &c.ignition else {
        return Ok(());
    };
    if ignition.embedded.is_some() && ignition.firstboot.is_some() {
        return Err(Violation::new(
            "customizations.ignition",
            "embedded and firstboot configurations are mutually exclusive",
        ));
    }
    if ignition.firstboot.as_ref().is_some_and(|f| f.url.is_empty()) {
        return Err(Violation::new("customizations.ignition.firstboot.url", REQUIRED));
    }
    if ignition.embedded.as_ref().is_some_and(|e| e.config.is_empty()) {
        return Err(Violation::new(
            "customizations.ignition.embedded.config",
            REQUIRED,
        ));
    }
    Ok(())
}

fn check_openscap(image_type: &ImageType, c: &Customizations) -> Result<(), Violation> {
    let Some(oscap) = &c.openscap else {
        return Ok(());
    };
    let distro = image_type.distro();
    if !distro.oscap.supported {
        return Err(Violation::new(
            "customizations.openscap",
            format!("OpenSCAP is not supported on {}", distro.name),
        ));
    }
    if oscap.profile_id.is_empty() {
        return Err(Violation::new("customizations.openscap.profile_id", REQUIRED));
    }
    if !distro.oscap_profile_allowed(&oscap.profile_id) {
        return Err(Violation::new(
            "customizations.openscap.profile_id",
            format!("profile {} is not supported on {}", oscap.profile_id, distro.name),
        ));
    }
    Ok(())
}

fn valid_mode(mode: &str) -> bool {
    let digits = mode.strip_prefix("0o").unwrap_or(mode);
    !digits.is_empty() && digits.len() <= 4 && u32::from_str_radix(digits, 8).is_ok()
}

fn check_paths(c: &Customizations) -> Result<(), Violation> {
    let dirs = PathPolicies::custom_directories();
    for (i, dir) in c.directories.iter().enumerate() {
        dirs.check(&dir.path)
            .map_err(|e| Violation::new(format!("customizations.directories[{i}].path"), e.to_string()))?;
        if dir.mode.as_deref().is_some_and(|m| !valid_mode(m)) {
            return Err(Violation::new(
                format!("customizations.directories[{i}].mode"),
                "invalid octal mode",
            ));
        }
    }
    let files = PathPolicies::custom_files();
    for (i, file) in c.files.iter().enumerate() {
        files
            .check(&file.path)
            .map_err(|e| Violation::new(format!("customizations.files[{i}].path"), e.to_string()))?;
        if file.mode.as_deref().is_some_and(|m| !valid_mode(m)) {
            return Err(Violation::new(
                format!("customizations.files[{i}].mode"),
                "invalid octal mode",
            ));
        }
    }
    Ok(())
}

fn check_repositories(c: &Customizations) -> Result<(), Violation> {
    for (i, repo) in c.repositories.iter().enumerate() {
        if repo.baseurls.is_empty() && repo.metalink.is_none() && repo.mirrorlist.is_none() {
            return Err(Violation::new(
                format!("customizations.repositories[{i}]"),
                "needs baseurls, a metalink or a mirrorlist",
            ));
        }
    }
    Ok(())
}
