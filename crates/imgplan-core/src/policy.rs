//! Path policies for custom mountpoints, files and directories.
//!
//! A policy tree maps path prefixes to a rule. The rule of the longest
//! matching prefix decides: `deny` rejects the path, `exact` only admits the
//! prefix itself and rejects anything below it.

use std::collections::BTreeMap;
use std::path::{Component, Path};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathPolicy {
    pub deny: bool,
    pub exact: bool,
}

const ALLOW: PathPolicy = PathPolicy {
    deny: false,
    exact: false,
};
const DENY: PathPolicy = PathPolicy {
    deny: true,
    exact: false,
};
const EXACT: PathPolicy = PathPolicy {
    deny: false,
    exact: true,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("path {0:?} must be canonical")]
    NotCanonical(String),
    #[error("path {0:?} is not allowed")]
    Denied(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPolicies {
    entries: BTreeMap<&'static str, PathPolicy>,
}

impl PathPolicies {
    pub fn new(entries: &[(&'static str, PathPolicy)]) -> Self {
        Self {
            entries: entries.iter().copied().collect(),
        }
    }

    /// Mountpoints a blueprint may add or resize on a package-based image.
    pub fn mountpoints() -> Self {
        Self::new(&[
            ("/", EXACT),
            ("/app", ALLOW),
            ("/boot", EXACT),
            ("/data", ALLOW),
            ("/home", ALLOW),
            ("/opt", ALLOW),
            ("/srv", ALLOW),
            ("/tmp", ALLOW),
            ("/usr", ALLOW),
            ("/var", ALLOW),
            ("/var/lock", DENY),
            ("/var/run", DENY),
        ])
    }

    /// Mountpoints on an ostree deployment: the root and mutable state
    /// under `/var`, minus the directories ostree symlinks elsewhere.
    pub fn ostree_mountpoints() -> Self {
        Self::new(&[
            ("/", EXACT),
            ("/var", ALLOW),
            ("/var/home", DENY),
            ("/var/mnt", DENY),
            ("/var/opt", DENY),
            ("/var/roothome", DENY),
            ("/var/srv", DENY),
            ("/var/usrlocal", DENY),
        ])
    }

    pub fn custom_files() -> Self {
        Self::new(&[
            ("/", DENY),
            ("/etc", ALLOW),
            ("/etc/fstab", DENY),
            ("/etc/group", DENY),
            ("/etc/passwd", DENY),
            ("/etc/shadow", DENY),
            ("/root", ALLOW),
            ("/usr/local/bin", ALLOW),
            ("/usr/local/sbin", ALLOW),
        ])
    }

    pub fn custom_directories() -> Self {
        Self::new(&[("/", DENY), ("/etc", ALLOW)])
    }

    fn lookup(&self, path: &str) -> Option<(&'static str, PathPolicy)> {
        self.entries
            .iter()
            .filter(|(prefix, _)| is_path_prefix(prefix, path))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, policy)| (*prefix, *policy))
    }

    pub fn check(&self, path: &str) -> Result<(), PolicyError> {
        if !is_canonical(path) {
            return Err(PolicyError::NotCanonical(path.to_owned()));
        }
        match self.lookup(path) {
            Some((_, policy)) if policy.deny => Err(PolicyError::Denied(path.to_owned())),
            Some((prefix, policy)) if policy.exact && prefix != path => {
                Err(PolicyError::Denied(path.to_owned()))
            }
            _ => Ok(()),
        }
    }
}

fn is_path_prefix(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Absolute, no `.`/`..` components, no doubled or trailing slashes.
pub fn is_canonical(path: &str) -> bool {
    if !path.starts_with('/') || path.contains("//") {
        return false;
    }
    if path.len() > 1 && path.ends_with('/') {
        return false;
    }
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::RootDir | Component::Normal(_)))
        && !path.split('/').any(|s| s == "." || s == "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mountpoint_policy() {
        let p = PathPolicies::mountpoints();
        assert!(p.check("/").is_ok());
        assert!(p.check("/var/log").is_ok());
        assert!(p.check("/home").is_ok());
        assert_eq!(
            p.check("/etc"),
            Err(PolicyError::Denied("/etc".to_owned()))
        );
        assert!(p.check("/boot/efi").is_err());
        assert!(p.check("/var/run/x").is_err());
        assert!(p.check("/variable").is_err());
    }

    #[test]
    fn ostree_policy_only_allows_var() {
        let p = PathPolicies::ostree_mountpoints();
        assert!(p.check("/").is_ok());
        assert!(p.check("/var/log").is_ok());
        assert!(p.check("/var/home").is_err());
        assert!(p.check("/home").is_err());
        assert!(p.check("/usr").is_err());
    }

    #[test]
    fn non_canonical_paths_are_rejected() {
        let p = PathPolicies::mountpoints();
        for path in ["var", "/var/", "/var//log", "/var/./log", "/var/../etc"] {
            assert_eq!(
                p.check(path),
                Err(PolicyError::NotCanonical(path.to_owned())),
                "{path}"
            );
        }
    }

    #[test]
    fn file_policy_denies_account_databases() {
        let p = PathPolicies::custom_files();
        assert!(p.check("/etc/motd").is_ok());
        assert!(p.check("/usr/local/bin/tool").is_ok());
        assert!(p.check("/etc/passwd").is_err());
        assert!(p.check("/usr/bin/tool").is_err());
    }

    #[test]
    fn directory_policy_allows_etc_only() {
        let p = PathPolicies::custom_directories();
        assert!(p.check("/etc/myapp").is_ok());
        assert!(p.check("/opt/myapp").is_err());
    }
}
