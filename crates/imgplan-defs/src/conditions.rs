//! Condition blocks attached to image types, package sets and configs.
//!
//! A `conditions` block holds four maps scanned in a fixed order:
//! `architecture`, `distro_name`, `version_less_than` and
//! `version_greater_or_equal`. Version keys may be symbolic; they are passed
//! through the distro's replacement map before comparison.

use crate::DefinitionError;
use imgplan_schema::{Arch, DistroId, Version, VersionParseError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Evaluation context for a condition block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionContext {
    pub arch: Arch,
    pub distro_name: String,
    /// `name-major[.minor]`
    pub distro_name_ver: String,
    pub distro_version: Version,
    pub replacements: IndexMap<String, String>,
}

impl ConditionContext {
    pub fn new(id: &DistroId, arch: Arch) -> Self {
        Self {
            arch,
            distro_name: id.name.clone(),
            distro_name_ver: id.to_string(),
            distro_version: id.version(),
            replacements: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_replacements(mut self, replacements: IndexMap<String, String>) -> Self {
        self.replacements = replacements;
        self
    }

    fn distro_matches(&self, key: &str) -> bool {
        key == self.distro_name || key == self.distro_name_ver
    }

    fn version_key(&self, key: &str) -> Result<VersionKey, VersionParseError> {
        let key = self.replacements.get(key).map_or(key, String::as_str);
        if let Ok(v) = key.parse::<Version>() {
            return Ok(VersionKey::Numeric(v));
        }
        if key.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(VersionParseError::new(key, "malformed version condition"));
        }
        tracing::warn!(
            "version condition '{key}' has no replacement; comparing lexicographically"
        );
        Ok(VersionKey::Symbolic(key.to_owned()))
    }

    fn version_less_than(&self, key: &str) -> Result<bool, VersionParseError> {
        Ok(match self.version_key(key)? {
            VersionKey::Numeric(v) => self.distro_version < v,
            VersionKey::Symbolic(s) => self.distro_version.to_string() < s,
        })
    }

    fn version_greater_or_equal(&self, key: &str) -> Result<bool, VersionParseError> {
        Ok(!self.version_less_than(key)?)
    }
}

enum VersionKey {
    Numeric(Version),
    Symbolic(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Conditions<T> {
    #[serde(default = "IndexMap::new", skip_serializing_if = "IndexMap::is_empty")]
    pub architecture: IndexMap<String, T>,
    #[serde(default = "IndexMap::new", skip_serializing_if = "IndexMap::is_empty")]
    pub distro_name: IndexMap<String, T>,
    #[serde(default = "IndexMap::new", skip_serializing_if = "IndexMap::is_empty")]
    pub version_less_than: IndexMap<String, T>,
    #[serde(default = "IndexMap::new", skip_serializing_if = "IndexMap::is_empty")]
    pub version_greater_or_equal: IndexMap<String, T>,
}

impl<T> Default for Conditions<T> {
    fn default() -> Self {
        Self {
            architecture: IndexMap::new(),
            distro_name: IndexMap::new(),
            version_less_than: IndexMap::new(),
            version_greater_or_equal: IndexMap::new(),
        }
    }
}

impl<T> Conditions<T> {
    pub fn is_empty(&self) -> bool {
        self.architecture.is_empty()
            && self.distro_name.is_empty()
            && self.version_less_than.is_empty()
            && self.version_greater_or_equal.is_empty()
    }

    /// The first matching entry, scanning in the documented order.
    pub fn first_match(&self, ctx: &ConditionContext) -> Result<Option<&T>, DefinitionError> {
        if let Some(v) = self.architecture.get(ctx.arch.as_str()) {
            return Ok(Some(v));
        }
        if let Some(v) = self
            .distro_name
            .iter()
            .find(|(k, _)| ctx.distro_matches(k))
            .map(|(_, v)| v)
        {
            return Ok(Some(v));
        }
        for (key, value) in &self.version_less_than {
            if ctx.version_less_than(key)? {
                return Ok(Some(value));
            }
        }
        for (key, value) in &self.version_greater_or_equal {
            if ctx.version_greater_or_equal(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Every matching entry in scan order.
    pub fn all_matches(&self, ctx: &ConditionContext) -> Result<Vec<&T>, DefinitionError> {
        let mut out = Vec::new();
        if let Some(v) = self.architecture.get(ctx.arch.as_str()) {
            out.push(v);
        }
        out.extend(
            self.distro_name
                .iter()
                .filter(|(k, _)| ctx.distro_matches(k))
                .map(|(_, v)| v),
        );
        for (key, value) in &self.version_less_than {
            if ctx.version_less_than(key)? {
                out.push(value);
            }
        }
        for (key, value) in &self.version_greater_or_equal {
            if ctx.version_greater_or_equal(key)? {
                out.push(value);
            }
        }
        Ok(out)
    }
}
