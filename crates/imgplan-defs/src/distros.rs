//! The distros index (`distros.yaml`) and resolution of a requested distro
//! name to its definition.

use crate::DefinitionError;
use imgplan_schema::{Arch, DistroId, Version};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DistrosIndex {
    /// Anchor holder for shared fragments; ignored after merge expansion.
    #[serde(default)]
    pub common: Option<serde_yaml::Value>,
    pub distros: Vec<DistroYaml>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RunnerYaml {
    pub name: String,
    #[serde(default)]
    pub build_packages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OscapYaml {
    #[serde(default = "default_true")]
    pub supported: bool,
    #[serde(default)]
    pub profiles_allowlist: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// One entry of `distros.yaml`. String fields other than `match` and
/// `transform_re` are templates over `{{.MajorVersion}}`,
/// `{{.MinorVersion}}` and `{{.Product}}`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DistroYaml {
    pub name: String,
    /// Regex (full match) over canonical `name-major[.minor]` ids.
    #[serde(default, rename = "match")]
    pub match_re: Option<String>,
    /// Regex with `name`, `major` and optional `minor` groups for compact ids.
    #[serde(default)]
    pub transform_re: Option<String>,
    /// Concrete versions offered by listings.
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub preview: bool,
    pub product: String,
    #[serde(default)]
    pub codename: String,
    pub os_version: String,
    pub release_version: String,
    pub module_platform_id: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub ostree_ref_tmpl: Option<String>,
    #[serde(default)]
    pub iso_label_tmpl: Option<String>,
    pub default_fs_type: String,
    #[serde(default)]
    pub defs_path: Option<String>,
    pub runner: RunnerYaml,
    #[serde(default)]
    pub bootstrap_containers: IndexMap<Arch, String>,
    #[serde(default)]
    pub version_replacements: IndexMap<String, String>,
    #[serde(default)]
    pub oscap: Option<OscapYaml>,
    #[serde(default)]
    pub swap_unsupported_arches: Vec<Arch>,
    #[serde(default)]
    pub btrfs_supported: bool,
}

/// A distro entry rendered for one concrete version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistroDefinition {
    pub id: DistroId,
    pub name: String,
    pub codename: String,
    pub product: String,
    pub os_version: String,
    pub release_version: String,
    pub module_platform_id: String,
    pub vendor: String,
    pub ostree_ref_tmpl: Option<String>,
    pub iso_label_tmpl: Option<String>,
    pub default_fs_type: String,
    pub defs_path: Option<String>,
    pub runner: RunnerYaml,
    pub bootstrap_containers: IndexMap<Arch, String>,
    pub replacements: IndexMap<String, String>,
    pub oscap: OscapYaml,
    pub swap_unsupported_arches: Vec<Arch>,
    pub btrfs_supported: bool,
    pub preview: bool,
}

/// Substitute `{{.Key}}` placeholders. Unknown keys and unterminated
/// placeholders are definition errors.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> Result<String, DefinitionError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(DefinitionError::Template {
                template: template.to_owned(),
                message: "unterminated placeholder".to_owned(),
            });
        };
        let key = after[..end].trim();
        let key = key.strip_prefix('.').unwrap_or(key);
        let value = vars
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .ok_or_else(|| DefinitionError::Template {
                template: template.to_owned(),
                message: format!("unknown placeholder '{key}'"),
            })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn compile(pattern: &str) -> Result<Regex, DefinitionError> {
    Regex::new(pattern).map_err(|e| DefinitionError::BadRegex {
        pattern: pattern.to_owned(),
        message: e.to_string(),
    })
}

fn full_match(pattern: &str, input: &str) -> Result<bool, DefinitionError> {
    compile(&format!("^(?:{pattern})$")).map(|re| re.is_match(input))
}

impl DistroYaml {
    /// Rewrite a compact id (`rhel-810`) into a [`DistroId`] when this entry's
    /// `transform_re` matches it.
    pub fn transform(&self, input: &str) -> Result<Option<DistroId>, DefinitionError> {
        let Some(pattern) = &self.transform_re else {
            return Ok(None);
        };
        let re = compile(pattern)?;
        let Some(caps) = re.captures(input) else {
            return Ok(None);
        };
        let (Some(name), Some(major)) = (caps.name("name"), caps.name("major")) else {
            return Err(DefinitionError::BadRegex {
                pattern: pattern.clone(),
                message: "missing 'name' or 'major' capture group".to_owned(),
            });
        };
        let minor = caps.name("minor").map(|m| m.as_str());
        Ok(Some(DistroId::from_parts(name.as_str(), major.as_str(), minor)?))
    }

    /// Whether this entry describes `id`.
    pub fn matches(&self, id: &DistroId) -> Result<bool, DefinitionError> {
        let canonical = id.to_string();
        match &self.match_re {
            Some(pattern) => full_match(pattern, &canonical),
            None => Ok(self.render_name(id)? == canonical),
        }
    }

    fn version_vars(id: &DistroId) -> (String, String) {
        (
            id.major.to_string(),
            id.minor.map(|m| m.to_string()).unwrap_or_default(),
        )
    }

    fn render_name(&self, id: &DistroId) -> Result<String, DefinitionError> {
        let (major, minor) = Self::version_vars(id);
        render_template(
            &self.name,
            &[("MajorVersion", &major), ("MinorVersion", &minor)],
        )
    }

    /// Render every template field for `id`.
    pub fn render(&self, id: &DistroId) -> Result<DistroDefinition, DefinitionError> {
        let (major, minor) = Self::version_vars(id);
        let base = [("MajorVersion", major.as_str()), ("MinorVersion", minor.as_str())];
        let product = render_template(&self.product, &base)?;
        let vars = [base[0], base[1], ("Product", product.as_str())];
        Ok(DistroDefinition {
            id: id.clone(),
            name: id.to_string(),
            codename: self.codename.clone(),
            os_version: render_template(&self.os_version, &vars)?,
            release_version: render_template(&self.release_version, &vars)?,
            module_platform_id: render_template(&self.module_platform_id, &vars)?,
            vendor: self.vendor.clone(),
            ostree_ref_tmpl: self
                .ostree_ref_tmpl
                .as_deref()
                .map(|t| render_partial(t, &vars))
                .transpose()?,
            iso_label_tmpl: self
                .iso_label_tmpl
                .as_deref()
                .map(|t| render_partial(t, &vars))
                .transpose()?,
            product: product.clone(),
            default_fs_type: self.default_fs_type.clone(),
            defs_path: self.defs_path.clone(),
            runner: RunnerYaml {
                name: render_template(&self.runner.name, &vars)?,
                build_packages: self.runner.build_packages.clone(),
            },
            bootstrap_containers: self
                .bootstrap_containers
                .iter()
                .map(|(arch, tmpl)| Ok((*arch, render_template(tmpl, &vars)?)))
                .collect::<Result<_, DefinitionError>>()?,
            replacements: self.version_replacements.clone(),
            oscap: self.oscap.clone().unwrap_or(OscapYaml {
                supported: true,
                profiles_allowlist: Vec::new(),
            }),
            swap_unsupported_arches: self.swap_unsupported_arches.clone(),
            btrfs_supported: self.btrfs_supported,
            preview: self.preview,
        })
    }

    /// Concrete ids offered by this entry, from `versions`.
    pub fn known_ids(&self) -> Result<Vec<DistroId>, DefinitionError> {
        let mut out = Vec::new();
        for version in &self.versions {
            let v: Version = version.parse()?;
            let name = self
                .name
                .split("-{{")
                .next()
                .unwrap_or(&self.name)
                .to_owned();
            let major = u32::try_from(v.major()).map_err(|_| {
                imgplan_schema::VersionParseError::new(version, "major version out of range")
            })?;
            let minor = v
                .minor()
                .map(u32::try_from)
                .transpose()
                .map_err(|_| {
                    imgplan_schema::VersionParseError::new(version, "minor version out of range")
                })?;
            out.push(DistroId::new(name, major, minor));
        }
        Ok(out)
    }
}

/// Render the version placeholders now; `Arch` and `ISOLabel` stay for the
/// image type to fill in.
fn render_partial(template: &str, vars: &[(&str, &str)]) -> Result<String, DefinitionError> {
    let mut all: Vec<(&str, &str)> = vars.to_vec();
    all.push(("Arch", "{{.Arch}}"));
    all.push(("ISOLabel", "{{.ISOLabel}}"));
    render_template(template, &all)
}

impl DistroDefinition {
    pub fn ostree_ref(&self, arch: Arch) -> Option<String> {
        self.ostree_ref_tmpl
            .as_deref()
            .and_then(|t| render_template(t, &[("Arch", arch.as_str())]).ok())
    }

    pub fn iso_label(&self, arch: Arch, label: &str) -> Option<String> {
        self.iso_label_tmpl.as_deref().and_then(|t| {
            render_template(t, &[("Arch", arch.as_str()), ("ISOLabel", label)]).ok()
        })
    }

    pub fn oscap_profile_allowed(&self, profile: &str) -> bool {
        self.oscap.profiles_allowlist.is_empty()
            || self.oscap.profiles_allowlist.iter().any(|p| p == profile)
    }
}

impl DistrosIndex {
    /// Parse `input` (canonical or compact) and find the first matching entry.
    pub fn find(&self, input: &str) -> Result<Option<(DistroId, &DistroYaml)>, DefinitionError> {
        let mut id = None;
        for entry in &self.distros {
            if let Some(transformed) = entry.transform(input)? {
                tracing::debug!("distro '{input}' normalized to '{transformed}'");
                id = Some(transformed);
                break;
            }
        }
        let id = match id {
            Some(id) => id,
            None => input.parse::<DistroId>()?,
        };
        for entry in &self.distros {
            if entry.matches(&id)? {
                return Ok(Some((id, entry)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"
distros:
  - name: "fedora-{{.MajorVersion}}"
    match: 'fedora-[0-9]+'
    versions: ["42"]
    product: Fedora
    os_version: "{{.MajorVersion}}"
    release_version: "{{.MajorVersion}}"
    module_platform_id: "platform:f{{.MajorVersion}}"
    ostree_ref_tmpl: "fedora/{{.MajorVersion}}/{{.Arch}}/iot"
    iso_label_tmpl: "{{.Product}}-{{.MajorVersion}}-{{.ISOLabel}}-{{.Arch}}"
    default_fs_type: ext4
    runner: {name: "org.osbuild.fedora{{.MajorVersion}}"}
  - name: "rhel-{{.MajorVersion}}.{{.MinorVersion}}"
    match: 'rhel-8\.[0-9]{1,2}'
    transform_re: '^(?P<name>rhel)-(?P<major>8)\.?(?P<minor>[0-9]{1,2})$'
    versions: ["8.10"]
    product: Red Hat Enterprise Linux
    os_version: "{{.MajorVersion}}.{{.MinorVersion}}"
    release_version: "{{.MajorVersion}}"
    module_platform_id: "platform:el{{.MajorVersion}}"
    default_fs_type: xfs
    runner: {name: "org.osbuild.rhel{{.MajorVersion}}{{.MinorVersion}}"}
"#;

    fn index() -> DistrosIndex {
        serde_yaml::from_str(INDEX).unwrap()
    }

    #[test]
    fn renders_templates() {
        assert_eq!(
            render_template("fedora/{{.MajorVersion}}/{{ .Arch }}", &[("MajorVersion", "42"), ("Arch", "x86_64")]).unwrap(),
            "fedora/42/x86_64"
        );
        assert!(render_template("{{.Nope}}", &[]).is_err());
        assert!(render_template("{{.MajorVersion", &[("MajorVersion", "1")]).is_err());
    }

    #[test]
    fn finds_canonical_and_compact_ids() {
        let index = index();
        let (id, entry) = index.find("fedora-42").unwrap().unwrap();
        assert_eq!(id.to_string(), "fedora-42");
        assert_eq!(entry.default_fs_type, "ext4");

        let (id, _) = index.find("rhel-810").unwrap().unwrap();
        assert_eq!(id.to_string(), "rhel-8.10");
        let (id, _) = index.find("rhel-8.10").unwrap().unwrap();
        assert_eq!(id.to_string(), "rhel-8.10");

        assert!(index.find("rhel-9.6").unwrap().is_none());
    }

    #[test]
    fn malformed_version_is_an_error() {
        assert!(matches!(
            index().find("fedora-x"),
            Err(DefinitionError::Version(_))
        ));
    }

    #[test]
    fn render_fills_definition() {
        let index = index();
        let (id, entry) = index.find("rhel-8.10").unwrap().unwrap();
        let def = entry.render(&id).unwrap();
        assert_eq!(def.os_version, "8.10");
        assert_eq!(def.module_platform_id, "platform:el8");
        assert_eq!(def.runner.name, "org.osbuild.rhel810");

        let (id, entry) = index.find("fedora-42").unwrap().unwrap();
        let def = entry.render(&id).unwrap();
        assert_eq!(def.ostree_ref(Arch::Aarch64).as_deref(), Some("fedora/42/aarch64/iot"));
        assert_eq!(
            def.iso_label(Arch::X86_64, "IoT").as_deref(),
            Some("Fedora-42-IoT-x86_64")
        );
    }

    #[test]
    fn bad_transform_regex_is_reported() {
        let entry = DistroYaml {
            name: "x".to_owned(),
            transform_re: Some("(unclosed".to_owned()),
            ..Default::default()
        };
        let err = entry.transform("x-1").unwrap_err().to_string();
        assert!(err.starts_with("cannot use (unclosed: "), "{err}");
    }

    #[test]
    fn known_ids_come_from_versions() {
        let index = index();
        let ids: Vec<String> = index
            .distros
            .iter()
            .flat_map(|d| d.known_ids().unwrap())
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["fedora-42", "rhel-8.10"]);
    }
}
