use crate::customizations::Customizations;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlueprintFormat {
    Toml,
    Json,
    Yaml,
}

impl BlueprintFormat {
    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match ext {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(SchemaError::UnknownFormat(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Blueprint {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub distro: Option<String>,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub modules: Vec<Package>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub customizations: Option<Customizations>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Package {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl Package {
    /// Depsolver spec: `name`, or `name-version` when a version is pinned.
    pub fn spec(&self) -> String {
        let version = self.version.trim();
        if version.is_empty() || version == "*" {
            self.name.trim().to_owned()
        } else {
            format!("{}-{version}", self.name.trim())
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Group {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Container {
    pub source: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "tls-verify")]
    pub tls_verify: Option<bool>,
    #[serde(default, rename = "local-storage")]
    pub local_storage: bool,
}

impl Blueprint {
    /// Package and module specs plus `@group` entries, sorted and deduplicated.
    pub fn package_specs(&self) -> Vec<String> {
        let specs: Vec<String> = self
            .packages
            .iter()
            .chain(&self.modules)
            .map(Package::spec)
            .chain(self.groups.iter().map(|g| format!("@{}", g.name.trim())))
            .collect();
        normalize_string_list(&specs)
    }

    pub fn customizations(&self) -> Option<&Customizations> {
        self.customizations.as_ref()
    }
}

pub fn parse_blueprint_str(input: &str, format: BlueprintFormat) -> Result<Blueprint, SchemaError> {
    Ok(match format {
        BlueprintFormat::Toml => toml::from_str(input)?,
        BlueprintFormat::Json => serde_json::from_str(input)?,
        BlueprintFormat::Yaml => serde_yaml::from_str(input)?,
    })
}

pub fn parse_blueprint_file(path: impl AsRef<Path>) -> Result<Blueprint, SchemaError> {
    let path = path.as_ref();
    let format = BlueprintFormat::from_path(path)?;
    let content = fs::read_to_string(path)?;
    parse_blueprint_str(&content, format)
}

/// Trim, drop empties, sort and deduplicate.
pub fn normalize_string_list(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = values
        .iter()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_blueprint() {
        let input = r#"
name = "server"
description = "a web server"
version = "0.0.1"

[[packages]]
name = "nginx"
version = "*"

[[packages]]
name = "tmux"
version = "3.3a"

[[groups]]
name = "core"

[[containers]]
source = "quay.io/fedora/fedora:latest"
tls-verify = false

[customizations]
hostname = "web01"

[customizations.kernel]
append = "nosmt=force"

[[customizations.user]]
name = "admin"
groups = ["wheel"]
key = "ssh-ed25519 AAAA"

[[customizations.filesystem]]
mountpoint = "/var/log"
minsize = "2 GiB"

[customizations.services]
enabled = ["nginx"]
"#;
        let bp = parse_blueprint_str(input, BlueprintFormat::Toml).expect("should parse");
        assert_eq!(bp.name, "server");
        assert_eq!(bp.package_specs(), vec!["@core", "nginx", "tmux-3.3a"]);
        assert_eq!(bp.containers[0].tls_verify, Some(false));
        let c = bp.customizations().unwrap();
        assert_eq!(c.hostname.as_deref(), Some("web01"));
        assert_eq!(c.user[0].groups, vec!["wheel"]);
        assert_eq!(c.filesystem[0].minsize, 2 * crate::datasize::GIB);
    }

    #[test]
    fn parses_minimal_blueprint() {
        let bp = parse_blueprint_str("name = \"empty\"\n", BlueprintFormat::Toml).unwrap();
        assert!(bp.packages.is_empty());
        assert!(bp.customizations.is_none());
    }

    #[test]
    fn rejects_unknown_fields() {
        let input = r#"
name = "bad"
unknown_field = true
"#;
        assert!(parse_blueprint_str(input, BlueprintFormat::Toml).is_err());
    }

    #[test]
    fn json_and_yaml_blueprints_agree() {
        let json = r#"{"name": "x", "packages": [{"name": "vim"}]}"#;
        let yaml = "name: x\npackages:\n  - name: vim\n";
        let a = parse_blueprint_str(json, BlueprintFormat::Json).unwrap();
        let b = parse_blueprint_str(yaml, BlueprintFormat::Yaml).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn package_order_does_not_change_specs() {
        let a = Blueprint {
            packages: vec![
                Package { name: "git".to_owned(), version: String::new() },
                Package { name: "clang".to_owned(), version: String::new() },
            ],
            ..Default::default()
        };
        let b = Blueprint {
            packages: vec![
                Package { name: "clang".to_owned(), version: String::new() },
                Package { name: "git".to_owned(), version: String::new() },
                Package { name: "git".to_owned(), version: String::new() },
            ],
            ..Default::default()
        };
        assert_eq!(a.package_specs(), b.package_specs());
    }

    #[test]
    fn file_format_follows_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bp.json");
        fs::write(&path, r#"{"name": "from-file"}"#).unwrap();
        assert_eq!(parse_blueprint_file(&path).unwrap().name, "from-file");

        let bad = dir.path().join("bp.ini");
        fs::write(&bad, "").unwrap();
        assert!(matches!(
            parse_blueprint_file(&bad),
            Err(SchemaError::UnknownFormat(_))
        ));
    }
}
