//! Strict, cached decoding of definition files.

use crate::cache;
use crate::distros::{DistroYaml, DistrosIndex};
use crate::image_config::{ConditionalImageConfig, ConditionalInstallerConfig};
use crate::image_type::ImageTypeYaml;
use crate::{DefinitionError, DefsRoot};
use imgplan_schema::DistroId;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub const DISTROS_FILE: &str = "distros.yaml";
pub const DISTRO_FILE: &str = "distro.yaml";
pub const IMAGE_CONFIG_FILE: &str = "image-config.yaml";

/// Per-distro `distro.yaml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TopLevel {
    /// Anchor holder for shared fragments; ignored after merge expansion.
    #[serde(default)]
    pub common: Option<serde_yaml::Value>,
    #[serde(default)]
    pub image_config: Option<ConditionalImageConfig>,
    #[serde(default)]
    pub installer_config: Option<ConditionalInstallerConfig>,
    #[serde(default)]
    pub image_types: IndexMap<String, ImageTypeYaml>,
}

/// Decode YAML text strictly, expanding `<<` merge keys first.
pub fn decode_str<T: DeserializeOwned>(path: &str, text: &str) -> Result<T, DefinitionError> {
    let decode_err = |e: serde_yaml::Error| DefinitionError::Decode {
        path: path.to_owned(),
        message: e.to_string(),
    };
    let mut value: serde_yaml::Value = serde_yaml::from_str(text).map_err(decode_err)?;
    value.apply_merge().map_err(decode_err)?;
    serde_yaml::from_value(value).map_err(decode_err)
}

fn load<T>(root: &DefsRoot, path: &str) -> Result<T, DefinitionError>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    cache::get_or_decode(root, path, || {
        tracing::debug!("decoding {root}/{path}");
        let text = root.read_required(path)?;
        decode_str(path, &text)
    })
}

fn load_optional<T>(root: &DefsRoot, path: &str) -> Result<Option<T>, DefinitionError>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    cache::get_or_decode(root, path, || match root.read(path)? {
        Some(text) => decode_str(path, &text).map(Some),
        None => Ok(None),
    })
}

/// The distros index keyed by each entry's `name` template.
pub fn load_distros(root: &DefsRoot) -> Result<IndexMap<String, DistroYaml>, DefinitionError> {
    let index = load_distros_index(root)?;
    Ok(index
        .distros
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect())
}

pub fn load_distros_index(root: &DefsRoot) -> Result<DistrosIndex, DefinitionError> {
    load(root, DISTROS_FILE)
}

/// Definition directory of a distro: an explicit `defs_path`, otherwise the
/// fixed table (`fedora`, `rhel-<major>`, and `centos` sharing its rhel peer).
pub fn distro_dir(id: &DistroId, defs_path: Option<&str>) -> Result<String, DefinitionError> {
    if let Some(path) = defs_path.filter(|p| !p.is_empty()) {
        return Ok(path.trim_end_matches('/').to_owned());
    }
    match id.name.as_str() {
        "fedora" => Ok("fedora".to_owned()),
        "rhel" | "centos" => Ok(format!("rhel-{}", id.major)),
        _ => Err(DefinitionError::UnknownDistroDir(id.to_string())),
    }
}

pub fn load_top_level(
    root: &DefsRoot,
    id: &DistroId,
    defs_path: Option<&str>,
) -> Result<TopLevel, DefinitionError> {
    let dir = distro_dir(id, defs_path)?;
    load(root, &format!("{dir}/{DISTRO_FILE}"))
}

/// Optional distro-wide `image-config.yaml`.
pub fn load_distro_image_config(
    root: &DefsRoot,
    id: &DistroId,
    defs_path: Option<&str>,
) -> Result<Option<ConditionalImageConfig>, DefinitionError> {
    let dir = distro_dir(id, defs_path)?;
    load_optional(root, &format!("{dir}/{IMAGE_CONFIG_FILE}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn merge_keys_are_expanded_before_strict_decode() {
        let text = r"
common:
  base: &base
    include: [bash, coreutils]
    exclude: [nano]
sets:
  os:
    <<: *base
    include: [vim]
";
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Doc {
            #[allow(dead_code)]
            common: serde_yaml::Value,
            sets: IndexMap<String, crate::PackageSetDef>,
        }
        let doc: Doc = decode_str("test.yaml", text).unwrap();
        assert_eq!(doc.sets["os"].include, vec!["vim"]);
        assert_eq!(doc.sets["os"].exclude, vec!["nano"]);
    }

    #[test]
    fn unknown_fields_name_the_file() {
        let err = decode_str::<crate::PackageSetDef>("sets.yaml", "include: []\nbogus: 1\n")
            .unwrap_err()
            .to_string();
        assert!(err.starts_with("cannot decode 'sets.yaml'"), "{err}");
        assert!(err.contains("bogus"), "{err}");
    }

    #[test]
    fn distro_directory_table() {
        let dir = |s: &str| distro_dir(&s.parse().unwrap(), None).unwrap();
        assert_eq!(dir("fedora-42"), "fedora");
        assert_eq!(dir("rhel-9.6"), "rhel-9");
        assert_eq!(dir("centos-10"), "rhel-10");
        assert_eq!(
            distro_dir(&"test-distro-1".parse().unwrap(), Some("test-distro/")).unwrap(),
            "test-distro"
        );
        assert!(distro_dir(&"suse-15".parse().unwrap(), None).is_err());
    }

    #[test]
    fn missing_index_is_a_definition_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = DefsRoot::Dir(dir.path().to_path_buf());
        assert!(matches!(
            load_distros(&root),
            Err(DefinitionError::NotFound(_))
        ));
    }

    #[test]
    fn loads_top_level_from_directory_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("test-distro")).unwrap();
        fs::write(
            dir.path().join("test-distro/distro.yaml"),
            r"
image_types:
  tarball:
    filename: root.tar.xz
    mime_type: application/x-tar
    image_kind: archive
    payload_pipelines: [os, archive]
    exports: [archive]
",
        )
        .unwrap();
        let root = DefsRoot::Dir(dir.path().to_path_buf());
        let id: DistroId = "test-distro-1".parse().unwrap();
        let top = load_top_level(&root, &id, Some("test-distro")).unwrap();
        assert!(top.image_types.contains_key("tarball"));
        assert!(load_distro_image_config(&root, &id, Some("test-distro"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn embedded_definitions_decode() {
        let root = DefsRoot::Embedded;
        let distros = load_distros(&root).unwrap();
        assert!(!distros.is_empty());
        for path in crate::embedded::paths().filter(|p| p.ends_with(DISTRO_FILE)) {
            let text = root.read_required(path).unwrap();
            decode_str::<TopLevel>(path, &text).unwrap();
        }
    }
}
