//! The distro → architecture → image type namespace.
//!
//! A [`Distro`] is built once per canonical id and cached on the
//! [`Registry`]; every image type of every architecture is resolved against
//! its condition context at that point, so lookups at request time never
//! touch the definition files again.

use crate::image_type::ImageType;
use crate::{ImageError, LookupError};
use imgplan_defs::loader::load_distros_index;
use imgplan_defs::{
    load_distro_image_config, load_top_level, ConditionContext, DefinitionError, DefsRoot,
    DistroDefinition, DistroYaml, ImageConfig, InstallerConfig,
};
use imgplan_schema::{Arch, DistroId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub struct Registry {
    root: DefsRoot,
    distros: Mutex<HashMap<String, Arc<Distro>>>,
}

impl Registry {
    pub fn new(root: DefsRoot) -> Self {
        Self {
            root,
            distros: Mutex::new(HashMap::new()),
        }
    }

    /// Registry over the embedded tree, or the `yamldir` override.
    pub fn from_env() -> Self {
        Self::new(DefsRoot::from_env())
    }

    pub fn root(&self) -> &DefsRoot {
        &self.root
    }

    /// Every concrete distro the index offers, sorted.
    pub fn list_distros(&self) -> Result<Vec<String>, ImageError> {
        let index = load_distros_index(&self.root)?;
        let mut ids: Vec<DistroId> = Vec::new();
        for entry in &index.distros {
            ids.extend(entry.known_ids()?);
        }
        ids.sort();
        ids.dedup();
        Ok(ids.iter().map(ToString::to_string).collect())
    }

    /// The distro for a canonical or compact id; `None` when no index entry
    /// matches it.
    pub fn get_distro(&self, name: &str) -> Result<Option<Arc<Distro>>, ImageError> {
        let index = load_distros_index(&self.root)?;
        let Some((id, entry)) = index.find(name)? else {
            debug!("no distro definition matches '{name}'");
            return Ok(None);
        };
        let key = id.to_string();
        let mut distros = self.distros.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(distro) = distros.get(&key) {
            return Ok(Some(Arc::clone(distro)));
        }
        let distro = Arc::new(Distro::load(&self.root, &id, entry)?);
        distros.insert(key, Arc::clone(&distro));
        Ok(Some(distro))
    }

    /// Resolve `(distro, arch, image type)` in one step.
    pub fn lookup(
        &self,
        distro: &str,
        arch: &str,
        image_type: &str,
    ) -> Result<Arc<ImageType>, ImageError> {
        let d = self
            .get_distro(distro)?
            .ok_or_else(|| LookupError::Distro(distro.to_owned()))?;
        let a = d.get_arch(arch)?;
        Ok(Arc::clone(a.get_image_type(image_type)?))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("root", &self.root).finish()
    }
}

#[derive(Debug)]
pub struct Distro {
    definition: Arc<DistroDefinition>,
    arches: BTreeMap<Arch, Architecture>,
}

impl Distro {
    fn load(root: &DefsRoot, id: &DistroId, entry: &DistroYaml) -> Result<Self, ImageError> {
        let definition = Arc::new(entry.render(id)?);
        let defs_path = definition.defs_path.as_deref();
        let top = load_top_level(root, id, defs_path)?;
        let distro_config = load_distro_image_config(root, id, defs_path)?;

        let mut arches = BTreeMap::new();
        for arch in Arch::ALL {
            let ctx = ConditionContext::new(id, arch)
                .with_replacements(definition.replacements.clone());

            let mut image_config = match &distro_config {
                Some(config) => config.resolve(&ctx)?,
                None => ImageConfig::default(),
            };
            if let Some(config) = &top.image_config {
                image_config = config.resolve(&ctx)?.inherit_from(&image_config);
            }
            let installer_config = match &top.installer_config {
                Some(config) => config.resolve(&ctx)?,
                None => InstallerConfig::default(),
            };

            let mut architecture = Architecture::new(arch, Arc::clone(&definition));
            for (name, yaml) in &top.image_types {
                let resolved = yaml.resolve(name, &ctx)?;
                if resolved.platform(arch).is_none() {
                    continue;
                }
                let image_type = ImageType::new(
                    name,
                    resolved,
                    arch,
                    Arc::clone(&definition),
                    &ctx,
                    &image_config,
                    &installer_config,
                )?;
                architecture.add_image_type(image_type)?;
            }
            if !architecture.image_types.is_empty() {
                arches.insert(arch, architecture);
            }
        }
        info!(
            "loaded {} with {} architectures from {root}",
            definition.name,
            arches.len()
        );
        Ok(Self { definition, arches })
    }

    /// Canonical `name-major[.minor]`.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn id(&self) -> &DistroId {
        &self.definition.id
    }

    pub fn definition(&self) -> &DistroDefinition {
        &self.definition
    }

    pub fn list_arches(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.arches.keys().map(|a| a.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn get_arch(&self, name: &str) -> Result<&Architecture, LookupError> {
        let unknown = || LookupError::Arch {
            distro: self.name().to_owned(),
            arch: name.to_owned(),
        };
        let arch: Arch = name.parse().map_err(|_| unknown())?;
        self.arches.get(&arch).ok_or_else(unknown)
    }
}

#[derive(Debug)]
pub struct Architecture {
    arch: Arch,
    distro: Arc<DistroDefinition>,
    image_types: BTreeMap<String, Arc<ImageType>>,
    aliases: BTreeMap<String, String>,
}

impl Architecture {
    fn new(arch: Arch, distro: Arc<DistroDefinition>) -> Self {
        Self {
            arch,
            distro,
            image_types: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.arch.as_str()
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn distro(&self) -> &DistroDefinition {
        &self.distro
    }

    /// Register an image type and its aliases. Names and aliases share one
    /// namespace; any overlap is a definition error.
    pub fn add_image_type(&mut self, image_type: ImageType) -> Result<(), DefinitionError> {
        let name = image_type.name().to_owned();
        let taken = |key: &str| -> Option<String> {
            if self.image_types.contains_key(key) {
                Some(key.to_owned())
            } else {
                self.aliases.get(key).cloned()
            }
        };
        if let Some(existing) = taken(&name) {
            return Err(DefinitionError::AliasCollision {
                alias: name.clone(),
                image_type: name,
                existing,
            });
        }
        for alias in image_type.aliases() {
            let existing = if *alias == name {
                Some(name.clone())
            } else {
                taken(alias)
            };
            if let Some(existing) = existing {
                return Err(DefinitionError::AliasCollision {
                    alias: alias.clone(),
                    image_type: name,
                    existing,
                });
            }
        }
        for alias in image_type.aliases() {
            self.aliases.insert(alias.clone(), name.clone());
        }
        self.image_types.insert(name, Arc::new(image_type));
        Ok(())
    }

    /// Canonical image type names, sorted.
    pub fn list_image_types(&self) -> Vec<&str> {
        self.image_types.keys().map(String::as_str).collect()
    }

    /// Look up by canonical name or alias.
    pub fn get_image_type(&self, name: &str) -> Result<&Arc<ImageType>, LookupError> {
        self.image_types
            .get(name)
            .or_else(|| {
                self.aliases
                    .get(name)
                    .and_then(|canonical| self.image_types.get(canonical))
            })
            .ok_or_else(|| LookupError::ImageType {
                distro: self.distro.name.clone(),
                arch: self.arch.to_string(),
                image_type: name.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DISTROS: &str = r#"
distros:
  - name: "test-distro-{{.MajorVersion}}"
    match: 'test-distro-[0-9]+'
    versions: ["1"]
    product: Test
    os_version: "{{.MajorVersion}}"
    release_version: "{{.MajorVersion}}"
    module_platform_id: "platform:t{{.MajorVersion}}"
    default_fs_type: ext4
    defs_path: test-distro
    runner: {name: org.osbuild.test}
"#;

    fn root_with(distro_yaml: &str) -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("distros.yaml"), DISTROS).unwrap();
        fs::create_dir_all(dir.path().join("test-distro")).unwrap();
        fs::write(dir.path().join("test-distro/distro.yaml"), distro_yaml).unwrap();
        let registry = Registry::new(DefsRoot::Dir(dir.path().to_path_buf()));
        (dir, registry)
    }

    const TWO_TARBALLS: &str = r"
image_types:
  tarball:
    aliases: [tar]
    filename: root.tar
    mime_type: application/x-tar
    image_kind: archive
    platforms: {x86_64: {}, aarch64: {}}
  other:
    aliases: [OTHER_ALIAS]
    filename: other.tar
    mime_type: application/x-tar
    image_kind: archive
    platforms: {aarch64: {}}
";

    #[test]
    fn lists_and_resolves_aliases() {
        let (_dir, registry) = root_with(TWO_TARBALLS);
        assert_eq!(registry.list_distros().unwrap(), vec!["test-distro-1"]);
        let distro = registry.get_distro("test-distro-1").unwrap().unwrap();
        assert_eq!(distro.list_arches(), vec!["aarch64", "x86_64"]);

        let x86 = distro.get_arch("x86_64").unwrap();
        assert_eq!(x86.list_image_types(), vec!["tarball"]);
        let by_alias = x86.get_image_type("tar").unwrap();
        assert!(Arc::ptr_eq(by_alias, x86.get_image_type("tarball").unwrap()));
        assert!(x86.get_image_type("other").is_err());

        let aarch64 = distro.get_arch("aarch64").unwrap();
        assert_eq!(aarch64.list_image_types(), vec!["other", "tarball"]);
    }

    #[test]
    fn distro_is_cached() {
        let (_dir, registry) = root_with(TWO_TARBALLS);
        let a = registry.get_distro("test-distro-1").unwrap().unwrap();
        let b = registry.get_distro("test-distro-1").unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_names() {
        let (_dir, registry) = root_with(TWO_TARBALLS);
        assert!(registry.get_distro("other-distro-1").unwrap().is_none());
        let distro = registry.get_distro("test-distro-1").unwrap().unwrap();
        assert!(matches!(
            distro.get_arch("ppc64le"),
            Err(LookupError::Arch { .. })
        ));
        assert!(matches!(distro.get_arch("i686"), Err(LookupError::Arch { .. })));
        let err = registry
            .lookup("test-distro-1", "x86_64", "qcow2")
            .unwrap_err()
            .to_string();
        assert_eq!(
            err,
            "image type 'qcow2' is not supported by test-distro-1 on x86_64"
        );
    }

    #[test]
    fn alias_collision_is_a_definition_error() {
        let yaml = r"
image_types:
  tarball:
    filename: root.tar
    mime_type: application/x-tar
    image_kind: archive
    platforms: {x86_64: {}}
  other:
    aliases: [tarball]
    filename: other.tar
    mime_type: application/x-tar
    image_kind: archive
    platforms: {x86_64: {}}
";
        let (_dir, registry) = root_with(yaml);
        let err = registry.get_distro("test-distro-1").unwrap_err();
        assert!(matches!(
            err,
            ImageError::Definition(DefinitionError::AliasCollision { .. })
        ));
    }

    #[test]
    fn embedded_distros_build() {
        let registry = Registry::new(DefsRoot::Embedded);
        let names = registry.list_distros().unwrap();
        assert!(names.contains(&"fedora-42".to_owned()));
        assert!(names.contains(&"rhel-8.10".to_owned()));
        for name in ["fedora-42", "rhel-8.10", "rhel-9.7", "rhel-10.0", "centos-9"] {
            let distro = registry.get_distro(name).unwrap().unwrap();
            assert!(distro.list_arches().contains(&"x86_64"), "{name}");
        }
        let compact = registry.get_distro("rhel-810").unwrap().unwrap();
        assert_eq!(compact.name(), "rhel-8.10");
    }
}
