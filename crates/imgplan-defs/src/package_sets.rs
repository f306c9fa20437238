use crate::conditions::{ConditionContext, Conditions};
use crate::DefinitionError;
use serde::{Deserialize, Serialize};

/// One `package_sets` entry of an image type.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageSetDef {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Box<Conditions<PackageSetDef>>>,
}

/// Include and exclude lists after conditions were applied; sorted and
/// deduplicated.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ResolvedPackageSet {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ResolvedPackageSet {
    pub fn append(&mut self, other: ResolvedPackageSet) {
        self.include.extend(other.include);
        self.exclude.extend(other.exclude);
    }

    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.include.sort();
        self.include.dedup();
        self.exclude.sort();
        self.exclude.dedup();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

impl PackageSetDef {
    /// Base lists plus every matching condition, recursively.
    pub fn resolve(&self, ctx: &ConditionContext) -> Result<ResolvedPackageSet, DefinitionError> {
        let mut out = ResolvedPackageSet {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
        };
        if let Some(conditions) = &self.conditions {
            for matched in conditions.all_matches(ctx)? {
                out.append(matched.resolve(ctx)?);
            }
        }
        Ok(out.normalized())
    }
}

/// Resolve and merge a list of package set entries.
pub fn resolve_all(
    defs: &[PackageSetDef],
    ctx: &ConditionContext,
) -> Result<ResolvedPackageSet, DefinitionError> {
    let mut out = ResolvedPackageSet::default();
    for def in defs {
        out.append(def.resolve(ctx)?);
    }
    Ok(out.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgplan_schema::{Arch, DistroId};

    fn ctx(name: &str) -> ConditionContext {
        ConditionContext::new(&name.parse::<DistroId>().unwrap(), Arch::X86_64)
    }

    #[test]
    fn distro_name_condition_is_appended() {
        let def: PackageSetDef = serde_yaml::from_str(
            r"
include: [inc1]
exclude: [exc1]
conditions:
  distro_name:
    test-distro:
      include: [from-condition-inc2]
      exclude: [from-condition-exc2]
",
        )
        .unwrap();
        let resolved = def.resolve(&ctx("test-distro-1")).unwrap();
        assert_eq!(resolved.include, vec!["from-condition-inc2", "inc1"]);
        assert_eq!(resolved.exclude, vec!["exc1", "from-condition-exc2"]);

        let other = def.resolve(&ctx("fedora-42")).unwrap();
        assert_eq!(other.include, vec!["inc1"]);
    }

    #[test]
    fn all_matching_version_conditions_apply() {
        let def: PackageSetDef = serde_yaml::from_str(
            r"
include: [base]
conditions:
  version_less_than:
    '10': {include: [old]}
  version_greater_or_equal:
    '9.2': {include: [new]}
    '9.8': {include: [newest]}
",
        )
        .unwrap();
        let resolved = def.resolve(&ctx("rhel-9.6")).unwrap();
        assert_eq!(resolved.include, vec!["base", "new", "old"]);
    }

    #[test]
    fn merged_lists_are_sorted_and_deduplicated() {
        let defs = vec![
            PackageSetDef {
                include: vec!["zsh".to_owned(), "bash".to_owned()],
                ..Default::default()
            },
            PackageSetDef {
                include: vec!["bash".to_owned()],
                exclude: vec!["nano".to_owned()],
                ..Default::default()
            },
        ];
        let resolved = resolve_all(&defs, &ctx("fedora-42")).unwrap();
        assert_eq!(resolved.include, vec!["bash", "zsh"]);
        assert_eq!(resolved.exclude, vec!["nano"]);
    }
}
