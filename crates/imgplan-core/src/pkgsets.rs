//! Package-set chains.
//!
//! A chain is the ordered list of package-set stages one pipeline needs
//! depsolved: the image type's own set first, then (on the pipeline that
//! installs them) the blueprint packages. Each stage carries the repositories
//! it may resolve against. Nothing here talks to a repository.

use imgplan_defs::ResolvedPackageSet;
use imgplan_schema::blueprint::normalize_string_list;
use imgplan_schema::repository::BLUEPRINT_PACKAGE_SET;
use imgplan_schema::Repository;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSetStage {
    pub name: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub repositories: Vec<Repository>,
}

/// Chains keyed by the pipeline whose `rpm` stage consumes them.
pub type PackageSetChains = BTreeMap<String, Vec<PackageSetStage>>;

/// The pipeline a named package set feeds, if the image type has it.
pub fn pipeline_for_set(set: &str, pipelines: &[String]) -> Option<String> {
    let has = |name: &str| pipelines.iter().any(|p| p == name);
    let target = match set {
        "installer" if has("anaconda-tree") => "anaconda-tree",
        "installer" if has("coi-tree") => "coi-tree",
        "container" => "container-tree",
        other => other,
    };
    has(target).then(|| target.to_owned())
}

#[derive(Debug, Clone)]
pub struct ChainRequest<'a> {
    /// Condition-resolved package sets of the image type.
    pub package_sets: &'a IndexMap<String, ResolvedPackageSet>,
    /// Build and payload pipeline names.
    pub pipelines: &'a [String],
    /// Additional includes per pipeline (platform and runner packages).
    pub extra: BTreeMap<String, Vec<String>>,
    /// Pipeline receiving the blueprint stage.
    pub blueprint_pipeline: Option<&'a str>,
    pub blueprint_packages: Vec<String>,
    pub repositories: &'a [Repository],
}

fn tagged_blueprint(repo: &Repository) -> bool {
    repo.package_sets.iter().any(|s| s == BLUEPRINT_PACKAGE_SET)
}

pub fn build_chains(req: &ChainRequest<'_>) -> PackageSetChains {
    let mut bases: BTreeMap<String, ResolvedPackageSet> = BTreeMap::new();
    for (set, resolved) in req.package_sets {
        match pipeline_for_set(set, req.pipelines) {
            Some(pipeline) => bases.entry(pipeline).or_default().append(resolved.clone()),
            None => debug!("package set '{set}' has no matching pipeline; dropped"),
        }
    }
    for (pipeline, packages) in &req.extra {
        if req.pipelines.iter().any(|p| p == pipeline) {
            bases
                .entry(pipeline.clone())
                .or_default()
                .include
                .extend(packages.iter().cloned());
        }
    }

    let mut chains = PackageSetChains::new();
    for (pipeline, set) in bases {
        let set = set.normalized();
        if set.is_empty() {
            continue;
        }
        let repositories = req
            .repositories
            .iter()
            .filter(|r| r.applies_to(&pipeline) && !tagged_blueprint(r))
            .cloned()
            .collect();
        chains.insert(
            pipeline.clone(),
            vec![PackageSetStage {
                name: pipeline,
                include: set.include,
                exclude: set.exclude,
                repositories,
            }],
        );
    }

    let packages = normalize_string_list(&req.blueprint_packages);
    if let (Some(pipeline), false) = (req.blueprint_pipeline, packages.is_empty()) {
        let repositories = req
            .repositories
            .iter()
            .filter(|r| r.is_global() || tagged_blueprint(r))
            .cloned()
            .collect();
        chains
            .entry(pipeline.to_owned())
            .or_default()
            .push(PackageSetStage {
                name: BLUEPRINT_PACKAGE_SET.to_owned(),
                include: packages,
                exclude: Vec::new(),
                repositories,
            });
    }
    chains
}
