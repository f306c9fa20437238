//! The pipeline manifest handed to the external image builder.
//!
//! A `Manifest` is a plan: pipelines of stages whose inputs still refer to
//! package-set chains, container lists and ostree commits by pipeline name.
//! `Manifest::serialize` binds those references to resolved content and
//! emits osbuild manifest format version 2.

pub mod assembler;
pub mod sources;
pub mod stages;

pub use sources::{CommitSpec, ContainerSpec, PackageSpec, ResolvedContent};

use crate::ostree::SourceSpec;
use crate::pkgsets::PackageSetChains;
use crate::ImageError;
use imgplan_schema::{Container, ContentDigest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A stage input, named by what it refers to rather than by content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Input {
    /// Packages depsolved for the chain of the given pipeline.
    Packages { chain: String },
    /// Container images listed for the given pipeline.
    Containers { pipeline: String },
    /// The ostree commit sourced for the given pipeline.
    Commit { pipeline: String },
    /// The file tree another pipeline produced.
    Tree { pipeline: String },
    /// One file another pipeline produced.
    PipelineFile { pipeline: String, file: String },
    /// Inline sources by id.
    Files { ids: Vec<ContentDigest> },
    /// A commit another pipeline produced, by ref.
    PipelineCommit { pipeline: String, reference: String },
}

/// Option values known only once content is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Binding {
    /// Set option `option` to the checksum of the commit sourced for
    /// `pipeline`. Left out while unresolved.
    CommitChecksum { option: String, pipeline: String },
    /// Replace [`KERNEL_VERSION`] in string options with the
    /// `version-release.arch` of `package` from `chain`.
    KernelVersion { chain: String, package: String },
}

/// Placeholder for a kernel version in stage options.
pub const KERNEL_VERSION: &str = "@KERNEL_VERSION@";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Input>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub devices: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
}

impl Stage {
    pub fn new(stage_type: &str, options: Value) -> Self {
        Self {
            stage_type: stage_type.to_owned(),
            inputs: BTreeMap::new(),
            options,
            devices: Map::new(),
            mounts: Vec::new(),
            bindings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_input(mut self, name: &str, input: Input) -> Self {
        self.inputs.insert(name.to_owned(), input);
        self
    }

    #[must_use]
    pub fn with_devices(mut self, devices: Map<String, Value>) -> Self {
        self.devices = devices;
        self
    }

    #[must_use]
    pub fn with_mounts(mut self, mounts: Vec<Value>) -> Self {
        self.mounts = mounts;
        self
    }

    #[must_use]
    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    /// `name:<pipeline>` of the build root the stages run in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(name: &str, build: Option<&str>) -> Self {
        Self {
            name: name.to_owned(),
            build: build.map(|b| format!("name:{b}")),
            runner: None,
            stages: Vec::new(),
        }
    }

    pub fn add(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn extend(&mut self, stages: impl IntoIterator<Item = Stage>) {
        self.stages.extend(stages);
    }

    pub fn stage_types(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage_type.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub pipelines: Vec<Pipeline>,
    pub package_set_chains: PackageSetChains,
    /// Commits to resolve, keyed by the pipeline that consumes them.
    pub ostree_sources: BTreeMap<String, SourceSpec>,
    /// Containers to resolve, keyed by the pipeline that consumes them.
    pub container_sources: BTreeMap<String, Vec<Container>>,
    /// Inline file contents keyed by their `sha256:` id.
    pub inline: BTreeMap<ContentDigest, String>,
}

fn replace_in_strings(value: &mut Value, from: &str, to: &str) {
    match value {
        Value::String(s) if s.contains(from) => *s = s.replace(from, to),
        Value::Array(items) => items.iter_mut().for_each(|v| replace_in_strings(v, from, to)),
        Value::Object(map) => map.values_mut().for_each(|v| replace_in_strings(v, from, to)),
        _ => {}
    }
}

fn apply_binding(options: &mut Value, binding: &Binding, resolved: &ResolvedContent) {
    match binding {
        Binding::CommitChecksum { option, pipeline } => {
            if let (Some(commit), Value::Object(map)) = (resolved.commits.get(pipeline), &mut *options) {
                map.insert(option.clone(), json!(commit.checksum));
            }
        }
        Binding::KernelVersion { chain, package } => {
            let kernel = resolved
                .packages
                .get(chain)
                .and_then(|pkgs| pkgs.iter().find(|p| &p.name == package));
            if let Some(kernel) = kernel {
                let version = format!("{}-{}.{}", kernel.version, kernel.release, kernel.arch);
                replace_in_strings(options, KERNEL_VERSION, &version);
            }
        }
    }
}

pub fn inline_id(data: &str) -> ContentDigest {
    ContentDigest::new(format!("sha256:{:x}", Sha256::digest(data.as_bytes())))
}

impl Manifest {
    pub fn add_inline(&mut self, data: &str) -> ContentDigest {
        let id = inline_id(data);
        self.inline.entry(id.clone()).or_insert_with(|| data.to_owned());
        id
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    fn bind_input(&self, input: &Input, resolved: &ResolvedContent) -> Value {
        match input {
            Input::Packages { chain } => {
                let references: Vec<Value> = resolved
                    .packages
                    .get(chain)
                    .map(|pkgs| {
                        pkgs.iter()
                            .map(|p| {
                                json!({
                                    "id": p.checksum,
                                    "options": {"metadata": {"rpm.check_gpg": p.check_gpg}},
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                json!({"type": "org.osbuild.files", "origin": "org.osbuild.source", "references": references})
            }
            Input::Containers { pipeline } => {
                let mut references = Map::new();
                for c in resolved.containers.get(pipeline).into_iter().flatten() {
                    references.insert(c.image_id.clone(), json!({"name": c.local_name}));
                }
                json!({"type": "org.osbuild.containers", "origin": "org.osbuild.source", "references": references})
            }
            Input::Commit { pipeline } => {
                let mut references = Map::new();
                if let Some(commit) = resolved.commits.get(pipeline) {
                    references.insert(commit.checksum.clone(), json!({"ref": commit.reference}));
                }
                json!({"type": "org.osbuild.ostree", "origin": "org.osbuild.source", "references": references})
            }
            Input::Tree { pipeline } => json!({
                "type": "org.osbuild.tree",
                "origin": "org.osbuild.pipeline",
                "references": [format!("name:{pipeline}")],
            }),
            Input::PipelineFile { pipeline, file } => json!({
                "type": "org.osbuild.files",
                "origin": "org.osbuild.pipeline",
                "references": {format!("name:{pipeline}"): {"file": file}},
            }),
            Input::PipelineCommit { pipeline, reference } => json!({
                "type": "org.osbuild.ostree",
                "origin": "org.osbuild.pipeline",
                "references": {format!("name:{pipeline}"): {"ref": reference}},
            }),
            Input::Files { ids } => {
                let references: Map<String, Value> =
                    ids.iter().map(|id| (id.to_string(), json!({}))).collect();
                json!({"type": "org.osbuild.files", "origin": "org.osbuild.source", "references": references})
            }
        }
    }

    fn bind_stage(&self, stage: &Stage, resolved: &ResolvedContent) -> Value {
        let mut out = Map::new();
        out.insert("type".to_owned(), json!(stage.stage_type));
        if !stage.inputs.is_empty() {
            let inputs: Map<String, Value> = stage
                .inputs
                .iter()
                .map(|(name, input)| (name.clone(), self.bind_input(input, resolved)))
                .collect();
            out.insert("inputs".to_owned(), Value::Object(inputs));
        }
        if !stage.options.is_null() {
            let mut options = stage.options.clone();
            for binding in &stage.bindings {
                apply_binding(&mut options, binding, resolved);
            }
            out.insert("options".to_owned(), options);
        }
        if !stage.devices.is_empty() {
            out.insert("devices".to_owned(), Value::Object(stage.devices.clone()));
        }
        if !stage.mounts.is_empty() {
            out.insert("mounts".to_owned(), Value::Array(stage.mounts.clone()));
        }
        Value::Object(out)
    }

    /// The osbuild manifest (format version 2) for this plan with `resolved`
    /// bound into its inputs and sources. Missing resolutions leave empty
    /// references.
    pub fn to_osbuild(&self, resolved: &ResolvedContent) -> Value {
        let pipelines: Vec<Value> = self
            .pipelines
            .iter()
            .map(|p| {
                let mut out = Map::new();
                out.insert("name".to_owned(), json!(p.name));
                if let Some(build) = &p.build {
                    out.insert("build".to_owned(), json!(build));
                }
                if let Some(runner) = &p.runner {
                    out.insert("runner".to_owned(), json!(runner));
                }
                let stages: Vec<Value> =
                    p.stages.iter().map(|s| self.bind_stage(s, resolved)).collect();
                out.insert("stages".to_owned(), Value::Array(stages));
                Value::Object(out)
            })
            .collect();
        json!({
            "version": "2",
            "pipelines": pipelines,
            "sources": sources::sources(self, resolved),
        })
    }

    pub fn serialize(&self, resolved: &ResolvedContent) -> Result<Vec<u8>, ImageError> {
        let mut bytes = serde_json::to_vec_pretty(&self.to_osbuild(resolved))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// blake3 digest of the serialized manifest.
    pub fn digest(&self, resolved: &ResolvedContent) -> Result<String, ImageError> {
        Ok(blake3::hash(&self.serialize(resolved)?).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Manifest {
        let mut m = Manifest::default();
        let id = m.add_inline("hello\n");
        let mut build = Pipeline::new("build", None);
        build.runner = Some("org.osbuild.fedora42".to_owned());
        build.add(
            Stage::new("org.osbuild.rpm", json!({})).with_input(
                "packages",
                Input::Packages {
                    chain: "build".to_owned(),
                },
            ),
        );
        let mut os = Pipeline::new("os", Some("build"));
        os.add(
            Stage::new("org.osbuild.copy", json!({"paths": []}))
                .with_input("inlinefile", Input::Files { ids: vec![id] }),
        );
        m.pipelines = vec![build, os];
        m
    }

    #[test]
    fn inline_ids_are_content_addressed() {
        let mut m = Manifest::default();
        let a = m.add_inline("x");
        let b = m.add_inline("x");
        assert_eq!(a, b);
        assert_eq!(m.inline.len(), 1);
        assert_eq!(
            a.to_string(),
            "sha256:2d711642b726b04401627ca9fbac32f5c8530fb1903cc4db02258717921a4881"
        );
    }

    #[test]
    fn skeleton_has_empty_references() {
        let m = plan();
        let v = m.to_osbuild(&ResolvedContent::default());
        assert_eq!(v["version"], "2");
        assert_eq!(v["pipelines"][0]["runner"], "org.osbuild.fedora42");
        assert_eq!(v["pipelines"][1]["build"], "name:build");
        let refs = &v["pipelines"][0]["stages"][0]["inputs"]["packages"]["references"];
        assert_eq!(refs, &json!([]));
        assert!(v["sources"]["org.osbuild.inline"]["items"].is_object());
    }

    #[test]
    fn resolved_packages_are_bound() {
        let m = plan();
        let mut resolved = ResolvedContent::default();
        resolved.packages.insert(
            "build".to_owned(),
            vec![PackageSpec {
                name: "bash".to_owned(),
                version: "5.2".to_owned(),
                release: "1.fc42".to_owned(),
                arch: "x86_64".to_owned(),
                remote_location: "https://mirror.example.com/bash.rpm".to_owned(),
                checksum: "sha256:abcd".to_owned(),
                check_gpg: true,
                ..Default::default()
            }],
        );
        let v = m.to_osbuild(&resolved);
        let refs = &v["pipelines"][0]["stages"][0]["inputs"]["packages"]["references"];
        assert_eq!(refs[0]["id"], "sha256:abcd");
        assert_eq!(refs[0]["options"]["metadata"]["rpm.check_gpg"], true);
        assert_eq!(
            v["sources"]["org.osbuild.curl"]["items"]["sha256:abcd"]["url"],
            "https://mirror.example.com/bash.rpm"
        );
    }

    #[test]
    fn bindings_fill_late_options() {
        let mut m = Manifest::default();
        let mut p = Pipeline::new("ostree-commit", Some("build"));
        p.add(
            Stage::new("org.osbuild.ostree.commit", json!({"ref": "fedora/42/x86_64/iot"}))
                .with_binding(Binding::CommitChecksum {
                    option: "parent".to_owned(),
                    pipeline: "ostree-commit".to_owned(),
                }),
        );
        p.add(
            Stage::new("org.osbuild.dracut", json!({"kernel": [KERNEL_VERSION]})).with_binding(
                Binding::KernelVersion {
                    chain: "os".to_owned(),
                    package: "kernel".to_owned(),
                },
            ),
        );
        m.pipelines.push(p);

        let skeleton = m.to_osbuild(&ResolvedContent::default());
        assert!(skeleton["pipelines"][0]["stages"][0]["options"]
            .get("parent")
            .is_none());

        let mut resolved = ResolvedContent::default();
        resolved.commits.insert(
            "ostree-commit".to_owned(),
            CommitSpec {
                reference: "fedora/42/x86_64/iot".to_owned(),
                url: "https://example.com/repo".to_owned(),
                checksum: "abc123".to_owned(),
                rhsm: false,
            },
        );
        resolved.packages.insert(
            "os".to_owned(),
            vec![PackageSpec {
                name: "kernel".to_owned(),
                version: "6.11.4".to_owned(),
                release: "301.fc42".to_owned(),
                arch: "x86_64".to_owned(),
                ..Default::default()
            }],
        );
        let v = m.to_osbuild(&resolved);
        assert_eq!(v["pipelines"][0]["stages"][0]["options"]["parent"], "abc123");
        assert_eq!(
            v["pipelines"][0]["stages"][1]["options"]["kernel"][0],
            "6.11.4-301.fc42.x86_64"
        );
    }

    #[test]
    fn serialization_and_digest_are_stable() {
        let m = plan();
        let resolved = ResolvedContent::default();
        assert_eq!(m.serialize(&resolved).unwrap(), m.serialize(&resolved).unwrap());
        assert_eq!(m.digest(&resolved).unwrap().len(), 64);
    }
}
