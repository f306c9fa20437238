//! Resolved content and the osbuild `sources` section.
//!
//! Depsolving packages, resolving container digests and commit checksums all
//! happen outside this crate. Their results come back as `ResolvedContent`,
//! keyed the same way the manifest keys its references.

use super::Manifest;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default)]
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub remote_location: String,
    /// `<algorithm>:<hex>` of the rpm; also its source id.
    pub checksum: String,
    #[serde(default)]
    pub check_gpg: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub source: String,
    pub digest: String,
    pub image_id: String,
    pub local_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
    #[serde(default)]
    pub local_storage: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSpec {
    #[serde(rename = "ref")]
    pub reference: String,
    pub url: String,
    pub checksum: String,
    #[serde(default)]
    pub rhsm: bool,
}

/// Everything the planner leaves for an outside resolver, filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedContent {
    /// Depsolved packages keyed by chain (pipeline) name.
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<PackageSpec>>,
    /// Resolved containers keyed by the consuming pipeline.
    #[serde(default)]
    pub containers: BTreeMap<String, Vec<ContainerSpec>>,
    /// Resolved commits keyed by the consuming pipeline.
    #[serde(default)]
    pub commits: BTreeMap<String, CommitSpec>,
}

fn section(items: Map<String, Value>) -> Value {
    json!({ "items": items })
}

/// The `sources` object of an osbuild manifest. Each source type appears
/// only when it has items.
pub fn sources(manifest: &Manifest, resolved: &ResolvedContent) -> Value {
    let mut out = Map::new();

    let mut curl = Map::new();
    for pkg in resolved.packages.values().flatten() {
        curl.entry(pkg.checksum.clone())
            .or_insert_with(|| json!({ "url": pkg.remote_location }));
    }
    if !curl.is_empty() {
        out.insert("org.osbuild.curl".to_owned(), section(curl));
    }

    let mut ostree = Map::new();
    for commit in resolved.commits.values() {
        let mut remote = Map::new();
        remote.insert("url".to_owned(), json!(commit.url));
        if commit.rhsm {
            remote.insert("secrets".to_owned(), json!({ "name": "org.osbuild.rhsm.consumer" }));
        }
        ostree.insert(commit.checksum.clone(), json!({ "remote": remote }));
    }
    if !ostree.is_empty() {
        out.insert("org.osbuild.ostree".to_owned(), section(ostree));
    }

    let mut skopeo = Map::new();
    let mut local = Map::new();
    for container in resolved.containers.values().flatten() {
        if container.local_storage {
            local.insert(container.image_id.clone(), json!({}));
            continue;
        }
        let mut image = Map::new();
        image.insert("name".to_owned(), json!(container.source));
        image.insert("digest".to_owned(), json!(container.digest));
        if let Some(verify) = container.tls_verify {
            image.insert("tls-verify".to_owned(), json!(verify));
        }
        skopeo.insert(container.image_id.clone(), json!({ "image": image }));
    }
    if !skopeo.is_empty() {
        out.insert("org.osbuild.skopeo".to_owned(), section(skopeo));
    }
    if !local.is_empty() {
        out.insert("org.osbuild.containers-storage".to_owned(), section(local));
    }

    let inline: Map<String, Value> = manifest
        .inline
        .iter()
        .map(|(id, data)| {
            (
                id.to_string(),
                json!({ "encoding": "base64", "data": STANDARD.encode(data) }),
            )
        })
        .collect();
    if !inline.is_empty() {
        out.insert("org.osbuild.inline".to_owned(), section(inline));
    }

    Value::Object(out)
}
