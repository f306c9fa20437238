use super::{describe, json_pretty, lookup, print_warnings, Target, EXIT_SUCCESS};
use imgplan_core::{Manifest, Registry, ResolvedContent};
use imgplan_schema::{Blueprint, ImageOptions, Repository};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const CHAINS_FILE: &str = "chains.json";
pub const SOURCES_FILE: &str = "sources.json";

/// A build request as read from `--config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default)]
    pub blueprint: Blueprint,
    #[serde(default)]
    pub options: ImageOptions,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub seed: u64,
    /// Depsolve and resolution results, when already known.
    #[serde(default)]
    pub resolved: ResolvedContent,
}

pub fn load_config(path: &Path) -> Result<BuildConfig, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("input error: failed to read config {}: {e}", path.display()))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .map_err(|e| format!("input error: failed to parse config {}: {e}", path.display())),
        Some("toml") => toml::from_str(&content)
            .map_err(|e| format!("input error: failed to parse config {}: {e}", path.display())),
        other => Err(format!(
            "input error: unsupported config extension '{}' (expected .toml or .json)",
            other.unwrap_or_default()
        )),
    }
}

/// What the external resolver still has to fetch for this plan.
fn unresolved_sources(manifest: &Manifest) -> serde_json::Value {
    serde_json::json!({
        "ostree": manifest.ostree_sources,
        "containers": manifest.container_sources,
    })
}

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> Result<(), String> {
    let path = dir.join(name);
    debug!("writing {}", path.display());
    fs::write(&path, contents).map_err(|e| format!("failed to write {}: {e}", path.display()))
}

pub fn run(
    registry: &Registry,
    target: &Target<'_>,
    config: &Path,
    output: &Path,
    json: bool,
) -> Result<u8, String> {
    let image_type = lookup(registry, target)?;
    let config = load_config(config)?;
    let (manifest, warnings) = image_type
        .manifest(
            &config.blueprint,
            &config.options,
            &config.repositories,
            config.seed,
        )
        .map_err(|e| describe(&e))?;
    print_warnings(&warnings);

    fs::create_dir_all(output)
        .map_err(|e| format!("failed to create {}: {e}", output.display()))?;
    let bytes = manifest
        .serialize(&config.resolved)
        .map_err(|e| describe(&e))?;
    write_file(output, MANIFEST_FILE, &bytes)?;
    let chains = json_pretty(&manifest.package_set_chains)?;
    write_file(output, CHAINS_FILE, format!("{chains}\n").as_bytes())?;
    let sources = json_pretty(&unresolved_sources(&manifest))?;
    write_file(output, SOURCES_FILE, format!("{sources}\n").as_bytes())?;

    let digest = manifest
        .digest(&config.resolved)
        .map_err(|e| describe(&e))?;
    info!("plan {digest} written to {}", output.display());
    if json {
        let payload = serde_json::json!({
            "digest": digest,
            "image_type": image_type.name(),
            "filename": image_type.filename(),
            "output": output,
            "files": [MANIFEST_FILE, CHAINS_FILE, SOURCES_FILE],
            "warnings": warnings,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("planned {} ({})", image_type.name(), image_type.filename());
        println!("plan id: {digest}");
        println!("output: {}", output.display());
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.toml");
        fs::write(
            &path,
            r#"
seed = 7

[blueprint]
name = "edge"

[options.ostree]
url = "https://ostree.example.com/repo"

[[repositories]]
id = "baseos"
baseurls = ["https://repos.example.com/baseos"]
"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.blueprint.name, "edge");
        assert_eq!(
            config.options.ostree_url(),
            Some("https://ostree.example.com/repo")
        );
        assert_eq!(config.repositories[0].id, "baseos");
    }

    #[test]
    fn json_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.json");
        fs::write(&path, "{}").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.seed, 0);
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn unknown_keys_and_extensions_are_input_errors() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("build.json");
        fs::write(&json, r#"{"blueprints": {}}"#).unwrap();
        assert!(load_config(&json).unwrap_err().starts_with("input error: "));

        let yaml = dir.path().join("build.yaml");
        fs::write(&yaml, "seed: 1").unwrap();
        let err = load_config(&yaml).unwrap_err();
        assert!(err.contains("expected .toml or .json"), "{err}");
    }
}
