use super::{describe, json_pretty, lookup, print_warnings, Target, EXIT_SUCCESS};
use imgplan_core::{Registry, ResolvedContent};
use imgplan_schema::blueprint::parse_blueprint_file;
use imgplan_schema::{Blueprint, ImageOptions};
use std::path::Path;
use tracing::info;

pub fn load_blueprint(path: Option<&Path>) -> Result<Blueprint, String> {
    match path {
        Some(path) => parse_blueprint_file(path).map_err(|e| format!("input error: {e}")),
        None => Ok(Blueprint::default()),
    }
}

pub fn run(
    registry: &Registry,
    target: &Target<'_>,
    blueprint: Option<&Path>,
    seed: u64,
    chains: bool,
    json: bool,
) -> Result<u8, String> {
    let image_type = lookup(registry, target)?;
    let bp = load_blueprint(blueprint)?;
    let (manifest, warnings) = image_type
        .manifest(&bp, &ImageOptions::default(), &[], seed)
        .map_err(|e| describe(&e))?;
    print_warnings(&warnings);

    if chains {
        println!("{}", json_pretty(&manifest.package_set_chains)?);
        return Ok(EXIT_SUCCESS);
    }

    let resolved = ResolvedContent::default();
    let digest = manifest.digest(&resolved).map_err(|e| describe(&e))?;
    info!("plan {digest} for {} {}", target.distro, image_type.name());
    if json {
        let payload = serde_json::json!({
            "digest": digest,
            "image_type": image_type.name(),
            "filename": image_type.filename(),
            "exports": image_type.exports(),
            "warnings": warnings,
            "manifest": manifest.to_osbuild(&resolved),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let bytes = manifest.serialize(&resolved).map_err(|e| describe(&e))?;
        print!("{}", String::from_utf8_lossy(&bytes));
    }
    Ok(EXIT_SUCCESS)
}
