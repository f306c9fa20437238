use super::{describe, json_pretty, EXIT_SUCCESS};
use console::Style;
use imgplan_core::{Distro, LookupError, Registry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct DistroEntry {
    name: String,
    arches: BTreeMap<String, Vec<String>>,
}

fn entry(distro: &Distro) -> DistroEntry {
    let mut arches = BTreeMap::new();
    for name in distro.list_arches() {
        if let Ok(arch) = distro.get_arch(name) {
            let types = arch
                .list_image_types()
                .into_iter()
                .map(str::to_owned)
                .collect();
            arches.insert(name.to_owned(), types);
        }
    }
    DistroEntry {
        name: distro.name().to_owned(),
        arches,
    }
}

fn distros(registry: &Registry, only: Option<&str>) -> Result<Vec<Arc<Distro>>, String> {
    if let Some(name) = only {
        return match registry.get_distro(name).map_err(|e| describe(&e))? {
            Some(distro) => Ok(vec![distro]),
            None => Err(LookupError::Distro(name.to_owned()).to_string()),
        };
    }
    let mut out = Vec::new();
    for name in registry.list_distros().map_err(|e| describe(&e))? {
        if let Some(distro) = registry.get_distro(&name).map_err(|e| describe(&e))? {
            out.push(distro);
        }
    }
    Ok(out)
}

pub fn run(registry: &Registry, only: Option<&str>, json: bool) -> Result<u8, String> {
    let entries: Vec<DistroEntry> = distros(registry, only)?
        .iter()
        .map(|d| entry(d))
        .collect();
    if json {
        println!("{}", json_pretty(&entries)?);
        return Ok(EXIT_SUCCESS);
    }
    let bold = Style::new().bold();
    for distro in &entries {
        println!("{}", bold.apply_to(&distro.name));
        for (arch, types) in &distro.arches {
            println!("  {arch:<8} {}", types.join(", "));
        }
    }
    Ok(EXIT_SUCCESS)
}
