//! Definition tree compiled into the binary.

static FILES: &[(&str, &str)] = &[
    ("distros.yaml", include_str!("../defs/distros.yaml")),
    ("fedora/distro.yaml", include_str!("../defs/fedora/distro.yaml")),
    (
        "fedora/image-config.yaml",
        include_str!("../defs/fedora/image-config.yaml"),
    ),
    ("rhel-8/distro.yaml", include_str!("../defs/rhel-8/distro.yaml")),
    ("rhel-9/distro.yaml", include_str!("../defs/rhel-9/distro.yaml")),
    ("rhel-10/distro.yaml", include_str!("../defs/rhel-10/distro.yaml")),
];

pub fn get(path: &str) -> Option<&'static str> {
    let path = path.trim_start_matches("./");
    FILES
        .iter()
        .find(|(name, _)| *name == path)
        .map(|(_, content)| *content)
}

pub fn paths() -> impl Iterator<Item = &'static str> {
    FILES.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_relative_path() {
        assert!(get("fedora/distro.yaml").is_some());
        assert!(get("./rhel-9/distro.yaml").is_some());
        assert!(get("rhel-7/distro.yaml").is_none());
    }

    #[test]
    fn paths_are_unique() {
        let mut all: Vec<_> = paths().collect();
        let len = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), len);
    }
}
