//! Default supported/required paths per image kind.
//!
//! An image type's `blueprint:` block replaces the supported lists and adds
//! to the required ones.

use imgplan_defs::{BlueprintRules, ImageKind};

const BASE: &[&str] = &["name", "description", "version", "distro"];

const PACKAGES: &[&str] = &["packages", "modules", "groups"];

const OS: &[&str] = &[
    "customizations.hostname",
    "customizations.kernel",
    "customizations.sshkey",
    "customizations.user",
    "customizations.group",
    "customizations.timezone",
    "customizations.locale",
    "customizations.firewall",
    "customizations.services",
    "customizations.directories",
    "customizations.files",
    "customizations.repositories",
    "customizations.fips",
    "customizations.rpm",
    "customizations.rhsm",
];

const COMMIT: &[&str] = &[
    "customizations.hostname",
    "customizations.kernel.name",
    "customizations.sshkey",
    "customizations.user",
    "customizations.group",
    "customizations.timezone",
    "customizations.locale",
    "customizations.firewall",
    "customizations.services",
    "customizations.directories",
    "customizations.files",
    "customizations.repositories",
    "customizations.fips",
    "customizations.rpm",
    "customizations.rhsm",
];

const DEPLOYMENT: &[&str] = &[
    "customizations.user",
    "customizations.group",
    "customizations.sshkey",
    "customizations.services",
    "customizations.kernel.append",
    "customizations.ignition",
    "customizations.directories",
    "customizations.files",
    "customizations.fips",
    "customizations.filesystem",
    "customizations.disk",
];

const OPTIONS_DISK: &[&str] = &["size", "partitioning_mode", "subscription", "facts"];
const OPTIONS_TREE: &[&str] = &["subscription", "facts"];
const OPTIONS_OSTREE: &[&str] = &["ostree", "subscription", "facts"];
const OPTIONS_OSTREE_DISK: &[&str] = &["size", "partitioning_mode", "ostree", "subscription", "facts"];

pub const OSTREE_URL: &str = "ostree.url";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rules {
    pub supported: Vec<String>,
    pub required: Vec<String>,
    pub supported_options: Vec<String>,
    pub required_options: Vec<String>,
}

fn list(parts: &[&[&str]]) -> Vec<String> {
    parts
        .iter()
        .flat_map(|p| p.iter())
        .map(|s| (*s).to_owned())
        .collect()
}

fn kind_defaults(kind: ImageKind) -> Rules {
    match kind {
        ImageKind::Disk => Rules {
            supported: list(&[
                BASE,
                PACKAGES,
                &["containers", "customizations.openscap"],
                OS,
                &["customizations.filesystem", "customizations.disk"],
            ]),
            supported_options: list(&[OPTIONS_DISK]),
            ..Rules::default()
        },
        ImageKind::Container | ImageKind::Archive => Rules {
            supported: list(&[BASE, PACKAGES, &["containers", "customizations.openscap"], OS]),
            supported_options: list(&[OPTIONS_TREE]),
            ..Rules::default()
        },
        ImageKind::BootableContainer => Rules {
            supported: list(&[
                BASE,
                PACKAGES,
                &[
                    "customizations.user",
                    "customizations.group",
                    "customizations.kernel",
                    "customizations.services",
                    "customizations.directories",
                    "customizations.files",
                ],
            ]),
            supported_options: list(&[&["facts"]]),
            ..Rules::default()
        },
        ImageKind::OstreeCommit | ImageKind::OstreeContainer => Rules {
            supported: list(&[BASE, PACKAGES, &["containers"], COMMIT]),
            supported_options: list(&[OPTIONS_OSTREE]),
            ..Rules::default()
        },
        ImageKind::OstreeDisk => Rules {
            supported: list(&[BASE, DEPLOYMENT]),
            supported_options: list(&[OPTIONS_OSTREE_DISK]),
            required_options: list(&[&[OSTREE_URL]]),
            ..Rules::default()
        },
        ImageKind::OstreeInstaller => Rules {
            supported: list(&[
                BASE,
                &[
                    "customizations.user",
                    "customizations.group",
                    "customizations.sshkey",
                    "customizations.installer",
                    "customizations.fips",
                ],
            ]),
            supported_options: list(&[OPTIONS_OSTREE]),
            required_options: list(&[&[OSTREE_URL]]),
            ..Rules::default()
        },
        ImageKind::OstreeSimplifiedInstaller => Rules {
            supported: list(&[
                BASE,
                &[
                    "customizations.installation_device",
                    "customizations.fdo",
                    "customizations.ignition",
                    "customizations.user",
                    "customizations.group",
                    "customizations.kernel.append",
                    "customizations.fips",
                    "customizations.filesystem",
                ],
            ]),
            required: list(&[&["customizations.installation_device"]]),
            supported_options: list(&[OPTIONS_OSTREE_DISK]),
            required_options: list(&[&[OSTREE_URL]]),
        },
        ImageKind::TarInstaller => Rules {
            supported: list(&[
                BASE,
                PACKAGES,
                &["containers", "customizations.installer", "customizations.openscap"],
                OS,
            ]),
            supported_options: list(&[OPTIONS_TREE]),
            ..Rules::default()
        },
        ImageKind::LiveInstaller => Rules {
            supported: list(&[
                BASE,
                PACKAGES,
                &["customizations.installer.unattended", "customizations.installer.modules"],
            ]),
            supported_options: list(&[OPTIONS_TREE]),
            ..Rules::default()
        },
    }
}

/// Kind defaults with the image type's own block applied on top.
pub fn rules_for(kind: ImageKind, block: Option<&BlueprintRules>) -> Rules {
    let mut rules = kind_defaults(kind);
    let Some(block) = block else {
        return rules;
    };
    if let Some(supported) = &block.supported {
        rules.supported = list(&[BASE]);
        rules.supported.extend(supported.iter().cloned());
    }
    if let Some(supported) = &block.supported_options {
        rules.supported_options.clone_from(supported);
    }
    rules.required.extend(block.required.iter().cloned());
    rules.required_options.extend(block.required_options.iter().cloned());
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ostree_kinds_accept_ostree_options() {
        for kind in [
            ImageKind::Disk,
            ImageKind::Container,
            ImageKind::Archive,
            ImageKind::TarInstaller,
            ImageKind::LiveInstaller,
            ImageKind::BootableContainer,
        ] {
            let rules = rules_for(kind, None);
            assert!(
                !rules.supported_options.iter().any(|p| p.starts_with("ostree")),
                "{kind}"
            );
        }
        assert!(rules_for(ImageKind::OstreeDisk, None)
            .required_options
            .contains(&OSTREE_URL.to_owned()));
    }

    #[test]
    fn ostree_commits_embed_containers_but_deployments_do_not() {
        let containers = "containers".to_owned();
        assert!(rules_for(ImageKind::OstreeCommit, None).supported.contains(&containers));
        assert!(rules_for(ImageKind::OstreeContainer, None).supported.contains(&containers));
        assert!(!rules_for(ImageKind::OstreeDisk, None).supported.contains(&containers));
    }

    #[test]
    fn block_replaces_supported_and_extends_required() {
        let block = BlueprintRules {
            supported: Some(vec!["customizations.user".to_owned()]),
            required: vec!["customizations.user".to_owned()],
            ..Default::default()
        };
        let rules = rules_for(ImageKind::Disk, Some(&block));
        assert!(rules.supported.contains(&"name".to_owned()));
        assert!(!rules.supported.contains(&"packages".to_owned()));
        assert_eq!(rules.required, vec!["customizations.user"]);
        assert!(rules.supported_options.contains(&"size".to_owned()));
    }
}
