use imgplan_core::validator::validate_supported;
use imgplan_core::{make_parent_commit, ImageError, ImageType, Registry, SourceSpec};
use imgplan_defs::{ConditionContext, DefsRoot, ImageKind};
use imgplan_schema::blueprint::Package;
use imgplan_schema::{
    Blueprint, Customizations, ImageOptions, OstreeImageOptions, Repository,
};
use std::sync::Arc;

const OSTREE_URL: &str = "https://ostree.example.com/repo";

/// Every embedded image type available on x86_64.
fn x86_64_image_types() -> Vec<Arc<ImageType>> {
    let registry = Registry::new(DefsRoot::Embedded);
    let mut out = Vec::new();
    for name in registry.list_distros().unwrap() {
        let distro = registry.get_distro(&name).unwrap().unwrap();
        let Ok(arch) = distro.get_arch("x86_64") else {
            continue;
        };
        for image_type in arch.list_image_types() {
            out.push(Arc::clone(arch.get_image_type(image_type).unwrap()));
        }
    }
    assert!(!out.is_empty());
    out
}

/// The smallest request each image kind accepts.
fn minimal_request(image_type: &ImageType) -> (Blueprint, ImageOptions) {
    let mut bp = Blueprint::default();
    let mut options = ImageOptions::default();
    let kind = image_type.kind();
    if kind == ImageKind::OstreeSimplifiedInstaller {
        bp.customizations = Some(Customizations {
            installation_device: Some("/dev/vda".to_owned()),
            ..Default::default()
        });
    }
    if kind.needs_payload_commit() {
        options.ostree = Some(OstreeImageOptions {
            url: OSTREE_URL.to_owned(),
            ..Default::default()
        });
    }
    (bp, options)
}

fn label(image_type: &ImageType) -> String {
    format!("{} {}", image_type.distro().name, image_type.name())
}

#[test]
fn manifests_are_deterministic() {
    let resolved = imgplan_core::ResolvedContent::default();
    for image_type in x86_64_image_types() {
        let (bp, options) = minimal_request(&image_type);
        let (a, _) = image_type.manifest(&bp, &options, &[], 42).unwrap();
        let (b, _) = image_type.manifest(&bp, &options, &[], 42).unwrap();
        assert_eq!(
            a.serialize(&resolved).unwrap(),
            b.serialize(&resolved).unwrap(),
            "{}",
            label(&image_type)
        );
    }
}

#[test]
fn last_pipeline_is_the_export() {
    for image_type in x86_64_image_types() {
        let (bp, options) = minimal_request(&image_type);
        let (manifest, _) = image_type.manifest(&bp, &options, &[], 0).unwrap();
        let names = manifest.pipeline_names();
        assert_eq!(
            names.last().copied(),
            image_type.exports().first().map(String::as_str),
            "{}",
            label(&image_type)
        );
    }
}

#[test]
fn declared_pipelines_appear_in_order() {
    for image_type in x86_64_image_types() {
        let (bp, options) = minimal_request(&image_type);
        let (manifest, _) = image_type.manifest(&bp, &options, &[], 0).unwrap();
        let names = manifest.pipeline_names();
        let mut cursor = 0;
        for declared in image_type
            .build_pipelines()
            .iter()
            .chain(image_type.payload_pipelines())
        {
            let found = names[cursor..]
                .iter()
                .position(|n| *n == declared.as_str())
                .unwrap_or_else(|| panic!("{}: {declared} missing from {names:?}", label(&image_type)));
            cursor += found + 1;
        }
    }
}

#[test]
fn ostree_options_rejected_outside_ostree_kinds() {
    let options = ImageOptions {
        ostree: Some(OstreeImageOptions {
            url: OSTREE_URL.to_owned(),
            ..Default::default()
        }),
        ..Default::default()
    };
    for image_type in x86_64_image_types() {
        if image_type.kind().is_ostree() {
            continue;
        }
        let (bp, _) = minimal_request(&image_type);
        let err = image_type.manifest(&bp, &options, &[], 0).unwrap_err();
        assert!(
            matches!(err, ImageError::Validation(_)),
            "{}: {err}",
            label(&image_type)
        );
    }
}

#[test]
fn deploying_kinds_require_a_url() {
    let options = ImageOptions {
        ostree: Some(OstreeImageOptions {
            image_ref: "custom/ref".to_owned(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let mut checked = 0;
    for image_type in x86_64_image_types() {
        if !matches!(
            image_type.kind(),
            ImageKind::OstreeInstaller | ImageKind::OstreeDisk
        ) {
            continue;
        }
        let (bp, _) = minimal_request(&image_type);
        let err = image_type.manifest(&bp, &options, &[], 0).unwrap_err();
        assert!(matches!(err, ImageError::Validation(_)), "{}", label(&image_type));
        assert!(err.to_string().ends_with("ostree.url: required, there is no default available"));
        checked += 1;
    }
    assert!(checked > 0);
}

#[test]
fn supported_lists_and_zero_values() {
    let bp = Blueprint {
        packages: vec![Package {
            name: "tmux".to_owned(),
            ..Default::default()
        }],
        ..Default::default()
    };
    assert!(validate_supported(&[], &bp).is_err());
    assert!(validate_supported(&[], &Blueprint::default()).is_ok());
    let anything = vec!["name".to_owned(), "customizations.user".to_owned()];
    assert!(validate_supported(&anything, &Blueprint::default()).is_ok());
    assert!(validate_supported(&anything, &ImageOptions::default()).is_ok());
}

fn repo(id: &str, sets: &[&str]) -> Repository {
    Repository {
        id: id.to_owned(),
        baseurls: vec![format!("https://repos.example.com/{id}")],
        package_sets: sets.iter().map(|s| (*s).to_owned()).collect(),
        ..Default::default()
    }
}

#[test]
fn chain_repositories_follow_tags() {
    let registry = Registry::new(DefsRoot::Embedded);
    let image_type = registry.lookup("fedora-42", "x86_64", "server-qcow2").unwrap();
    let repos = vec![
        repo("everything", &[]),
        repo("build-tools", &["build"]),
        repo("extras", &["blueprint"]),
    ];
    let bp = Blueprint {
        packages: vec![Package {
            name: "tmux".to_owned(),
            ..Default::default()
        }],
        ..Default::default()
    };
    let (manifest, _) = image_type
        .manifest(&bp, &ImageOptions::default(), &repos, 0)
        .unwrap();

    let ids = |stage: &imgplan_core::PackageSetStage| -> Vec<String> {
        stage.repositories.iter().map(|r| r.id.clone()).collect()
    };
    let build = &manifest.package_set_chains["build"];
    assert_eq!(ids(&build[0]), vec!["everything", "build-tools"]);

    let os = &manifest.package_set_chains["os"];
    assert_eq!(os.len(), 2);
    assert_eq!(ids(&os[0]), vec!["everything"]);
    assert_eq!(os[1].name, "blueprint");
    assert_eq!(os[1].include, vec!["tmux"]);
    assert_eq!(ids(&os[1]), vec!["everything", "extras"]);

    for (pipeline, chain) in &manifest.package_set_chains {
        for stage in chain.iter().filter(|s| s.name != "blueprint") {
            assert!(
                stage.repositories.iter().all(|r| r.id != "extras"),
                "{pipeline}/{}",
                stage.name
            );
        }
    }
}

#[test]
fn resolved_definitions_resolve_to_themselves() {
    for image_type in x86_64_image_types() {
        let distro = image_type.distro();
        let ctx = ConditionContext::new(&distro.id, image_type.arch());
        let again = image_type
            .definition()
            .resolve(image_type.name(), &ctx)
            .unwrap();
        assert_eq!(&again, image_type.definition(), "{}", label(&image_type));
    }
}

#[test]
fn parent_commit_reconciliation() {
    assert_eq!(
        make_parent_commit(None, "fedora/42/x86_64/iot").unwrap(),
        (None, "fedora/42/x86_64/iot".to_owned())
    );

    let options = OstreeImageOptions {
        url: OSTREE_URL.to_owned(),
        image_ref: "custom/ref".to_owned(),
        rhsm: true,
        ..Default::default()
    };
    let (parent, reference) = make_parent_commit(Some(&options), "fedora/42/x86_64/iot").unwrap();
    assert_eq!(reference, "custom/ref");
    assert_eq!(
        parent,
        Some(SourceSpec {
            url: OSTREE_URL.to_owned(),
            reference: "custom/ref".to_owned(),
            rhsm: true,
        })
    );
}

#[test]
fn chains_are_sorted_and_ignore_package_order() {
    let registry = Registry::new(DefsRoot::Embedded);
    let image_type = registry.lookup("rhel-9.7", "x86_64", "qcow2").unwrap();
    let packages = |names: &[&str]| Blueprint {
        packages: names
            .iter()
            .map(|n| Package {
                name: (*n).to_owned(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };
    let options = ImageOptions::default();
    let (a, _) = image_type
        .manifest(&packages(&["vim-enhanced", "tmux", "git"]), &options, &[], 0)
        .unwrap();
    let (b, _) = image_type
        .manifest(&packages(&["git", "vim-enhanced", "tmux"]), &options, &[], 0)
        .unwrap();
    assert_eq!(a.package_set_chains, b.package_set_chains);

    for chain in a.package_set_chains.values() {
        for stage in chain {
            assert!(stage.include.windows(2).all(|w| w[0] < w[1]), "{}", stage.name);
            assert!(stage.exclude.windows(2).all(|w| w[0] < w[1]), "{}", stage.name);
        }
    }
}
