use imgplan_core::{effective_partitioning_mode, ImageError, Registry};
use imgplan_defs::{BootMode, DefsRoot};
use imgplan_schema::{
    Blueprint, Customizations, DiskCustomization, FilesystemCustomization, ImageOptions,
    OstreeImageOptions, PartitionCustomization, PartitioningMode,
};
use std::fs;
use std::sync::Arc;

fn embedded() -> Registry {
    Registry::new(DefsRoot::Embedded)
}

fn with_customizations(c: Customizations) -> Blueprint {
    Blueprint {
        name: "scenario".to_owned(),
        customizations: Some(c),
        ..Default::default()
    }
}

fn ostree_options(url: &str) -> ImageOptions {
    ImageOptions {
        ostree: Some(OstreeImageOptions {
            url: url.to_owned(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

const TEST_DISTROS: &str = r#"
distros:
  - name: "test-distro-{{.MajorVersion}}"
    match: 'test-distro-[0-9]+'
    versions: ["1"]
    product: Test
    os_version: "{{.MajorVersion}}"
    release_version: "{{.MajorVersion}}"
    module_platform_id: "platform:t{{.MajorVersion}}"
    default_fs_type: ext4
    defs_path: test-distro
    runner: {name: org.osbuild.test}
"#;

const CONDITIONAL_TARBALL: &str = r"
image_types:
  tarball:
    filename: root.tar
    mime_type: application/x-tar
    image_kind: archive
    platforms: {x86_64: {}}
    package_sets:
      os:
        - include: [inc1]
          exclude: [exc1]
          conditions:
            distro_name:
              test-distro:
                include: [from-condition-inc2]
                exclude: [from-condition-exc2]
";

#[test]
fn package_set_condition_merges_for_matching_distro() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("distros.yaml"), TEST_DISTROS).unwrap();
    fs::create_dir_all(dir.path().join("test-distro")).unwrap();
    fs::write(dir.path().join("test-distro/distro.yaml"), CONDITIONAL_TARBALL).unwrap();
    let registry = Registry::new(DefsRoot::Dir(dir.path().to_path_buf()));

    let image_type = registry.lookup("test-distro-1", "x86_64", "tarball").unwrap();
    let os = &image_type.package_sets()["os"];
    assert_eq!(os.include, vec!["from-condition-inc2", "inc1"]);
    assert_eq!(os.exclude, vec!["exc1", "from-condition-exc2"]);

    let (manifest, _) = image_type
        .manifest(&Blueprint::default(), &ImageOptions::default(), &[], 0)
        .unwrap();
    let chain = &manifest.package_set_chains["os"];
    assert_eq!(chain[0].exclude, vec!["exc1", "from-condition-exc2"]);
    assert!(chain[0].include.contains(&"from-condition-inc2".to_owned()));
    assert!(chain[0].include.contains(&"inc1".to_owned()));
}

#[test]
fn alias_returns_the_canonical_image_type() {
    let registry = embedded();
    let by_alias = registry.lookup("fedora-40", "x86_64", "fedora-iot-commit").unwrap();
    let canonical = registry.lookup("fedora-40", "x86_64", "iot-commit").unwrap();
    assert!(Arc::ptr_eq(&by_alias, &canonical));
    assert_eq!(by_alias.name(), "iot-commit");
    assert_eq!(by_alias.filename(), "commit.tar");
    assert_eq!(by_alias.mime_type(), "application/x-tar");
}

#[test]
fn qcow2_boot_mode_and_pipeline_order() {
    let image_type = embedded().lookup("rhel-9.7", "x86_64", "qcow2").unwrap();
    assert_eq!(image_type.boot_mode(), BootMode::Hybrid);
    assert_eq!(image_type.exports(), ["qcow2"]);

    let (manifest, warnings) = image_type
        .manifest(&Blueprint::default(), &ImageOptions::default(), &[], 0)
        .unwrap();
    assert!(warnings.is_empty());
    let names = manifest.pipeline_names();
    assert_eq!(names.last(), Some(&"qcow2"));
    let positions: Vec<usize> = ["build", "os", "image", "qcow2"]
        .iter()
        .map(|p| names.iter().position(|n| n == p).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{names:?}");
}

#[test]
fn ostree_disk_requires_url() {
    let image_type = embedded().lookup("rhel-8.10", "x86_64", "edge-raw-image").unwrap();
    let err = image_type
        .manifest(&Blueprint::default(), &ImageOptions::default(), &[], 0)
        .unwrap_err();
    assert!(matches!(err, ImageError::Validation(_)));
    assert_eq!(
        err.to_string(),
        "options validation failed for image type \"edge-raw-image\": ostree.url: required, there is no default available"
    );
}

#[test]
fn etc_mountpoint_is_rejected() {
    let image_type = embedded().lookup("fedora-42", "x86_64", "server-qcow2").unwrap();
    let bp = with_customizations(Customizations {
        filesystem: vec![FilesystemCustomization {
            mountpoint: "/etc".to_owned(),
            minsize: 1 << 30,
        }],
        ..Default::default()
    });
    let err = image_type
        .manifest(&bp, &ImageOptions::default(), &[], 0)
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("The following custom mountpoints are not supported [\"/etc\"]"),
        "{err}"
    );
}

#[test]
fn iot_raw_promotes_lvm_and_refuses_raw() {
    let image_type = embedded().lookup("fedora-42", "x86_64", "iot-raw-xz").unwrap();
    assert_eq!(
        effective_partitioning_mode(&image_type, PartitioningMode::Lvm).unwrap(),
        PartitioningMode::AutoLvm
    );

    let mut options = ostree_options("https://ostree.example.com/repo");
    options.partitioning_mode = PartitioningMode::Lvm;
    assert!(image_type
        .manifest(&Blueprint::default(), &options, &[], 0)
        .is_ok());

    options.partitioning_mode = PartitioningMode::Raw;
    let err = image_type
        .manifest(&Blueprint::default(), &options, &[], 0)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "partitioning mode raw not supported for iot-raw-xz"
    );
}

#[test]
fn two_volume_groups_are_rejected() {
    let image_type = embedded().lookup("fedora-42", "x86_64", "server-qcow2").unwrap();
    let vg = |name: &str| PartitionCustomization {
        part_type: "lvm".to_owned(),
        name: name.to_owned(),
        minsize: 2 << 30,
        ..Default::default()
    };
    let bp = with_customizations(Customizations {
        disk: Some(DiskCustomization {
            partitions: vec![vg("vg1"), vg("vg2")],
            ..Default::default()
        }),
        ..Default::default()
    });
    let err = image_type
        .manifest(&bp, &ImageOptions::default(), &[], 0)
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("multiple LVM volume groups are not yet supported"),
        "{err}"
    );
}
