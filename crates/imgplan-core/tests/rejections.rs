use imgplan_core::validator::validate;
use imgplan_core::{ImageError, ImageType, PartitionError, Registry};
use imgplan_defs::DefsRoot;
use imgplan_schema::customizations::{
    EmbeddedIgnition, FirstbootIgnition, IgnitionCustomization, KickstartCustomization,
    OpenScapCustomization,
};
use imgplan_schema::datasize::GIB;
use imgplan_schema::{
    Blueprint, Customizations, DiskCustomization, FdoCustomization, ImageOptions,
    InstallerCustomization, OstreeImageOptions, PartitionCustomization, UserCustomization,
};
use std::fs;

fn embedded() -> Registry {
    Registry::new(DefsRoot::Embedded)
}

fn blueprint(c: Customizations) -> Blueprint {
    Blueprint {
        name: "rejected".to_owned(),
        customizations: Some(c),
        ..Default::default()
    }
}

fn ostree_options() -> ImageOptions {
    ImageOptions {
        ostree: Some(OstreeImageOptions {
            url: "https://ostree.example.com/repo".to_owned(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The one-line error a request is rejected with.
fn rejection(image_type: &ImageType, bp: &Blueprint, options: &ImageOptions) -> String {
    match image_type.manifest(bp, options, &[], 0) {
        Ok(_) => panic!("{} accepted the request", image_type.name()),
        Err(err) => err.to_string(),
    }
}

fn blueprint_error(image_type: &str, path: &str, reason: &str) -> String {
    format!("blueprint validation failed for image type \"{image_type}\": {path}: {reason}")
}

const REQUIRED: &str = "required, there is no default available";

fn simplified_installer(fdo: FdoCustomization) -> Blueprint {
    blueprint(Customizations {
        installation_device: Some("/dev/vda".to_owned()),
        fdo: Some(fdo),
        ..Default::default()
    })
}

#[test]
fn fdo_needs_a_server_and_exactly_one_diun_key() {
    let image_type = embedded()
        .lookup("fedora-42", "x86_64", "iot-simplified-installer")
        .unwrap();
    let options = ostree_options();

    let bp = simplified_installer(FdoCustomization {
        diun_pub_key_hash: "sha256:abc".to_owned(),
        ..Default::default()
    });
    assert_eq!(
        rejection(&image_type, &bp, &options),
        blueprint_error(
            "iot-simplified-installer",
            "customizations.fdo.manufacturing_server_url",
            REQUIRED
        )
    );

    let bp = simplified_installer(FdoCustomization {
        manufacturing_server_url: "https://fdo.example.com".to_owned(),
        diun_pub_key_hash: "sha256:abc".to_owned(),
        diun_pub_key_insecure: "true".to_owned(),
        ..Default::default()
    });
    assert_eq!(
        rejection(&image_type, &bp, &options),
        blueprint_error(
            "iot-simplified-installer",
            "customizations.fdo",
            "exactly one DIUN public key option must be set"
        )
    );

    let bp = simplified_installer(FdoCustomization {
        manufacturing_server_url: "https://fdo.example.com".to_owned(),
        diun_pub_key_insecure: "true".to_owned(),
        ..Default::default()
    });
    assert!(validate(&image_type, &bp, &options).is_ok());
}

fn ignition(embedded: Option<&str>, firstboot: Option<&str>) -> Blueprint {
    blueprint(Customizations {
        ignition: Some(IgnitionCustomization {
            embedded: embedded.map(|config| EmbeddedIgnition {
                config: config.to_owned(),
            }),
            firstboot: firstboot.map(|url| FirstbootIgnition { url: url.to_owned() }),
        }),
        ..Default::default()
    })
}

#[test]
fn ignition_sources_are_exclusive_and_non_empty() {
    let image_type = embedded().lookup("fedora-42", "x86_64", "iot-raw-xz").unwrap();
    let options = ostree_options();

    assert_eq!(
        rejection(
            &image_type,
            &ignition(Some("eyJpZ25pdGlvbiI6e319"), Some("https://ign.example.com")),
            &options
        ),
        blueprint_error(
            "iot-raw-xz",
            "customizations.ignition",
            "embedded and firstboot configurations are mutually exclusive"
        )
    );
    assert_eq!(
        rejection(&image_type, &ignition(None, Some("")), &options),
        blueprint_error("iot-raw-xz", "customizations.ignition.firstboot.url", REQUIRED)
    );
    assert_eq!(
        rejection(&image_type, &ignition(Some(""), None), &options),
        blueprint_error("iot-raw-xz", "customizations.ignition.embedded.config", REQUIRED)
    );
}

fn openscap(profile_id: &str) -> Blueprint {
    blueprint(Customizations {
        openscap: Some(OpenScapCustomization {
            profile_id: profile_id.to_owned(),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[test]
fn openscap_profile_must_be_set_and_allowed() {
    let image_type = embedded().lookup("rhel-9.7", "x86_64", "qcow2").unwrap();
    let options = ImageOptions::default();

    assert_eq!(
        rejection(&image_type, &openscap(""), &options),
        blueprint_error("qcow2", "customizations.openscap.profile_id", REQUIRED)
    );
    assert_eq!(
        rejection(
            &image_type,
            &openscap("xccdf_org.ssgproject.content_profile_standard"),
            &options
        ),
        blueprint_error(
            "qcow2",
            "customizations.openscap.profile_id",
            "profile xccdf_org.ssgproject.content_profile_standard is not supported on rhel-9.7"
        )
    );
    assert!(validate(
        &image_type,
        &openscap("xccdf_org.ssgproject.content_profile_cis"),
        &options
    )
    .is_ok());
}

const NO_OSCAP_DISTROS: &str = r#"
distros:
  - name: "plain-{{.MajorVersion}}"
    match: 'plain-[0-9]+'
    versions: ["1"]
    product: Plain
    os_version: "{{.MajorVersion}}"
    release_version: "{{.MajorVersion}}"
    module_platform_id: "platform:p{{.MajorVersion}}"
    default_fs_type: ext4
    defs_path: plain
    runner: {name: org.osbuild.plain}
    oscap:
      supported: false
"#;

const NO_OSCAP_TYPES: &str = r"
image_types:
  tarball:
    filename: root.tar
    mime_type: application/x-tar
    image_kind: archive
    platforms: {x86_64: {}}
    package_sets:
      os:
        - include: [bash]
";

#[test]
fn openscap_is_rejected_where_the_release_lacks_it() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("distros.yaml"), NO_OSCAP_DISTROS).unwrap();
    fs::create_dir_all(dir.path().join("plain")).unwrap();
    fs::write(dir.path().join("plain/distro.yaml"), NO_OSCAP_TYPES).unwrap();
    let registry = Registry::new(DefsRoot::Dir(dir.path().to_path_buf()));

    let image_type = registry.lookup("plain-1", "x86_64", "tarball").unwrap();
    assert_eq!(
        rejection(
            &image_type,
            &openscap("xccdf_org.ssgproject.content_profile_cis"),
            &ImageOptions::default()
        ),
        blueprint_error(
            "tarball",
            "customizations.openscap",
            "OpenSCAP is not supported on plain-1"
        )
    );
}

#[test]
fn custom_kickstart_excludes_users_on_ostree_installers() {
    let image_type = embedded().lookup("fedora-42", "x86_64", "iot-installer").unwrap();
    let options = ostree_options();
    let installer = Some(InstallerCustomization {
        kickstart: Some(KickstartCustomization {
            contents: "text --non-interactive\n".to_owned(),
        }),
        ..Default::default()
    });

    let bp = blueprint(Customizations {
        installer: installer.clone(),
        user: vec![UserCustomization {
            name: "admin".to_owned(),
            ..Default::default()
        }],
        ..Default::default()
    });
    assert_eq!(
        rejection(&image_type, &bp, &options),
        blueprint_error(
            "iot-installer",
            "customizations.installer.kickstart.contents",
            "cannot be combined with user or group customizations"
        )
    );

    let bp = blueprint(Customizations {
        installer,
        ..Default::default()
    });
    assert!(validate(&image_type, &bp, &options).is_ok());
}

#[test]
fn live_installers_accept_only_installer_settings() {
    let image_type = embedded()
        .lookup("fedora-42", "x86_64", "workstation-live-installer")
        .unwrap();
    let options = ImageOptions::default();

    let bp = blueprint(Customizations {
        hostname: Some("kiosk".to_owned()),
        ..Default::default()
    });
    assert_eq!(
        rejection(&image_type, &bp, &options),
        blueprint_error(
            "workstation-live-installer",
            "customizations.hostname",
            "not supported"
        )
    );

    let bp = blueprint(Customizations {
        installer: Some(InstallerCustomization {
            unattended: true,
            ..Default::default()
        }),
        ..Default::default()
    });
    assert!(validate(&image_type, &bp, &options).is_ok());
}

fn swap_disk() -> Blueprint {
    blueprint(Customizations {
        disk: Some(DiskCustomization {
            partitions: vec![PartitionCustomization {
                fs_type: "swap".to_owned(),
                minsize: GIB,
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[test]
fn rhel8_aarch64_disks_reject_swap() {
    let registry = embedded();
    let options = ImageOptions::default();
    let bp = swap_disk();

    let aarch64 = registry.lookup("rhel-8.10", "aarch64", "qcow2").unwrap();
    match aarch64.manifest(&bp, &options, &[], 0) {
        Err(ImageError::Partition(err @ PartitionError::SwapUnsupported(_))) => {
            assert_eq!(err.to_string(), "swap partitions are not supported on rhel-8.10 aarch64");
        }
        other => panic!("expected a swap rejection, got {other:?}"),
    }

    let x86_64 = registry.lookup("rhel-8.10", "x86_64", "qcow2").unwrap();
    assert!(x86_64.manifest(&bp, &options, &[], 0).is_ok());
}

#[test]
fn oversized_image_is_a_partition_error() {
    let image_type = embedded().lookup("fedora-42", "x86_64", "server-qcow2").unwrap();
    let options: ImageOptions =
        serde_json::from_str(r#"{"size": 18446744073709551615}"#).unwrap();
    assert_eq!(options.size, u64::MAX);
    let err = image_type
        .manifest(&Blueprint::default(), &options, &[], 0)
        .unwrap_err();
    assert!(
        matches!(err, ImageError::Partition(PartitionError::SizeTooLarge)),
        "{err}"
    );
}
