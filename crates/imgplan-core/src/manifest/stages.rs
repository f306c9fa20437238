//! Constructors for osbuild stages.
//!
//! Each function maps already-resolved plan data onto one stage's options.
//! Nothing here decides whether a stage is needed; the assembler does.

use super::{Binding, Input, Stage, KERNEL_VERSION};
use crate::customizations::OscapConfig;
use crate::disk::FsEntry;
use imgplan_defs::{PartitionTable, Payload};
use imgplan_schema::customizations::RhsmConfigCustomization;
use imgplan_schema::{
    ContentDigest, DirectoryCustomization, FileCustomization, FirewallCustomization,
    GroupCustomization, UserCustomization,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const SECTOR: u64 = 512;
const BIOS_BOOT_GUID: &str = "21686148-6449-6E6F-744E-656564454649";

fn object(pairs: impl IntoIterator<Item = (&'static str, Option<Value>)>) -> Value {
    let map: Map<String, Value> = pairs
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_owned(), v)))
        .collect();
    Value::Object(map)
}

fn non_empty<T: serde::Serialize>(items: &[T]) -> Option<Value> {
    (!items.is_empty()).then(|| json!(items))
}

pub fn rpm(chain: &str, gpgkey_files: &[String], exclude_docs: bool, ostree_booted: bool) -> Stage {
    let options = object([
        ("gpgkeys.fromtree", non_empty(gpgkey_files)),
        ("exclude", exclude_docs.then(|| json!({"docs": true}))),
        ("ostree_booted", ostree_booted.then(|| json!(true))),
        ("dbpath", ostree_booted.then(|| json!("/usr/share/rpm"))),
    ]);
    Stage::new("org.osbuild.rpm", options).with_input(
        "packages",
        Input::Packages {
            chain: chain.to_owned(),
        },
    )
}

pub fn kernel_cmdline(root_fs_uuid: &str, kernel_options: &[String]) -> Stage {
    Stage::new(
        "org.osbuild.kernel-cmdline",
        json!({"root_fs_uuid": root_fs_uuid, "kernel_opts": kernel_options.join(" ")}),
    )
}

pub fn locale(language: &str) -> Stage {
    Stage::new("org.osbuild.locale", json!({"language": language}))
}

pub fn keymap(keymap: &str) -> Stage {
    Stage::new("org.osbuild.keymap", json!({"keymap": keymap}))
}

pub fn hostname(hostname: &str) -> Stage {
    Stage::new("org.osbuild.hostname", json!({"hostname": hostname}))
}

pub fn timezone(zone: &str) -> Stage {
    Stage::new("org.osbuild.timezone", json!({"zone": zone}))
}

pub fn chrony(servers: &[String]) -> Stage {
    let servers: Vec<Value> = servers.iter().map(|s| json!({"hostname": s})).collect();
    Stage::new("org.osbuild.chrony", json!({"servers": servers}))
}

fn sysconfig_value(value: &str) -> Value {
    match value {
        "yes" | "true" => json!(true),
        "no" | "false" => json!(false),
        other => json!(other),
    }
}

pub fn sysconfig(
    network: &BTreeMap<String, String>,
    default_kernel: Option<&str>,
    update_default: bool,
) -> Stage {
    let network: Map<String, Value> = network
        .iter()
        .map(|(k, v)| (k.clone(), sysconfig_value(v)))
        .collect();
    let kernel = default_kernel.map(|k| json!({"update_default": update_default, "default_kernel": k}));
    Stage::new(
        "org.osbuild.sysconfig",
        object([
            ("kernel", kernel),
            ("network", (!network.is_empty()).then_some(Value::Object(network))),
        ]),
    )
}

pub fn groups(groups: &[GroupCustomization]) -> Stage {
    let groups: Map<String, Value> = groups
        .iter()
        .map(|g| (g.name.clone(), object([("gid", g.gid.map(|gid| json!(gid)))])))
        .collect();
    Stage::new("org.osbuild.groups", json!({"groups": groups}))
}

pub fn users(users: &[UserCustomization]) -> Stage {
    let users: Map<String, Value> = users
        .iter()
        .map(|u| {
            let options = object([
                ("uid", u.uid.map(|v| json!(v))),
                ("gid", u.gid.map(|v| json!(v))),
                ("groups", non_empty(&u.groups)),
                ("description", u.description.as_ref().map(|v| json!(v))),
                ("home", u.home.as_ref().map(|v| json!(v))),
                ("shell", u.shell.as_ref().map(|v| json!(v))),
                ("password", u.password.as_ref().map(|v| json!(v))),
                ("key", u.key.as_ref().map(|v| json!(v))),
                ("expiredate", u.expiredate.map(|v| json!(v))),
                ("force_password_reset", u.force_password_reset.map(|v| json!(v))),
            ]);
            (u.name.clone(), options)
        })
        .collect();
    Stage::new("org.osbuild.users", json!({"users": users}))
}

/// Lock the root account's password.
pub fn lock_root() -> Stage {
    Stage::new("org.osbuild.users", json!({"users": {"root": {"password": "!locked"}}}))
}

pub fn firewall(fw: &FirewallCustomization) -> Stage {
    let services = fw.services.as_ref();
    let zones: Vec<Value> = fw
        .zones
        .iter()
        .map(|z| object([("name", z.name.as_ref().map(|n| json!(n))), ("sources", non_empty(&z.sources))]))
        .collect();
    Stage::new(
        "org.osbuild.firewall",
        object([
            ("ports", non_empty(&fw.ports)),
            ("enabled_services", services.and_then(|s| non_empty(&s.enabled))),
            ("disabled_services", services.and_then(|s| non_empty(&s.disabled))),
            ("zones", non_empty(&zones)),
        ]),
    )
}

pub fn systemd(
    enabled: &[String],
    disabled: &[String],
    masked: &[String],
    default_target: Option<&str>,
) -> Stage {
    Stage::new(
        "org.osbuild.systemd",
        object([
            ("enabled_services", non_empty(enabled)),
            ("disabled_services", non_empty(disabled)),
            ("masked_services", non_empty(masked)),
            ("default_target", default_target.map(|t| json!(t))),
        ]),
    )
}

pub fn selinux(policy: &str, force_autorelabel: bool) -> Stage {
    Stage::new(
        "org.osbuild.selinux",
        object([
            (
                "file_contexts",
                Some(json!(format!("etc/selinux/{policy}/contexts/files/file_contexts"))),
            ),
            ("force_autorelabel", force_autorelabel.then(|| json!(true))),
        ]),
    )
}

pub fn fstab(entries: &[FsEntry], ostree: Option<(&str, &str)>) -> Stage {
    let filesystems: Vec<Value> = entries
        .iter()
        .map(|e| {
            json!({
                "uuid": e.uuid,
                "vfs_type": e.fs_type,
                "path": e.mountpoint,
                "options": e.fstab_options,
                "freq": e.fstab_freq,
                "passno": e.fstab_passno,
            })
        })
        .collect();
    let ostree = ostree.map(|(osname, reference)| {
        json!({"deployment": {"osname": osname, "ref": reference}})
    });
    Stage::new(
        "org.osbuild.fstab",
        object([("filesystems", Some(json!(filesystems))), ("ostree", ostree)]),
    )
}

#[derive(Debug, Clone, Default)]
pub struct Grub2Options<'a> {
    pub root_fs_uuid: &'a str,
    pub boot_fs_uuid: Option<&'a str>,
    pub kernel_options: &'a [String],
    pub bios_platform: Option<&'a str>,
    pub uefi_vendor: Option<&'a str>,
    pub timeout: Option<u32>,
    pub greenboot: bool,
    pub ignition: bool,
}

pub fn grub2(opts: &Grub2Options<'_>) -> Stage {
    let config = opts.timeout.map(|t| json!({"timeout": t}));
    Stage::new(
        "org.osbuild.grub2",
        object([
            ("root_fs_uuid", Some(json!(opts.root_fs_uuid))),
            ("boot_fs_uuid", opts.boot_fs_uuid.map(|u| json!(u))),
            ("kernel_opts", Some(json!(opts.kernel_options.join(" ")))),
            ("legacy", opts.bios_platform.map(|p| json!(p))),
            ("uefi", opts.uefi_vendor.map(|v| json!({"vendor": v, "unified": true}))),
            ("write_defaults", Some(json!(!opts.greenboot))),
            ("greenboot", opts.greenboot.then(|| json!(true))),
            ("ignition", opts.ignition.then(|| json!(true))),
            ("config", config),
        ]),
    )
}

pub fn bootupd(bios_device: bool) -> Stage {
    Stage::new(
        "org.osbuild.bootupd.gen-metadata",
        object([("static-configs", Some(json!(true))), ("bios", bios_device.then(|| json!(true)))]),
    )
}

pub fn mkdir(dirs: &[DirectoryCustomization]) -> Stage {
    let paths: Vec<Value> = dirs
        .iter()
        .map(|d| {
            object([
                ("path", Some(json!(d.path))),
                ("mode", d.mode.as_ref().and_then(|m| u32::from_str_radix(m, 8).ok()).map(|m| json!(m))),
                ("parents", d.ensure_parents.then(|| json!(true))),
                ("exist_ok", Some(json!(true))),
            ])
        })
        .collect();
    Stage::new("org.osbuild.mkdir", json!({"paths": paths}))
}

/// Copy inline sources into the tree. `files` pairs each id with its target.
pub fn copy_inline(files: &[(ContentDigest, String)]) -> Stage {
    let paths: Vec<Value> = files
        .iter()
        .map(|(id, path)| json!({"from": format!("input://inlinefile/{id}"), "to": format!("tree://{path}")}))
        .collect();
    let ids = files.iter().map(|(id, _)| id.clone()).collect();
    Stage::new("org.osbuild.copy", json!({"paths": paths}))
        .with_input("inlinefile", Input::Files { ids })
}

fn ownership<'a>(
    dirs: &'a [DirectoryCustomization],
    files: &'a [FileCustomization],
) -> impl Iterator<Item = (&'a str, Option<&'a String>, Option<&'a String>, Option<&'a String>)> {
    dirs.iter()
        .map(|d| (d.path.as_str(), d.user.as_ref(), d.group.as_ref(), d.mode.as_ref()))
        .chain(
            files
                .iter()
                .map(|f| (f.path.as_str(), f.user.as_ref(), f.group.as_ref(), f.mode.as_ref())),
        )
}

/// Ownership for custom paths, when any names a user or group.
pub fn chown(dirs: &[DirectoryCustomization], files: &[FileCustomization]) -> Option<Stage> {
    let items: Map<String, Value> = ownership(dirs, files)
        .filter(|(_, user, group, _)| user.is_some() || group.is_some())
        .map(|(path, user, group, _)| {
            (
                path.to_owned(),
                object([("user", user.map(|u| json!(u))), ("group", group.map(|g| json!(g)))]),
            )
        })
        .collect();
    (!items.is_empty()).then(|| Stage::new("org.osbuild.chown", json!({"items": items})))
}

/// Modes for custom files. Directory modes are set at creation.
pub fn chmod(files: &[FileCustomization]) -> Option<Stage> {
    let items: Map<String, Value> = ownership(&[], files)
        .filter_map(|(path, _, _, mode)| mode.map(|m| (path.to_owned(), json!({"mode": m}))))
        .collect();
    (!items.is_empty()).then(|| Stage::new("org.osbuild.chmod", json!({"items": items})))
}

pub fn rhsm(config: &RhsmConfigCustomization) -> Stage {
    let toggle = |t: &Option<imgplan_schema::customizations::DnfPluginToggle>| {
        t.as_ref().and_then(|t| t.enabled).map(|e| json!({"enabled": e}))
    };
    let dnf_plugins = config.dnf_plugins.as_ref().map(|p| {
        object([
            ("product-id", toggle(&p.product_id)),
            ("subscription-manager", toggle(&p.subscription_manager)),
        ])
    });
    let subman = config.subscription_manager.as_ref().map(|s| {
        let rhsm = s.rhsm.as_ref().map(|r| {
            object([
                ("manage_repos", r.manage_repos.map(|v| json!(v))),
                ("auto_enable_yum_plugins", r.auto_enable_yum_plugins.map(|v| json!(v))),
            ])
        });
        let certd = s
            .rhsmcertd
            .as_ref()
            .map(|c| object([("auto_registration", c.auto_registration.map(|v| json!(v)))]));
        object([("rhsm", rhsm), ("rhsmcertd", certd)])
    });
    Stage::new(
        "org.osbuild.rhsm",
        object([("dnf-plugins", dnf_plugins), ("subscription-manager", subman)]),
    )
}

pub fn rhsm_facts(facts: &BTreeMap<String, String>) -> Stage {
    Stage::new("org.osbuild.rhsm.facts", json!({"facts": facts}))
}

pub fn oscap_autotailor(oscap: &OscapConfig) -> Option<Stage> {
    let tailoring = oscap.tailoring.as_ref()?;
    Some(Stage::new(
        "org.osbuild.oscap.autotailor",
        json!({
            "filepath": tailoring.path,
            "config": {
                "datastream": oscap.datastream,
                "profile_id": oscap.profile_id,
                "new_profile": tailoring.new_profile,
                "selected": tailoring.selected,
                "unselected": tailoring.unselected,
            },
        }),
    ))
}

pub fn oscap_remediation(oscap: &OscapConfig) -> Stage {
    let (profile_id, tailoring) = match &oscap.tailoring {
        Some(t) => (t.new_profile.as_str(), Some(json!(t.path))),
        None => (oscap.profile_id.as_str(), None),
    };
    Stage::new(
        "org.osbuild.oscap.remediation",
        json!({
            "data_dir": oscap.data_dir,
            "config": object([
                ("datastream", Some(json!(oscap.datastream))),
                ("profile_id", Some(json!(profile_id))),
                ("tailoring", tailoring),
            ]),
        }),
    )
}

pub fn machine_id_uninitialized() -> Stage {
    Stage::new("org.osbuild.machine-id", json!({"first-boot": "uninitialized"}))
}

pub fn fips() -> [Stage; 2] {
    [
        Stage::new("org.osbuild.update-crypto-policies", json!({"policy": "FIPS"})),
        Stage::new(
            "org.osbuild.dracut.conf",
            json!({"filename": "40-fips.conf", "config": {"add_dracutmodules": ["fips"]}}),
        ),
    ]
}

pub fn skopeo(pipeline: &str, storage_path: Option<&str>) -> Stage {
    let destination = object([
        ("type", Some(json!("containers-storage"))),
        ("storage-path", storage_path.map(|p| json!(p))),
    ]);
    Stage::new("org.osbuild.skopeo", json!({"destination": destination})).with_input(
        "images",
        Input::Containers {
            pipeline: pipeline.to_owned(),
        },
    )
}

pub fn containers_storage_conf(storage_path: &str) -> Stage {
    Stage::new(
        "org.osbuild.containers.storage.conf",
        json!({
            "filename": "/etc/containers/storage.conf",
            "config": {"storage": {"options": {"additionalimagestores": [storage_path]}}},
        }),
    )
}

pub fn ignition() -> Stage {
    Stage::new("org.osbuild.ignition", json!({}))
}

pub fn truncate(filename: &str, size: u64) -> Stage {
    Stage::new("org.osbuild.truncate", json!({"filename": filename, "size": size.to_string()}))
}

fn loopback(filename: &str, start: u64, size: u64) -> Value {
    json!({
        "type": "org.osbuild.loopback",
        "options": {"filename": filename, "start": start / SECTOR, "size": size / SECTOR, "lock": true},
    })
}

fn whole_disk(filename: &str) -> Map<String, Value> {
    let mut devices = Map::new();
    devices.insert(
        "device".to_owned(),
        json!({"type": "org.osbuild.loopback", "options": {"filename": filename, "lock": true}}),
    );
    devices
}

/// A filesystem image file holding another pipeline's tree.
pub fn filesystem_image(fs_type: &str, filename: &str, size: u64, id: &str, label: &str, source: &str) -> Vec<Stage> {
    let options = if fs_type == "vfat" {
        json!({"volid": id, "label": label})
    } else {
        json!({"uuid": id, "label": label})
    };
    let mount = json!({
        "name": "-",
        "type": mount_type(fs_type),
        "source": "device",
        "target": "/",
    });
    vec![
        truncate(filename, size),
        Stage::new(&mkfs_type(fs_type), options).with_devices(whole_disk(filename)),
        Stage::new(
            "org.osbuild.copy",
            json!({"paths": [{"from": "input://root-tree/", "to": "mount://-/"}]}),
        )
        .with_input(
            "root-tree",
            Input::Tree {
                pipeline: source.to_owned(),
            },
        )
        .with_devices(whole_disk(filename))
        .with_mounts(vec![mount]),
    ]
}

pub fn sfdisk(table: &PartitionTable, filename: &str) -> Stage {
    let partitions: Vec<Value> = table
        .partitions
        .iter()
        .map(|p| {
            object([
                ("start", Some(json!(p.start / SECTOR))),
                ("size", Some(json!(p.size / SECTOR))),
                ("type", Some(json!(p.part_type))),
                ("uuid", (!p.uuid.is_empty()).then(|| json!(p.uuid))),
                ("bootable", p.bootable.then(|| json!(true))),
            ])
        })
        .collect();
    Stage::new(
        "org.osbuild.sfdisk",
        json!({"label": table.table_type.to_string(), "uuid": table.uuid, "partitions": partitions}),
    )
    .with_devices(whole_disk(filename))
}

/// Devices from the disk file down to the block device holding `entry`, in
/// dependency order. The last one is the target.
pub fn device_chain(table: &PartitionTable, filename: &str, entry: &FsEntry) -> Vec<(String, Value)> {
    let index = entry.partition;
    let Some(part) = table.partitions.get(index) else {
        return Vec::new();
    };
    let mut chain = vec![(format!("part{}", index + 1), loopback(filename, part.start, part.size))];
    if let Some(Payload::Luks(luks)) = &part.payload {
        let parent = chain[0].0.clone();
        chain.push((
            format!("luks{}", index + 1),
            json!({"type": "org.osbuild.luks2", "parent": parent, "options": {"passphrase": luks.passphrase}}),
        ));
    }
    if let Some((_, lv)) = &entry.volume {
        let parent = chain[chain.len() - 1].0.clone();
        chain.push((
            lv.clone(),
            json!({"type": "org.osbuild.lvm2.lv", "parent": parent, "options": {"volume": lv}}),
        ));
    }
    chain
}

fn target_devices(chain: Vec<(String, Value)>) -> Map<String, Value> {
    let last = chain.len().saturating_sub(1);
    let renamed: Vec<(String, String)> = chain
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.clone(), if i == last { "device".to_owned() } else { name.clone() }))
        .collect();
    chain
        .into_iter()
        .enumerate()
        .map(|(i, (_, mut dev))| {
            if let Some(parent) = dev.get("parent").and_then(Value::as_str) {
                if let Some((_, new)) = renamed.iter().find(|(old, _)| old == parent) {
                    dev["parent"] = json!(new);
                }
            }
            (renamed[i].1.clone(), dev)
        })
        .collect()
}

pub fn lvm2_create(table: &PartitionTable, filename: &str) -> Vec<Stage> {
    table
        .partitions
        .iter()
        .filter_map(|p| match &p.payload {
            Some(Payload::Lvm(vg)) => Some((p, vg)),
            _ => None,
        })
        .map(|(p, vg)| {
            let volumes: Vec<Value> = vg
                .logical_volumes
                .iter()
                .map(|lv| json!({"name": lv.name, "size": format!("{}B", lv.size)}))
                .collect();
            let mut devices = Map::new();
            devices.insert("device".to_owned(), loopback(filename, p.start, p.size));
            Stage::new("org.osbuild.lvm2.create", json!({"volumes": volumes})).with_devices(devices)
        })
        .collect()
}

pub fn lvm2_metadata(vg_name: &str, table: &PartitionTable, filename: &str) -> Option<Stage> {
    let p = table
        .partitions
        .iter()
        .find(|p| matches!(&p.payload, Some(Payload::Lvm(vg)) if vg.name == vg_name))?;
    let mut devices = Map::new();
    devices.insert("device".to_owned(), loopback(filename, p.start, p.size));
    Some(
        Stage::new(
            "org.osbuild.lvm2.metadata",
            json!({"vg_name": vg_name, "creation_host": "osbuild"}),
        )
        .with_devices(devices),
    )
}

fn mkfs_type(fs_type: &str) -> String {
    match fs_type {
        "swap" => "org.osbuild.mkswap".to_owned(),
        "vfat" => "org.osbuild.mkfs.fat".to_owned(),
        other => format!("org.osbuild.mkfs.{other}"),
    }
}

/// One mkfs (or mkswap) per filesystem; btrfs subvolumes share theirs.
pub fn mkfs(table: &PartitionTable, filename: &str, entries: &[FsEntry]) -> Vec<Stage> {
    let mut seen: Vec<&str> = Vec::new();
    let mut stages = Vec::new();
    for entry in entries {
        if seen.contains(&entry.uuid.as_str()) {
            continue;
        }
        seen.push(&entry.uuid);
        let options = if entry.fs_type == "vfat" {
            json!({"volid": entry.uuid.replace('-', ""), "label": entry.label})
        } else {
            object([
                ("uuid", Some(json!(entry.uuid))),
                ("label", (!entry.label.is_empty()).then(|| json!(entry.label))),
            ])
        };
        let devices = target_devices(device_chain(table, filename, entry));
        stages.push(Stage::new(&mkfs_type(&entry.fs_type), options).with_devices(devices));
    }
    stages
}

pub fn btrfs_subvolumes(table: &PartitionTable, filename: &str, entries: &[FsEntry]) -> Option<Stage> {
    let subvols: Vec<&FsEntry> = entries.iter().filter(|e| e.subvolume.is_some()).collect();
    let first = subvols.first()?;
    let names: Vec<Value> = subvols
        .iter()
        .filter_map(|e| e.subvolume.as_ref())
        .map(|name| json!({"name": format!("/{name}")}))
        .collect();
    let devices = target_devices(device_chain(table, filename, first));
    Some(
        Stage::new("org.osbuild.btrfs.subvol", json!({"subvolumes": names}))
            .with_devices(devices)
            .with_mounts(vec![json!({
                "name": "volume",
                "type": "org.osbuild.btrfs",
                "source": "device",
                "target": "/",
            })]),
    )
}

fn mount_name(mountpoint: &str) -> String {
    if mountpoint == "/" {
        "-".to_owned()
    } else {
        mountpoint.replace('/', "-")
    }
}

fn mount_type(fs_type: &str) -> String {
    match fs_type {
        "vfat" => "org.osbuild.fat".to_owned(),
        other => format!("org.osbuild.{other}"),
    }
}

/// Devices and mounts for every mountable entry, parents before children.
pub fn disk_mounts(table: &PartitionTable, filename: &str, entries: &[FsEntry]) -> (Map<String, Value>, Vec<Value>) {
    let mut devices = Map::new();
    let mut mountable: Vec<&FsEntry> = entries
        .iter()
        .filter(|e| e.fs_type != "swap" && e.mountpoint.starts_with('/'))
        .collect();
    mountable.sort_by_key(|e| (e.mountpoint.matches('/').count(), e.mountpoint.len()));
    mountable.sort_by_key(|e| e.mountpoint != "/");
    let mut mounts = Vec::new();
    for entry in mountable {
        let chain = device_chain(table, filename, entry);
        let Some(source) = chain.last().map(|(name, _)| name.clone()) else {
            continue;
        };
        for (name, dev) in chain {
            devices.entry(name).or_insert(dev);
        }
        let options = entry.subvolume.as_ref().map(|s| json!({"subvol": s}));
        mounts.push(object([
            ("name", Some(json!(mount_name(&entry.mountpoint)))),
            ("type", Some(json!(mount_type(&entry.fs_type)))),
            ("source", Some(json!(source))),
            ("target", Some(json!(entry.mountpoint))),
            ("options", options),
        ]));
    }
    (devices, mounts)
}

/// Copy a pipeline's tree onto the mounted disk.
pub fn copy_tree_to_disk(source: &str, table: &PartitionTable, filename: &str, entries: &[FsEntry]) -> Stage {
    let (devices, mounts) = disk_mounts(table, filename, entries);
    Stage::new(
        "org.osbuild.copy",
        json!({"paths": [{"from": "input://root-tree/", "to": "mount://-/"}]}),
    )
    .with_input(
        "root-tree",
        Input::Tree {
            pipeline: source.to_owned(),
        },
    )
    .with_devices(devices)
    .with_mounts(mounts)
}

/// Legacy BIOS grub core image, written after the partition table.
pub fn grub2_inst(table: &PartitionTable, filename: &str, platform: &str, entries: &[FsEntry]) -> Option<Stage> {
    let boot = entries
        .iter()
        .find(|e| e.mountpoint == "/boot")
        .or_else(|| entries.iter().find(|e| e.mountpoint == "/"))?;
    let location = table
        .partitions
        .iter()
        .find(|p| p.part_type == BIOS_BOOT_GUID)
        .map_or(2048, |p| p.start / SECTOR);
    let prefix_path = if boot.mountpoint == "/boot" { "/grub2" } else { "/boot/grub2" };
    Some(Stage::new(
        "org.osbuild.grub2.inst",
        json!({
            "filename": filename,
            "platform": platform,
            "location": location,
            "core": {
                "type": "mkimage",
                "partlabel": table.table_type.to_string(),
                "filesystem": boot.fs_type,
            },
            "prefix": {
                "type": "partition",
                "partlabel": table.table_type.to_string(),
                "number": boot.partition,
                "path": prefix_path,
            },
        }),
    ))
}

pub fn zipl() -> Stage {
    Stage::new("org.osbuild.zipl", json!({}))
}

pub fn zipl_inst(table: &PartitionTable, filename: &str, entries: &[FsEntry], chain: &str, kernel: &str) -> Option<Stage> {
    let root = entries.iter().find(|e| e.mountpoint == "/")?;
    let part = table.partitions.get(root.partition)?;
    let (devices, mounts) = disk_mounts(table, filename, entries);
    Some(
        Stage::new(
            "org.osbuild.zipl.inst",
            json!({"kernel": KERNEL_VERSION, "location": part.start / SECTOR}),
        )
        .with_devices(devices)
        .with_mounts(mounts)
        .with_binding(Binding::KernelVersion {
            chain: chain.to_owned(),
            package: kernel.to_owned(),
        }),
    )
}

fn pipeline_file(source: &str, file: &str) -> Input {
    Input::PipelineFile {
        pipeline: source.to_owned(),
        file: file.to_owned(),
    }
}

pub fn qemu(filename: &str, format: Value, source: &str, source_file: &str) -> Stage {
    Stage::new("org.osbuild.qemu", json!({"filename": filename, "format": format}))
        .with_input("image", pipeline_file(source, source_file))
}

pub fn ovf(vmdk: &str) -> Stage {
    Stage::new("org.osbuild.ovf", json!({"vmdk": vmdk}))
}

pub fn copy_file(source: &str, file: &str, to: &str) -> Stage {
    Stage::new(
        "org.osbuild.copy",
        json!({"paths": [{"from": format!("input://file/{}", file.trim_start_matches('/')), "to": format!("tree://{to}")}]}),
    )
    .with_input("file", pipeline_file(source, file))
}

/// Copy another pipeline's whole tree to `to` in this one.
pub fn copy_tree(source: &str, to: &str) -> Stage {
    Stage::new(
        "org.osbuild.copy",
        json!({"paths": [{"from": "input://tree/", "to": format!("tree://{to}")}]}),
    )
    .with_input(
        "tree",
        Input::Tree {
            pipeline: source.to_owned(),
        },
    )
}

pub fn tar(filename: &str, source: &str, paths: &[&str]) -> Stage {
    Stage::new(
        "org.osbuild.tar",
        object([("filename", Some(json!(filename))), ("paths", non_empty(paths))]),
    )
    .with_input(
        "tree",
        Input::Tree {
            pipeline: source.to_owned(),
        },
    )
}

pub fn compress(method: &str, filename: &str, source: &str, source_file: &str) -> Stage {
    Stage::new(&format!("org.osbuild.{method}"), json!({"filename": filename}))
        .with_input("file", pipeline_file(source, source_file))
}

pub fn oci_archive(filename: &str, architecture: &str, source: &str, config: Option<Value>) -> Stage {
    Stage::new(
        "org.osbuild.oci-archive",
        object([
            ("filename", Some(json!(filename))),
            ("architecture", Some(json!(architecture))),
            ("config", config),
        ]),
    )
    .with_input(
        "base",
        Input::Tree {
            pipeline: source.to_owned(),
        },
    )
}

pub fn ostree_init(path: &str) -> Stage {
    Stage::new("org.osbuild.ostree.init", json!({"path": path}))
}

pub fn ostree_preptree() -> Stage {
    Stage::new(
        "org.osbuild.ostree.preptree",
        json!({"etc_group_members": ["wheel", "docker"]}),
    )
}

pub fn ostree_commit(reference: &str, os_version: &str, source: &str, parent_pipeline: Option<&str>) -> Stage {
    let mut stage = Stage::new(
        "org.osbuild.ostree.commit",
        json!({"ref": reference, "os_version": os_version}),
    )
    .with_input(
        "tree",
        Input::Tree {
            pipeline: source.to_owned(),
        },
    );
    if let Some(pipeline) = parent_pipeline {
        stage = stage.with_binding(Binding::CommitChecksum {
            option: "parent".to_owned(),
            pipeline: pipeline.to_owned(),
        });
    }
    stage
}

/// Pull the commit sourced for `pipeline` into `repo`.
pub fn ostree_pull(repo: &str, remote: Option<&str>, pipeline: &str) -> Stage {
    Stage::new(
        "org.osbuild.ostree.pull",
        object([("repo", Some(json!(repo))), ("remote", remote.map(|r| json!(r)))]),
    )
    .with_input(
        "commits",
        Input::Commit {
            pipeline: pipeline.to_owned(),
        },
    )
}

/// Pull a commit another pipeline built.
pub fn ostree_pull_local(repo: &str, source: &str, reference: &str) -> Stage {
    Stage::new("org.osbuild.ostree.pull", json!({"repo": repo})).with_input(
        "commits",
        Input::PipelineCommit {
            pipeline: source.to_owned(),
            reference: reference.to_owned(),
        },
    )
}

pub fn ostree_init_fs() -> Stage {
    Stage::new("org.osbuild.ostree.init-fs", json!({}))
}

pub fn ostree_os_init(osname: &str) -> Stage {
    Stage::new("org.osbuild.ostree.os-init", json!({"osname": osname}))
}

pub fn ostree_config(repo: &str) -> Stage {
    Stage::new(
        "org.osbuild.ostree.config",
        json!({"repo": repo, "config": {"sysroot": {"readonly": true, "bootloader": "none"}}}),
    )
}

pub fn ostree_deploy(osname: &str, reference: &str, remote: &str, kernel_options: &[String], mounts: &[&str]) -> Stage {
    Stage::new(
        "org.osbuild.ostree.deploy",
        json!({
            "osname": osname,
            "ref": reference,
            "remote": remote,
            "mounts": mounts,
            "rootfs": {"label": "root"},
            "kernel_opts": kernel_options,
        }),
    )
}

pub fn ostree_remotes(repo: &str, name: &str, url: &str) -> Stage {
    Stage::new(
        "org.osbuild.ostree.remotes",
        json!({"repo": repo, "remotes": [{"name": name, "url": url}]}),
    )
}

pub fn ostree_fillvar(osname: &str, reference: &str) -> Stage {
    Stage::new(
        "org.osbuild.ostree.fillvar",
        json!({"deployment": {"osname": osname, "ref": reference}}),
    )
}

pub fn ostree_selinux(osname: &str, reference: &str) -> Stage {
    Stage::new(
        "org.osbuild.ostree.selinux",
        json!({"deployment": {"osname": osname, "ref": reference}}),
    )
}

pub fn buildstamp(arch: &str, product: &str, version: &str, variant: &str) -> Stage {
    Stage::new(
        "org.osbuild.buildstamp",
        json!({"arch": arch, "product": product, "version": version, "final": true, "variant": variant, "bugurl": ""}),
    )
}

pub fn anaconda(modules: &[String]) -> Stage {
    Stage::new("org.osbuild.anaconda", json!({"activatable-modules": modules}))
}

pub fn installer_users() -> Stage {
    Stage::new(
        "org.osbuild.users",
        json!({"users": {
            "root": {"password": ""},
            "install": {"uid": 0, "gid": 0, "home": "/root", "shell": "/usr/libexec/anaconda/run-anaconda", "password": ""},
        }}),
    )
}

pub fn lorax_script(basearch: &str) -> Stage {
    Stage::new(
        "org.osbuild.lorax-script",
        json!({"path": "99-generic/runtime-postinstall.tmpl", "basearch": basearch}),
    )
}

pub fn dracut(chain: &str, kernel: &str, modules: &[String], drivers: &[String]) -> Stage {
    Stage::new(
        "org.osbuild.dracut",
        object([
            ("kernel", Some(json!([KERNEL_VERSION]))),
            ("add_modules", non_empty(modules)),
            ("add_drivers", non_empty(drivers)),
            ("install", Some(json!(["/.buildstamp"]))),
        ]),
    )
    .with_binding(Binding::KernelVersion {
        chain: chain.to_owned(),
        package: kernel.to_owned(),
    })
}

/// Copy the kernel and initramfs from an installer tree into `dir`.
pub fn copy_boot_files(source: &str, dir: &str, chain: &str, kernel: &str) -> Stage {
    Stage::new(
        "org.osbuild.copy",
        json!({"paths": [
            {"from": format!("input://tree/boot/vmlinuz-{KERNEL_VERSION}"), "to": format!("tree://{dir}/vmlinuz")},
            {"from": format!("input://tree/boot/initramfs-{KERNEL_VERSION}.img"), "to": format!("tree://{dir}/initrd.img")},
        ]}),
    )
    .with_input(
        "tree",
        Input::Tree {
            pipeline: source.to_owned(),
        },
    )
    .with_binding(Binding::KernelVersion {
        chain: chain.to_owned(),
        package: kernel.to_owned(),
    })
}

pub fn efi_architectures(arch: &str) -> Vec<&'static str> {
    match arch {
        "x86_64" => vec!["X64"],
        "aarch64" => vec!["AA64"],
        _ => Vec::new(),
    }
}

pub fn grub2_iso(product: &str, version: &str, iso_label: &str, arch: &str, vendor: &str, kernel_options: &[String], timeout: Option<u32>) -> Stage {
    Stage::new(
        "org.osbuild.grub2.iso",
        object([
            ("product", Some(json!({"name": product, "version": version}))),
            ("kernel", Some(json!({"dir": "/images/pxeboot", "opts": kernel_options}))),
            ("isolabel", Some(json!(iso_label))),
            ("architectures", Some(json!(efi_architectures(arch)))),
            ("vendor", Some(json!(vendor))),
            ("config", timeout.map(|t| json!({"timeout": t}))),
        ]),
    )
}

pub fn isolinux(product: &str, version: &str, kernel_options: &[String], source: &str) -> Stage {
    Stage::new(
        "org.osbuild.isolinux",
        json!({
            "product": {"name": product, "version": version},
            "kernel": {"dir": "/images/pxeboot", "opts": kernel_options},
        }),
    )
    .with_input(
        "data",
        Input::Tree {
            pipeline: source.to_owned(),
        },
    )
}

pub fn squashfs(filename: &str, source: &str) -> Stage {
    Stage::new(
        "org.osbuild.squashfs",
        json!({"filename": filename, "compression": {"method": "xz", "options": {"bcj": "x86"}}}),
    )
    .with_input(
        "tree",
        Input::Tree {
            pipeline: source.to_owned(),
        },
    )
}

pub fn erofs(filename: &str, source: &str) -> Stage {
    Stage::new(
        "org.osbuild.erofs",
        json!({"filename": filename, "compression": {"method": "lzma", "level": 6}}),
    )
    .with_input(
        "tree",
        Input::Tree {
            pipeline: source.to_owned(),
        },
    )
}

pub fn discinfo(basearch: &str, release: &str) -> Stage {
    Stage::new("org.osbuild.discinfo", json!({"basearch": basearch, "release": release}))
}

pub fn xorrisofs(filename: &str, volid: &str, source: &str, bios: bool) -> Stage {
    let boot = bios.then(|| json!({"image": "isolinux/isolinux.bin", "catalog": "isolinux/boot.cat"}));
    Stage::new(
        "org.osbuild.xorrisofs",
        object([
            ("filename", Some(json!(filename))),
            ("volid", Some(json!(volid))),
            ("sysid", Some(json!("LINUX"))),
            ("boot", boot),
            ("efi", Some(json!("images/efiboot.img"))),
            ("isohybridmbr", bios.then(|| json!("/usr/share/syslinux/isohdpfx.bin"))),
            ("isolevel", Some(json!(3))),
        ]),
    )
    .with_input(
        "tree",
        Input::Tree {
            pipeline: source.to_owned(),
        },
    )
}

pub fn implantisomd5(filename: &str) -> Stage {
    Stage::new("org.osbuild.implantisomd5", json!({"filename": filename}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgplan_defs::{Filesystem, LogicalVolume, Partition, PartitionTableType, VolumeGroup};

    fn lvm_table() -> PartitionTable {
        PartitionTable {
            uuid: "D209C89E-EA5E-4FBD-B161-B461CCE297E0".to_owned(),
            table_type: PartitionTableType::Gpt,
            size: 10 << 30,
            start_offset: 1 << 20,
            partitions: vec![
                Partition {
                    start: 1 << 20,
                    size: 1 << 30,
                    part_type: "0FC63DAF-8483-4772-8E79-3D69D8477DE4".to_owned(),
                    payload: Some(Payload::Filesystem(Filesystem {
                        fs_type: "xfs".to_owned(),
                        uuid: "b".to_owned(),
                        mountpoint: "/boot".to_owned(),
                        ..Default::default()
                    })),
                    ..Default::default()
                },
                Partition {
                    start: (1 << 30) + (1 << 20),
                    size: 8 << 30,
                    part_type: "E6D6D379-F507-44C2-A23C-238F2A3DF928".to_owned(),
                    payload: Some(Payload::Lvm(VolumeGroup {
                        name: "rootvg".to_owned(),
                        description: String::new(),
                        logical_volumes: vec![LogicalVolume {
                            name: "rootlv".to_owned(),
                            size: 8 << 30,
                            payload: Some(Payload::Filesystem(Filesystem {
                                fs_type: "xfs".to_owned(),
                                uuid: "r".to_owned(),
                                mountpoint: "/".to_owned(),
                                ..Default::default()
                            })),
                        }],
                    })),
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn lvm_mkfs_targets_the_logical_volume() {
        let table = lvm_table();
        let entries = crate::disk::filesystems(&table);
        let stages = mkfs(&table, "disk.img", &entries);
        assert_eq!(stages.len(), 2);
        let root = &stages[1];
        assert_eq!(root.stage_type, "org.osbuild.mkfs.xfs");
        assert_eq!(root.devices["device"]["type"], "org.osbuild.lvm2.lv");
        assert_eq!(root.devices["device"]["parent"], "part2");
        assert_eq!(root.devices["part2"]["options"]["start"], json!(2099200));
    }

    #[test]
    fn mounts_put_root_first() {
        let table = lvm_table();
        let entries = crate::disk::filesystems(&table);
        let (devices, mounts) = disk_mounts(&table, "disk.img", &entries);
        assert_eq!(mounts[0]["name"], "-");
        assert_eq!(mounts[0]["source"], "rootlv");
        assert_eq!(mounts[1]["name"], "-boot");
        assert!(devices.contains_key("part1"));
        assert!(devices.contains_key("part2"));
    }

    #[test]
    fn sfdisk_uses_sectors() {
        let stage = sfdisk(&lvm_table(), "disk.img");
        assert_eq!(stage.options["label"], "gpt");
        assert_eq!(stage.options["partitions"][0]["start"], json!(2048));
        assert_eq!(stage.options["partitions"][0]["size"], json!(2097152));
    }

    #[test]
    fn ownership_stages_only_when_needed() {
        let files = vec![FileCustomization {
            path: "/etc/motd".to_owned(),
            mode: Some("0644".to_owned()),
            data: Some("hi".to_owned()),
            ..Default::default()
        }];
        assert!(chown(&[], &files).is_none());
        let chmod = chmod(&files).unwrap();
        assert_eq!(chmod.options["items"]["/etc/motd"]["mode"], "0644");
    }
}
