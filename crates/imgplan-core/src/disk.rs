//! Partition-table resolution.
//!
//! The base table of an image type is adjusted for one request: blueprint
//! filesystem or disk customizations, the partitioning mode, required sizes
//! and the image size floor. The result is laid out on MiB boundaries and
//! every missing identifier is drawn from the request's seeded RNG, so equal
//! inputs always produce equal tables.

use crate::image_type::ImageType;
use crate::policy::{PathPolicies, PolicyError};
use imgplan_defs::image_type::Size;
use imgplan_defs::{
    Btrfs, BtrfsSubvolume, Filesystem, LogicalVolume, Partition, PartitionTable,
    PartitionTableType, Payload, Swap, VolumeGroup,
};
use imgplan_schema::datasize::MIB;
use imgplan_schema::{
    DiskCustomization, FilesystemCustomization, PartitionCustomization, PartitioningMode,
};
use indexmap::IndexMap;
use rand::Rng;
use thiserror::Error;
use tracing::debug;

const VG_DESCRIPTION: &str = "created via lvm2 by imgplan";
const LVM_HEADER: u64 = MIB;
const GPT_FOOTER: u64 = MIB;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("partitioning mode {mode} not supported for {image_type}")]
    ModeNotSupported {
        mode: PartitioningMode,
        image_type: String,
    },
    #[error("partitioning customizations cannot be combined: filesystem and disk are mutually exclusive")]
    FilesystemAndDisk,
    #[error("multiple LVM volume groups are not yet supported")]
    MultipleVolumeGroups,
    #[error("swap partitions are not supported on {0}")]
    SwapUnsupported(String),
    #[error("The following custom mountpoints are not supported {0:?}")]
    MountpointPolicy(Vec<String>),
    #[error("mountpoint {0:?} must be canonical")]
    NotCanonical(String),
    #[error("unknown disk partition type \"{0}\"")]
    UnknownPartitionType(String),
    #[error("unknown partition table type \"{0}\"")]
    UnknownTableType(String),
    #[error("{0} without a mountpoint must be swap")]
    MissingMountpoint(String),
    #[error("partition table size exceeds {} bytes", u64::MAX)]
    SizeTooLarge,
}

/// The partitioning mode a request actually runs with.
pub fn effective_partitioning_mode(
    image_type: &ImageType,
    requested: PartitioningMode,
) -> Result<PartitioningMode, PartitionError> {
    let kind = image_type.kind();
    let ostree_disk = kind.is_ostree() && kind.has_disk_pipeline();
    let lvm_as_auto = image_type.definition().lvm_as_auto_lvm;
    let unsupported = || PartitionError::ModeNotSupported {
        mode: requested,
        image_type: image_type.name().to_owned(),
    };
    let mode = match requested {
        PartitioningMode::Raw if ostree_disk || lvm_as_auto => return Err(unsupported()),
        PartitioningMode::Btrfs if ostree_disk || !image_type.distro().btrfs_supported => {
            return Err(unsupported())
        }
        PartitioningMode::Lvm if lvm_as_auto => PartitioningMode::AutoLvm,
        PartitioningMode::Default => PartitioningMode::AutoLvm,
        mode => mode,
    };
    if mode != requested {
        debug!("partitioning mode {requested} becomes {mode} for {}", image_type.name());
    }
    Ok(mode)
}

#[derive(Debug, Clone)]
pub struct DiskRequest<'a> {
    pub image_type: &'a str,
    pub base: &'a PartitionTable,
    pub mode: PartitioningMode,
    pub filesystems: &'a [FilesystemCustomization],
    pub disk: Option<&'a DiskCustomization>,
    pub required_sizes: &'a IndexMap<String, Size>,
    /// Minimum total size of the disk.
    pub size: u64,
    pub default_fs_type: &'a str,
    /// Distro and architecture, for error messages.
    pub platform: &'a str,
    pub swap_supported: bool,
    pub ostree: bool,
}

pub fn resolve<R: Rng>(
    req: &DiskRequest<'_>,
    rng: &mut R,
) -> Result<PartitionTable, PartitionError> {
    if !req.filesystems.is_empty() && req.disk.is_some() {
        return Err(PartitionError::FilesystemAndDisk);
    }
    check_mountpoints(req)?;

    let mut table = match req.disk {
        Some(disk) => custom_table(req, disk)?,
        None => {
            let mut table = req.base.clone();
            match req.mode {
                PartitioningMode::Lvm => {
                    ensure_volume_group(&mut table);
                }
                PartitioningMode::Btrfs => {
                    ensure_btrfs(&mut table);
                }
                _ => {}
            }
            for fs in req.filesystems {
                apply_filesystem(&mut table, fs, req.mode);
            }
            table
        }
    };

    apply_required_sizes(&mut table, req.required_sizes);
    let floor = req.size.max(req.disk.map_or(0, |d| d.minsize));
    relayout(&mut table, floor)?;
    assign_types(&mut table)?;
    fill_fs_types(&mut table, req.default_fs_type);
    assign_ids(&mut table, rng);
    debug!(
        "{}: {} table with {} partitions, {} bytes",
        req.image_type,
        table.table_type,
        table.partitions.len(),
        table.size
    );
    Ok(table)
}

fn check_mountpoints(req: &DiskRequest<'_>) -> Result<(), PartitionError> {
    let policies = if req.ostree {
        PathPolicies::ostree_mountpoints()
    } else {
        PathPolicies::mountpoints()
    };
    let mut mountpoints: Vec<&str> = req.filesystems.iter().map(|f| f.mountpoint.as_str()).collect();
    if let Some(disk) = req.disk {
        mountpoints.extend(disk.mountpoints());
    }
    let mut denied = Vec::new();
    for mountpoint in mountpoints {
        match policies.check(mountpoint) {
            Ok(()) => {}
            Err(PolicyError::NotCanonical(path)) => return Err(PartitionError::NotCanonical(path)),
            Err(PolicyError::Denied(path)) => denied.push(path),
        }
    }
    if denied.is_empty() {
        Ok(())
    } else {
        Err(PartitionError::MountpointPolicy(denied))
    }
}

fn is_under(prefix: &str, path: &str) -> bool {
    prefix == "/"
        || path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn lv_name(mountpoint: &str) -> String {
    match mountpoint.trim_start_matches('/') {
        "" if mountpoint == "/" => "rootlv".to_owned(),
        "" => "swaplv".to_owned(),
        rest => format!("{}lv", rest.replace('/', "_")),
    }
}

fn subvolume_name(mountpoint: &str) -> String {
    match mountpoint {
        "/" => "root".to_owned(),
        other => other.trim_start_matches('/').to_owned(),
    }
}

fn part_type_for(mountpoint: &str, fs_type: &str) -> &'static str {
    match (mountpoint, fs_type) {
        (_, "swap") => "swap",
        ("/", _) => "root",
        ("/boot", _) => "xboot",
        ("/boot/efi", _) => "esp",
        _ => "data",
    }
}

fn fs_payload(fs_type: &str, mountpoint: &str, label: &str) -> Payload {
    if fs_type == "swap" {
        return Payload::Swap(Swap {
            label: label.to_owned(),
            fstab_options: "defaults".to_owned(),
            ..Default::default()
        });
    }
    Payload::Filesystem(Filesystem {
        fs_type: fs_type.to_owned(),
        label: label.to_owned(),
        mountpoint: mountpoint.to_owned(),
        fstab_options: "defaults".to_owned(),
        fstab_passno: if mountpoint == "/" { 1 } else { 2 },
        ..Default::default()
    })
}

enum Slot<'a> {
    Partition,
    Volume(&'a mut u64),
    Missing,
}

fn payload_slot<'a>(payload: &'a mut Payload, mountpoint: &str) -> Slot<'a> {
    match payload {
        Payload::Filesystem(fs) if fs.mountpoint == mountpoint => Slot::Partition,
        Payload::Btrfs(btrfs) if btrfs.subvolumes.iter().any(|s| s.mountpoint == mountpoint) => {
            Slot::Partition
        }
        Payload::Luks(luks) => match luks.payload.as_mut() {
            Some(inner) => payload_slot(inner, mountpoint),
            None => Slot::Missing,
        },
        Payload::Lvm(vg) => {
            for lv in &mut vg.logical_volumes {
                if lv
                    .payload
                    .as_ref()
                    .is_some_and(|p| p.mountpoints().contains(&mountpoint))
                {
                    return Slot::Volume(&mut lv.size);
                }
            }
            Slot::Missing
        }
        _ => Slot::Missing,
    }
}

/// The size of whatever directly holds `mountpoint`: a partition or a
/// logical volume.
fn size_slot<'t>(table: &'t mut PartitionTable, mountpoint: &str) -> Option<&'t mut u64> {
    for part in &mut table.partitions {
        let Some(payload) = part.payload.as_mut() else {
            continue;
        };
        match payload_slot(payload, mountpoint) {
            Slot::Partition => return Some(&mut part.size),
            Slot::Volume(size) => return Some(size),
            Slot::Missing => {}
        }
    }
    None
}

fn grow(table: &mut PartitionTable, mountpoint: &str, size: u64) -> bool {
    match size_slot(table, mountpoint) {
        Some(slot) => {
            *slot = (*slot).max(size);
            true
        }
        None => false,
    }
}

fn is_root_fs(part: &Partition) -> bool {
    matches!(&part.payload, Some(Payload::Filesystem(fs)) if fs.mountpoint == "/")
}

/// The volume group of the table, moving the root filesystem onto a new
/// `rootvg` when there is none yet.
fn ensure_volume_group(table: &mut PartitionTable) -> Option<&mut VolumeGroup> {
    let index = match table
        .partitions
        .iter()
        .position(|p| matches!(p.payload, Some(Payload::Lvm(_))))
    {
        Some(index) => index,
        None => {
            let index = table.partitions.iter().position(is_root_fs)?;
            let part = &mut table.partitions[index];
            if let Some(Payload::Filesystem(root)) = part.payload.take() {
                part.payload = Some(Payload::Lvm(VolumeGroup {
                    name: "rootvg".to_owned(),
                    description: VG_DESCRIPTION.to_owned(),
                    logical_volumes: vec![LogicalVolume {
                        name: "rootlv".to_owned(),
                        size: part.size,
                        payload: Some(Payload::Filesystem(root)),
                    }],
                }));
                part.part_type = "lvm".to_owned();
                debug!("moved root filesystem onto LVM volume group rootvg");
            }
            index
        }
    };
    match table.partitions[index].payload.as_mut() {
        Some(Payload::Lvm(vg)) => Some(vg),
        _ => None,
    }
}

/// The btrfs partition of the table, converting the root filesystem into a
/// `root` subvolume when there is none yet.
fn ensure_btrfs(table: &mut PartitionTable) -> Option<&mut Partition> {
    let index = match table
        .partitions
        .iter()
        .position(|p| matches!(p.payload, Some(Payload::Btrfs(_))))
    {
        Some(index) => index,
        None => {
            let index = table.partitions.iter().position(is_root_fs)?;
            let part = &mut table.partitions[index];
            if let Some(Payload::Filesystem(root)) = part.payload.take() {
                part.payload = Some(Payload::Btrfs(Btrfs {
                    uuid: root.uuid,
                    label: root.label,
                    subvolumes: vec![BtrfsSubvolume {
                        name: "root".to_owned(),
                        mountpoint: "/".to_owned(),
                        compress: String::new(),
                    }],
                }));
                debug!("converted root filesystem to btrfs");
            }
            index
        }
    };
    table.partitions.get_mut(index)
}

fn apply_filesystem(table: &mut PartitionTable, fs: &FilesystemCustomization, mode: PartitioningMode) {
    if grow(table, &fs.mountpoint, fs.minsize) {
        return;
    }
    let plain = |table: &mut PartitionTable| {
        table.partitions.push(Partition {
            size: fs.minsize,
            part_type: part_type_for(&fs.mountpoint, "").to_owned(),
            payload: Some(fs_payload("", &fs.mountpoint, "")),
            ..Default::default()
        });
    };
    match mode {
        PartitioningMode::Raw => plain(table),
        PartitioningMode::Btrfs => match ensure_btrfs(table) {
            Some(part) => {
                part.size = part.size.saturating_add(fs.minsize);
                if let Some(Payload::Btrfs(btrfs)) = part.payload.as_mut() {
                    btrfs.subvolumes.push(BtrfsSubvolume {
                        name: subvolume_name(&fs.mountpoint),
                        mountpoint: fs.mountpoint.clone(),
                        compress: String::new(),
                    });
                }
            }
            None => plain(table),
        },
        _ => match ensure_volume_group(table) {
            Some(vg) => {
                let mut name = lv_name(&fs.mountpoint);
                let mut n = 0;
                while vg.logical_volumes.iter().any(|lv| lv.name == name) {
                    n += 1;
                    name = format!("{}{n:02}", lv_name(&fs.mountpoint));
                }
                vg.logical_volumes.push(LogicalVolume {
                    name,
                    size: fs.minsize,
                    payload: Some(fs_payload("", &fs.mountpoint, "")),
                });
            }
            None => plain(table),
        },
    }
}

fn custom_partition(pc: &PartitionCustomization) -> Partition {
    match pc.kind() {
        "lvm" => Partition {
            size: pc.minsize,
            part_type: "lvm".to_owned(),
            payload: Some(Payload::Lvm(VolumeGroup {
                name: if pc.name.is_empty() {
                    "rootvg".to_owned()
                } else {
                    pc.name.clone()
                },
                description: VG_DESCRIPTION.to_owned(),
                logical_volumes: pc
                    .logical_volumes
                    .iter()
                    .map(|lv| LogicalVolume {
                        name: if lv.name.is_empty() {
                            lv_name(&lv.mountpoint)
                        } else {
                            lv.name.clone()
                        },
                        size: lv.minsize,
                        payload: Some(fs_payload(&lv.fs_type, &lv.mountpoint, &lv.label)),
                    })
                    .collect(),
            })),
            ..Default::default()
        },
        "btrfs" => Partition {
            size: pc.minsize,
            part_type: if pc.subvolumes.iter().any(|s| s.mountpoint == "/") {
                "root"
            } else {
                "data"
            }
            .to_owned(),
            payload: Some(Payload::Btrfs(Btrfs {
                label: pc.label.clone(),
                subvolumes: pc
                    .subvolumes
                    .iter()
                    .map(|s| BtrfsSubvolume {
                        name: s.name.clone(),
                        mountpoint: s.mountpoint.clone(),
                        compress: String::new(),
                    })
                    .collect(),
                ..Default::default()
            })),
            ..Default::default()
        },
        _ => Partition {
            size: pc.minsize,
            part_type: part_type_for(&pc.mountpoint, &pc.fs_type).to_owned(),
            payload: Some(fs_payload(&pc.fs_type, &pc.mountpoint, &pc.label)),
            ..Default::default()
        },
    }
}

/// Boot partitions of the base table survive a custom layout unless the
/// layout redefines them.
fn keeps_boot_partition(part: &Partition, table_type: PartitionTableType, custom: &[&str]) -> bool {
    match &part.payload {
        None => table_type == PartitionTableType::Gpt || part.part_type != "bios",
        Some(Payload::Filesystem(fs)) => {
            fs.mountpoint.starts_with("/boot") && !custom.contains(&fs.mountpoint.as_str())
        }
        Some(_) => false,
    }
}

fn custom_table(
    req: &DiskRequest<'_>,
    disk: &DiskCustomization,
) -> Result<PartitionTable, PartitionError> {
    let mut volume_groups = 0;
    for part in &disk.partitions {
        match part.kind() {
            "plain" if part.mountpoint.is_empty() && part.fs_type != "swap" => {
                return Err(PartitionError::MissingMountpoint("plain partition".to_owned()));
            }
            "plain" | "btrfs" => {}
            "lvm" => {
                volume_groups += 1;
                if let Some(lv) = part
                    .logical_volumes
                    .iter()
                    .find(|lv| lv.mountpoint.is_empty() && lv.fs_type != "swap")
                {
                    return Err(PartitionError::MissingMountpoint(format!(
                        "logical volume {:?}",
                        lv.name
                    )));
                }
            }
            other => return Err(PartitionError::UnknownPartitionType(other.to_owned())),
        }
    }
    if volume_groups > 1 {
        return Err(PartitionError::MultipleVolumeGroups);
    }
    if disk.has_swap() && !req.swap_supported {
        return Err(PartitionError::SwapUnsupported(req.platform.to_owned()));
    }
    let table_type = match disk.table_type.as_str() {
        "" => req.base.table_type,
        "gpt" => PartitionTableType::Gpt,
        "dos" => PartitionTableType::Dos,
        other => return Err(PartitionError::UnknownTableType(other.to_owned())),
    };

    let custom = disk.mountpoints();
    let mut partitions: Vec<Partition> = req
        .base
        .partitions
        .iter()
        .filter(|p| keeps_boot_partition(p, table_type, &custom))
        .cloned()
        .collect();
    partitions.extend(disk.partitions.iter().map(custom_partition));

    let mut table = PartitionTable {
        uuid: if table_type == req.base.table_type {
            req.base.uuid.clone()
        } else {
            String::new()
        },
        table_type,
        size: 0,
        start_offset: req.base.start_offset,
        partitions,
    };
    if !table.contains_mountpoint("/") {
        let root = req
            .base
            .partitions
            .iter()
            .find(|p| is_root_fs(p))
            .cloned()
            .unwrap_or_else(|| Partition {
                part_type: "root".to_owned(),
                payload: Some(fs_payload("", "/", "root")),
                ..Default::default()
            });
        table.partitions.push(root);
    }
    Ok(table)
}

fn apply_required_sizes(table: &mut PartitionTable, required: &IndexMap<String, Size>) {
    let mountpoints: Vec<String> = table.mountpoints().into_iter().map(str::to_owned).collect();
    let mut totals: IndexMap<String, u64> = IndexMap::new();
    for (path, size) in required {
        let container = mountpoints
            .iter()
            .filter(|m| is_under(m, path))
            .max_by_key(|m| m.len());
        if let Some(container) = container {
            let total = totals.entry(container.clone()).or_default();
            *total = total.saturating_add(size.0);
        }
    }
    for (mountpoint, size) in totals {
        grow(table, &mountpoint, size);
    }
}

fn align_up(n: u64) -> Result<u64, PartitionError> {
    n.div_ceil(MIB)
        .checked_mul(MIB)
        .ok_or(PartitionError::SizeTooLarge)
}

fn add(a: u64, b: u64) -> Result<u64, PartitionError> {
    a.checked_add(b).ok_or(PartitionError::SizeTooLarge)
}

fn align_volumes(payload: &mut Payload) -> Result<u64, PartitionError> {
    match payload {
        Payload::Lvm(vg) => {
            let mut total = LVM_HEADER;
            for lv in &mut vg.logical_volumes {
                lv.size = align_up(lv.size)?;
                total = add(total, lv.size)?;
            }
            Ok(total)
        }
        Payload::Luks(luks) => luks.payload.as_mut().map_or(Ok(0), align_volumes),
        _ => Ok(0),
    }
}

/// Lay partitions out back to back from the start offset and grow the last
/// one so the disk reaches `floor`.
fn relayout(table: &mut PartitionTable, floor: u64) -> Result<(), PartitionError> {
    let mut cursor = align_up(table.start_offset.max(MIB))?;
    for part in &mut table.partitions {
        let needed = part.payload.as_mut().map_or(Ok(0), align_volumes)?;
        part.size = align_up(part.size.max(needed))?;
        part.start = cursor;
        cursor = add(cursor, part.size)?;
    }
    let footer = match table.table_type {
        PartitionTableType::Gpt => GPT_FOOTER,
        PartitionTableType::Dos => 0,
    };
    let total = add(cursor, footer)?;
    let floor = align_up(floor.max(table.size))?;
    if total < floor {
        if let Some(last) = table.partitions.last_mut() {
            last.size = add(last.size, floor - total)?;
        }
    }
    table.size = total.max(floor);
    Ok(())
}

const PARTITION_TYPES: &[(&str, &str, Option<&str>)] = &[
    ("bios", "21686148-6449-6E6F-744E-656564454649", None),
    ("esp", "C12A7328-F81F-11D2-BA4B-00A0C93EC93B", Some("ef")),
    ("xboot", "BC13C2FF-59E6-4262-A352-B275FD6F7172", Some("83")),
    ("root", "0FC63DAF-8483-4772-8E79-3D69D8477DE4", Some("83")),
    ("data", "0FC63DAF-8483-4772-8E79-3D69D8477DE4", Some("83")),
    ("linux", "0FC63DAF-8483-4772-8E79-3D69D8477DE4", Some("83")),
    ("lvm", "E6D6D379-F507-44C2-A23C-238F2A3DF928", Some("8e")),
    ("swap", "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F", Some("82")),
    ("prep", "9E1A2D38-C612-4316-AA26-8B49521E5A8B", Some("41")),
];

/// The on-disk type id of a symbolic partition type; GUIDs and DOS ids pass
/// through unchanged.
pub fn partition_type_id(symbolic: &str, table_type: PartitionTableType) -> Option<String> {
    let symbolic = if symbolic.is_empty() { "data" } else { symbolic };
    let known = PARTITION_TYPES.iter().find(|(name, _, _)| *name == symbolic);
    match (table_type, known) {
        (PartitionTableType::Gpt, Some((_, guid, _))) => Some((*guid).to_owned()),
        (PartitionTableType::Dos, Some((_, _, dos))) => dos.map(str::to_owned),
        (PartitionTableType::Gpt, None) if uuid::Uuid::parse_str(symbolic).is_ok() => {
            Some(symbolic.to_uppercase())
        }
        (PartitionTableType::Dos, None)
            if symbolic.len() == 2 && symbolic.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            Some(symbolic.to_lowercase())
        }
        _ => None,
    }
}

fn assign_types(table: &mut PartitionTable) -> Result<(), PartitionError> {
    for part in &mut table.partitions {
        part.part_type = partition_type_id(&part.part_type, table.table_type).ok_or_else(|| {
            PartitionError::UnknownPartitionType(format!("{} on {}", part.part_type, table.table_type))
        })?;
    }
    Ok(())
}

fn visit_payloads(payload: &mut Payload, f: &mut dyn FnMut(&mut Payload)) {
    f(payload);
    match payload {
        Payload::Luks(luks) => {
            if let Some(inner) = luks.payload.as_mut() {
                visit_payloads(inner, f);
            }
        }
        Payload::Lvm(vg) => {
            for lv in &mut vg.logical_volumes {
                if let Some(inner) = lv.payload.as_mut() {
                    visit_payloads(inner, f);
                }
            }
        }
        _ => {}
    }
}

fn visit_table(table: &mut PartitionTable, f: &mut dyn FnMut(&mut Payload)) {
    for part in &mut table.partitions {
        if let Some(payload) = part.payload.as_mut() {
            visit_payloads(payload, f);
        }
    }
}

fn fill_fs_types(table: &mut PartitionTable, default_fs_type: &str) {
    visit_table(table, &mut |payload| {
        if let Payload::Filesystem(fs) = payload {
            if fs.fs_type.is_empty() {
                fs.fs_type = default_fs_type.to_owned();
            }
        }
    });
}

fn random_uuid<R: Rng>(rng: &mut R) -> String {
    uuid::Builder::from_random_bytes(rng.random::<[u8; 16]>())
        .into_uuid()
        .to_string()
}

fn fill_uuid<R: Rng>(slot: &mut String, rng: &mut R) {
    if slot.is_empty() {
        *slot = random_uuid(rng);
    }
}

/// Fill every empty table, partition and filesystem identifier. The walk
/// order is fixed so the RNG stream maps to the same slots on every run.
fn assign_ids<R: Rng>(table: &mut PartitionTable, rng: &mut R) {
    if table.uuid.is_empty() {
        table.uuid = match table.table_type {
            PartitionTableType::Gpt => random_uuid(rng).to_uppercase(),
            PartitionTableType::Dos => format!("0x{:08x}", rng.random::<u32>()),
        };
    }
    if table.table_type == PartitionTableType::Gpt {
        for part in &mut table.partitions {
            if part.uuid.is_empty() {
                part.uuid = random_uuid(rng).to_uppercase();
            }
        }
    }
    visit_table(table, &mut |payload| match payload {
        Payload::Filesystem(fs) if fs.uuid.is_empty() => {
            fs.uuid = if fs.fs_type == "vfat" {
                let id = rng.random::<u32>();
                format!("{:04X}-{:04X}", id >> 16, id & 0xffff)
            } else {
                random_uuid(rng)
            };
        }
        Payload::Luks(luks) => fill_uuid(&mut luks.uuid, rng),
        Payload::Btrfs(btrfs) => fill_uuid(&mut btrfs.uuid, rng),
        Payload::Swap(swap) => fill_uuid(&mut swap.uuid, rng),
        _ => {}
    });
}

/// One mountable (or swap) entry of a resolved table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub fs_type: String,
    pub uuid: String,
    pub label: String,
    pub mountpoint: String,
    pub fstab_options: String,
    pub fstab_freq: u64,
    pub fstab_passno: u64,
    /// Index of the partition holding the entry.
    pub partition: usize,
    /// Volume group and logical volume names for LVM-backed entries.
    pub volume: Option<(String, String)>,
    pub subvolume: Option<String>,
}

fn collect_entries(
    payload: &Payload,
    partition: usize,
    volume: Option<(String, String)>,
    out: &mut Vec<FsEntry>,
) {
    let entry = |fs_type: &str, uuid: &str, label: &str| FsEntry {
        fs_type: fs_type.to_owned(),
        uuid: uuid.to_owned(),
        label: label.to_owned(),
        mountpoint: String::new(),
        fstab_options: "defaults".to_owned(),
        fstab_freq: 0,
        fstab_passno: 0,
        partition,
        volume: volume.clone(),
        subvolume: None,
    };
    match payload {
        Payload::Filesystem(fs) => out.push(FsEntry {
            mountpoint: fs.mountpoint.clone(),
            fstab_options: if fs.fstab_options.is_empty() {
                "defaults".to_owned()
            } else {
                fs.fstab_options.clone()
            },
            fstab_freq: fs.fstab_freq,
            fstab_passno: fs.fstab_passno,
            ..entry(&fs.fs_type, &fs.uuid, &fs.label)
        }),
        Payload::Swap(swap) => out.push(FsEntry {
            mountpoint: "none".to_owned(),
            ..entry("swap", &swap.uuid, &swap.label)
        }),
        Payload::Btrfs(btrfs) => {
            for sv in &btrfs.subvolumes {
                out.push(FsEntry {
                    mountpoint: sv.mountpoint.clone(),
                    fstab_options: format!("subvol={}", sv.name),
                    subvolume: Some(sv.name.clone()),
                    ..entry("btrfs", &btrfs.uuid, &btrfs.label)
                });
            }
        }
        Payload::Luks(luks) => {
            if let Some(inner) = &luks.payload {
                collect_entries(inner, partition, volume, out);
            }
        }
        Payload::Lvm(vg) => {
            for lv in &vg.logical_volumes {
                if let Some(inner) = &lv.payload {
                    collect_entries(inner, partition, Some((vg.name.clone(), lv.name.clone())), out);
                }
            }
        }
    }
}

/// Every filesystem and swap area of a table, in table order.
pub fn filesystems(table: &PartitionTable) -> Vec<FsEntry> {
    let mut out = Vec::new();
    for (index, part) in table.partitions.iter().enumerate() {
        if let Some(payload) = &part.payload {
            collect_entries(payload, index, None, &mut out);
        }
    }
    out
}
