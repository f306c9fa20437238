//! Partition table model shared by the definitions and the resolver.
//!
//! In YAML a partition (or logical volume) carries its content as a sibling
//! pair `payload_type` / `payload`, so the payload struct keeps its own `type`
//! key for the filesystem type:
//!
//! ```yaml
//! - size: 1 GiB
//!   type: xboot
//!   payload_type: filesystem
//!   payload: {type: xfs, mountpoint: /boot}
//! ```

use imgplan_schema::datasize;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTableType {
    #[default]
    Gpt,
    Dos,
}

impl fmt::Display for PartitionTableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionTableType::Gpt => write!(f, "gpt"),
            PartitionTableType::Dos => write!(f, "dos"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartitionTable {
    #[serde(default)]
    pub uuid: String,
    #[serde(rename = "type")]
    pub table_type: PartitionTableType,
    #[serde(default, deserialize_with = "datasize::deserialize")]
    pub size: u64,
    #[serde(default, deserialize_with = "datasize::deserialize")]
    pub start_offset: u64,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(try_from = "PartitionYaml")]
pub struct Partition {
    pub start: u64,
    pub size: u64,
    /// GPT type GUID, DOS id, or a symbolic name (`bios`, `esp`, `xboot`,
    /// `root`, `data`, `lvm`, `swap`, `prep`) translated by the resolver.
    pub part_type: String,
    pub uuid: String,
    pub bootable: bool,
    pub payload: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Filesystem(Filesystem),
    Luks(Box<Luks>),
    Lvm(VolumeGroup),
    Btrfs(Btrfs),
    Swap(Swap),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Filesystem {
    /// Empty selects the distro default filesystem type.
    #[serde(default, rename = "type")]
    pub fs_type: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub fstab_options: String,
    #[serde(default)]
    pub fstab_freq: u64,
    #[serde(default)]
    pub fstab_passno: u64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(try_from = "LuksYaml")]
pub struct Luks {
    pub label: String,
    pub uuid: String,
    pub cipher: String,
    pub passphrase: String,
    pub payload: Option<Payload>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VolumeGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub logical_volumes: Vec<LogicalVolume>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(try_from = "LogicalVolumeYaml")]
pub struct LogicalVolume {
    pub name: String,
    pub size: u64,
    pub payload: Option<Payload>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Btrfs {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub subvolumes: Vec<BtrfsSubvolume>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BtrfsSubvolume {
    pub name: String,
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub compress: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Swap {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub fstab_options: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PartitionYaml {
    #[serde(default, deserialize_with = "datasize::deserialize")]
    start: u64,
    #[serde(default, deserialize_with = "datasize::deserialize")]
    size: u64,
    #[serde(default, rename = "type")]
    part_type: String,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    bootable: bool,
    #[serde(default)]
    payload_type: Option<String>,
    #[serde(default)]
    payload: Option<serde_yaml::Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LuksYaml {
    #[serde(default)]
    label: String,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    cipher: String,
    #[serde(default)]
    passphrase: String,
    #[serde(default)]
    payload_type: Option<String>,
    #[serde(default)]
    payload: Option<serde_yaml::Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LogicalVolumeYaml {
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "datasize::deserialize")]
    size: u64,
    #[serde(default)]
    payload_type: Option<String>,
    #[serde(default)]
    payload: Option<serde_yaml::Value>,
}

fn decode_payload(
    payload_type: Option<String>,
    payload: Option<serde_yaml::Value>,
) -> Result<Option<Payload>, String> {
    fn value<T: serde::de::DeserializeOwned>(
        kind: &str,
        payload: Option<serde_yaml::Value>,
    ) -> Result<T, String> {
        let payload = payload.unwrap_or(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
        serde_yaml::from_value(payload).map_err(|e| format!("{kind} payload: {e}"))
    }

    let Some(kind) = payload_type else {
        return match payload {
            None => Ok(None),
            Some(_) => Err("payload given without payload_type".to_owned()),
        };
    };
    Ok(Some(match kind.as_str() {
        "filesystem" => Payload::Filesystem(value(&kind, payload)?),
        "luks" => Payload::Luks(Box::new(value(&kind, payload)?)),
        "lvm" => Payload::Lvm(value(&kind, payload)?),
        "btrfs" => Payload::Btrfs(value(&kind, payload)?),
        "swap" => Payload::Swap(value(&kind, payload)?),
        other => return Err(format!("unknown payload_type '{other}'")),
    }))
}

impl TryFrom<PartitionYaml> for Partition {
    type Error = String;

    fn try_from(raw: PartitionYaml) -> Result<Self, Self::Error> {
        Ok(Partition {
            start: raw.start,
            size: raw.size,
            part_type: raw.part_type,
            uuid: raw.uuid,
            bootable: raw.bootable,
            payload: decode_payload(raw.payload_type, raw.payload)?,
        })
    }
}

impl TryFrom<LuksYaml> for Luks {
    type Error = String;

    fn try_from(raw: LuksYaml) -> Result<Self, Self::Error> {
        Ok(Luks {
            label: raw.label,
            uuid: raw.uuid,
            cipher: raw.cipher,
            passphrase: raw.passphrase,
            payload: decode_payload(raw.payload_type, raw.payload)?,
        })
    }
}

impl TryFrom<LogicalVolumeYaml> for LogicalVolume {
    type Error = String;

    fn try_from(raw: LogicalVolumeYaml) -> Result<Self, Self::Error> {
        Ok(LogicalVolume {
            name: raw.name,
            size: raw.size,
            payload: decode_payload(raw.payload_type, raw.payload)?,
        })
    }
}

impl Payload {
    /// Mountpoints reachable through this payload.
    pub fn mountpoints(&self) -> Vec<&str> {
        match self {
            Payload::Filesystem(fs) if !fs.mountpoint.is_empty() => vec![fs.mountpoint.as_str()],
            Payload::Filesystem(_) | Payload::Swap(_) => Vec::new(),
            Payload::Luks(luks) => luks
                .payload
                .as_ref()
                .map(Payload::mountpoints)
                .unwrap_or_default(),
            Payload::Lvm(vg) => vg
                .logical_volumes
                .iter()
                .filter_map(|lv| lv.payload.as_ref())
                .flat_map(Payload::mountpoints)
                .collect(),
            Payload::Btrfs(btrfs) => btrfs
                .subvolumes
                .iter()
                .filter(|s| !s.mountpoint.is_empty())
                .map(|s| s.mountpoint.as_str())
                .collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Filesystem(_) => "filesystem",
            Payload::Luks(_) => "luks",
            Payload::Lvm(_) => "lvm",
            Payload::Btrfs(_) => "btrfs",
            Payload::Swap(_) => "swap",
        }
    }
}

impl PartitionTable {
    pub fn mountpoints(&self) -> Vec<&str> {
        self.partitions
            .iter()
            .filter_map(|p| p.payload.as_ref())
            .flat_map(Payload::mountpoints)
            .collect()
    }

    pub fn contains_mountpoint(&self, mountpoint: &str) -> bool {
        self.mountpoints().contains(&mountpoint)
    }

    /// Sum of declared partition sizes plus the start offset.
    pub fn declared_size(&self) -> u64 {
        self.start_offset + self.partitions.iter().map(|p| p.size).sum::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r"
type: gpt
uuid: D209C89E-EA5E-4FBD-B161-B461CCE297E0
partitions:
  - size: 1 MiB
    bootable: true
    type: bios
  - size: 200 MiB
    type: esp
    payload_type: filesystem
    payload: {type: vfat, mountpoint: /boot/efi, fstab_options: 'defaults,uid=0,gid=0,umask=077,shortname=winnt', fstab_passno: 2}
  - size: 1 GiB
    type: xboot
    payload_type: filesystem
    payload: {type: xfs, mountpoint: /boot}
  - size: 2 GiB
    type: lvm
    payload_type: lvm
    payload:
      name: rootvg
      logical_volumes:
        - name: rootlv
          size: 2 GiB
          payload_type: filesystem
          payload: {mountpoint: /}
";

    #[test]
    fn decodes_nested_payloads() {
        let table: PartitionTable = serde_yaml::from_str(TABLE).unwrap();
        assert_eq!(table.table_type, PartitionTableType::Gpt);
        assert_eq!(table.partitions.len(), 4);
        assert!(table.partitions[0].payload.is_none());
        assert_eq!(table.partitions[1].size, 200 * datasize::MIB);
        assert_eq!(table.mountpoints(), vec!["/boot/efi", "/boot", "/"]);
        match &table.partitions[3].payload {
            Some(Payload::Lvm(vg)) => {
                assert_eq!(vg.name, "rootvg");
                assert_eq!(vg.logical_volumes[0].name, "rootlv");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_payload_type() {
        let res: Result<Partition, _> =
            serde_yaml::from_str("size: 1 GiB\npayload_type: zfs\npayload: {}\n");
        let err = res.unwrap_err().to_string();
        assert!(err.contains("unknown payload_type 'zfs'"), "{err}");
    }

    #[test]
    fn rejects_unknown_filesystem_fields() {
        let res: Result<Partition, _> = serde_yaml::from_str(
            "payload_type: filesystem\npayload: {type: xfs, mountpont: /}\n",
        );
        assert!(res.is_err());
    }

    #[test]
    fn payload_without_type_is_an_error() {
        let res: Result<Partition, _> = serde_yaml::from_str("payload: {type: xfs}\n");
        assert!(res.is_err());
    }
}
