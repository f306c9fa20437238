//! Blueprint storage customizations: `[[customizations.filesystem]]` and
//! `[customizations.disk]`.

use crate::datasize;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FilesystemCustomization {
    pub mountpoint: String,
    #[serde(default, deserialize_with = "datasize::deserialize")]
    pub minsize: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DiskCustomization {
    /// Partition table type (`gpt` or `dos`); empty keeps the image default.
    #[serde(default, rename = "type")]
    pub table_type: String,
    #[serde(default, deserialize_with = "datasize::deserialize")]
    pub minsize: u64,
    #[serde(default)]
    pub partitions: Vec<PartitionCustomization>,
}

/// One entry of `customizations.disk.partitions`.
///
/// The entry is kept flat and tagged by `type` (`plain`, `lvm` or `btrfs`,
/// empty meaning `plain`) so that an unknown type is reported by validation
/// rather than as an opaque parse error.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartitionCustomization {
    #[serde(default, rename = "type")]
    pub part_type: String,
    #[serde(default, deserialize_with = "datasize::deserialize")]
    pub minsize: u64,
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub fs_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub logical_volumes: Vec<LogicalVolumeCustomization>,
    #[serde(default)]
    pub subvolumes: Vec<SubvolumeCustomization>,
}

impl PartitionCustomization {
    pub fn kind(&self) -> &str {
        if self.part_type.is_empty() {
            "plain"
        } else {
            &self.part_type
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LogicalVolumeCustomization {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "datasize::deserialize")]
    pub minsize: u64,
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default)]
    pub fs_type: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubvolumeCustomization {
    pub name: String,
    pub mountpoint: String,
}

impl DiskCustomization {
    /// Every mountpoint declared anywhere in the disk layout.
    pub fn mountpoints(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for part in &self.partitions {
            if !part.mountpoint.is_empty() {
                out.push(part.mountpoint.as_str());
            }
            for lv in &part.logical_volumes {
                if !lv.mountpoint.is_empty() {
                    out.push(lv.mountpoint.as_str());
                }
            }
            for sv in &part.subvolumes {
                out.push(sv.mountpoint.as_str());
            }
        }
        out
    }

    pub fn has_swap(&self) -> bool {
        self.partitions.iter().any(|p| {
            p.fs_type == "swap" || p.logical_volumes.iter().any(|lv| lv.fs_type == "swap")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_disk_layout_from_toml() {
        let input = r#"
minsize = "10 GiB"

[[partitions]]
type = "plain"
mountpoint = "/data"
fs_type = "xfs"
minsize = "1 GiB"

[[partitions]]
type = "lvm"
name = "mainvg"
minsize = "5 GiB"

[[partitions.logical_volumes]]
name = "rootlv"
mountpoint = "/"
fs_type = "ext4"
minsize = "2 GiB"

[[partitions.logical_volumes]]
name = "swaplv"
fs_type = "swap"
minsize = "1 GiB"
"#;
        let disk: DiskCustomization = toml::from_str(input).unwrap();
        assert_eq!(disk.minsize, 10 * datasize::GIB);
        assert_eq!(disk.partitions.len(), 2);
        assert_eq!(disk.partitions[1].kind(), "lvm");
        assert_eq!(disk.mountpoints(), vec!["/data", "/"]);
        assert!(disk.has_swap());
    }

    #[test]
    fn empty_partition_type_is_plain() {
        let part = PartitionCustomization::default();
        assert_eq!(part.kind(), "plain");
    }
}
