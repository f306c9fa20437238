use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-request options that are not part of the blueprint.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImageOptions {
    /// Requested image size in bytes; zero selects the image type default.
    #[serde(default, deserialize_with = "crate::datasize::deserialize")]
    pub size: u64,
    #[serde(default)]
    pub ostree: Option<OstreeImageOptions>,
    #[serde(default)]
    pub subscription: Option<SubscriptionOptions>,
    /// Extra RHSM facts written to the image.
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
    #[serde(default)]
    pub partitioning_mode: PartitioningMode,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OstreeImageOptions {
    /// Ref of the commit to create, or of the commit to deploy.
    #[serde(default, rename = "ref")]
    pub image_ref: String,
    /// Ref of the parent commit; falls back to `ref`.
    #[serde(default, rename = "parent")]
    pub parent_ref: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "contenturl")]
    pub content_url: String,
    #[serde(default)]
    pub rhsm: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionOptions {
    pub organization: String,
    pub activation_key: String,
    pub server_url: String,
    pub base_url: String,
    #[serde(default)]
    pub insights: bool,
    #[serde(default)]
    pub rhc: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum PartitioningMode {
    /// Resolved by the image type; usually behaves like `AutoLvm`.
    #[default]
    #[serde(rename = "", alias = "default")]
    Default,
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "lvm")]
    Lvm,
    #[serde(rename = "auto-lvm", alias = "autoLvm")]
    AutoLvm,
    #[serde(rename = "btrfs")]
    Btrfs,
}

impl fmt::Display for PartitioningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitioningMode::Default => write!(f, "default"),
            PartitioningMode::Raw => write!(f, "raw"),
            PartitioningMode::Lvm => write!(f, "lvm"),
            PartitioningMode::AutoLvm => write!(f, "auto-lvm"),
            PartitioningMode::Btrfs => write!(f, "btrfs"),
        }
    }
}

impl ImageOptions {
    pub fn ostree_url(&self) -> Option<&str> {
        self.ostree
            .as_ref()
            .map(|o| o.url.as_str())
            .filter(|u| !u.is_empty())
    }
}
