use crate::version::{Version, VersionParseError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A distro identifier such as `fedora-42` or `rhel-9.7`.
///
/// The canonical string form is `name-major[.minor]`. Compact forms like
/// `rhel-810` are not handled here; the definition layer rewrites them with
/// the per-distro `transform_re` before calling [`DistroId::from_parts`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DistroId {
    pub name: String,
    pub major: u32,
    pub minor: Option<u32>,
}

impl DistroId {
    pub fn new(name: impl Into<String>, major: u32, minor: Option<u32>) -> Self {
        Self {
            name: name.into(),
            major,
            minor,
        }
    }

    /// Build an id from regex captures (`name`, `major`, optional `minor`).
    pub fn from_parts(name: &str, major: &str, minor: Option<&str>) -> Result<Self, VersionParseError> {
        let input = match minor {
            Some(m) => format!("{name}-{major}.{m}"),
            None => format!("{name}-{major}"),
        };
        if name.is_empty() {
            return Err(VersionParseError::new(&input, "missing distro name"));
        }
        let major = parse_component(&input, major)?;
        let minor = minor.map(|m| parse_component(&input, m)).transpose()?;
        Ok(Self::new(name, major, minor))
    }

    pub fn version(&self) -> Version {
        Version::new(u64::from(self.major), self.minor.map(u64::from))
    }

    /// `major[.minor]`, the value that version conditions compare against.
    pub fn version_string(&self) -> String {
        match self.minor {
            Some(minor) => format!("{}.{minor}", self.major),
            None => self.major.to_string(),
        }
    }
}

fn parse_component(input: &str, part: &str) -> Result<u32, VersionParseError> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VersionParseError::new(
            input,
            format!("'{part}' is not a version number"),
        ));
    }
    part.parse::<u32>()
        .map_err(|e| VersionParseError::new(input, e.to_string()))
}

impl FromStr for DistroId {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((name, version)) = s.rsplit_once('-') else {
            return Err(VersionParseError::new(
                s,
                "expected '<name>-<major>[.<minor>]'",
            ));
        };
        let mut parts = version.split('.');
        let major = parts.next().unwrap_or_default();
        let minor = parts.next();
        if parts.next().is_some() {
            return Err(VersionParseError::new(s, "too many version components"));
        }
        Self::from_parts(name, major, minor)
    }
}

impl fmt::Display for DistroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version_string())
    }
}

impl Serialize for DistroId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DistroId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_only() {
        let id: DistroId = "fedora-42".parse().unwrap();
        assert_eq!(id, DistroId::new("fedora", 42, None));
        assert_eq!(id.to_string(), "fedora-42");
    }

    #[test]
    fn parses_major_minor() {
        let id: DistroId = "rhel-9.7".parse().unwrap();
        assert_eq!(id.name, "rhel");
        assert_eq!(id.major, 9);
        assert_eq!(id.minor, Some(7));
        assert_eq!(id.version_string(), "9.7");
    }

    #[test]
    fn dashed_names_split_at_last_dash() {
        let id: DistroId = "centos-stream-9".parse().unwrap();
        assert_eq!(id.name, "centos-stream");
        assert_eq!(id.major, 9);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!("fedora".parse::<DistroId>().is_err());
        assert!("fedora-".parse::<DistroId>().is_err());
        assert!("rhel-9.7.1".parse::<DistroId>().is_err());
        assert!("rhel-nine".parse::<DistroId>().is_err());
        assert!("-9".parse::<DistroId>().is_err());
    }

    #[test]
    fn version_orders_semantically() {
        let a: DistroId = "rhel-8.10".parse().unwrap();
        let b: DistroId = "rhel-8.4".parse().unwrap();
        assert!(a.version() > b.version());
    }
}
