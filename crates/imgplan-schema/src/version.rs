//! Dotted numeric versions (`8`, `8.10`, `9.6.1`) with semantic ordering.
//!
//! Missing trailing components compare as zero, so `9` and `9.0` are equal
//! and `8.10` sorts after `8.4`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{input}': {reason}")]
pub struct VersionParseError {
    pub input: String,
    pub reason: String,
}

impl VersionParseError {
    pub fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_owned(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
}

impl Version {
    pub fn new(major: u64, minor: Option<u64>) -> Self {
        let mut components = vec![major];
        components.extend(minor);
        Self { components }
    }

    pub fn major(&self) -> u64 {
        self.components[0]
    }

    pub fn minor(&self) -> Option<u64> {
        self.components.get(1).copied()
    }

    fn component(&self, idx: usize) -> u64 {
        self.components.get(idx).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionParseError::new(s, "empty version"));
        }
        let mut components = Vec::new();
        for part in trimmed.split('.') {
            if part.is_empty() {
                return Err(VersionParseError::new(s, "empty version component"));
            }
            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionParseError::new(
                    s,
                    format!("component '{part}' is not a number"),
                ));
            }
            let n = part
                .parse::<u64>()
                .map_err(|e| VersionParseError::new(s, e.to_string()))?;
            components.push(n);
        }
        Ok(Self { components })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for idx in 0..len {
            match self.component(idx).cmp(&other.component(idx)) {
                Ordering::Equal => {}
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn minor_versions_compare_numerically() {
        assert!(v("8.10") > v("8.4"));
        assert!(v("9.6") < v("9.10"));
        assert!(v("10") > v("9.99"));
    }

    #[test]
    fn missing_components_are_zero() {
        assert_eq!(v("9"), v("9.0"));
        assert!(v("9") >= v("9.0"));
        assert!(!(v("9") < v("9.0")));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("".parse::<Version>().is_err());
        assert!("9..1".parse::<Version>().is_err());
        assert!("9.x".parse::<Version>().is_err());
        assert!("RELEASE_BRANCHED".parse::<Version>().is_err());
    }

    #[test]
    fn display_keeps_given_components() {
        assert_eq!(v("8.10").to_string(), "8.10");
        assert_eq!(v("42").to_string(), "42");
    }

    #[test]
    fn major_and_minor_accessors() {
        let ver = Version::new(9, Some(7));
        assert_eq!(ver.major(), 9);
        assert_eq!(ver.minor(), Some(7));
        assert_eq!(Version::new(42, None).minor(), None);
    }
}
