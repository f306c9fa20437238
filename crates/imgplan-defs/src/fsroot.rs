//! Where definitions are read from: the embedded tree or an on-disk
//! directory selected through the experimental switch.

use crate::{embedded, DefinitionError};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Process-wide experimental switch: comma-separated `key=value` pairs.
pub const EXPERIMENTAL_ENV: &str = "IMAGE_BUILDER_EXPERIMENTAL";

const YAMLDIR_KEY: &str = "yamldir";

/// Parsed `IMAGE_BUILDER_EXPERIMENTAL` value. A bare `key` means `key=true`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentalFlags(BTreeMap<String, String>);

impl ExperimentalFlags {
    pub fn parse(input: &str) -> Self {
        let flags = input
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) => (key.trim().to_owned(), value.trim().to_owned()),
                None => (entry.to_owned(), "true".to_owned()),
            })
            .collect();
        Self(flags)
    }

    pub fn from_env() -> Self {
        std::env::var(EXPERIMENTAL_ENV)
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// Root of a definition tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefsRoot {
    Embedded,
    Dir(PathBuf),
}

impl DefsRoot {
    /// Embedded definitions unless `yamldir` is set in the experimental switch.
    pub fn from_env() -> Self {
        Self::from_flags(&ExperimentalFlags::from_env())
    }

    pub fn from_flags(flags: &ExperimentalFlags) -> Self {
        match flags.get(YAMLDIR_KEY) {
            Some(dir) if !dir.is_empty() => {
                tracing::info!("reading image definitions from {dir}");
                DefsRoot::Dir(PathBuf::from(dir))
            }
            _ => DefsRoot::Embedded,
        }
    }

    /// Read a definition file relative to the root; `None` when it does not exist.
    pub fn read(&self, path: &str) -> Result<Option<String>, DefinitionError> {
        match self {
            DefsRoot::Embedded => Ok(embedded::get(path).map(str::to_owned)),
            DefsRoot::Dir(dir) => match fs::read_to_string(dir.join(path)) {
                Ok(content) => Ok(Some(content)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(DefinitionError::Io {
                    path: dir.join(path).display().to_string(),
                    source: e,
                }),
            },
        }
    }

    pub fn read_required(&self, path: &str) -> Result<String, DefinitionError> {
        self.read(path)?
            .ok_or_else(|| DefinitionError::NotFound(format!("{self}/{path}")))
    }
}

impl fmt::Display for DefsRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefsRoot::Embedded => write!(f, "<embedded>"),
            DefsRoot::Dir(dir) => write!(f, "{}", dir.display()),
        }
    }
}
