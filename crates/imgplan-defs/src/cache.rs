//! Process-wide cache of decoded definitions.
//!
//! Entries are keyed by `(root, path, decoded type)` because the same file is
//! decoded into more than one shape. Lookups hand out clones so callers can
//! mutate their copy during condition resolution without touching the cached
//! value. The mutex is held across decode-and-store: a concurrent caller for
//! the same key waits and then reads the stored entry. Entries never expire.

use crate::{DefinitionError, DefsRoot};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, PoisonError};

type Key = (DefsRoot, String, &'static str);
type Entry = Box<dyn Any + Send + Sync>;

fn cache() -> &'static Mutex<HashMap<Key, Entry>> {
    static CACHE: OnceLock<Mutex<HashMap<Key, Entry>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Return a copy of the cached value for `(root, path, T)`, decoding and
/// storing it on first use. Decode failures are not cached.
pub fn get_or_decode<T, F>(root: &DefsRoot, path: &str, decode: F) -> Result<T, DefinitionError>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Result<T, DefinitionError>,
{
    let key = (root.clone(), path.to_owned(), std::any::type_name::<T>());
    let mut entries = cache().lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(value) = entries.get(&key).and_then(|e| e.downcast_ref::<T>()) {
        tracing::trace!("definition cache hit: {root}/{path}");
        return Ok(value.clone());
    }
    let value = decode()?;
    entries.insert(key, Box::new(value.clone()));
    Ok(value)
}
