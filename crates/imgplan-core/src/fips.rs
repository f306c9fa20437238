//! Host FIPS mode detection.

use std::fs;
use std::path::Path;
use tracing::warn;

const FIPS_ENABLED: &str = "/proc/sys/crypto/fips_enabled";

pub const NON_FIPS_HOST_WARNING: &str =
    "The host building this image is not running in FIPS mode. The image will still be FIPS compliant. \
     If you are using this image in a production environment, build it on a FIPS-enabled host.";

fn enabled_at(path: &Path) -> bool {
    fs::read_to_string(path).is_ok_and(|content| content.trim() == "1")
}

pub fn host_fips_enabled() -> bool {
    enabled_at(Path::new(FIPS_ENABLED))
}

/// Warning for a FIPS image requested on a host that is not in FIPS mode.
pub fn host_warning() -> Option<String> {
    if host_fips_enabled() {
        return None;
    }
    warn!("FIPS requested on a non-FIPS host");
    Some(NON_FIPS_HOST_WARNING.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_flag_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fips_enabled");
        assert!(!enabled_at(&path));
        fs::write(&path, "0\n").unwrap();
        assert!(!enabled_at(&path));
        fs::write(&path, "1\n").unwrap();
        assert!(enabled_at(&path));
    }
}
