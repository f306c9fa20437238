pub mod build;
pub mod completions;
pub mod list;
pub mod manifest;

use imgplan_core::{ImageError, ImageType, Registry};
use imgplan_schema::Arch;
use std::sync::Arc;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INPUT_ERROR: u8 = 2;
pub const EXIT_DEFINITION_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Render an error with the prefix `main` maps to an exit code.
pub fn describe(err: &ImageError) -> String {
    match err {
        ImageError::Definition(_) => format!("definition error: {err}"),
        ImageError::Validation(_)
        | ImageError::Partition(_)
        | ImageError::Ostree(_)
        | ImageError::Schema(_) => format!("input error: {err}"),
        _ => err.to_string(),
    }
}

pub fn print_warnings(warnings: &[String]) {
    let style = console::Style::new().yellow();
    for warning in warnings {
        eprintln!("{} {warning}", style.apply_to("warning:"));
    }
}

/// Distro, architecture and image type a command works on.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub distro: &'a str,
    pub arch: &'a str,
    pub image_type: &'a str,
}

pub fn lookup(registry: &Registry, target: &Target<'_>) -> Result<Arc<ImageType>, String> {
    registry
        .lookup(target.distro, target.arch, target.image_type)
        .map_err(|e| describe(&e))
}

pub fn host_arch() -> Result<&'static str, String> {
    std::env::consts::ARCH
        .parse::<Arch>()
        .map(Arch::as_str)
        .map_err(|e| format!("input error: {e}; pass --arch"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgplan_core::{LookupError, OstreeError};

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_INPUT_ERROR);
        assert_ne!(EXIT_INPUT_ERROR, EXIT_DEFINITION_ERROR);
    }

    #[test]
    fn request_errors_are_input_errors() {
        let err = ImageError::Ostree(OstreeError::MissingUrl);
        assert!(describe(&err).starts_with("input error: "));
    }

    #[test]
    fn lookup_errors_keep_their_message() {
        let err = ImageError::Lookup(LookupError::Distro("plan9-4".to_owned()));
        assert_eq!(describe(&err), "unknown distro: plan9-4");
    }

    #[test]
    fn unknown_image_type_is_reported() {
        let registry = Registry::new(imgplan_defs::DefsRoot::Embedded);
        let err = lookup(
            &registry,
            &Target {
                distro: "fedora-42",
                arch: "x86_64",
                image_type: "floppy",
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            "image type 'floppy' is not supported by fedora-42 on x86_64"
        );
    }
}
