//! OSTree source specs for commit, container, disk and installer images.
//!
//! A commit or container build may start from a parent commit; disk and
//! installer builds deploy a payload commit and cannot proceed without its
//! repository URL.

use imgplan_schema::OstreeImageOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OstreeError {
    #[error("ostree commit URL required")]
    MissingUrl,
    #[error("invalid ostree ref \"{0}\"")]
    InvalidRef(String),
}

/// A commit to fetch: repository URL plus ref, resolved to a checksum later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub url: String,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub rhsm: bool,
}

/// Components separated by `/`; each starts with a letter, digit or `_`
/// and continues with those or `-` and `.`.
pub fn is_valid_ref(reference: &str) -> bool {
    !reference.is_empty()
        && reference.split('/').all(|component| {
            let mut chars = component.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        })
}

fn check_ref(reference: &str) -> Result<(), OstreeError> {
    if is_valid_ref(reference) {
        Ok(())
    } else {
        Err(OstreeError::InvalidRef(reference.to_owned()))
    }
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}

/// Parent commit (if a URL was given) and the ref of the commit to build.
pub fn make_parent_commit(
    options: Option<&OstreeImageOptions>,
    default_ref: &str,
) -> Result<(Option<SourceSpec>, String), OstreeError> {
    let image_ref = options
        .and_then(|o| non_empty(&o.image_ref))
        .unwrap_or(default_ref)
        .to_owned();
    let Some(options) = options.filter(|o| !o.url.is_empty()) else {
        if !image_ref.is_empty() {
            check_ref(&image_ref)?;
        }
        return Ok((None, image_ref));
    };
    check_ref(&image_ref)?;
    let parent_ref = non_empty(&options.parent_ref)
        .unwrap_or(&image_ref)
        .to_owned();
    check_ref(&parent_ref)?;
    let parent = SourceSpec {
        url: options.url.clone(),
        reference: parent_ref,
        rhsm: options.rhsm,
    };
    Ok((Some(parent), image_ref))
}

/// The commit a disk or installer image deploys.
pub fn make_payload_commit(
    options: Option<&OstreeImageOptions>,
    default_ref: &str,
) -> Result<SourceSpec, OstreeError> {
    let options = options
        .filter(|o| !o.url.is_empty())
        .ok_or(OstreeError::MissingUrl)?;
    let reference = non_empty(&options.image_ref)
        .unwrap_or(default_ref)
        .to_owned();
    check_ref(&reference)?;
    Ok(SourceSpec {
        url: options.url.clone(),
        reference,
        rhsm: options.rhsm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: &str = "fedora/42/x86_64/iot";

    fn opts(url: &str, image_ref: &str, parent_ref: &str) -> OstreeImageOptions {
        OstreeImageOptions {
            url: url.to_owned(),
            image_ref: image_ref.to_owned(),
            parent_ref: parent_ref.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn parent_without_options_uses_default_ref() {
        assert_eq!(
            make_parent_commit(None, DEFAULT).unwrap(),
            (None, DEFAULT.to_owned())
        );
    }

    #[test]
    fn parent_without_url_keeps_image_ref() {
        let o = opts("", "custom/ref", "");
        assert_eq!(
            make_parent_commit(Some(&o), DEFAULT).unwrap(),
            (None, "custom/ref".to_owned())
        );
    }

    #[test]
    fn parent_without_any_ref_is_not_an_error() {
        assert_eq!(make_parent_commit(None, "").unwrap(), (None, String::new()));
        let o = opts("", "", "");
        assert_eq!(make_parent_commit(Some(&o), "").unwrap(), (None, String::new()));
        let o = opts("http://repo.example.com", "", "");
        assert_eq!(
            make_parent_commit(Some(&o), ""),
            Err(OstreeError::InvalidRef(String::new()))
        );
        let o = opts("", "bad ref", "");
        assert!(make_parent_commit(Some(&o), DEFAULT).is_err());
    }

    #[test]
    fn parent_falls_back_to_image_ref() {
        let o = opts("http://repo.example.com", "r1", "");
        let (parent, new_ref) = make_parent_commit(Some(&o), "r0").unwrap();
        assert_eq!(
            parent,
            Some(SourceSpec {
                url: "http://repo.example.com".to_owned(),
                reference: "r1".to_owned(),
                rhsm: false,
            })
        );
        assert_eq!(new_ref, "r1");
    }

    #[test]
    fn explicit_parent_ref_wins() {
        let o = opts("http://repo.example.com", "", "older/ref");
        let (parent, new_ref) = make_parent_commit(Some(&o), DEFAULT).unwrap();
        assert_eq!(parent.unwrap().reference, "older/ref");
        assert_eq!(new_ref, DEFAULT);
    }

    #[test]
    fn payload_requires_url() {
        assert_eq!(
            make_payload_commit(None, DEFAULT),
            Err(OstreeError::MissingUrl)
        );
        let o = opts("", "x", "");
        assert_eq!(
            make_payload_commit(Some(&o), DEFAULT),
            Err(OstreeError::MissingUrl)
        );
        let o = opts("http://repo", "", "");
        assert_eq!(make_payload_commit(Some(&o), DEFAULT).unwrap().reference, DEFAULT);
    }

    #[test]
    fn ref_syntax() {
        assert!(is_valid_ref("rhel/9/x86_64/edge"));
        assert!(is_valid_ref("_private.ref-1"));
        assert!(!is_valid_ref(""));
        assert!(!is_valid_ref("/leading"));
        assert!(!is_valid_ref("trailing/"));
        assert!(!is_valid_ref("-dash"));
        assert!(!is_valid_ref("with space"));
        assert!(matches!(
            make_parent_commit(Some(&opts("", "bad ref", "")), DEFAULT),
            Err(OstreeError::InvalidRef(_))
        ));
    }
}
