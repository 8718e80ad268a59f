//! Syntactic allow-list validation for feature and workstream identifiers.
//!
//! Identifiers are the only untrusted values that ever reach a filesystem
//! path, so validation happens before any path is constructed. Anchored
//! patterns make traversal sequences (`..`, `/`, `\`) unrepresentable.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, SdpError};

static FEATURE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^F\d{3,4}$").expect("feature id pattern"));

static WS_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}-\d{3}-\d{2}$").expect("workstream id pattern"));

/// Validate a feature identifier (`F###` or `F####`).
pub fn validate_feature_id(id: &str) -> Result<()> {
    if FEATURE_ID.is_match(id) {
        Ok(())
    } else {
        Err(SdpError::InvalidInput(format!(
            "feature id {id:?} does not match F<3-4 digits>"
        )))
    }
}

/// Validate a workstream identifier (`NN-NNN-NN`).
pub fn validate_ws_id(id: &str) -> Result<()> {
    if WS_ID.is_match(id) {
        Ok(())
    } else {
        Err(SdpError::InvalidInput(format!(
            "workstream id {id:?} does not match NN-NNN-NN"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_feature_ids() {
        validate_feature_id("F001").unwrap();
        validate_feature_id("F042").unwrap();
        validate_feature_id("F1234").unwrap();
    }

    #[test]
    fn test_invalid_feature_ids_rejected() {
        for bad in ["", "F1", "F12", "F12345", "f001", "F00a", "G001", " F001"] {
            assert!(validate_feature_id(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_valid_ws_ids() {
        validate_ws_id("00-054-09").unwrap();
        validate_ws_id("12-345-67").unwrap();
    }

    #[test]
    fn test_invalid_ws_ids_rejected() {
        for bad in ["", "0-054-09", "00-54-09", "00-054-9", "aa-bbb-cc", "00_054_09"] {
            assert!(validate_ws_id(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_traversal_strings_rejected() {
        for bad in [
            "..",
            "../F001",
            "F001/..",
            "F001/evil",
            "F001\\evil",
            "00-054-09/../..",
            ".",
            "/etc/passwd",
        ] {
            assert!(validate_feature_id(bad).is_err(), "feature accepted {bad:?}");
            assert!(validate_ws_id(bad).is_err(), "ws accepted {bad:?}");
        }
    }
}
