//! Input checks that run before anything is launched.
//!
//! Names are passed to the CLI as single arguments, so shell metacharacters
//! are harmless and left alone. What is rejected is anything the CLI itself
//! would misread: a leading `-` parses as an option, and NUL cannot cross
//! `execve`.

use poolwarden_core::error::{WardenError, WardenResult};
use regex::Regex;
use std::sync::OnceLock;

pub(crate) fn name(kind: &str, value: &str) -> WardenResult<()> {
    if value.is_empty() {
        return Err(WardenError::InvalidRequest(format!("{kind} name is empty")));
    }
    if value.starts_with('-') {
        return Err(WardenError::InvalidRequest(format!(
            "{kind} name `{value}` must not start with '-'"
        )));
    }
    if value.contains('\0') {
        return Err(WardenError::InvalidRequest(format!(
            "{kind} name contains a NUL byte"
        )));
    }
    Ok(())
}

pub(crate) fn snapshot_name(value: &str) -> WardenResult<()> {
    name("snapshot", value)?;
    match value.split_once('@') {
        Some((dataset, snap)) if !dataset.is_empty() && !snap.is_empty() => Ok(()),
        _ => Err(WardenError::InvalidRequest(format!(
            "snapshot `{value}` must have the form dataset@name"
        ))),
    }
}

pub(crate) fn bookmark_name(value: &str) -> WardenResult<()> {
    name("bookmark", value)?;
    match value.split_once('#') {
        Some((dataset, mark)) if !dataset.is_empty() && !mark.is_empty() => Ok(()),
        _ => Err(WardenError::InvalidRequest(format!(
            "bookmark `{value}` must have the form dataset#name"
        ))),
    }
}

pub(crate) fn properties(properties: &[(String, String)]) -> WardenResult<()> {
    for (key, value) in properties {
        if key.is_empty() || key.contains('=') || key.starts_with('-') {
            return Err(WardenError::InvalidRequest(format!(
                "invalid property name `{key}`"
            )));
        }
        if value.contains('\0') || key.contains('\0') {
            return Err(WardenError::InvalidRequest(format!(
                "property `{key}` contains a NUL byte"
            )));
        }
    }
    Ok(())
}

fn size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?i:none|[0-9]+(\.[0-9]+)?([bkmgtpez]|[kmgtpez]i?b)?)$")
            .expect("size pattern is a valid regex")
    })
}

/// Accept `none` or a number with an optional unit suffix (`100G`, `1.5T`, `512M`, `10GiB`).
pub(crate) fn size(value: &str) -> WardenResult<()> {
    if size_pattern().is_match(value) {
        Ok(())
    } else {
        Err(WardenError::InvalidRequest(format!(
            "invalid size `{value}`; expected e.g. 100G, 1.5T or none"
        )))
    }
}
