//! Field validation helpers.

use std::path::{Component, Path};

use crate::error::{ConfigError, ConfigResult};

pub(crate) fn non_empty_path(
    section: &'static str,
    field: &'static str,
    path: &Path,
) -> ConfigResult<()> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::invalid(section, field, "empty", None));
    }
    Ok(())
}

pub(crate) fn non_empty_str(
    section: &'static str,
    field: &'static str,
    value: &str,
) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(
            section,
            field,
            "empty",
            Some(value.to_string()),
        ));
    }
    Ok(())
}

/// Rejects `path` when it equals or nests within `other`, or contains it.
pub(crate) fn disjoint_paths(
    section: &'static str,
    field: &'static str,
    path: &Path,
    other: &Path,
) -> ConfigResult<()> {
    if path.starts_with(other) || other.starts_with(path) {
        return Err(ConfigError::invalid(
            section,
            field,
            "overlapping_paths",
            Some(path.display().to_string()),
        ));
    }
    Ok(())
}

pub(crate) fn relative_path(
    section: &'static str,
    field: &'static str,
    path: &Path,
) -> ConfigResult<()> {
    non_empty_path(section, field, path)?;
    let escapes = path
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ConfigError::invalid(
            section,
            field,
            "not_relative",
            Some(path.display().to_string()),
        ));
    }
    Ok(())
}

pub(crate) fn within_range(
    section: &'static str,
    field: &'static str,
    value: usize,
    min: usize,
    max: usize,
) -> ConfigResult<()> {
    if value < min || value > max {
        return Err(ConfigError::invalid(
            section,
            field,
            "out_of_range",
            Some(value.to_string()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_rejects_absolute_and_parent_segments() {
        assert!(relative_path("build", "staging_root", Path::new("Users/Public")).is_ok());
        assert!(relative_path("build", "staging_root", Path::new("/Users")).is_err());
        assert!(relative_path("build", "staging_root", Path::new("../escape")).is_err());
        assert!(relative_path("build", "staging_root", Path::new("")).is_err());
    }

    #[test]
    fn disjoint_paths_detects_nesting_both_ways() {
        assert!(disjoint_paths("b", "f", Path::new("/a/b"), Path::new("/a")).is_err());
        assert!(disjoint_paths("b", "f", Path::new("/a"), Path::new("/a/b")).is_err());
        assert!(disjoint_paths("b", "f", Path::new("/a/mount"), Path::new("/a/temp")).is_ok());
    }

    #[test]
    fn within_range_reports_value() {
        let err = within_range("build", "log_tail", 0, 1, 100).expect_err("zero");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                reason: "out_of_range",
                value: Some(ref value),
                ..
            } if value == "0"
        ));
    }
}
