//! Tree copy and sizing helpers used while staging assets.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{IntegrationError, Result};

/// Totals from a tree copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Files copied.
    pub files: u64,
    /// Bytes copied.
    pub bytes: u64,
}

/// Copy `source` (file or directory) to `destination`, creating parents as needed.
///
/// # Errors
///
/// Returns the first IO or traversal failure.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<CopyStats> {
    let mut stats = CopyStats::default();
    if source.is_file() {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| IntegrationError::io("copy_tree.create_parent", parent, err))?;
        }
        stats.bytes = fs::copy(source, destination)
            .map_err(|err| IntegrationError::io("copy_tree.copy_file", destination, err))?;
        stats.files = 1;
        return Ok(stats);
    }

    fs::create_dir_all(destination)
        .map_err(|err| IntegrationError::io("copy_tree.create_dir", destination, err))?;

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|err| IntegrationError::walk("copy_tree.walk", source, err))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| IntegrationError::OutsideRoot {
                path: entry.path().to_path_buf(),
            })?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|err| IntegrationError::io("copy_tree.create_dir", &target, err))?;
        } else {
            stats.bytes += fs::copy(entry.path(), &target)
                .map_err(|err| IntegrationError::io("copy_tree.copy_entry", &target, err))?;
            stats.files += 1;
        }
    }
    Ok(stats)
}

/// Total size of regular files under `root`; unreadable entries are ignored.
#[must_use]
pub fn tree_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Relative paths of files under `root` whose extension matches one of `extensions`.
///
/// # Errors
///
/// Returns a traversal failure.
pub fn files_with_extensions(root: &Path, extensions: &[&str]) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| IntegrationError::walk("installer.scan", root, err))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| ext.eq_ignore_ascii_case(want)));
        if let (true, Ok(relative)) = (matches, entry.path().strip_prefix(root)) {
            found.push(relative.to_string_lossy().replace('/', "\\"));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copies_nested_tree_and_counts_bytes() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let source = temp.path().join("src");
        fs::create_dir_all(source.join("nested"))?;
        fs::write(source.join("a.exe"), b"1234")?;
        fs::write(source.join("nested/b.dat"), b"56")?;

        let destination = temp.path().join("dst");
        let stats = copy_tree(&source, &destination)?;
        assert_eq!(stats, CopyStats { files: 2, bytes: 6 });
        assert_eq!(fs::read(destination.join("nested/b.dat"))?, b"56");
        assert_eq!(tree_size(&destination), 6);
        Ok(())
    }

    #[test]
    fn finds_installers_with_windows_separators() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        fs::create_dir_all(temp.path().join("x64"))?;
        fs::write(temp.path().join("x64/Setup.EXE"), b"")?;
        fs::write(temp.path().join("readme.txt"), b"")?;
        assert_eq!(
            files_with_extensions(temp.path(), &["exe"])?,
            vec!["x64\\Setup.EXE".to_string()]
        );
        Ok(())
    }
}
