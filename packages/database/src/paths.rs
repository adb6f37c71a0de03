//! Filesystem helpers for the `DuckDB` data directory.

use std::path::Path;

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Ensures the parent directory of a database file exists.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_parent_dir(file: &Path) -> std::io::Result<()> {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_file_name_needs_no_directory() {
        assert!(ensure_parent_dir(Path::new("treemap.duckdb")).is_ok());
    }

    #[test]
    fn creates_nested_parent() {
        let root = std::env::temp_dir().join(format!("tree_map_paths_{}", std::process::id()));
        let file = root.join("a").join("b").join("treemap.duckdb");

        ensure_parent_dir(&file).unwrap();
        assert!(root.join("a").join("b").is_dir());

        std::fs::remove_dir_all(&root).unwrap();
    }
}
