//! Input file discovery
//!
//! Expands the positional inputs into an ordered list of GRIB files. Plain
//! files are taken as given, directories are searched recursively for GRIB
//! extensions and anything else is treated as a glob pattern.

use crate::constants::GRIB_EXTENSIONS;
use crate::error::{GridCheckError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

fn has_grib_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| GRIB_EXTENSIONS.iter().any(|g| ext.eq_ignore_ascii_case(g)))
}

fn walk_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| GridCheckError::InvalidInput {
            pattern: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file() && has_grib_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let invalid = |reason: String| GridCheckError::InvalidInput {
        pattern: pattern.to_string(),
        reason,
    };

    let mut files = Vec::new();
    for entry in glob::glob(pattern).map_err(|e| invalid(e.to_string()))? {
        let path = entry.map_err(|e| invalid(e.to_string()))?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Resolve inputs to files, in argument order without duplicates
pub fn discover_inputs(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for input in inputs {
        let path = Path::new(input);
        let found = if path.is_file() {
            vec![path.to_path_buf()]
        } else if path.is_dir() {
            walk_directory(path)?
        } else {
            expand_glob(input)?
        };

        if found.is_empty() {
            return Err(GridCheckError::InvalidInput {
                pattern: input.clone(),
                reason: "no matching files".to_string(),
            });
        }

        debug!("Input '{}' matched {} file(s)", input, found.len());
        for file in found {
            if seen.insert(file.clone()) {
                files.push(file);
            }
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, b"GRIB").unwrap();
        path
    }

    #[test]
    fn test_directory_is_walked_for_grib_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "b.grib2");
        touch(&dir, "nested/a.GRB");
        touch(&dir, "notes.txt");

        let files = discover_inputs(&[dir.path().display().to_string()]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["b.grib2".to_string(), "a.GRB".to_string()]);
    }

    #[test]
    fn test_glob_and_plain_file_without_duplicates() {
        let dir = TempDir::new().unwrap();
        let first = touch(&dir, "x1.grib2");
        touch(&dir, "x2.grib2");

        let pattern = dir.path().join("x*.grib2").display().to_string();
        let files = discover_inputs(&[first.display().to_string(), pattern]).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0], first);
    }

    #[test]
    fn test_unmatched_input_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nothing*.grib2").display().to_string();
        assert!(matches!(
            discover_inputs(&[missing]),
            Err(GridCheckError::InvalidInput { .. })
        ));
    }
}
