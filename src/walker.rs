use std::path::{Path, PathBuf};

use crate::error::Result;

/// A file found under an ingestion root.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the root directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

/// Recursively walk a directory for files with one of `extensions`.
///
/// Hidden files and directories (names starting with `.`) are skipped.
/// Extensions compare case-insensitively.
pub fn discover_files(
    root: &Path,
    extensions: &[String],
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, extensions, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    extensions: &[String],
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, extensions, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            // Directory links back under the root would loop.
            if resolved.is_dir() && resolved.starts_with(root) {
                continue;
            }
            if resolved.is_file() && has_extension(&resolved, extensions) {
                results.push(discovered(root, &path, resolved));
            }
        } else if file_type.is_file() && has_extension(&path, extensions) {
            let absolute = path.canonicalize()?;
            results.push(discovered(root, &path, absolute));
        }
    }

    Ok(())
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
        })
}

fn discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: PathBuf,
) -> DiscoveredFile {
    DiscoveredFile {
        relative_path: original_path
            .strip_prefix(root)
            .unwrap_or(original_path)
            .to_path_buf(),
        absolute_path,
    }
}
