use std::path::{Path, PathBuf};

use crate::{error::Result, extract::SourceType};

/// A document file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the directory it was found in, or the file name for
    /// files given directly.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    pub source_type: SourceType,
}

fn source_type_of(path: &Path) -> Option<SourceType> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    SourceType::ALL.into_iter().find(|t| t.extension() == ext)
}

/// Expand command-line inputs into document files.
///
/// Files are taken as given (unsupported ones are skipped with a warning);
/// directories are walked recursively. Results keep argument order, and
/// files within a directory are sorted.
pub fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<DiscoveredFile>> {
    let mut results = Vec::new();
    for input in inputs {
        if input.is_dir() {
            results.extend(discover_files(input)?);
            continue;
        }
        let absolute_path = input.canonicalize()?;
        match source_type_of(&absolute_path) {
            Some(source_type) => results.push(DiscoveredFile {
                relative_path: input
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| input.clone()),
                absolute_path,
                source_type,
            }),
            None => {
                tracing::warn!(path = %input.display(), "skipping unsupported file");
            }
        }
    }
    Ok(results)
}

/// Recursively walk a directory and discover supported document files.
///
/// Skips hidden files/directories (names starting with `.`) and only
/// returns `.pdf`, `.txt` and `.docx` files.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue; // broken symlink
            };
            // Directory links could loop back into the tree.
            if resolved.is_file()
                && let Some(source_type) = source_type_of(&resolved)
            {
                results.push(discovered(root, &path, resolved, source_type));
            }
        } else if file_type.is_file()
            && let Some(source_type) = source_type_of(&path)
        {
            let absolute_path = path.canonicalize()?;
            results.push(discovered(root, &path, absolute_path, source_type));
        }
    }

    Ok(())
}

fn discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: PathBuf,
    source_type: SourceType,
) -> DiscoveredFile {
    DiscoveredFile {
        relative_path: original_path
            .strip_prefix(root)
            .unwrap_or(original_path)
            .to_path_buf(),
        absolute_path,
        source_type,
    }
}
