//! Enumerating the source files a batch run works through.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::IgnoreList;

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn entry_name(entry: &DirEntry) -> String {
    entry.file_name().to_string_lossy().to_string()
}

/// Whether a file name already looks like generated output (`Foo.test.ts`).
fn has_suffix(file_name: &str, suffix: &str) -> bool {
    if suffix.is_empty() {
        return false;
    }
    let stem = match file_name.rfind('.') {
        Some(pos) if pos > 0 => &file_name[..pos],
        _ => file_name,
    };
    stem.ends_with(&format!(".{}", suffix.trim_matches('.')))
}

/// Source files under `root`, sorted by path.
///
/// Folders and files in `ignore` are matched by name or glob. Only the given
/// extensions are kept (all files when empty), and files that already carry
/// `naming_suffix` are left out.
pub fn collect_source_files(
    root: &Path,
    ignore: &IgnoreList,
    extensions: &[String],
    naming_suffix: &str,
) -> Result<Vec<PathBuf>> {
    let ignored_folders = build_globset(&ignore.folders)?;
    let ignored_files = build_globset(&ignore.files)?;
    let extensions: Vec<String> = extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect();

    let walker = WalkDir::new(root).follow_links(false).into_iter();
    let mut files = Vec::new();

    for entry in walker.filter_entry(|e| {
        e.depth() == 0 || !(e.file_type().is_dir() && ignored_folders.is_match(entry_name(e)))
    }) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry_name(&entry);
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if ignored_files.is_match(&name) || ignored_files.is_match(relative) {
            continue;
        }

        if !extensions.is_empty() {
            let ext = entry
                .path()
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !extensions.contains(&ext) {
                continue;
            }
        }

        if has_suffix(&name, naming_suffix) {
            continue;
        }

        files.push(entry.into_path());
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_suffixed_names() {
        assert!(has_suffix("Foo.test.ts", "test"));
        assert!(has_suffix("Foo.spec.tsx", ".spec"));
        assert!(!has_suffix("Foo.ts", "test"));
        assert!(!has_suffix("testing.ts", "test"));
        assert!(!has_suffix("Foo.test.ts", ""));
    }
}
