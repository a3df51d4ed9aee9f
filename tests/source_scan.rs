use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use unitgen_cli::scan::collect_source_files;
use unitgen_cli::IgnoreList;

fn touch(root: &Path, relative: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "// content").unwrap();
}

fn relative(root: &Path, files: Vec<PathBuf>) -> Vec<String> {
    files
        .iter()
        .map(|f| {
            f.strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    for file in [
        "src/z.ts",
        "src/a.ts",
        "src/util/math.TS",
        "src/util/math.test.ts",
        "src/readme.md",
        "src/api.generated.ts",
        "node_modules/lib/index.ts",
        "dist/bundle.ts",
        "src/nested/build/out.ts",
    ] {
        touch(dir.path(), file);
    }
    dir
}

#[test]
fn skips_ignored_folders_and_generated_tests() {
    let dir = project();
    let files = collect_source_files(
        dir.path(),
        &IgnoreList::default(),
        &["ts".to_string()],
        "test",
    )
    .unwrap();

    assert_eq!(
        relative(dir.path(), files),
        vec![
            "src/a.ts",
            "src/api.generated.ts",
            "src/util/math.TS",
            "src/z.ts",
        ]
    );
}

#[test]
fn ignored_file_globs_match_names_and_paths() {
    let dir = project();
    let ignore = IgnoreList {
        folders: vec!["node_modules".to_string(), "dist".to_string()],
        files: vec!["*.generated.ts".to_string(), "src/z.ts".to_string()],
    };
    let files = collect_source_files(dir.path(), &ignore, &[".ts".to_string()], "test").unwrap();

    assert_eq!(
        relative(dir.path(), files),
        vec!["src/a.ts", "src/nested/build/out.ts", "src/util/math.TS"]
    );
}

#[test]
fn empty_extension_list_keeps_every_file() {
    let dir = project();
    let files = collect_source_files(&dir.path().join("src"), &IgnoreList::default(), &[], "").unwrap();

    let names = relative(&dir.path().join("src"), files);
    assert!(names.contains(&"readme.md".to_string()));
    assert!(names.contains(&"util/math.test.ts".to_string()));
    assert!(!names.iter().any(|n| n.starts_with("nested/build")));
}

#[test]
fn empty_tree_yields_nothing() {
    let dir = TempDir::new().unwrap();
    let files = collect_source_files(dir.path(), &IgnoreList::default(), &[], "test").unwrap();
    assert!(files.is_empty());
}
