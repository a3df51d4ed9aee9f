//! Output path derivation for generated test files.

/// Map a source file onto the test file that should hold its generated tests.
///
/// `source_root` is stripped from `source_path` to get the path relative to
/// the project sources; when `source_root` does not occur in `source_path`
/// the whole source path is treated as relative. `naming_suffix` goes in front
/// of the extension (`Foo.ts` + `spec` -> `Foo.spec.ts`). The result always
/// uses forward slashes.
pub fn derive_output_path(
    source_path: &str,
    source_root: &str,
    output_root: &str,
    naming_suffix: &str,
) -> String {
    if source_path.is_empty() {
        return String::new();
    }

    let source = normalize_separators(source_path);
    let root = normalize_separators(source_root);
    let output_root = normalize_separators(output_root);

    let relative = match (root.is_empty(), source.find(&root)) {
        (false, Some(pos)) => &source[pos + root.len()..],
        _ => source.as_str(),
    };
    let relative = relative.trim_start_matches('/');

    let (dir, base) = match relative.rfind('/') {
        Some(pos) => (&relative[..pos], &relative[pos + 1..]),
        None => ("", relative),
    };

    let renamed = insert_suffix(base, naming_suffix);

    let mut parts: Vec<&str> = Vec::new();
    let trimmed_root = output_root.trim_end_matches('/');
    if !trimmed_root.is_empty() {
        parts.push(trimmed_root);
    } else if output_root.starts_with('/') {
        parts.push("");
    }
    parts.extend(dir.split('/').filter(|s| !s.is_empty()));
    parts.push(&renamed);

    parts.join("/")
}

/// `Foo.ts` + `spec` -> `Foo.spec.ts`; names without an extension get the
/// suffix appended.
pub fn insert_suffix(base_name: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return base_name.to_string();
    }
    let suffix = suffix.trim_matches('.');
    match base_name.rfind('.') {
        Some(pos) if pos > 0 => format!("{}.{}{}", &base_name[..pos], suffix, &base_name[pos..]),
        _ => format!("{}.{}", base_name, suffix),
    }
}

fn normalize_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_slash = false;
    for c in path.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' {
            if last_slash {
                continue;
            }
            last_slash = true;
        } else {
            last_slash = false;
        }
        out.push(c);
    }
    out
}
