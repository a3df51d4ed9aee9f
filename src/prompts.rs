//! Prompt text sent to the model and cleanup of what comes back.

use std::path::Path;

pub const DEFAULT_PROMPT: &str = "You are an experienced software engineer. Write a complete, \
runnable unit test file for the source file below. Use the testing framework that is idiomatic \
for its language, cover the public behaviour including edge cases and error paths, and import \
the code under test with paths relative to the test file. Reply with the test file only.";

/// Joined between existing content and new content when appending.
pub const APPEND_SEPARATOR: &str = "\n\n";

/// Template, then the file name, then a fenced copy of the source.
pub fn compose_prompt(template: &str, display_name: &str, content: &str) -> String {
    let lang = fence_language(display_name);
    format!(
        "{}\n\nFile: {}\n```{}\n{}\n```",
        template.trim_end(),
        display_name,
        lang,
        content.trim_end()
    )
}

/// Markdown fence tag for a file name's extension.
pub fn fence_language(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "kt" => "kotlin",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        _ => "",
    }
}

/// Contents of every fenced code block in `text`, or the trimmed text when
/// it has none.
pub fn extract_code(text: &str) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(lines) => blocks.push(lines.join("\n")),
                None => current = Some(Vec::new()),
            }
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }
    // Unterminated fence at the end of a response.
    if let Some(lines) = current {
        blocks.push(lines.join("\n"));
    }

    if blocks.is_empty() {
        text.trim().to_string()
    } else {
        let mut out = blocks.join("\n\n");
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prompt_contains_template_name_and_fenced_content() {
        let prompt = compose_prompt("Write tests.", "math.py", "def add(a, b):\n    return a + b\n");
        assert_eq!(
            prompt,
            "Write tests.\n\nFile: math.py\n```python\ndef add(a, b):\n    return a + b\n```"
        );
    }

    #[test]
    fn extracts_fenced_blocks() {
        let reply = "Here are the tests:\n```ts\nit('a', () => {});\n```\nAnd more:\n```ts\nit('b', () => {});\n```\nDone.";
        assert_eq!(extract_code(reply), "it('a', () => {});\n\nit('b', () => {});\n");
    }

    #[test]
    fn plain_reply_is_kept() {
        assert_eq!(extract_code("  def test_x(): pass  \n"), "def test_x(): pass");
    }

    #[test]
    fn unterminated_fence_keeps_partial_block() {
        assert_eq!(extract_code("```rust\nfn a() {}"), "fn a() {}\n");
    }
}
