use pulldown_cmark::{Event, Options, Parser, Tag};
use std::path::Path;

use crate::graph::error::GraphError;

/// Read a markdown file and flatten it to plain text
pub fn parse_markdown_file(path: &Path) -> Result<String, GraphError> {
    let content = std::fs::read_to_string(path)?;
    Ok(markdown_to_text(&content))
}

/// Flatten markdown into plain text.
///
/// Headings, paragraphs, list items, table cells and code blocks each end
/// up on their own line; markup, links targets and images are dropped.
pub fn markdown_to_text(content: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut text = String::new();
    for event in Parser::new_ext(content, options) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak => text.push(' '),
            Event::HardBreak => text.push('\n'),
            Event::End(Tag::Heading(..))
            | Event::End(Tag::Paragraph)
            | Event::End(Tag::CodeBlock(_))
            | Event::End(Tag::TableRow)
            | Event::End(Tag::TableHead) => end_line(&mut text, true),
            Event::End(Tag::Item) => end_line(&mut text, false),
            Event::End(Tag::TableCell) => text.push(' '),
            _ => {}
        }
    }

    text.trim().to_string()
}

fn end_line(text: &mut String, blank: bool) {
    while text.ends_with(' ') {
        text.pop();
    }
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    if blank && !text.is_empty() && !text.ends_with("\n\n") {
        text.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_to_text() {
        let markdown = r#"# Title
This is a **paragraph**
with a soft break and `code`.

## Section 1
- List item 1
- List item 2

```rust
fn main() {}
```
"#;

        let text = markdown_to_text(markdown);

        assert!(text.starts_with("Title\n\nThis is a paragraph with a soft break and code."));
        assert!(text.contains("List item 1\nList item 2"));
        assert!(text.contains("fn main() {}"));
        assert!(!text.contains('#'));
        assert!(!text.contains("**"));
    }

    #[test]
    fn test_parse_markdown_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("note.md");
        std::fs::write(&path, "# Note\nBody").unwrap();

        assert_eq!(parse_markdown_file(&path).unwrap(), "Note\n\nBody");
    }
}
