//! Pull source code out of a model response and normalize it.

use regex::Regex;
use std::sync::LazyLock;

// Compile once; the language tag after the opening fence is optional.
static FENCED_BLOCK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[a-zA-Z0-9_+-]*[^\S\n]*\n([\s\S]*?)```").unwrap());

/// First fenced code block in `text`, without its fences.
///
/// Returns `None` when no block exists or the first block is blank.
pub fn extract_code_block(text: &str) -> Option<String> {
    let captures = FENCED_BLOCK_REGEX.captures(text)?;
    let code = captures.get(1)?.as_str().trim();
    if code.is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Scan {
    Code,
    Quoted(char),
    Template,
    LineComment,
    BlockComment,
}

/// Remove `//` and `/* */` comments (including whole `{/* */}` JSX comment
/// expressions), trim line ends, and drop blank lines.
///
/// String and template literals are left alone. `//` directly after a `:`
/// is kept so URLs in JSX text survive.
pub fn strip_comments(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut state = Scan::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match state {
            Scan::Code => {
                if c == '{'
                    && let Some(end) = jsx_comment_end(&chars, i)
                {
                    i = end;
                    continue;
                }
                match (c, next) {
                    ('/', Some('/')) if !out.ends_with(':') => {
                        state = Scan::LineComment;
                        i += 2;
                        continue;
                    }
                    ('/', Some('*')) => {
                        state = Scan::BlockComment;
                        i += 2;
                        continue;
                    }
                    ('"', _) | ('\'', _) => state = Scan::Quoted(c),
                    ('`', _) => state = Scan::Template,
                    _ => {}
                }
                out.push(c);
            }
            Scan::Quoted(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(n) = next {
                        out.push(n);
                        i += 1;
                    }
                } else if c == quote || c == '\n' {
                    // A newline ends a broken literal (e.g. an apostrophe in JSX text).
                    state = Scan::Code;
                }
            }
            Scan::Template => {
                out.push(c);
                if c == '\\' {
                    if let Some(n) = next {
                        out.push(n);
                        i += 1;
                    }
                } else if c == '`' {
                    state = Scan::Code;
                }
            }
            Scan::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = Scan::Code;
                }
            }
            Scan::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = Scan::Code;
                    i += 2;
                    continue;
                }
                if c == '\n' {
                    out.push('\n');
                }
            }
        }
        i += 1;
    }

    out.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// If a `{ /* ... */ }` expression starts at `start`, the index just past it.
fn jsx_comment_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    if chars.get(i) != Some(&'/') || chars.get(i + 1) != Some(&'*') {
        return None;
    }
    i += 2;
    while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
        i += 1;
    }
    if i + 1 >= chars.len() {
        return None;
    }
    i += 2;
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    (chars.get(i) == Some(&'}')).then_some(i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_first_block_with_language_tag() {
        let text = "Sure!\n```tsx\nexport default function App() {\n  return <div />;\n}\n```\nand\n```css\nbody {}\n```";
        let code = extract_code_block(text).unwrap();
        assert!(code.starts_with("export default function App()"));
        assert!(!code.contains("body {}"));
    }

    #[test]
    fn test_extract_block_without_language_tag() {
        let text = "```\nconst a = 1;\n```";
        assert_eq!(extract_code_block(text).as_deref(), Some("const a = 1;"));
    }

    #[test]
    fn test_extract_none_for_prose() {
        assert!(extract_code_block("I cannot see a sketch in this image.").is_none());
        assert!(extract_code_block("```tsx\n   \n```").is_none());
        assert!(extract_code_block("```tsx\nunterminated").is_none());
    }

    #[test]
    fn test_strip_line_and_block_comments() {
        let source = r#"import { Button } from "@/components/ui/button"; // foo
/* bar */
const total = 1 + 2; /* inline bar */ const next = total;

// foo on its own line
export default function App() {
  /* multi
     line bar */
  return <Button>{total}</Button>;
}"#;
        let out = strip_comments(source);
        assert!(!out.contains("foo"));
        assert!(!out.contains("bar"));
        assert!(!out.contains("//"));
        assert!(!out.contains("/*"));
        assert_eq!(
            out,
            "import { Button } from \"@/components/ui/button\";\n\
             const total = 1 + 2;  const next = total;\n\
             export default function App() {\n  \
             return <Button>{total}</Button>;\n}"
        );
    }

    #[test]
    fn test_strip_jsx_comment_expression() {
        let source = "<div>\n  {/* header */}\n  <h1>Hi</h1>{ /* inline */ }\n</div>";
        assert_eq!(strip_comments(source), "<div>\n  <h1>Hi</h1>\n</div>");
    }

    #[test]
    fn test_strings_are_preserved() {
        let source = "const url = \"https://example.com/*x*/\";\nconst t = `a // b`;\nconst s = 'c /* d */';";
        assert_eq!(strip_comments(source), source);
    }

    #[test]
    fn test_url_in_jsx_text_is_kept() {
        let source = "<a href=\"#\">Visit https://example.com</a>";
        assert_eq!(strip_comments(source), source);
    }

    #[test]
    fn test_apostrophe_in_jsx_text_does_not_hide_later_comments() {
        let source = "<p>Don't stop</p>\nconst a = 1; // gone";
        assert_eq!(strip_comments(source), "<p>Don't stop</p>\nconst a = 1;");
    }

    #[test]
    fn test_blank_lines_dropped() {
        assert_eq!(strip_comments("a\n\n   \nb\n"), "a\nb");
    }
}
