//! Source line normalization.
//!
//! Before anything else looks at a line, tabs become four spaces and
//! everything after an unquoted `;` or `#` is dropped. Original line
//! numbers are kept for error messages.

/// Spaces a tab expands to.
pub const TAB_WIDTH: usize = 4;

/// A cleaned line with its original location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// Cleaned text, trailing whitespace removed.
    pub text: String,
    /// 1-indexed line number in the original file.
    pub original_line: usize,
}

/// Splits `content` into cleaned lines, keeping blank ones so numbering
/// stays aligned.
#[must_use]
pub fn split_lines(content: &str) -> Vec<SourceLine> {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| SourceLine {
            text: clean_line(line),
            original_line: idx + 1,
        })
        .collect()
}

/// Expands tabs and strips the comment, honouring `"..."` and `'c'`
/// literals.
#[must_use]
pub fn clean_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    for ch in line.chars() {
        match (quote, ch) {
            (_, '\t') => out.push_str(&" ".repeat(TAB_WIDTH)),
            (None, ';' | '#') => break,
            (None, '"' | '\'') => {
                quote = Some(ch);
                out.push(ch);
            }
            (Some(open), _) if open == ch => {
                quote = None;
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out.truncate(out.trim_end().len());
    out
}
