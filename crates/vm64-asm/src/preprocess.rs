//! Preprocessor: `%include` expansion, `%define` and conditional assembly.
//!
//! Runs before the assembler on cleaned lines and produces a flat list of
//! lines, each tagged with the file, line and include chain it came from.
//!
//! | Directive | Effect |
//! |---|---|
//! | `%include "file"` | Expands the file, relative to the including one |
//! | `%define NAME value` | Emits `.equ <NAME\|value>` and marks `NAME` defined |
//! | `%ifdef` / `%ifndef` / `%else` / `%endif` | Conditional assembly |
//! | `%warning msg` | Logged, and kept in [`Preprocessed::warnings`] |
//! | `%error msg` | Fails |

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AsmError, AsmErrorKind, IncludeTraceEntry, SourceLoc};
use crate::source::split_lines;

/// A line after preprocessing, with full origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedLine {
    /// Cleaned source text.
    pub text: String,
    /// 1-indexed line number in `file_path`.
    pub original_line: usize,
    /// File containing the line.
    pub file_path: PathBuf,
    /// Include chain leading to that file (outermost first).
    pub include_chain: Vec<IncludeTraceEntry>,
}

impl ExpandedLine {
    /// Location for error messages.
    #[must_use]
    pub fn location(&self) -> SourceLoc {
        SourceLoc::new(self.file_path.clone(), self.original_line)
            .with_include_chain(self.include_chain.clone())
    }
}

/// Preprocessor output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preprocessed {
    /// Lines for the assembler, in order.
    pub lines: Vec<ExpandedLine>,
    /// `%warning` messages with their locations.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct Conditional {
    taking: bool,
    enclosing: bool,
    seen_else: bool,
}

/// Expands one root file into [`Preprocessed`] lines.
#[derive(Debug, Default)]
pub struct Preprocessor {
    defines: BTreeMap<String, String>,
    active_files: Vec<PathBuf>,
    include_chain: Vec<IncludeTraceEntry>,
    output: Preprocessed,
}

impl Preprocessor {
    /// Creates a preprocessor with nothing defined.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Predefines `name`, as if by `%define`.
    pub fn define(&mut self, name: &str, value: &str) {
        self.defines.insert(name.to_string(), value.to_string());
        self.emit_equ(name, value, PathBuf::from("<command line>"), 0);
    }

    /// Expands the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AsmError`] for unreadable or circular includes, malformed
    /// directives, unbalanced conditionals and `%error`.
    pub fn expand_file(mut self, path: &Path) -> Result<Preprocessed, AsmError> {
        self.file(path)?;
        Ok(self.output)
    }

    /// Expands in-memory `content` as if it were the file `path`.
    ///
    /// # Errors
    ///
    /// As [`Self::expand_file`].
    pub fn expand_str(mut self, path: &Path, content: &str) -> Result<Preprocessed, AsmError> {
        self.active_files.push(path.to_path_buf());
        self.content(path, content)?;
        Ok(self.output)
    }

    fn file(&mut self, path: &Path) -> Result<(), AsmError> {
        let io_error = |message: String| {
            AsmError::new(AsmErrorKind::Io {
                path: path.to_path_buf(),
                message,
            })
        };
        let canonical = path.canonicalize().map_err(|e| io_error(e.to_string()))?;
        if self.active_files.contains(&canonical) {
            return Err(AsmError::new(AsmErrorKind::CircularInclude(canonical)));
        }
        let content = fs::read_to_string(path).map_err(|e| io_error(e.to_string()))?;
        log::debug!("preprocessing {}", path.display());

        self.active_files.push(canonical);
        self.content(path, &content)?;
        self.active_files.pop();
        Ok(())
    }

    fn content(&mut self, path: &Path, content: &str) -> Result<(), AsmError> {
        let mut conditionals: Vec<Conditional> = Vec::new();
        for line in split_lines(content) {
            let loc = SourceLoc::new(path.to_path_buf(), line.original_line)
                .with_include_chain(self.include_chain.clone());
            let at = |kind: AsmErrorKind| AsmError::new(kind).with_location(loc.clone());
            let taking = conditionals.last().is_none_or(|c| c.taking);

            let Some(directive) = line.text.trim_start().strip_prefix('%') else {
                if taking && !line.text.trim().is_empty() {
                    self.output.lines.push(ExpandedLine {
                        text: line.text.clone(),
                        original_line: line.original_line,
                        file_path: path.to_path_buf(),
                        include_chain: self.include_chain.clone(),
                    });
                }
                continue;
            };
            let (name, argument) = directive
                .split_once(char::is_whitespace)
                .map_or((directive, ""), |(name, rest)| (name, rest.trim()));

            match name.to_ascii_lowercase().as_str() {
                "ifdef" | "ifndef" => {
                    if argument.is_empty() {
                        return Err(at(AsmErrorKind::MissingArgument("%ifdef")));
                    }
                    let defined = self.defines.contains_key(argument);
                    let wanted = name.eq_ignore_ascii_case("ifdef");
                    conditionals.push(Conditional {
                        taking: taking && defined == wanted,
                        enclosing: taking,
                        seen_else: false,
                    });
                }
                "else" => {
                    let top = conditionals
                        .last_mut()
                        .filter(|c| !c.seen_else)
                        .ok_or_else(|| at(AsmErrorKind::UnmatchedConditional("%else")))?;
                    top.seen_else = true;
                    top.taking = top.enclosing && !top.taking;
                }
                "endif" => {
                    conditionals
                        .pop()
                        .ok_or_else(|| at(AsmErrorKind::UnmatchedConditional("%endif")))?;
                }
                _ if !taking => {}
                "include" => {
                    let target = argument
                        .strip_prefix('"')
                        .and_then(|rest| rest.strip_suffix('"'))
                        .filter(|target| !target.is_empty())
                        .ok_or_else(|| at(AsmErrorKind::BadInclude(argument.to_string())))?;
                    let resolved = resolve_include_path(target, path);
                    self.include_chain.push(IncludeTraceEntry {
                        file: path.to_path_buf(),
                        line: line.original_line,
                    });
                    let result = self.file(&resolved);
                    self.include_chain.pop();
                    result.map_err(|err| {
                        if err.location.is_some() {
                            err
                        } else {
                            at(err.kind)
                        }
                    })?;
                }
                "define" => {
                    let (key, value) = argument
                        .split_once(char::is_whitespace)
                        .map_or((argument, ""), |(key, value)| (key, value.trim()));
                    if key.is_empty() {
                        return Err(at(AsmErrorKind::MissingArgument("%define")));
                    }
                    self.defines.insert(key.to_string(), value.to_string());
                    self.emit_equ(key, value, path.to_path_buf(), line.original_line);
                }
                "warning" => {
                    log::warn!("{loc}: {argument}");
                    self.output.warnings.push(format!("{loc}: {argument}"));
                }
                "error" => return Err(at(AsmErrorKind::UserError(argument.to_string()))),
                _ => return Err(at(AsmErrorKind::UnknownDirective(name.to_string()))),
            }
        }

        if conditionals.is_empty() {
            Ok(())
        } else {
            Err(AsmError::new(AsmErrorKind::UnterminatedConditional).with_location(
                SourceLoc::new(path.to_path_buf(), content.lines().count())
                    .with_include_chain(self.include_chain.clone()),
            ))
        }
    }

    fn emit_equ(&mut self, name: &str, value: &str, file_path: PathBuf, original_line: usize) {
        if value.is_empty() {
            return;
        }
        self.output.lines.push(ExpandedLine {
            text: format!(".equ <{name}|{value}>"),
            original_line,
            file_path,
            include_chain: self.include_chain.clone(),
        });
    }
}

/// Resolves an include path relative to the including file.
fn resolve_include_path(include_path: &str, current_file: &Path) -> PathBuf {
    let include = Path::new(include_path);
    if include.is_absolute() {
        include.to_path_buf()
    } else {
        current_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(include)
    }
}

/// Preprocesses the file at `path` with no predefined names.
///
/// # Errors
///
/// As [`Preprocessor::expand_file`].
pub fn preprocess_file(path: &Path) -> Result<Preprocessed, AsmError> {
    Preprocessor::new().expand_file(path)
}

#[cfg(test)]
mod tests {
    use super::{preprocess_file, Preprocessor};
    use crate::errors::AsmErrorKind;
    use std::fs;
    use std::path::Path;

    fn texts(source: &str) -> Vec<String> {
        Preprocessor::new()
            .expand_str(Path::new("main.asm"), source)
            .unwrap()
            .lines
            .into_iter()
            .map(|line| line.text)
            .collect()
    }

    #[test]
    fn define_becomes_equ_and_drives_ifdef() {
        let lines = texts(
            "%define WIDTH 64\n%ifdef WIDTH\nnop\n%else\nhlt\n%endif\n%ifndef WIDTH\nigni\n%endif",
        );
        assert_eq!(lines, vec![".equ <WIDTH|64>", "nop"]);
    }

    #[test]
    fn nested_conditionals_respect_the_outer_branch() {
        let lines = texts("%ifdef NOPE\n%ifndef NOPE\nnop\n%else\nhlt\n%endif\n%else\nalwi\n%endif");
        assert_eq!(lines, vec!["alwi"]);
    }

    #[test]
    fn directives_inside_skipped_blocks_are_ignored() {
        let lines = texts("%ifdef NOPE\n%error never\n%include \"missing.asm\"\n%endif\nnop");
        assert_eq!(lines, vec!["nop"]);
    }

    #[test]
    fn error_directive_carries_location() {
        let err = Preprocessor::new()
            .expand_str(Path::new("main.asm"), "nop\n%error bad config")
            .unwrap_err();
        assert_eq!(err.kind, AsmErrorKind::UserError("bad config".into()));
        assert_eq!(err.location.unwrap().line, 2);
    }

    #[test]
    fn warning_is_collected() {
        let out = Preprocessor::new()
            .expand_str(Path::new("main.asm"), "%warning check me")
            .unwrap();
        assert_eq!(out.warnings, vec!["main.asm:1: check me".to_string()]);
    }

    #[test]
    fn unbalanced_conditionals_fail() {
        assert_eq!(
            Preprocessor::new()
                .expand_str(Path::new("m"), "%endif")
                .unwrap_err()
                .kind,
            AsmErrorKind::UnmatchedConditional("%endif")
        );
        assert_eq!(
            Preprocessor::new()
                .expand_str(Path::new("m"), "%ifdef A\n%else\n%else")
                .unwrap_err()
                .kind,
            AsmErrorKind::UnmatchedConditional("%else")
        );
        assert_eq!(
            Preprocessor::new()
                .expand_str(Path::new("m"), "%ifdef A")
                .unwrap_err()
                .kind,
            AsmErrorKind::UnterminatedConditional
        );
    }

    #[test]
    fn includes_expand_relative_with_chain() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("main.asm"), "nop\n%include \"lib/io.asm\"\nhlt").unwrap();
        fs::write(dir.path().join("lib/io.asm"), "; io\n%include \"leaf.asm\"").unwrap();
        fs::write(dir.path().join("lib/leaf.asm"), "igni").unwrap();

        let out = preprocess_file(&dir.path().join("main.asm")).unwrap();
        let texts: Vec<_> = out.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["nop", "igni", "hlt"]);
        let leaf = &out.lines[1];
        assert_eq!(leaf.include_chain.len(), 2);
        assert_eq!(leaf.include_chain[0].line, 2);
        assert_eq!(leaf.include_chain[1].line, 2);
    }

    #[test]
    fn circular_include_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.asm"), "%include \"b.asm\"").unwrap();
        fs::write(dir.path().join("b.asm"), "%include \"a.asm\"").unwrap();
        let err = preprocess_file(&dir.path().join("a.asm")).unwrap_err();
        assert!(matches!(err.kind, AsmErrorKind::CircularInclude(_)));
        assert_eq!(err.location.unwrap().line, 1);
    }

    #[test]
    fn same_file_may_be_included_twice() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.asm"), "%include \"n.asm\"\n%include \"n.asm\"").unwrap();
        fs::write(dir.path().join("n.asm"), "nop").unwrap();
        assert_eq!(
            preprocess_file(&dir.path().join("main.asm")).unwrap().lines.len(),
            2
        );
    }
}
