//! Structured error reporting for the preprocessor, assembler and linker.
//!
//! Errors print in the usual compiler style:
//! ```text
//! boot.asm:10: error: message
//! ```
//!
//! For errors in included files:
//! ```text
//! lib.asm:5: error: message (included from boot.asm:3)
//! ```

use std::fmt;
use std::path::PathBuf;

use vm64_core::isa::{EncodeError, ExpressionError};

/// A source location for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    /// File path.
    pub file: PathBuf,
    /// 1-indexed line number.
    pub line: usize,
    /// Include chain (outermost first).
    pub include_chain: Vec<IncludeTraceEntry>,
}

impl SourceLoc {
    /// Creates a location with no include chain.
    #[must_use]
    pub const fn new(file: PathBuf, line: usize) -> Self {
        Self {
            file,
            line,
            include_chain: Vec::new(),
        }
    }

    /// Replaces the include chain.
    #[must_use]
    pub fn with_include_chain(mut self, chain: Vec<IncludeTraceEntry>) -> Self {
        self.include_chain = chain;
        self
    }

    /// `file:line` without the include chain.
    #[must_use]
    pub fn format_location(&self) -> String {
        format!("{}:{}", self.file.display(), self.line)
    }

    /// `file:line` followed by one `(included from ...)` per level.
    #[must_use]
    pub fn format_full(&self) -> String {
        self.include_chain
            .iter()
            .rev()
            .fold(self.format_location(), |text, entry| {
                format!(
                    "{text} (included from {}:{})",
                    entry.file.display(),
                    entry.line
                )
            })
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_full())
    }
}

/// One `%include` site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeTraceEntry {
    /// File holding the `%include`.
    pub file: PathBuf,
    /// Line of the `%include`.
    pub line: usize,
}

/// A preprocessor or assembler error with source context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmError {
    /// What went wrong.
    pub kind: AsmErrorKind,
    /// Where, when known.
    pub location: Option<SourceLoc>,
}

impl AsmError {
    /// Creates an error without a location.
    #[must_use]
    pub const fn new(kind: AsmErrorKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }

    /// Attaches a location.
    #[must_use]
    pub fn with_location(mut self, loc: SourceLoc) -> Self {
        self.location = Some(loc);
        self
    }

    /// Formats the error for stderr output.
    #[must_use]
    pub fn format_for_stderr(&self) -> String {
        self.location.as_ref().map_or_else(
            || format!("error: {}", self.kind),
            |loc| format!("{}: error: {}", loc.format_full(), self.kind),
        )
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{loc}: {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for AsmError {}

impl From<AsmErrorKind> for AsmError {
    fn from(kind: AsmErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Classification of preprocessor and assembler errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmErrorKind {
    /// Source file could not be read.
    Io {
        /// File that failed.
        path: PathBuf,
        /// Reason.
        message: String,
    },
    /// A file includes itself, directly or through others.
    CircularInclude(PathBuf),
    /// `%include` without a quoted path.
    BadInclude(String),
    /// Unknown `%` directive.
    UnknownDirective(String),
    /// A directive without its required argument.
    MissingArgument(&'static str),
    /// `%else` or `%endif` without a matching `%ifdef`/`%ifndef`.
    UnmatchedConditional(&'static str),
    /// End of file inside a conditional block.
    UnterminatedConditional,
    /// `%error` reached.
    UserError(String),
    /// Malformed `.equ`, `.org`, `.lab`, data or `.resvb` directive.
    BadDirective(String),
    /// Label defined twice in one module.
    DuplicateLabel(String),
    /// Constant expression in a directive failed.
    Expression(ExpressionError),
    /// Instruction text failed to encode.
    Encode(EncodeError),
}

impl fmt::Display for AsmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "cannot read {}: {message}", path.display()),
            Self::CircularInclude(path) => {
                write!(f, "circular include of {}", path.display())
            }
            Self::BadInclude(text) => write!(f, "malformed %include: {text}"),
            Self::UnknownDirective(name) => write!(f, "unknown directive %{name}"),
            Self::MissingArgument(directive) => write!(f, "{directive} needs an argument"),
            Self::UnmatchedConditional(directive) => {
                write!(f, "{directive} without matching %ifdef/%ifndef")
            }
            Self::UnterminatedConditional => write!(f, "missing %endif"),
            Self::UserError(message) => write!(f, "{message}"),
            Self::BadDirective(text) => write!(f, "malformed directive: {text}"),
            Self::DuplicateLabel(name) => write!(f, "label '{name}' defined twice"),
            Self::Expression(e) => write!(f, "{e}"),
            Self::Encode(e) => write!(f, "{e}"),
        }
    }
}

/// A link failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkError {
    /// What went wrong.
    pub kind: LinkErrorKind,
    /// Object module the failure was found in, when known.
    pub location: Option<String>,
}

impl LinkError {
    pub(crate) fn in_module(kind: LinkErrorKind, module: &str) -> Self {
        Self {
            kind,
            location: Some(module.to_string()),
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(module) => write!(f, "{module}: {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for LinkError {}

/// Classification of link failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkErrorKind {
    /// Symbol defined in more than one place.
    DuplicateSymbol(String),
    /// Referenced symbol defined nowhere.
    UndefinedSymbol(String),
    /// A referencing block does not hold exactly one placeholder.
    AmbiguousPatchSite {
        /// Referenced symbol.
        symbol: String,
        /// Code block index.
        block: usize,
        /// Placeholders found.
        found: usize,
    },
    /// Data expression failed to evaluate.
    Expression {
        /// Expression text.
        expression: String,
        /// Reason.
        source: ExpressionError,
    },
    /// Record points at a block that does not exist.
    MissingBlock(usize),
}

impl fmt::Display for LinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateSymbol(name) => write!(f, "multiple definitions of '{name}'"),
            Self::UndefinedSymbol(name) => write!(f, "undefined reference to '{name}'"),
            Self::AmbiguousPatchSite {
                symbol,
                block,
                found,
            } => write!(
                f,
                "block {block} referencing '{symbol}' holds {found} address placeholders, expected 1"
            ),
            Self::Expression { expression, source } => {
                write!(f, "data expression '{expression}': {source}")
            }
            Self::MissingBlock(block) => write!(f, "no code block {block}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AsmError, AsmErrorKind, IncludeTraceEntry, LinkError, LinkErrorKind, SourceLoc};
    use std::path::PathBuf;

    #[test]
    fn include_chain_is_listed_innermost_first() {
        let loc = SourceLoc::new(PathBuf::from("lib.asm"), 5).with_include_chain(vec![
            IncludeTraceEntry {
                file: PathBuf::from("boot.asm"),
                line: 3,
            },
            IncludeTraceEntry {
                file: PathBuf::from("mid.asm"),
                line: 7,
            },
        ]);
        assert_eq!(
            loc.format_full(),
            "lib.asm:5 (included from mid.asm:7) (included from boot.asm:3)"
        );
    }

    #[test]
    fn stderr_format_has_location_prefix() {
        let error = AsmError::new(AsmErrorKind::UserError("stop".into()))
            .with_location(SourceLoc::new(PathBuf::from("a.asm"), 2));
        assert_eq!(error.format_for_stderr(), "a.asm:2: error: stop");
        assert_eq!(
            AsmError::new(AsmErrorKind::UnterminatedConditional).format_for_stderr(),
            "error: missing %endif"
        );
    }

    #[test]
    fn link_error_names_module() {
        let error = LinkError::in_module(LinkErrorKind::UndefinedSymbol("main".into()), "boot.asm");
        assert_eq!(error.to_string(), "boot.asm: undefined reference to 'main'");
    }
}
