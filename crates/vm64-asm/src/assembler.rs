//! Assembler front end: preprocessed lines to an [`ObjectModule`].
//!
//! Two passes over the lines:
//!
//! 1. **Pass 1**: collect every `name:` definition so forward references
//!    are recognised.
//! 2. **Pass 2**: apply `.equ` replacements, handle directives and labels,
//!    and encode each instruction into its own code block.
//!
//! Addresses are never known here for certain, so every `<label>` operand
//! is encoded as [`PLACEHOLDER_OPERAND`] and left for the linker.
//!
//! | Directive | Effect |
//! |---|---|
//! | `.equ <NAME\|text>` | Later occurrences of the identifier `NAME` become `text` |
//! | `.org <n>` | Labels that follow are placed at `n` plus their offset |
//! | `.lab <a\|b\|...>` | Declares labels defined in another module |
//! | `.8bit_data <expr>` ... `.64bit_data <expr>` | Data block evaluated at link time |
//! | `.resvb <n>` | `n` zero bytes |

use std::collections::BTreeSet;
use std::path::Path;

use vm64_core::isa::{encode_instruction, evaluate};
use vm64_core::Width;

use crate::errors::{AsmError, AsmErrorKind};
use crate::object::{DataExpression, ObjectModule, PLACEHOLDER_OPERAND};
use crate::preprocess::{ExpandedLine, Preprocessor};

/// Assembles the file at `path`, with `defines` applied as `%define`s.
///
/// # Errors
///
/// Returns [`AsmError`] from preprocessing or assembly.
pub fn assemble_file(path: &Path, defines: &[(String, String)]) -> Result<ObjectModule, AsmError> {
    let mut preprocessor = Preprocessor::new();
    for (name, value) in defines {
        preprocessor.define(name, value);
    }
    let preprocessed = preprocessor.expand_file(path)?;
    assemble(&path.display().to_string(), &preprocessed.lines)
}

/// Assembles preprocessed `lines` into a module called `name`.
///
/// # Errors
///
/// Returns [`AsmError`] located at the offending line.
pub fn assemble(name: &str, lines: &[ExpandedLine]) -> Result<ObjectModule, AsmError> {
    let mut assembler = Assembler {
        object: ObjectModule::new(name),
        labels: collect_labels(lines),
        equates: Vec::new(),
        origin: 0,
    };
    for line in lines {
        assembler
            .line(&line.text)
            .map_err(|kind| AsmError::new(kind).with_location(line.location()))?;
    }
    log::debug!(
        "assembled {name}: {} block(s), {} bytes",
        assembler.object.code.len(),
        assembler.object.size()
    );
    Ok(assembler.object)
}

struct Assembler {
    object: ObjectModule,
    labels: BTreeSet<String>,
    equates: Vec<(String, String)>,
    origin: u64,
}

impl Assembler {
    fn line(&mut self, raw: &str) -> Result<(), AsmErrorKind> {
        let raw = raw.trim();
        if let Some(argument) = directive_argument(raw, ".equ") {
            let (name, value) = argument
                .split_once('|')
                .filter(|(name, _)| is_identifier(name.trim()))
                .ok_or_else(|| AsmErrorKind::BadDirective(raw.to_string()))?;
            self.equates
                .push((name.trim().to_string(), value.trim().to_string()));
            return Ok(());
        }

        let text = self.substitute(raw);
        let mut rest = text.as_str();
        if let Some((label, after)) = split_label(rest) {
            self.define_label(label)?;
            rest = after.trim_start();
        }
        if rest.is_empty() {
            return Ok(());
        }

        if let Some(argument) = directive_argument(rest, ".org") {
            let value = argument.split('|').next().unwrap_or_default();
            self.origin = constant(value)?;
        } else if let Some(argument) = directive_argument(rest, ".lab") {
            for name in argument.split('|').map(str::trim).filter(|n| !n.is_empty()) {
                if !is_identifier(name) {
                    return Err(AsmErrorKind::BadDirective(rest.to_string()));
                }
                self.labels.insert(name.to_string());
            }
        } else if let Some(argument) = directive_argument(rest, ".resvb") {
            let count = usize::try_from(constant(argument)?)
                .map_err(|_| AsmErrorKind::BadDirective(rest.to_string()))?;
            self.object.push_block(vec![0; count]);
        } else if let Some((width, expression)) = data_directive(rest) {
            let block = self.object.push_block(vec![0; width_len(width)]);
            self.object.data_expressions.push(DataExpression {
                block,
                width,
                expression: expression.to_string(),
            });
        } else if rest.starts_with('.') && !rest.contains('<') {
            return Err(AsmErrorKind::BadDirective(rest.to_string()));
        } else {
            self.instruction(rest)?;
        }
        Ok(())
    }

    fn define_label(&mut self, name: &str) -> Result<(), AsmErrorKind> {
        let address = self.origin.wrapping_add(self.object.size());
        let record = self.object.symbol_mut(name);
        if record.defined {
            return Err(AsmErrorKind::DuplicateLabel(name.to_string()));
        }
        record.defined = true;
        record.address = address;
        log::trace!("label {name} = {address:#X}");
        Ok(())
    }

    fn instruction(&mut self, text: &str) -> Result<(), AsmErrorKind> {
        let mut referenced = Vec::new();
        let mut rewritten = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find('<') {
            let Some(close) = rest[open..].find('>').map(|c| open + c) else {
                break;
            };
            let inner = rest[open + 1..close].trim();
            rewritten.push_str(&rest[..open]);
            if self.labels.contains(inner) {
                rewritten.push_str(PLACEHOLDER_OPERAND);
                referenced.push(inner.to_string());
            } else {
                rewritten.push_str(&rest[open..=close]);
            }
            rest = &rest[close + 1..];
        }
        rewritten.push_str(rest);

        let mut bytes = Vec::new();
        encode_instruction(&rewritten, &mut bytes).map_err(AsmErrorKind::Encode)?;
        let block = self.object.push_block(bytes);
        for name in referenced {
            self.object.symbol_mut(&name).references.push(block);
        }
        Ok(())
    }

    /// Applies `.equ` replacements to whole identifiers, skipping register
    /// names after `%`.
    fn substitute(&self, text: &str) -> String {
        if self.equates.is_empty() {
            return text.to_string();
        }
        let mut out = String::with_capacity(text.len());
        let mut chars = text.char_indices().peekable();
        let mut previous = None;
        while let Some((start, ch)) = chars.next() {
            if is_identifier_start(ch) || ch.is_ascii_digit() {
                let mut end = start + ch.len_utf8();
                while let Some(&(idx, next)) = chars.peek() {
                    if !is_identifier_char(next) {
                        break;
                    }
                    end = idx + next.len_utf8();
                    chars.next();
                }
                let word = &text[start..end];
                let replacement = (is_identifier_start(ch) && previous != Some('%'))
                    .then(|| self.equates.iter().rev().find(|(name, _)| name == word))
                    .flatten();
                out.push_str(replacement.map_or(word, |(_, value)| value.as_str()));
                previous = word.chars().last();
            } else {
                out.push(ch);
                previous = Some(ch);
            }
        }
        out
    }
}

fn collect_labels(lines: &[ExpandedLine]) -> BTreeSet<String> {
    lines
        .iter()
        .filter_map(|line| split_label(line.text.trim()))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Splits `name:` off the front of a line.
fn split_label(text: &str) -> Option<(&str, &str)> {
    let (name, rest) = text.split_once(':')?;
    is_identifier(name).then_some((name, rest))
}

/// Argument of `.name <argument>`, matched case-insensitively.
fn directive_argument<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let head = text.get(..name.len())?;
    if !head.eq_ignore_ascii_case(name) {
        return None;
    }
    text[name.len()..]
        .trim()
        .strip_prefix('<')?
        .strip_suffix('>')
        .map(str::trim)
}

fn data_directive(text: &str) -> Option<(Width, &str)> {
    Width::ALL.into_iter().find_map(|width| {
        let name = format!(".{}bit_data", width.bits());
        directive_argument(text, &name).map(|expression| (width, expression))
    })
}

fn width_len(width: Width) -> usize {
    match width {
        Width::W8 => 1,
        Width::W16 => 2,
        Width::W32 => 4,
        Width::W64 => 8,
    }
}

fn constant(text: &str) -> Result<u64, AsmErrorKind> {
    let value = evaluate(text.trim()).map_err(AsmErrorKind::Expression)?;
    u64::try_from(value).map_err(|_| AsmErrorKind::BadDirective(text.to_string()))
}

const fn is_identifier_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '.'
}

const fn is_identifier_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(is_identifier_start) && chars.all(is_identifier_char)
}
