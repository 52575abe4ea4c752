//! Assembly text to instruction bytes.
//!
//! Text form is `MNEMONIC [.Nbit] [<operand>[, <operand>]]`, case-insensitive.
//! Operands are `%REG`, `$(expr)` or `*ratio&width(base, index, disp)`.

use thiserror::Error;

use crate::isa::expr::{evaluate, ExpressionError};
use crate::isa::opcode::Opcode;
use crate::isa::operand::{
    AddressTerm, Instruction, MemoryOperand, Operand, Ratio, CONSTANT_PREFIX, MEMORY_PREFIX,
    REGISTER_PREFIX,
};
use crate::isa::sanity::{self, SanityViolation};
use crate::{RegisterId, SpecialRegister, Width, GENERAL_REGISTER_COUNT};

/// Text could not be turned into an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Blank line.
    #[error("empty instruction")]
    Empty,
    /// Mnemonic not in the opcode table.
    #[error("unknown mnemonic '{0}'")]
    UnknownMnemonic(String),
    /// Width-parametric opcode written without a suffix.
    #[error("{0} requires a width suffix")]
    MissingWidth(&'static str),
    /// Suffix on an opcode that takes none.
    #[error("{0} takes no width suffix")]
    UnexpectedWidth(&'static str),
    /// Suffix other than `.8bit`, `.16bit`, `.32bit` or `.64bit`.
    #[error("invalid width suffix '{0}'")]
    InvalidWidth(String),
    /// Wrong number of operands.
    #[error("{mnemonic} takes {expected} operand(s), found {found}")]
    OperandCount {
        /// Instruction mnemonic.
        mnemonic: &'static str,
        /// Operand count from the opcode table.
        expected: u8,
        /// Operands present in the text.
        found: usize,
    },
    /// Operand text that is not a register, constant or memory form.
    #[error("invalid operand '{text}': {reason}")]
    InvalidOperand {
        /// Operand text as written.
        text: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// `$(...)` that does not evaluate.
    #[error("in '{text}': {source}")]
    Expression {
        /// Operand text as written.
        text: String,
        /// Evaluator failure.
        #[source]
        source: ExpressionError,
    },
    /// Text outside `<...>` after the mnemonic and width.
    #[error("unexpected text '{0}'")]
    Trailing(String),
    /// Operands parse but break a static rule.
    #[error(transparent)]
    Sanity(#[from] SanityViolation),
}

/// Parses and encodes one line of assembly, appending the bytes to `out`.
///
/// # Errors
///
/// Returns an [`EncodeError`]; `out` is untouched on failure.
pub fn encode_instruction(text: &str, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    let instruction = parse_instruction(text)?;
    encode(&instruction, out);
    Ok(())
}

/// Parses one line of assembly and runs the static operand checks.
///
/// # Errors
///
/// Returns an [`EncodeError`] for malformed text or a failed check.
pub fn parse_instruction(text: &str) -> Result<Instruction, EncodeError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(EncodeError::Empty);
    }

    let head_end = text
        .find(|c: char| c.is_whitespace() || c == '<')
        .unwrap_or(text.len());
    let (head, mut rest) = text.split_at(head_end);
    let opcode =
        Opcode::from_mnemonic(head).ok_or_else(|| EncodeError::UnknownMnemonic(head.to_string()))?;
    let info = opcode.info();

    rest = rest.trim_start();
    let mut width = None;
    if rest.starts_with('.') {
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '<')
            .unwrap_or(rest.len());
        width = Some(parse_width_suffix(&rest[..end])?);
        rest = &rest[end..];
    }
    match (info.takes_width, width) {
        (true, None) => return Err(EncodeError::MissingWidth(info.mnemonic)),
        (false, Some(_)) => return Err(EncodeError::UnexpectedWidth(info.mnemonic)),
        _ => {}
    }

    let operands = split_operands(rest)?
        .into_iter()
        .map(parse_operand)
        .collect::<Result<Vec<_>, _>>()?;
    if operands.len() != usize::from(info.operand_count) {
        return Err(EncodeError::OperandCount {
            mnemonic: info.mnemonic,
            expected: info.operand_count,
            found: operands.len(),
        });
    }

    let instruction = Instruction {
        opcode,
        width,
        operands,
    };
    sanity::check(&instruction)?;
    Ok(instruction)
}

/// Appends the binary form of an already-validated instruction.
pub fn encode(instruction: &Instruction, out: &mut Vec<u8>) {
    out.push(instruction.opcode.as_u8());
    if let Some(width) = instruction.width {
        out.push(width.tag());
    }
    for operand in &instruction.operands {
        encode_operand(operand, out);
    }
}

fn encode_operand(operand: &Operand, out: &mut Vec<u8>) {
    match *operand {
        Operand::Register { width, id } => out.extend([REGISTER_PREFIX, width.tag(), id.index()]),
        Operand::Constant(value) => {
            out.extend([CONSTANT_PREFIX, Width::W64.tag()]);
            out.extend(value.to_le_bytes());
        }
        Operand::Memory(memory) => {
            out.extend([MEMORY_PREFIX, memory.width.tag()]);
            for term in [memory.base, memory.index, memory.displacement] {
                encode_operand(&Operand::from(term), out);
            }
            out.push(memory.ratio.tag());
        }
    }
}

/// Parses `.8bit` .. `.64bit`.
///
/// # Errors
///
/// Returns [`EncodeError::InvalidWidth`] for anything else.
pub fn parse_width_suffix(text: &str) -> Result<Width, EncodeError> {
    let invalid = || EncodeError::InvalidWidth(text.to_string());
    let digits = text
        .strip_prefix('.')
        .and_then(|t| {
            t.len()
                .checked_sub(3)
                .filter(|&cut| t.get(cut..).is_some_and(|tail| tail.eq_ignore_ascii_case("bit")))
                .map(|cut| &t[..cut])
        })
        .ok_or_else(invalid)?;
    width_from_bits(digits).ok_or_else(invalid)
}

fn width_from_bits(digits: &str) -> Option<Width> {
    match digits.trim() {
        "8" => Some(Width::W8),
        "16" => Some(Width::W16),
        "32" => Some(Width::W32),
        "64" => Some(Width::W64),
        _ => None,
    }
}

fn split_operands(mut rest: &str) -> Result<Vec<&str>, EncodeError> {
    let mut operands = Vec::new();
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            return Ok(operands);
        }
        let Some(body) = rest.strip_prefix('<') else {
            return Err(EncodeError::Trailing(rest.to_string()));
        };
        let close = body
            .find('>')
            .ok_or_else(|| EncodeError::Trailing(rest.to_string()))?;
        operands.push(body[..close].trim());
        rest = &body[close + 1..];
    }
}

/// Parses the text inside one `<...>` pair.
///
/// # Errors
///
/// Returns [`EncodeError::InvalidOperand`] or [`EncodeError::Expression`].
pub fn parse_operand(text: &str) -> Result<Operand, EncodeError> {
    let text = text.trim();
    match text.chars().next() {
        Some('%' | '$') => parse_term(text).map(Operand::from),
        Some('*') => parse_memory(text).map(Operand::Memory),
        _ => Err(EncodeError::InvalidOperand {
            text: text.to_string(),
            reason: "expected %register, $(constant) or *memory",
        }),
    }
}

fn parse_term(text: &str) -> Result<AddressTerm, EncodeError> {
    let text = text.trim();
    if let Some(name) = text.strip_prefix('%') {
        let (width, id) = parse_register(name).ok_or_else(|| EncodeError::InvalidOperand {
            text: text.to_string(),
            reason: "unknown register",
        })?;
        return Ok(AddressTerm::Register { width, id });
    }
    if let Some(expression) = text.strip_prefix('$') {
        // Negative results keep their two's-complement bit pattern.
        return evaluate(expression)
            .map(|value| AddressTerm::Constant(value as u64))
            .map_err(|source| EncodeError::Expression {
                text: text.to_string(),
                source,
            });
    }
    Err(EncodeError::InvalidOperand {
        text: text.to_string(),
        reason: "expected %register or $(constant)",
    })
}

/// Resolves a register name without the `%` sigil.
#[must_use]
pub fn parse_register(name: &str) -> Option<(Width, RegisterId)> {
    if let Some(special) = SpecialRegister::from_name(name) {
        return Some((Width::W64, RegisterId::Special(special)));
    }
    let upper = name.to_ascii_uppercase();
    for width in Width::ALL {
        if let Some(number) = upper.strip_prefix(width.register_prefix()) {
            let index: u8 = number.parse().ok()?;
            return (usize::from(index) < GENERAL_REGISTER_COUNT)
                .then_some((width, RegisterId::General(index)));
        }
    }
    None
}

fn parse_memory(text: &str) -> Result<MemoryOperand, EncodeError> {
    let invalid = |reason| EncodeError::InvalidOperand {
        text: text.to_string(),
        reason,
    };
    let body = text.strip_prefix('*').ok_or_else(|| invalid("missing '*'"))?;
    let (ratio_text, body) = body
        .split_once('&')
        .ok_or_else(|| invalid("missing '&' after ratio"))?;
    let ratio = ratio_text
        .trim()
        .parse()
        .ok()
        .and_then(Ratio::from_factor)
        .ok_or_else(|| invalid("ratio must be 1, 2, 4, 8 or 16"))?;
    let open = body.find('(').ok_or_else(|| invalid("missing '('"))?;
    let width = width_from_bits(&body[..open]).ok_or_else(|| invalid("width must be 8, 16, 32 or 64"))?;
    let inner = body[open + 1..]
        .trim_end()
        .strip_suffix(')')
        .ok_or_else(|| invalid("missing ')'"))?;

    let terms = split_terms(inner);
    let [base, index, displacement] = terms.as_slice() else {
        return Err(invalid("expected three address terms"));
    };
    Ok(MemoryOperand {
        width,
        ratio,
        base: parse_term(base)?,
        index: parse_term(index)?,
        displacement: parse_term(displacement)?,
    })
}

/// Splits on commas that are not nested inside parentheses.
pub(crate) fn split_terms(inner: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (offset, ch) in inner.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&inner[start..offset]);
                start = offset + 1;
            }
            _ => {}
        }
    }
    terms.push(&inner[start..]);
    terms
}
