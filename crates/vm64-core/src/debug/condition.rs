//! Breakpoint conditions.
//!
//! ```text
//! cond := 'valequal' '(' operand ',' operand ')'
//!       | 'and' '(' cond ',' cond ')'
//!       | 'or' '(' cond ',' cond ')'
//!       | 'not' '(' cond ')'
//! ```
//!
//! Operands use instruction operand text, with or without the `<...>`
//! wrapper. Memory operands are read at 64 bits.

use thiserror::Error;

use crate::execute::read_operand;
use crate::isa::encode::split_terms;
use crate::isa::{parse_operand, EncodeError, Operand};
use crate::{Memory, RegisterFile, Width};

/// Condition text could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    /// Not `name(args)`.
    #[error("malformed condition '{0}'")]
    Malformed(String),
    /// Unknown function name.
    #[error("unknown condition '{0}'")]
    UnknownFunction(String),
    /// Wrong number of arguments.
    #[error("{name} takes {expected} argument(s), got {found}")]
    Arity {
        /// Function name.
        name: &'static str,
        /// Required count.
        expected: usize,
        /// Given count.
        found: usize,
    },
    /// Operand text does not parse.
    #[error("bad operand: {0}")]
    Operand(#[from] EncodeError),
}

/// Predicate over machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Always true; the condition of an unconditional breakpoint.
    Always,
    /// Both operands read the same value.
    ValEqual(Operand, Operand),
    /// Both hold.
    And(Box<Self>, Box<Self>),
    /// Either holds.
    Or(Box<Self>, Box<Self>),
    /// Negation.
    Not(Box<Self>),
}

impl Condition {
    /// Parses condition text; blank text is [`Condition::Always`].
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError`] for malformed text.
    pub fn parse(text: &str) -> Result<Self, ConditionError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::Always);
        }
        let malformed = || ConditionError::Malformed(text.to_string());
        let open = text.find('(').ok_or_else(malformed)?;
        let name = text[..open].trim().to_ascii_lowercase();
        let inner = text[open + 1..]
            .strip_suffix(')')
            .ok_or_else(malformed)?;
        let args: Vec<&str> = split_terms(inner).into_iter().map(str::trim).collect();

        let arity = |name: &'static str, expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(ConditionError::Arity {
                    name,
                    expected,
                    found: args.len(),
                })
            }
        };
        match name.as_str() {
            "valequal" => {
                arity("valequal", 2)?;
                Ok(Self::ValEqual(operand(args[0])?, operand(args[1])?))
            }
            "and" => {
                arity("and", 2)?;
                Ok(Self::And(
                    Box::new(Self::parse(args[0])?),
                    Box::new(Self::parse(args[1])?),
                ))
            }
            "or" => {
                arity("or", 2)?;
                Ok(Self::Or(
                    Box::new(Self::parse(args[0])?),
                    Box::new(Self::parse(args[1])?),
                ))
            }
            "not" => {
                arity("not", 1)?;
                Ok(Self::Not(Box::new(Self::parse(args[0])?)))
            }
            _ => Err(ConditionError::UnknownFunction(name)),
        }
    }

    /// Evaluates against current state; unreadable operands make
    /// `valequal` false.
    #[must_use]
    pub fn evaluate(&self, regs: &RegisterFile, memory: &Memory) -> bool {
        match self {
            Self::Always => true,
            Self::ValEqual(a, b) => match (observe(regs, memory, a), observe(regs, memory, b)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            Self::And(a, b) => a.evaluate(regs, memory) && b.evaluate(regs, memory),
            Self::Or(a, b) => a.evaluate(regs, memory) || b.evaluate(regs, memory),
            Self::Not(inner) => !inner.evaluate(regs, memory),
        }
    }
}

/// Parses operand text, accepting an optional `<...>` wrapper.
///
/// # Errors
///
/// Returns the operand parse error.
pub fn operand(text: &str) -> Result<Operand, ConditionError> {
    let text = text.trim();
    let text = text
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .unwrap_or(text);
    Ok(parse_operand(text)?)
}

/// Reads `operand` as a debugger sees it: memory at 64 bits.
#[must_use]
pub fn observe(regs: &RegisterFile, memory: &Memory, operand: &Operand) -> Option<u64> {
    let widened = match *operand {
        Operand::Memory(mut m) => {
            m.width = Width::W64;
            Operand::Memory(m)
        }
        other => other,
    };
    read_operand(regs, memory, &widened)
        .map_err(|err| log::debug!("debugger read of {operand} failed: {err}"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::{Condition, ConditionError};
    use crate::{Memory, RegisterFile};
    use rstest::rstest;

    fn state() -> (RegisterFile, Memory) {
        let mut regs = RegisterFile::default();
        regs.set_general(0, 5);
        let memory = Memory::new(0x1000);
        memory.write(0x40, &7u64.to_le_bytes()).unwrap();
        (regs, memory)
    }

    #[rstest]
    #[case("", true)]
    #[case("valequal(<%FER0>, <$(5)>)", true)]
    #[case("valequal(%FER0, $(6))", false)]
    #[case("valequal(<*1&8($(0x40), $(0), $(0))>, <$(7)>)", true)]
    #[case("not(valequal(%FER0, $(5)))", false)]
    #[case("and(valequal(%FER0, $(5)), valequal(%R0, $(5)))", true)]
    #[case("or(valequal(%FER0, $(1)), not(valequal(%FER1, $(1))))", true)]
    fn evaluates(#[case] text: &str, #[case] expected: bool) {
        let (regs, memory) = state();
        let condition = Condition::parse(text).unwrap();
        assert_eq!(condition.evaluate(&regs, &memory), expected);
    }

    #[test]
    fn unreadable_memory_is_not_equal() {
        let (regs, memory) = state();
        let condition = Condition::parse("valequal(<*1&64($(0xFFFF), $(0), $(0))>, $(0))").unwrap();
        assert!(!condition.evaluate(&regs, &memory));
    }

    #[test]
    fn parse_errors_are_specific() {
        assert!(matches!(
            Condition::parse("valequal(%FER0)"),
            Err(ConditionError::Arity { name: "valequal", .. })
        ));
        assert!(matches!(
            Condition::parse("xor(a, b)"),
            Err(ConditionError::UnknownFunction(_))
        ));
        assert!(matches!(
            Condition::parse("valequal"),
            Err(ConditionError::Malformed(_))
        ));
        assert!(matches!(
            Condition::parse("valequal(%QQ, $(1))"),
            Err(ConditionError::Operand(_))
        ));
    }
}
