//! Linear disassembly of instruction bytes.
//!
//! Undecodable bytes never stop the listing: each one becomes a
//! `.8bit_data <0x..>` row and decoding resumes at the following byte.

use std::fmt;

use crate::isa::decode::{decode_instruction, MAX_INSTRUCTION_BYTES};
use crate::Memory;

/// A single disassembled row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassemblyRow {
    /// Address of the first byte.
    pub address: u64,
    /// Raw bytes covered by the row.
    pub bytes: Vec<u8>,
    /// Normalized instruction text, or a data directive for a bad byte.
    pub text: String,
    /// Whether the row stands for an undecodable byte.
    pub is_bad: bool,
}

impl fmt::Display for DisassemblyRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#X}: {}", self.address, self.text)
    }
}

/// Decodes one row at the start of `bytes`, which begins at `address`.
///
/// Returns `None` only for empty input.
#[must_use]
pub fn disassemble_one(address: u64, bytes: &[u8]) -> Option<DisassemblyRow> {
    let first = *bytes.first()?;
    Some(match decode_instruction(bytes) {
        Ok((instruction, length)) => DisassemblyRow {
            address,
            bytes: bytes[..length].to_vec(),
            text: instruction.to_string(),
            is_bad: false,
        },
        Err(_) => DisassemblyRow {
            address,
            bytes: vec![first],
            text: format!(".8bit_data <{first:#04X}>"),
            is_bad: true,
        },
    })
}

/// Disassembles all of `bytes`, placing the first byte at `origin`.
#[must_use]
pub fn disassemble(bytes: &[u8], origin: u64) -> Vec<DisassemblyRow> {
    let mut rows = Vec::new();
    let mut offset = 0;
    while let Some(row) = disassemble_one(origin + offset as u64, &bytes[offset..]) {
        offset += row.bytes.len();
        rows.push(row);
    }
    rows
}

/// Disassembles up to `count` rows of live memory starting at `address`.
///
/// Stops early at the end of memory.
#[must_use]
pub fn disassemble_memory(memory: &Memory, address: u64, count: usize) -> Vec<DisassemblyRow> {
    let mut rows = Vec::with_capacity(count);
    let mut cursor = address;
    while rows.len() < count && cursor < memory.total() {
        let available = (memory.total() - cursor).min(MAX_INSTRUCTION_BYTES as u64);
        let Ok(window) = memory.read_vec(cursor, available) else {
            break;
        };
        let Some(row) = disassemble_one(cursor, &window) else {
            break;
        };
        cursor += row.bytes.len() as u64;
        rows.push(row);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::{disassemble, disassemble_memory};
    use crate::isa::encode::encode_instruction;
    use crate::Memory;

    fn program(lines: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for line in lines {
            encode_instruction(line, &mut out).unwrap();
        }
        out
    }

    #[test]
    fn listing_carries_addresses_from_origin() {
        let bytes = program(&["NOP", "HLT"]);
        let rows = disassemble(&bytes, 0xC1800);
        let text: Vec<String> = rows.iter().map(ToString::to_string).collect();
        assert_eq!(text, vec!["0xC1800: NOP", "0xC1801: HLT"]);
    }

    #[test]
    fn bad_byte_does_not_stop_the_listing() {
        let mut bytes = vec![0xEE];
        bytes.extend(program(&["INC .8bit <%R1>"]));
        bytes.push(0x20);
        let rows = disassemble(&bytes, 0);

        assert_eq!(rows[0].text, ".8bit_data <0xEE>");
        assert!(rows[0].is_bad);
        assert_eq!(rows[1].text, "INC .8bit <%R1>");
        assert_eq!(rows[1].address, 1);
        assert_eq!(rows[2].text, ".8bit_data <0x20>");
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn memory_window_stops_at_requested_count() {
        let memory = Memory::new(0x10000);
        memory.write(0x100, &program(&["NOP", "NOP", "HLT"])).unwrap();
        let rows = disassemble_memory(&memory, 0x100, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].address, 0x101);
    }
}
