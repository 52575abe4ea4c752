//! Object modules: assembled code blocks plus the symbol and data records
//! the linker needs to finish them.

use vm64_core::isa::operand::CONSTANT_PREFIX;
use vm64_core::Width;

/// Stand-in for an address the assembler cannot know yet: a 64-bit
/// constant operand holding all ones.
pub const ADDRESS_PLACEHOLDER: [u8; 10] = [
    CONSTANT_PREFIX,
    0x64,
    0xFF,
    0xFF,
    0xFF,
    0xFF,
    0xFF,
    0xFF,
    0xFF,
    0xFF,
];

/// Operand text the assembler substitutes for a label reference.
pub const PLACEHOLDER_OPERAND: &str = "<$(0xFFFFFFFFFFFFFFFF)>";

/// Encodes `address` as a 64-bit constant operand, the same length as
/// [`ADDRESS_PLACEHOLDER`].
#[must_use]
pub fn encode_address(address: u64) -> [u8; 10] {
    let mut bytes = [0u8; 10];
    bytes[0] = CONSTANT_PREFIX;
    bytes[1] = Width::W64.tag();
    bytes[2..].copy_from_slice(&address.to_le_bytes());
    bytes
}

/// A symbol as seen by one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRecord {
    /// Symbol name.
    pub name: String,
    /// Whether this module defines it.
    pub defined: bool,
    /// Absolute address, meaningful when `defined`.
    pub address: u64,
    /// Code blocks holding a placeholder for this symbol.
    pub references: Vec<usize>,
}

/// A data block whose value is computed at link time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataExpression {
    /// Code block to overwrite.
    pub block: usize,
    /// Size of the value.
    pub width: Width,
    /// Expression text; may name symbols.
    pub expression: String,
}

/// Output of assembling one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectModule {
    /// Module name for diagnostics, usually the source path.
    pub name: String,
    /// Code in emission order, one block per instruction or datum.
    pub code: Vec<Vec<u8>>,
    /// Symbols defined or referenced here.
    pub symbols: Vec<SymbolRecord>,
    /// Link-time data values.
    pub data_expressions: Vec<DataExpression>,
}

impl ObjectModule {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Total code bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.code.iter().map(|block| block.len() as u64).sum()
    }

    /// Appends a block; returns its index.
    pub fn push_block(&mut self, bytes: Vec<u8>) -> usize {
        self.code.push(bytes);
        self.code.len() - 1
    }

    /// The record for `name`, created on first use.
    pub fn symbol_mut(&mut self, name: &str) -> &mut SymbolRecord {
        let index = self
            .symbols
            .iter()
            .position(|symbol| symbol.name == name)
            .unwrap_or_else(|| {
                self.symbols.push(SymbolRecord {
                    name: name.to_string(),
                    defined: false,
                    address: 0,
                    references: Vec::new(),
                });
                self.symbols.len() - 1
            });
        &mut self.symbols[index]
    }

    /// Looks up a symbol record.
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<&SymbolRecord> {
        self.symbols.iter().find(|symbol| symbol.name == name)
    }

    /// Concatenated code, placeholders included.
    #[must_use]
    pub fn flatten(&self) -> Vec<u8> {
        self.code.concat()
    }
}
