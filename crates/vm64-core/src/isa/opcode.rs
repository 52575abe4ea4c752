//! Opcode table: one byte per opcode, with operand count and whether a
//! width tag follows.

/// Every instruction the machine executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    Nop = 0x00,
    Add = 0x01,
    Adc = 0x02,
    Sub = 0x03,
    Sbb = 0x04,
    Imul = 0x05,
    Mul = 0x06,
    Idiv = 0x07,
    Div = 0x08,
    Neg = 0x09,
    Cmp = 0x0A,
    Inc = 0x0B,
    Dec = 0x0C,
    And = 0x10,
    Or = 0x11,
    Xor = 0x12,
    Not = 0x13,
    Shl = 0x14,
    Shr = 0x15,
    Rol = 0x16,
    Ror = 0x17,
    Rcl = 0x18,
    Rcr = 0x19,
    Mov = 0x20,
    Xchg = 0x21,
    Push = 0x22,
    Pop = 0x23,
    PushAll = 0x24,
    PopAll = 0x25,
    Enter = 0x26,
    Leave = 0x27,
    Movs = 0x28,
    Lea = 0x29,
    Jmp = 0x30,
    Call = 0x31,
    Ret = 0x32,
    Loop = 0x33,
    Je = 0x34,
    Jne = 0x35,
    Jb = 0x36,
    Jl = 0x37,
    Jbe = 0x38,
    Jle = 0x39,
    Int = 0x3A,
    Int3 = 0x3B,
    Iret = 0x3C,
    Jc = 0x3D,
    Jnc = 0x3E,
    Jo = 0x3F,
    Jno = 0x40,
    Hlt = 0x50,
    Igni = 0x51,
    Alwi = 0x52,
    Ins = 0x60,
    Outs = 0x61,
    In = 0x62,
    Out = 0x63,
}

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// The opcode.
    pub opcode: Opcode,
    /// Upper-case assembly mnemonic.
    pub mnemonic: &'static str,
    /// Number of operands that follow.
    pub operand_count: u8,
    /// Whether a width tag follows the opcode byte.
    pub takes_width: bool,
}

const fn entry(
    opcode: Opcode,
    mnemonic: &'static str,
    operand_count: u8,
    takes_width: bool,
) -> OpcodeInfo {
    OpcodeInfo {
        opcode,
        mnemonic,
        operand_count,
        takes_width,
    }
}

/// Single source of truth for opcode bytes; any byte not listed is illegal.
pub const OPCODE_TABLE: &[OpcodeInfo] = &[
    entry(Opcode::Nop, "NOP", 0, false),
    entry(Opcode::Add, "ADD", 2, true),
    entry(Opcode::Adc, "ADC", 2, true),
    entry(Opcode::Sub, "SUB", 2, true),
    entry(Opcode::Sbb, "SBB", 2, true),
    entry(Opcode::Imul, "IMUL", 1, true),
    entry(Opcode::Mul, "MUL", 1, true),
    entry(Opcode::Idiv, "IDIV", 1, true),
    entry(Opcode::Div, "DIV", 1, true),
    entry(Opcode::Neg, "NEG", 1, true),
    entry(Opcode::Cmp, "CMP", 2, true),
    entry(Opcode::Inc, "INC", 1, true),
    entry(Opcode::Dec, "DEC", 1, true),
    entry(Opcode::And, "AND", 2, true),
    entry(Opcode::Or, "OR", 2, true),
    entry(Opcode::Xor, "XOR", 2, true),
    entry(Opcode::Not, "NOT", 1, true),
    entry(Opcode::Shl, "SHL", 2, true),
    entry(Opcode::Shr, "SHR", 2, true),
    entry(Opcode::Rol, "ROL", 2, true),
    entry(Opcode::Ror, "ROR", 2, true),
    entry(Opcode::Rcl, "RCL", 2, true),
    entry(Opcode::Rcr, "RCR", 2, true),
    entry(Opcode::Mov, "MOV", 2, true),
    entry(Opcode::Xchg, "XCHG", 2, true),
    entry(Opcode::Push, "PUSH", 1, true),
    entry(Opcode::Pop, "POP", 1, true),
    entry(Opcode::PushAll, "PUSHALL", 0, false),
    entry(Opcode::PopAll, "POPALL", 0, false),
    entry(Opcode::Enter, "ENTER", 1, true),
    entry(Opcode::Leave, "LEAVE", 0, false),
    entry(Opcode::Movs, "MOVS", 0, false),
    entry(Opcode::Lea, "LEA", 2, true),
    entry(Opcode::Jmp, "JMP", 2, false),
    entry(Opcode::Call, "CALL", 2, false),
    entry(Opcode::Ret, "RET", 0, false),
    entry(Opcode::Loop, "LOOP", 2, false),
    entry(Opcode::Je, "JE", 2, false),
    entry(Opcode::Jne, "JNE", 2, false),
    entry(Opcode::Jb, "JB", 2, false),
    entry(Opcode::Jl, "JL", 2, false),
    entry(Opcode::Jbe, "JBE", 2, false),
    entry(Opcode::Jle, "JLE", 2, false),
    entry(Opcode::Int, "INT", 1, false),
    entry(Opcode::Int3, "INT3", 0, false),
    entry(Opcode::Iret, "IRET", 0, false),
    entry(Opcode::Jc, "JC", 2, false),
    entry(Opcode::Jnc, "JNC", 2, false),
    entry(Opcode::Jo, "JO", 2, false),
    entry(Opcode::Jno, "JNO", 2, false),
    entry(Opcode::Hlt, "HLT", 0, false),
    entry(Opcode::Igni, "IGNI", 0, false),
    entry(Opcode::Alwi, "ALWI", 0, false),
    entry(Opcode::Ins, "INS", 1, false),
    entry(Opcode::Outs, "OUTS", 1, false),
    entry(Opcode::In, "IN", 2, true),
    entry(Opcode::Out, "OUT", 2, true),
];

impl Opcode {
    /// Opcode byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Looks an opcode byte up in [`OPCODE_TABLE`].
    #[must_use]
    pub fn from_u8(byte: u8) -> Option<Self> {
        OPCODE_TABLE
            .iter()
            .find(|info| info.opcode.as_u8() == byte)
            .map(|info| info.opcode)
    }

    /// Looks a mnemonic up, ignoring case.
    #[must_use]
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        OPCODE_TABLE
            .iter()
            .find(|info| info.mnemonic.eq_ignore_ascii_case(mnemonic))
            .map(|info| info.opcode)
    }

    /// Static description of this opcode.
    #[must_use]
    pub fn info(self) -> OpcodeInfo {
        OPCODE_TABLE
            .iter()
            .copied()
            .find(|info| info.opcode == self)
            .unwrap_or(OPCODE_TABLE[0])
    }

    /// Upper-case mnemonic.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    /// Control transfers that take a `(code base, ip)` operand pair.
    #[must_use]
    pub const fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jmp
                | Self::Call
                | Self::Loop
                | Self::Je
                | Self::Jne
                | Self::Jb
                | Self::Jl
                | Self::Jbe
                | Self::Jle
                | Self::Jc
                | Self::Jnc
                | Self::Jo
                | Self::Jno
        )
    }
}
