/// Number of general-purpose registers (`R0..R15` at every width).
pub const GENERAL_REGISTER_COUNT: usize = 16;
/// Number of 64-bit special registers addressable by operands.
pub const SPECIAL_REGISTER_COUNT: usize = 8;
/// Words pushed by an interrupt frame: general, special, `IP`, `FLAGS`.
pub const FRAME_WORDS: usize = GENERAL_REGISTER_COUNT + SPECIAL_REGISTER_COUNT + 2;

/// `FLAGS` bit for unsigned carry/borrow.
pub const FLAG_CARRY: u64 = 1 << 0;
/// `FLAGS` bit for signed overflow.
pub const FLAG_OVERFLOW: u64 = 1 << 1;
/// `FLAGS` bit set by comparisons when operands are equal.
pub const FLAG_EQUAL: u64 = 1 << 2;
/// `FLAGS` bit set by comparisons when the left operand is larger.
pub const FLAG_LARGER_THAN: u64 = 1 << 3;
/// `FLAGS` bit set by comparisons when the left operand is smaller.
pub const FLAG_LESS_THAN: u64 = 1 << 4;
/// `FLAGS` bit masking maskable interrupts.
pub const FLAG_INTERRUPTION_MASK: u64 = 1 << 5;
/// Mask of architecturally active `FLAGS` bits.
pub const FLAGS_ACTIVE_MASK: u64 = FLAG_CARRY
    | FLAG_OVERFLOW
    | FLAG_EQUAL
    | FLAG_LARGER_THAN
    | FLAG_LESS_THAN
    | FLAG_INTERRUPTION_MASK;

/// Operation or operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
    /// 8-bit (`%R`, `.8bit`).
    W8,
    /// 16-bit (`%EXR`, `.16bit`).
    W16,
    /// 32-bit (`%HER`, `.32bit`).
    W32,
    /// 64-bit (`%FER`, specials, `.64bit`).
    W64,
}

impl Width {
    /// All widths in ascending order.
    pub const ALL: [Self; 4] = [Self::W8, Self::W16, Self::W32, Self::W64];

    /// Encoded width-tag byte.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::W8 => 0x08,
            Self::W16 => 0x16,
            Self::W32 => 0x32,
            Self::W64 => 0x64,
        }
    }

    /// Decodes a width-tag byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x08 => Some(Self::W8),
            0x16 => Some(Self::W16),
            0x32 => Some(Self::W32),
            0x64 => Some(Self::W64),
            _ => None,
        }
    }

    /// Width in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 => 64,
        }
    }

    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u64 {
        (self.bits() / 8) as u64
    }

    /// Mask selecting the bits of this width.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::W64 => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    /// Most significant bit of this width.
    #[must_use]
    pub const fn sign_bit(self) -> u64 {
        1u64 << (self.bits() - 1)
    }

    /// Sign-extends the low bits of `value` to 64 bits.
    #[must_use]
    pub const fn sign_extend(self, value: u64) -> i64 {
        let shift = 64 - self.bits();
        ((value << shift) as i64) >> shift
    }

    /// Register-name prefix used in assembly text.
    #[must_use]
    pub const fn register_prefix(self) -> &'static str {
        match self {
            Self::W8 => "R",
            Self::W16 => "EXR",
            Self::W32 => "HER",
            Self::W64 => "FER",
        }
    }

    /// Width suffix as printed by the disassembler.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::W8 => ".8bit",
            Self::W16 => ".16bit",
            Self::W32 => ".32bit",
            Self::W64 => ".64bit",
        }
    }
}

/// 64-bit special register, addressable at operand index `0xA0..=0xA7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SpecialRegister {
    /// `%SB`, stack base.
    StackBase = 0xA0,
    /// `%SP`, stack pointer (offset from `SB`).
    StackPointer = 0xA1,
    /// `%CB`, code base added to `IP` for fetch.
    CodeBase = 0xA2,
    /// `%DB`, data base added to memory operand addresses.
    DataBase = 0xA3,
    /// `%DP`, data pointer (block-copy destination offset).
    DataPointer = 0xA4,
    /// `%EB`, extended base (block-copy source base).
    ExtendedBase = 0xA5,
    /// `%EP`, extended pointer (block-copy source offset).
    ExtendedPointer = 0xA6,
    /// `%CPS`, current procedure frame size.
    ProcedureFrameSize = 0xA7,
}

impl SpecialRegister {
    /// All special registers in index order.
    pub const ALL: [Self; SPECIAL_REGISTER_COUNT] = [
        Self::StackBase,
        Self::StackPointer,
        Self::CodeBase,
        Self::DataBase,
        Self::DataPointer,
        Self::ExtendedBase,
        Self::ExtendedPointer,
        Self::ProcedureFrameSize,
    ];

    /// Operand index byte.
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Decodes an operand index byte.
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0xA0 => Some(Self::StackBase),
            0xA1 => Some(Self::StackPointer),
            0xA2 => Some(Self::CodeBase),
            0xA3 => Some(Self::DataBase),
            0xA4 => Some(Self::DataPointer),
            0xA5 => Some(Self::ExtendedBase),
            0xA6 => Some(Self::ExtendedPointer),
            0xA7 => Some(Self::ProcedureFrameSize),
            _ => None,
        }
    }

    /// Assembly name without the `%` sigil.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::StackBase => "SB",
            Self::StackPointer => "SP",
            Self::CodeBase => "CB",
            Self::DataBase => "DB",
            Self::DataPointer => "DP",
            Self::ExtendedBase => "EB",
            Self::ExtendedPointer => "EP",
            Self::ProcedureFrameSize => "CPS",
        }
    }

    /// Looks a special register up by its assembly name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|reg| reg.name().eq_ignore_ascii_case(name))
    }

    const fn slot(self) -> usize {
        (self as u8 - 0xA0) as usize
    }
}

/// Register identifier carried by a decoded register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterId {
    /// General register `0..=15`.
    General(u8),
    /// Special register.
    Special(SpecialRegister),
}

impl RegisterId {
    /// Decodes an operand index byte.
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        if (index as usize) < GENERAL_REGISTER_COUNT {
            return Some(Self::General(index));
        }
        match SpecialRegister::from_index(index) {
            Some(special) => Some(Self::Special(special)),
            None => None,
        }
    }

    /// Operand index byte.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::General(index) => index,
            Self::Special(special) => special.index(),
        }
    }
}

/// Complete architectural register state.
///
/// General registers alias across widths: a narrow store only replaces the
/// low bits of the shared 64-bit cell. Special registers have no narrow
/// views.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterFile {
    general: [u64; GENERAL_REGISTER_COUNT],
    special: [u64; SPECIAL_REGISTER_COUNT],
    ip: u64,
    flags: u64,
}

impl RegisterFile {
    /// Reads a register through a width view.
    #[must_use]
    pub const fn load(&self, width: Width, id: RegisterId) -> u64 {
        let raw = match id {
            RegisterId::General(index) => self.general[index as usize % GENERAL_REGISTER_COUNT],
            RegisterId::Special(special) => self.special[special.slot()],
        };
        raw & width.mask()
    }

    /// Writes a register through a width view, preserving untouched high bits.
    pub const fn store(&mut self, width: Width, id: RegisterId, value: u64) {
        let mask = width.mask();
        match id {
            RegisterId::General(index) => {
                let cell = &mut self.general[index as usize % GENERAL_REGISTER_COUNT];
                *cell = (*cell & !mask) | (value & mask);
            }
            RegisterId::Special(special) => self.special[special.slot()] = value & mask,
        }
    }

    /// Full 64-bit value of a general register.
    #[must_use]
    pub const fn general(&self, index: usize) -> u64 {
        self.general[index % GENERAL_REGISTER_COUNT]
    }

    /// Replaces a general register.
    pub const fn set_general(&mut self, index: usize, value: u64) {
        self.general[index % GENERAL_REGISTER_COUNT] = value;
    }

    /// Reads a special register.
    #[must_use]
    pub const fn special(&self, reg: SpecialRegister) -> u64 {
        self.special[reg.slot()]
    }

    /// Writes a special register.
    pub const fn set_special(&mut self, reg: SpecialRegister, value: u64) {
        self.special[reg.slot()] = value;
    }

    /// Reads the instruction pointer.
    #[must_use]
    pub const fn ip(&self) -> u64 {
        self.ip
    }

    /// Writes the instruction pointer.
    pub const fn set_ip(&mut self, value: u64) {
        self.ip = value;
    }

    /// Code base and instruction pointer as one pair.
    #[must_use]
    pub const fn code_location(&self) -> (u64, u64) {
        (self.special(SpecialRegister::CodeBase), self.ip)
    }

    /// Moves execution to `(cb, ip)`.
    pub const fn set_code_location(&mut self, cb: u64, ip: u64) {
        self.set_special(SpecialRegister::CodeBase, cb);
        self.ip = ip;
    }

    /// Linear address of the next fetch (`CB + IP`).
    #[must_use]
    pub const fn fetch_address(&self) -> u64 {
        self.special(SpecialRegister::CodeBase).wrapping_add(self.ip)
    }

    /// Reads the `FLAGS` register.
    #[must_use]
    pub const fn flags(&self) -> u64 {
        self.flags
    }

    /// Writes the `FLAGS` register.
    pub const fn set_flags(&mut self, value: u64) {
        self.flags = value & FLAGS_ACTIVE_MASK;
    }

    /// Returns `true` when a specific `FLAGS` bit is set.
    #[must_use]
    pub const fn flag_is_set(&self, flag: u64) -> bool {
        (self.flags & flag) != 0
    }

    /// Sets or clears a specific active `FLAGS` bit.
    pub const fn set_flag(&mut self, flag: u64, enabled: bool) {
        if enabled {
            self.flags |= flag & FLAGS_ACTIVE_MASK;
        } else {
            self.flags &= !(flag & FLAGS_ACTIVE_MASK);
        }
    }

    /// Serializes the whole file in interrupt-frame push order.
    #[must_use]
    pub fn to_frame(&self) -> [u64; FRAME_WORDS] {
        let mut frame = [0; FRAME_WORDS];
        frame[..GENERAL_REGISTER_COUNT].copy_from_slice(&self.general);
        frame[GENERAL_REGISTER_COUNT..GENERAL_REGISTER_COUNT + SPECIAL_REGISTER_COUNT]
            .copy_from_slice(&self.special);
        frame[FRAME_WORDS - 2] = self.ip;
        frame[FRAME_WORDS - 1] = self.flags;
        frame
    }

    /// Rebuilds a register file from [`Self::to_frame`] output.
    #[must_use]
    pub fn from_frame(frame: &[u64; FRAME_WORDS]) -> Self {
        let mut regs = Self::default();
        regs.general.copy_from_slice(&frame[..GENERAL_REGISTER_COUNT]);
        regs.special
            .copy_from_slice(&frame[GENERAL_REGISTER_COUNT..GENERAL_REGISTER_COUNT + SPECIAL_REGISTER_COUNT]);
        regs.ip = frame[FRAME_WORDS - 2];
        regs.set_flags(frame[FRAME_WORDS - 1]);
        regs
    }
}
