//! Fixed low-memory layout shared by the firmware, peripherals and debugger.

/// Inclusive start of the boot-loader region.
pub const BOOT_LOADER_START: u64 = 0x00000;
/// Inclusive end of the boot-loader region.
pub const BOOT_LOADER_END: u64 = 0x9FFFF;
/// Inclusive start of the interrupt vector table.
pub const IVT_START: u64 = 0xA0000;
/// Inclusive end of the interrupt vector table.
pub const IVT_END: u64 = 0xA0FFF;
/// Inclusive start of the configuration area (holds the display window).
pub const CONFIG_START: u64 = 0xA1000;
/// Inclusive end of the configuration area.
pub const CONFIG_END: u64 = 0xC17FF;
/// Inclusive start of the firmware image; also the firmware entry point.
pub const BIOS_START: u64 = 0xC1800;
/// Inclusive end of the firmware image.
pub const BIOS_END: u64 = 0xFFFFF;
/// First byte above the reserved low megabyte.
pub const EXTENDED_START: u64 = 0x100000;

/// Bytes per interrupt vector table entry: code base then instruction pointer.
pub const IVT_ENTRY_BYTES: u64 = 16;

/// Text columns of the display window.
pub const DISPLAY_COLUMNS: u64 = 80;
/// Text rows of the display window.
pub const DISPLAY_ROWS: u64 = 25;
/// Inclusive start of the character display window.
pub const DISPLAY_START: u64 = 0xB8000;
/// Inclusive end of the character display window.
pub const DISPLAY_END: u64 = DISPLAY_START + DISPLAY_COLUMNS * DISPLAY_ROWS - 1;

/// Canonical fixed-region descriptor for the low memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionDescriptor {
    /// Region classification.
    pub region: MemoryRegion,
    /// Inclusive start address.
    pub start: u64,
    /// Inclusive end address.
    pub end: u64,
}

/// Region classification for physical addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    /// Boot-loader code (`0x00000..=0x9FFFF`).
    BootLoader,
    /// Interrupt vector table (`0xA0000..=0xA0FFF`).
    VectorTable,
    /// Configuration area (`0xA1000..=0xC17FF`).
    Configuration,
    /// Firmware image (`0xC1800..=0xFFFFF`).
    Firmware,
    /// Everything from 1 MiB up to the configured memory size.
    Extended,
}

impl MemoryRegion {
    /// Returns the inclusive bounds for this region.
    #[must_use]
    pub const fn bounds(self) -> (u64, u64) {
        match self {
            Self::BootLoader => (BOOT_LOADER_START, BOOT_LOADER_END),
            Self::VectorTable => (IVT_START, IVT_END),
            Self::Configuration => (CONFIG_START, CONFIG_END),
            Self::Firmware => (BIOS_START, BIOS_END),
            Self::Extended => (EXTENDED_START, u64::MAX),
        }
    }

    /// Returns `true` when `addr` belongs to this region.
    #[must_use]
    pub const fn contains(self, addr: u64) -> bool {
        let (start, end) = self.bounds();
        addr >= start && addr <= end
    }

    /// Returns the canonical descriptor for this region.
    #[must_use]
    pub const fn descriptor(self) -> RegionDescriptor {
        let (start, end) = self.bounds();
        RegionDescriptor {
            region: self,
            start,
            end,
        }
    }
}

/// Fixed low-memory regions in ascending address order.
pub const FIXED_MEMORY_REGIONS: [RegionDescriptor; 4] = [
    MemoryRegion::BootLoader.descriptor(),
    MemoryRegion::VectorTable.descriptor(),
    MemoryRegion::Configuration.descriptor(),
    MemoryRegion::Firmware.descriptor(),
];

const _: () = assert_fixed_region_layout();

const fn assert_fixed_region_layout() {
    let mut index = 1;
    while index < FIXED_MEMORY_REGIONS.len() {
        let previous = FIXED_MEMORY_REGIONS[index - 1];
        assert!(
            previous.end + 1 == FIXED_MEMORY_REGIONS[index].start,
            "fixed regions must be contiguous"
        );
        index += 1;
    }
    assert!(
        FIXED_MEMORY_REGIONS[3].end + 1 == EXTENDED_START,
        "fixed regions must end at 1 MiB"
    );
    assert!(
        DISPLAY_START >= CONFIG_START && DISPLAY_END <= CONFIG_END,
        "display window must sit inside the configuration area"
    );
    assert!(
        (IVT_END - IVT_START + 1) / IVT_ENTRY_BYTES == 256,
        "vector table holds 256 entries"
    );
}

/// Classifies a physical address.
#[must_use]
pub const fn decode_memory_region(addr: u64) -> MemoryRegion {
    match addr {
        BOOT_LOADER_START..=BOOT_LOADER_END => MemoryRegion::BootLoader,
        IVT_START..=IVT_END => MemoryRegion::VectorTable,
        CONFIG_START..=CONFIG_END => MemoryRegion::Configuration,
        BIOS_START..=BIOS_END => MemoryRegion::Firmware,
        _ => MemoryRegion::Extended,
    }
}

/// Address of the vector table entry for `vector`, if the entry fits the table.
#[must_use]
pub const fn ivt_entry_address(vector: u64) -> Option<u64> {
    let Some(offset) = vector.checked_mul(IVT_ENTRY_BYTES) else {
        return None;
    };
    let address = IVT_START + offset;
    if address + IVT_ENTRY_BYTES - 1 > IVT_END {
        None
    } else {
        Some(address)
    }
}
