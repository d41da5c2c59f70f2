//! Firmware release register decoding

/// Register holding the running firmware's release word
pub const FIRMWARE_RELEASE_REGISTER: u32 = 0x8124;

const YEAR_BASE: u16 = 2016;

/// Release of the firmware currently running on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareRelease {
    /// Major revision
    pub major: u8,
    /// Minor revision
    pub minor: u8,
    /// Build year
    pub year: u16,
    /// Build month
    pub month: u8,
    /// Build day
    pub day: u8,
}

impl FirmwareRelease {
    /// Decode a release register value
    ///
    /// Layout: bits 31..28 year since 2016, 27..24 month, 23..16 day,
    /// 15..8 major, 7..0 minor.
    pub const fn from_register(value: u32) -> Self {
        Self {
            major: (value >> 8) as u8,
            minor: value as u8,
            year: YEAR_BASE + (value >> 28) as u16,
            month: ((value >> 24) & 0xF) as u8,
            day: (value >> 16) as u8,
        }
    }
}

impl core::fmt::Display for FirmwareRelease {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}.{} ({:04}/{:02}/{:02})",
            self.major, self.minor, self.year, self.month, self.day
        )
    }
}
