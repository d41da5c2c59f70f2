//! Error types for cfaflash-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate. Every variant carries the context needed to
//! diagnose a failed run without repeating it.

use core::fmt;

/// Details about a malformed archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// Segment does not start with the CFA magic constant
    BadMagic {
        /// Offset of the segment within the archive
        offset: usize,
        /// The value found where the magic was expected
        found: u32,
    },
    /// Archive ended before a declared field or payload
    Truncated {
        /// Offset where the missing data should start
        offset: usize,
        /// Number of bytes required
        needed: usize,
        /// Number of bytes actually available
        available: usize,
    },
    /// Declared header size is smaller than the fixed stub
    HeaderTooSmall {
        /// Offset of the segment within the archive
        offset: usize,
        /// The declared header size
        header_size: u32,
    },
    /// Decoded header fields run past the declared header size
    HeaderOverrun {
        /// Offset of the segment within the archive
        offset: usize,
        /// Bytes consumed by the decoded header
        consumed: usize,
        /// The declared header size
        header_size: u32,
    },
    /// Segment type id is neither a modern nor a legacy id
    UnknownSegmentType(u32),
    /// Geometry fields of a Type 1 segment are out of range
    InvalidGeometry {
        /// Offset of the segment within the archive
        offset: usize,
    },
    /// Archive contains no segment at all
    Empty,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Archive errors
    /// Archive could not be decoded
    Format(FormatError),

    // Model errors
    /// No candidate model matched the live device
    NoCompatibleModel,
    /// Flash geometry was already selected for this session
    GeometryAlreadySelected,
    /// Operation needs a resolved flash geometry
    GeometryNotSelected,
    /// Page size is not one of 264, 528 or 1056
    UnsupportedPageSize(u32),
    /// Register width is neither 16 nor 32 bits
    UnsupportedRegisterWidth(u32),

    // Transport errors
    /// Register access failed
    RegisterIo {
        /// Register address
        address: u32,
        /// Whether the failed access was a write
        write: bool,
    },
    /// Device could not be opened
    DeviceOpen,
    /// Device could not be closed cleanly
    DeviceClose,

    // Flash errors
    /// Status register never reported ready
    DeviceTimeout {
        /// Page being programmed or erased
        page: u32,
        /// Microseconds spent polling
        waited_us: u64,
    },
    /// Operation was cancelled by the caller
    Cancelled,
    /// Read-back data differs from what was written
    VerifyMismatch {
        /// Flash page index
        page: u32,
        /// Byte offset within the page
        offset: usize,
        /// Byte that was expected
        expected: u8,
        /// Byte that was read back
        actual: u8,
    },

    /// Erase layout of a slot runs past the last addressable page
    LayoutOverflow {
        /// First page of the offending slot
        base_page: u32,
    },

    // Upgrade errors
    /// Requested image slot does not exist on this model
    NoSuchSlot(usize),
    /// Firmware does not fit into the image slot
    ImageTooLarge {
        /// Bytes required by the image
        image_bytes: usize,
        /// Bytes available in the slot
        slot_bytes: usize,
    },
    /// Provided buffer does not have the expected length
    BufferSize {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Format(e)
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic { offset, found } => write!(
                f,
                "bad segment magic at offset 0x{:X}: found 0x{:08X}",
                offset, found
            ),
            Self::Truncated {
                offset,
                needed,
                available,
            } => write!(
                f,
                "archive truncated at offset 0x{:X}: need {} bytes, {} available",
                offset, needed, available
            ),
            Self::HeaderTooSmall {
                offset,
                header_size,
            } => write!(
                f,
                "segment at offset 0x{:X} declares header size {} (smaller than its stub)",
                offset, header_size
            ),
            Self::HeaderOverrun {
                offset,
                consumed,
                header_size,
            } => write!(
                f,
                "segment at offset 0x{:X}: header fields use {} bytes but header size is {}",
                offset, consumed, header_size
            ),
            Self::UnknownSegmentType(id) => write!(f, "unknown segment type id {}", id),
            Self::InvalidGeometry { offset } => {
                write!(f, "segment at offset 0x{:X} has invalid flash geometry", offset)
            }
            Self::Empty => write!(f, "archive contains no segments"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(e) => write!(f, "format error: {}", e),
            Self::NoCompatibleModel => write!(f, "no compatible model found for this device"),
            Self::GeometryAlreadySelected => write!(f, "flash geometry already selected"),
            Self::GeometryNotSelected => write!(f, "flash geometry not selected"),
            Self::UnsupportedPageSize(size) => write!(f, "unsupported flash page size {}", size),
            Self::UnsupportedRegisterWidth(bits) => {
                write!(f, "unsupported register width {} bits", bits)
            }
            Self::RegisterIo { address, write } => write!(
                f,
                "register {} failed at 0x{:08X}",
                if *write { "write" } else { "read" },
                address
            ),
            Self::DeviceOpen => write!(f, "failed to open device"),
            Self::DeviceClose => write!(f, "failed to close device"),
            Self::DeviceTimeout { page, waited_us } => write!(
                f,
                "flash not ready after {} us (page {})",
                waited_us, page
            ),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::VerifyMismatch {
                page,
                offset,
                expected,
                actual,
            } => write!(
                f,
                "verify failed at page {} offset {}: expected 0x{:02X}, found 0x{:02X}",
                page, offset, expected, actual
            ),
            Self::LayoutOverflow { base_page } => write!(
                f,
                "erase layout of the slot at page {} exceeds the 32-bit page range",
                base_page
            ),
            Self::NoSuchSlot(index) => write!(f, "image slot {} does not exist", index),
            Self::ImageTooLarge {
                image_bytes,
                slot_bytes,
            } => write!(
                f,
                "image of {} bytes does not fit in slot of {} bytes",
                image_bytes, slot_bytes
            ),
            Self::BufferSize { expected, actual } => {
                write!(f, "buffer has {} bytes, expected {}", actual, expected)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FormatError {}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
