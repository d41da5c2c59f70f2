//! DataFlash opcodes and status bits
//!
//! Page-oriented serial flash (AT45DB family) command set as used by the
//! board configuration flash.

use bitflags::bitflags;

// ============================================================================
// Read commands
// ============================================================================

/// Main Memory Page Read (3 address bytes + 4 don't care bytes)
pub const PAGE_READ: u8 = 0xD2;
/// Security Register Read (3 don't care bytes)
pub const SECURITY_READ: u8 = 0x77;
/// Status Register Read
pub const STATUS_READ: u8 = 0xD7;

// ============================================================================
// Program commands
// ============================================================================

/// Main Memory Page Program through Buffer 1 with built-in erase
pub const PAGE_PROGRAM_BUF1: u8 = 0x82;

// ============================================================================
// Erase commands
// ============================================================================

/// Page Erase
pub const PAGE_ERASE: u8 = 0x81;
/// Block Erase (8 pages)
pub const BLOCK_ERASE: u8 = 0x50;
/// Sector Erase
pub const SECTOR_ERASE: u8 = 0x7C;

/// Number of don't care bytes after the address of a page read
pub const PAGE_READ_DUMMY_BYTES: usize = 4;
/// Number of don't care bytes after a security register read opcode
pub const SECURITY_READ_DUMMY_BYTES: usize = 3;
/// Number of pages erased by [`BLOCK_ERASE`]
pub const BLOCK_PAGES: u32 = 8;

bitflags! {
    /// DataFlash status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u8 {
        /// Device is ready (no program or erase in progress)
        const READY = 1 << 7;
        /// Last buffer compare failed
        const COMPARE = 1 << 6;
        /// Sector protection is enabled
        const PROTECT = 1 << 1;
        /// Device is configured for power-of-two page size
        const PAGE_SIZE = 1 << 0;
    }
}
