//! DataFlash access over board registers
//!
//! Boards expose their configuration flash through two registers: a
//! select register that drives the chip-enable line and a data register
//! that shifts one byte per access. This module turns page-level
//! operations into those register sequences.

mod driver;
mod geometry;
pub mod opcodes;

pub use driver::{DataFlash, PollConfig, SECURITY_REGISTER_SIZE};
pub use geometry::*;
