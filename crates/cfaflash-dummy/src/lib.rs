//! cfaflash-dummy - Emulated board for testing
//!
//! This crate provides a register-mapped board that emulates a DataFlash
//! chip behind a select and a data register in memory. It answers the
//! identification registers of one model, so the whole upgrade path can
//! run without real hardware.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use cfaflash_core::error::{Error, Result};
use cfaflash_core::flash::{opcodes, FlashGeometry, SECURITY_REGISTER_SIZE};
use cfaflash_core::model::{CatalogModel, FLASH_TYPE_REGISTER};
use cfaflash_core::transport::{RegisterAccess, RegisterDevice, RegisterWidth};
use cfaflash_core::upgrade::FIRMWARE_RELEASE_REGISTER;

/// Release word reported by the emulated board (1.0, 2024/01/01)
pub const DUMMY_FIRMWARE_RELEASE: u32 = 0x8101_0100;

/// Pages erased by a sector erase when the layout does not say otherwise
const DEFAULT_SECTOR_PAGES: u32 = 256;

/// Configuration for the emulated board
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Flash geometry and register wiring
    pub geometry: FlashGeometry,
    /// Number of pages in the flash array
    pub pages: usize,
    /// Plain registers with their values
    pub registers: BTreeMap<u32, u32>,
    /// Security register contents
    pub security: [u8; SECURITY_REGISTER_SIZE],
    /// Status polls answered busy after each program or erase
    pub busy_polls: u32,
}

impl DummyConfig {
    /// Board that identifies as `model`
    ///
    /// Every register check of the model reads back its expected value and
    /// the flash type register agrees with the model's enable level.
    pub fn for_model(model: &CatalogModel) -> Self {
        let geometry = model.geometry.clone();
        let mut registers = BTreeMap::new();
        for check in &model.checks {
            registers.insert(check.address, check.expected);
        }
        registers.insert(FLASH_TYPE_REGISTER, geometry.enable_level / 2);
        registers.insert(FIRMWARE_RELEASE_REGISTER, DUMMY_FIRMWARE_RELEASE);

        let mut security = [0u8; SECURITY_REGISTER_SIZE];
        for (i, byte) in security.iter_mut().enumerate() {
            *byte = (i as u8) ^ (model.id as u8);
        }

        Self {
            pages: pages_for(&geometry),
            geometry,
            registers,
            security,
            busy_polls: 0,
        }
    }

    /// Set a plain register
    pub fn with_register(mut self, address: u32, value: u32) -> Self {
        self.registers.insert(address, value);
        self
    }

    /// Answer busy for `polls` status reads after each program or erase
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }
}

/// Smallest array holding every slot and the license page
///
/// Saturates on layouts past the 32-bit page range; the catalog rejects
/// those before a model gets here.
fn pages_for(geometry: &FlashGeometry) -> usize {
    let slots_end = geometry
        .slots
        .iter()
        .map(|&base| geometry.erase.end_page(base).unwrap_or(u32::MAX))
        .max()
        .unwrap_or(0);
    slots_end.max(geometry.license_page.saturating_add(1)) as usize
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Page programs committed
    pub programs: usize,
    /// Erase commands committed
    pub erases: usize,
    /// Page read commands
    pub page_reads: usize,
    /// Status bytes returned
    pub status_polls: usize,
}

/// Emulated board
pub struct DummyBoard {
    config: DummyConfig,
    data: Vec<u8>,
    selected: bool,
    command: Vec<u8>,
    out_pos: usize,
    busy_remaining: u32,
    stats: DummyStats,
    closed: bool,
}

impl DummyBoard {
    /// Create a board with an erased flash array
    pub fn new(config: DummyConfig) -> Self {
        let data = vec![0xFF; config.pages * config.geometry.page_bytes()];
        Self {
            config,
            data,
            selected: false,
            command: Vec::new(),
            out_pos: 0,
            busy_remaining: 0,
            stats: DummyStats::default(),
            closed: false,
        }
    }

    /// Create a board with pre-filled flash contents
    pub fn with_data(config: DummyConfig, initial_data: &[u8]) -> Self {
        let mut board = Self::new(config);
        let len = core::cmp::min(initial_data.len(), board.data.len());
        board.data[..len].copy_from_slice(&initial_data[..len]);
        board
    }

    /// Get a reference to the flash contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the flash contents
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Contents of one page
    pub fn page(&self, page: u32) -> &[u8] {
        let bytes = self.config.geometry.page_bytes();
        let start = page as usize * bytes;
        &self.data[start..start + bytes]
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Operation counters
    pub fn stats(&self) -> DummyStats {
        self.stats
    }

    /// Check whether the board has been closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn geometry(&self) -> &FlashGeometry {
        &self.config.geometry
    }

    /// Page and in-page offset addressed by the current command
    fn address(&self) -> (u32, usize) {
        let addr = ((self.command[1] as u32) << 16)
            | ((self.command[2] as u32) << 8)
            | self.command[3] as u32;
        let shift = self.geometry().page_size.address_shift();
        (addr >> shift, (addr & ((1 << shift) - 1)) as usize)
    }

    fn page_range(&self, page: u32, count: u32) -> Result<core::ops::Range<usize>> {
        let bytes = self.geometry().page_bytes();
        let start = page as usize * bytes;
        let end = start + count as usize * bytes;
        if end > self.data.len() {
            log::warn!("Dummy: page {} is outside the flash array", page);
            return Err(Error::RegisterIo {
                address: self.geometry().select_register,
                write: true,
            });
        }
        Ok(start..end)
    }

    fn handle_page_program(&mut self) -> Result<()> {
        let (page, offset) = self.address();
        let range = self.page_range(page, 1)?;
        let payload = &self.command[4..];
        let page_data = &mut self.data[range];

        // Buffer program with built-in erase: the whole page is replaced
        page_data.fill(0xFF);
        for (i, &byte) in payload.iter().enumerate() {
            let pos = (offset + i) % page_data.len();
            page_data[pos] = byte;
        }
        self.stats.programs += 1;
        Ok(())
    }

    fn handle_erase(&mut self, pages: u32) -> Result<()> {
        let (page, _) = self.address();
        // Erase units are aligned to their own size
        let first = page - page % pages;
        let range = self.page_range(first, pages)?;
        self.data[range].fill(0xFF);
        self.stats.erases += 1;
        Ok(())
    }

    fn sector_pages(&self) -> u32 {
        match self.geometry().erase.block_pages {
            1 | opcodes::BLOCK_PAGES => DEFAULT_SECTOR_PAGES,
            pages => pages,
        }
    }

    /// Commit the command collected during the last transaction
    fn end_transaction(&mut self) -> Result<()> {
        let Some(&opcode) = self.command.first() else {
            return Ok(());
        };
        if self.command.len() < 4 {
            return Ok(());
        }
        let result = match opcode {
            opcodes::PAGE_PROGRAM_BUF1 => self.handle_page_program(),
            opcodes::PAGE_ERASE => self.handle_erase(1),
            opcodes::BLOCK_ERASE => self.handle_erase(opcodes::BLOCK_PAGES),
            opcodes::SECTOR_ERASE => {
                let pages = self.sector_pages();
                self.handle_erase(pages)
            }
            _ => return Ok(()),
        };
        self.busy_remaining = self.config.busy_polls;
        result
    }

    fn read_data(&mut self) -> u8 {
        let Some(&opcode) = self.command.first() else {
            return 0xFF;
        };
        match opcode {
            opcodes::STATUS_READ => {
                self.stats.status_polls += 1;
                if self.busy_remaining > 0 {
                    self.busy_remaining -= 1;
                    0x00
                } else {
                    opcodes::Status::READY.bits()
                }
            }
            opcodes::SECURITY_READ => {
                let byte = self.config.security[self.out_pos % SECURITY_REGISTER_SIZE];
                self.out_pos += 1;
                byte
            }
            opcodes::PAGE_READ if self.command.len() >= 4 => {
                if self.out_pos == 0 {
                    self.stats.page_reads += 1;
                }
                let (page, offset) = self.address();
                let bytes = self.geometry().page_bytes();
                let pos = (offset + self.out_pos) % bytes;
                self.out_pos += 1;
                let start = page as usize * bytes;
                self.data.get(start + pos).copied().unwrap_or(0xFF)
            }
            _ => 0xFF,
        }
    }
}

impl RegisterAccess for DummyBoard {
    fn read_register(&mut self, address: u32, width: RegisterWidth) -> Result<u32> {
        if address == self.geometry().data_register && self.selected {
            return Ok(self.read_data() as u32);
        }
        Ok(self.config.registers.get(&address).copied().unwrap_or(0) & width.mask())
    }

    fn write_register(&mut self, address: u32, width: RegisterWidth, value: u32) -> Result<()> {
        let value = value & width.mask();
        let g = self.geometry();
        let (select, data) = (g.select_register, g.data_register);
        let (enable, disable) = (g.enable_level, g.disable_level());

        if address == select {
            if value == enable {
                self.selected = true;
                self.command.clear();
                self.out_pos = 0;
            } else if value == disable && self.selected {
                self.selected = false;
                let result = self.end_transaction();
                self.command.clear();
                return result;
            }
            return Ok(());
        }
        if address == data {
            if self.selected {
                self.command.push(value as u8);
            }
            return Ok(());
        }
        self.config.registers.insert(address, value);
        Ok(())
    }
}

impl RegisterDevice for DummyBoard {
    fn close(&mut self) -> Result<()> {
        log::debug!("Dummy board closed");
        self.closed = true;
        Ok(())
    }
}

#[cfg(feature = "std")]
mod file;

#[cfg(feature = "std")]
pub use file::FileBackedBoard;
