//! Shared test doubles: a register-mapped DataFlash board and a fake clock

#![allow(dead_code)]

use alloc::vec;
use alloc::vec::Vec;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::flash::{opcodes, EraseLayout, FlashGeometry, PageSize};
use crate::transport::{Clock, RegisterAccess, RegisterDevice, RegisterWidth};

pub const SELECT_REGISTER: u32 = 0x1000;
pub const DATA_REGISTER: u32 = 0x1004;

/// Geometry used by most tests: 8-page blocks, 4 blocks per slot
pub fn geometry(page_size: PageSize, width: RegisterWidth) -> FlashGeometry {
    FlashGeometry {
        page_size,
        register_width: width,
        select_register: SELECT_REGISTER,
        data_register: DATA_REGISTER,
        enable_level: 0,
        erase: EraseLayout::new(8, 4),
        slots: vec![0, 32],
        license_page: 60,
    }
}

/// One chip-select transaction as seen by the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub opcode: u8,
    pub bytes: Vec<u8>,
}

/// A program or erase that reached the flash array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub opcode: u8,
    pub page: u32,
}

/// A mock board with plain registers and a DataFlash behind
/// [`SELECT_REGISTER`]/[`DATA_REGISTER`]
pub struct MockBoard {
    enable_level: u32,
    disable_level: u32,
    page_bytes: usize,
    shift: u32,
    memory: Vec<u8>,
    registers: HashMap<u32, u32>,
    select_level: u32,
    selected: bool,
    current: Vec<u8>,
    read_pos: usize,
    busy_polls: u32,
    busy_remaining: u32,
    fail_after: Option<usize>,
    accesses: usize,
    transactions: Vec<Transaction>,
    commits: Vec<Commit>,
    corrupt: Option<(u32, usize)>,
    fail_close: bool,
    close_count: usize,
}

impl MockBoard {
    pub fn new(geometry: &FlashGeometry, pages: usize) -> Self {
        let page_bytes = geometry.page_bytes();
        Self {
            enable_level: geometry.enable_level,
            disable_level: geometry.disable_level(),
            page_bytes,
            shift: geometry.page_size.address_shift(),
            memory: vec![0xFF; pages * page_bytes],
            registers: HashMap::new(),
            select_level: geometry.disable_level(),
            selected: false,
            current: Vec::new(),
            read_pos: 0,
            busy_polls: 0,
            busy_remaining: 0,
            fail_after: None,
            accesses: 0,
            transactions: Vec::new(),
            commits: Vec::new(),
            corrupt: None,
            fail_close: false,
            close_count: 0,
        }
    }

    pub fn set_register(&mut self, address: u32, value: u32) {
        self.registers.insert(address, value);
    }

    pub fn set_busy_polls(&mut self, polls: u32) {
        self.busy_polls = polls;
    }

    pub fn fail_after(&mut self, accesses: usize) {
        self.fail_after = Some(accesses);
    }

    pub fn fail_close(&mut self) {
        self.fail_close = true;
    }

    /// Flip every bit of one byte whenever `page` is read back
    pub fn corrupt_reads(&mut self, page: u32, offset: usize) {
        self.corrupt = Some((page, offset));
    }

    pub fn fill_page(&mut self, page: u32, value: u8) {
        let start = page as usize * self.page_bytes;
        self.memory[start..start + self.page_bytes].fill(value);
    }

    pub fn page(&self, page: u32) -> &[u8] {
        let start = page as usize * self.page_bytes;
        &self.memory[start..start + self.page_bytes]
    }

    pub fn page_mut(&mut self, page: u32) -> &mut [u8] {
        let start = page as usize * self.page_bytes;
        &mut self.memory[start..start + self.page_bytes]
    }

    pub fn commands(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub fn committed_programs(&self) -> Vec<u32> {
        self.commits
            .iter()
            .filter(|c| c.opcode == opcodes::PAGE_PROGRAM_BUF1)
            .map(|c| c.page)
            .collect()
    }

    pub fn page_reads(&self) -> usize {
        self.transactions
            .iter()
            .filter(|t| t.opcode == opcodes::PAGE_READ)
            .count()
    }

    pub fn select_level(&self) -> u32 {
        self.select_level
    }

    pub fn close_count(&self) -> usize {
        self.close_count
    }

    fn access(&mut self, address: u32, write: bool) -> Result<()> {
        self.accesses += 1;
        match self.fail_after {
            Some(limit) if self.accesses >= limit => Err(Error::RegisterIo { address, write }),
            _ => Ok(()),
        }
    }

    fn page_of(&self) -> u32 {
        let addr = ((self.current[1] as u32) << 16)
            | ((self.current[2] as u32) << 8)
            | self.current[3] as u32;
        addr >> self.shift
    }

    fn end_transaction(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let opcode = self.current[0];
        self.transactions.push(Transaction {
            opcode,
            bytes: self.current.clone(),
        });
        if self.current.len() < 4 {
            return;
        }
        let page = self.page_of();
        let pages = match opcode {
            opcodes::PAGE_PROGRAM_BUF1 => {
                let start = page as usize * self.page_bytes;
                let page_data = &mut self.memory[start..start + self.page_bytes];
                page_data.fill(0xFF);
                for (dst, src) in page_data.iter_mut().zip(&self.current[4..]) {
                    *dst = *src;
                }
                0
            }
            opcodes::PAGE_ERASE => 1,
            opcodes::BLOCK_ERASE => opcodes::BLOCK_PAGES,
            opcodes::SECTOR_ERASE => 32,
            _ => return,
        };
        for p in page..page + pages {
            self.fill_page(p, 0xFF);
        }
        self.commits.push(Commit { opcode, page });
        self.busy_remaining = self.busy_polls;
    }

    fn read_data(&mut self) -> u8 {
        let Some(&opcode) = self.current.first() else {
            return 0xFF;
        };
        match opcode {
            opcodes::STATUS_READ => {
                if self.busy_remaining > 0 {
                    if self.busy_remaining != u32::MAX {
                        self.busy_remaining -= 1;
                    }
                    0x00
                } else {
                    opcodes::Status::READY.bits()
                }
            }
            opcodes::SECURITY_READ => {
                let value = self.read_pos as u8;
                self.read_pos += 1;
                value
            }
            opcodes::PAGE_READ => {
                let page = self.page_of();
                let offset = self.read_pos % self.page_bytes;
                self.read_pos += 1;
                let mut value = self.memory[page as usize * self.page_bytes + offset];
                if self.corrupt == Some((page, offset)) {
                    value ^= 0xFF;
                }
                value
            }
            _ => 0xFF,
        }
    }
}

impl RegisterAccess for MockBoard {
    fn read_register(&mut self, address: u32, width: RegisterWidth) -> Result<u32> {
        self.access(address, false)?;
        if address == DATA_REGISTER && self.selected {
            return Ok(self.read_data() as u32);
        }
        Ok(self.registers.get(&address).copied().unwrap_or(0) & width.mask())
    }

    fn write_register(&mut self, address: u32, width: RegisterWidth, value: u32) -> Result<()> {
        self.access(address, true)?;
        let value = value & width.mask();
        match address {
            SELECT_REGISTER => {
                self.select_level = value;
                if value == self.enable_level {
                    self.selected = true;
                    self.current.clear();
                    self.read_pos = 0;
                } else if value == self.disable_level && self.selected {
                    self.selected = false;
                    self.end_transaction();
                    self.current.clear();
                }
            }
            DATA_REGISTER if self.selected => self.current.push(value as u8),
            _ => {
                self.registers.insert(address, value);
            }
        }
        Ok(())
    }
}

impl RegisterDevice for MockBoard {
    fn close(&mut self) -> Result<()> {
        self.close_count += 1;
        if self.fail_close {
            return Err(Error::DeviceClose);
        }
        Ok(())
    }
}

/// Clock that advances only when delayed
#[derive(Debug, Default)]
pub struct FakeClock {
    now: u64,
    delays: usize,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> usize {
        self.delays
    }
}

impl Clock for FakeClock {
    fn now_us(&self) -> u64 {
        self.now
    }

    fn delay_us(&mut self, us: u32) {
        self.now += us as u64;
        self.delays += 1;
    }
}
