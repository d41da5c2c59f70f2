//! DataFlash register driver
//!
//! Every command is a chip-select transaction: the select register is set
//! to the enable level, the opcode and address bytes are written to the
//! data register one byte per access, payload bytes are shifted in or out
//! through the same register, and the select register is returned to the
//! disable level.
//!
//! Program and erase commands are followed by a status poll. The poll is
//! bounded by a timeout measured on the injected [`Clock`] and honours an
//! optional [`CancelToken`].

use alloc::vec;
use alloc::vec::Vec;

use super::geometry::{EraseOp, FlashGeometry};
use super::opcodes::{self, Status};
use crate::error::{Error, Result};
use crate::transport::{CancelToken, Clock, RegisterAccess};

/// Size of the DataFlash security register in bytes
pub const SECURITY_REGISTER_SIZE: usize = 128;

/// Status polling parameters
///
/// # Typical busy times (AT45DB datasheets)
/// * Page program with built-in erase: 17-35ms
/// * Page erase: 12-35ms
/// * Block erase: 45-100ms
/// * Sector erase: 1.6-5s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between status reads in microseconds
    pub interval_us: u32,
    /// Maximum wait after a page program
    pub program_timeout_us: u64,
    /// Maximum wait after an erase command
    pub erase_timeout_us: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_us: 100,
            program_timeout_us: 100_000,
            erase_timeout_us: 6_000_000,
        }
    }
}

/// Page-level access to a DataFlash behind a select and a data register
pub struct DataFlash<'a, R: RegisterAccess + ?Sized, C: Clock + ?Sized> {
    regs: &'a mut R,
    clock: &'a mut C,
    geometry: &'a FlashGeometry,
    poll: PollConfig,
    cancel: Option<CancelToken>,
}

impl<'a, R: RegisterAccess + ?Sized, C: Clock + ?Sized> DataFlash<'a, R, C> {
    /// Create a driver for the given geometry
    pub fn new(regs: &'a mut R, clock: &'a mut C, geometry: &'a FlashGeometry) -> Self {
        Self {
            regs,
            clock,
            geometry,
            poll: PollConfig::default(),
            cancel: None,
        }
    }

    /// Use custom polling parameters
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Abort status polls when the token is cancelled
    pub fn with_cancel(mut self, cancel: Option<CancelToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Geometry this driver operates on
    pub fn geometry(&self) -> &FlashGeometry {
        self.geometry
    }

    /// Page size in bytes
    pub fn page_bytes(&self) -> usize {
        self.geometry.page_bytes()
    }

    fn select(&mut self) -> Result<()> {
        let g = self.geometry;
        self.regs
            .write_register(g.select_register, g.register_width, g.enable_level)
    }

    fn deselect(&mut self) -> Result<()> {
        let g = self.geometry;
        self.regs
            .write_register(g.select_register, g.register_width, g.disable_level())
    }

    /// Run `f` with the chip selected
    ///
    /// The chip is deselected on every path. If `f` fails, the deselect is
    /// best effort and the original error is returned.
    fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.select()?;
        match f(self) {
            Ok(value) => {
                self.deselect()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(deselect_err) = self.deselect() {
                    log::debug!("Deselect after failed transaction also failed: {}", deselect_err);
                }
                Err(e)
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let g = self.geometry;
        let words: Vec<u32> = bytes.iter().map(|&b| b as u32).collect();
        self.regs
            .write_register_repeated(g.data_register, g.register_width, &words)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<()> {
        let g = self.geometry;
        let mut words = vec![0u32; buf.len()];
        self.regs
            .read_register_repeated(g.data_register, g.register_width, &mut words)?;
        for (byte, word) in buf.iter_mut().zip(words) {
            *byte = word as u8;
        }
        Ok(())
    }

    fn command_header(&self, opcode: u8, page: u32) -> [u8; 4] {
        let addr = self.geometry.page_address(page);
        [opcode, (addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
    }

    fn check_len(&self, len: usize) -> Result<()> {
        let expected = self.page_bytes();
        if len != expected {
            return Err(Error::BufferSize {
                expected,
                actual: len,
            });
        }
        Ok(())
    }

    /// Read one page into `buf`, which must be exactly one page long
    pub fn read_page(&mut self, page: u32, buf: &mut [u8]) -> Result<()> {
        self.check_len(buf.len())?;
        log::trace!("Reading page {}", page);
        let header = self.command_header(opcodes::PAGE_READ, page);
        self.transaction(|this| {
            this.send(&header)?;
            this.send(&[0u8; opcodes::PAGE_READ_DUMMY_BYTES])?;
            this.receive(buf)
        })
    }

    /// Read one page into a new buffer
    pub fn read_page_vec(&mut self, page: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.page_bytes()];
        self.read_page(page, &mut buf)?;
        Ok(buf)
    }

    /// Program one page and wait until the chip is ready again
    ///
    /// `data` must be exactly one page long. The program command erases
    /// the page internally, so every byte of the page is replaced.
    pub fn write_page(&mut self, page: u32, data: &[u8]) -> Result<()> {
        self.check_len(data.len())?;
        log::trace!("Programming page {}", page);
        let header = self.command_header(opcodes::PAGE_PROGRAM_BUF1, page);
        self.transaction(|this| {
            this.send(&header)?;
            this.send(data)
        })?;
        let timeout = self.poll.program_timeout_us;
        self.wait_ready(page, timeout)
    }

    /// Issue one erase command and wait until the chip is ready again
    pub fn erase(&mut self, op: EraseOp) -> Result<()> {
        log::trace!("Erasing {:?} at page {}", op.unit, op.page);
        let header = self.command_header(op.unit.opcode(), op.page);
        self.transaction(|this| this.send(&header))?;
        let timeout = self.poll.erase_timeout_us;
        self.wait_ready(op.page, timeout)
    }

    /// Read the 128-byte security register (factory unique id + user area)
    pub fn read_security_register(&mut self) -> Result<[u8; SECURITY_REGISTER_SIZE]> {
        let mut buf = [0u8; SECURITY_REGISTER_SIZE];
        self.transaction(|this| {
            this.send(&[opcodes::SECURITY_READ])?;
            this.send(&[0u8; opcodes::SECURITY_READ_DUMMY_BYTES])?;
            this.receive(&mut buf)
        })?;
        Ok(buf)
    }

    /// Read the status register once
    pub fn read_status(&mut self) -> Result<Status> {
        let mut buf = [0u8; 1];
        self.transaction(|this| {
            this.send(&[opcodes::STATUS_READ])?;
            this.receive(&mut buf)
        })?;
        Ok(Status::from_bits_retain(buf[0]))
    }

    /// Wait for the READY bit
    ///
    /// Polls the status register continuously inside one transaction
    /// until READY is set, the timeout expires or the cancel token fires.
    /// `page` is only used to give the timeout error some context.
    pub fn wait_ready(&mut self, page: u32, timeout_us: u64) -> Result<()> {
        let start = self.clock.now_us();
        self.transaction(|this| {
            this.send(&[opcodes::STATUS_READ])?;
            let mut status = [0u8; 1];
            loop {
                if this.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                    log::warn!("Status poll for page {} cancelled", page);
                    return Err(Error::Cancelled);
                }

                this.receive(&mut status)?;
                if Status::from_bits_retain(status[0]).contains(Status::READY) {
                    return Ok(());
                }

                let waited_us = this.clock.now_us().saturating_sub(start);
                if waited_us >= timeout_us {
                    log::error!(
                        "Flash still busy after {} us (page {}, status 0x{:02X})",
                        waited_us,
                        page,
                        status[0]
                    );
                    return Err(Error::DeviceTimeout { page, waited_us });
                }

                let interval = this.poll.interval_us;
                this.clock.delay_us(interval);
            }
        })
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::flash::{EraseLayout, EraseUnit, PageSize};
    use crate::testutil::{geometry, FakeClock, MockBoard};
    use crate::transport::RegisterWidth;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_write_then_read_all_geometries() {
        for page_size in [PageSize::P264, PageSize::P528, PageSize::P1056] {
            for width in [RegisterWidth::W16, RegisterWidth::W32] {
                let g = geometry(page_size, width);
                let mut board = MockBoard::new(&g, 64);
                let mut clock = FakeClock::new();
                let mut flash = DataFlash::new(&mut board, &mut clock, &g);

                let data = pattern(g.page_bytes(), 7);
                flash.write_page(5, &data).unwrap();
                let back = flash.read_page_vec(5).unwrap();
                assert_eq!(back, data, "page size {:?}, width {:?}", page_size, width);
            }
        }
    }

    #[test]
    fn test_read_page_command_bytes() {
        let g = geometry(PageSize::P528, RegisterWidth::W32);
        let mut board = MockBoard::new(&g, 64);
        let mut clock = FakeClock::new();
        DataFlash::new(&mut board, &mut clock, &g)
            .read_page_vec(3)
            .unwrap();

        // 3 << 10 = 0x000C00
        let cmd = &board.commands()[0];
        assert_eq!(cmd.opcode, opcodes::PAGE_READ);
        assert_eq!(&cmd.bytes[..8], &[0xD2, 0x00, 0x0C, 0x00, 0, 0, 0, 0]);
        assert_eq!(board.select_level(), g.disable_level());
    }

    #[test]
    fn test_wrong_buffer_size_rejected() {
        let g = geometry(PageSize::P264, RegisterWidth::W32);
        let mut board = MockBoard::new(&g, 8);
        let mut clock = FakeClock::new();
        let mut flash = DataFlash::new(&mut board, &mut clock, &g);
        let err = flash.write_page(0, &[0u8; 256]).unwrap_err();
        assert_eq!(
            err,
            Error::BufferSize {
                expected: 264,
                actual: 256
            }
        );
    }

    #[test]
    fn test_busy_poll_times_out() {
        let g = geometry(PageSize::P264, RegisterWidth::W32);
        let mut board = MockBoard::new(&g, 8);
        board.set_busy_polls(u32::MAX);
        let mut clock = FakeClock::new();
        let poll = PollConfig {
            interval_us: 1_000,
            program_timeout_us: 10_000,
            erase_timeout_us: 10_000,
        };
        let mut flash = DataFlash::new(&mut board, &mut clock, &g).with_poll(poll);
        let err = flash.write_page(2, &vec![0u8; 264]).unwrap_err();
        assert_eq!(
            err,
            Error::DeviceTimeout {
                page: 2,
                waited_us: 10_000
            }
        );
        assert_eq!(board.select_level(), g.disable_level());
    }

    #[test]
    fn test_busy_poll_recovers() {
        let g = geometry(PageSize::P264, RegisterWidth::W32);
        let mut board = MockBoard::new(&g, 8);
        board.set_busy_polls(5);
        let mut clock = FakeClock::new();
        let mut flash = DataFlash::new(&mut board, &mut clock, &g);
        flash.write_page(1, &vec![0x11; 264]).unwrap();
        assert_eq!(clock.delays(), 5);
    }

    #[test]
    fn test_cancel_aborts_poll() {
        let g = geometry(PageSize::P264, RegisterWidth::W32);
        let mut board = MockBoard::new(&g, 8);
        board.set_busy_polls(u32::MAX);
        let mut clock = FakeClock::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut flash = DataFlash::new(&mut board, &mut clock, &g).with_cancel(Some(cancel));
        let err = flash.write_page(0, &vec![0u8; 264]).unwrap_err();
        assert_eq!(err, Error::Cancelled);
    }

    #[test]
    fn test_register_failure_aborts_page() {
        let g = geometry(PageSize::P264, RegisterWidth::W32);
        let mut board = MockBoard::new(&g, 8);
        board.fail_after(10);
        let mut clock = FakeClock::new();
        let mut flash = DataFlash::new(&mut board, &mut clock, &g);
        let err = flash.write_page(0, &vec![0u8; 264]).unwrap_err();
        assert!(matches!(err, Error::RegisterIo { .. }));
        // Nothing was committed to the page
        assert!(board.committed_programs().is_empty());
    }

    #[test]
    fn test_erase_block_resets_pages() {
        let g = geometry(PageSize::P264, RegisterWidth::W16);
        let mut board = MockBoard::new(&g, 32);
        let mut clock = FakeClock::new();
        let mut flash = DataFlash::new(&mut board, &mut clock, &g);
        flash.write_page(9, &vec![0x00; 264]).unwrap();
        let plan = EraseLayout::new(8, 1).plan(8).unwrap();
        assert_eq!(plan[0].unit, EraseUnit::Block);
        flash.erase(plan[0]).unwrap();
        assert!(flash.read_page_vec(9).unwrap().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_security_register() {
        let g = geometry(PageSize::P1056, RegisterWidth::W32);
        let mut board = MockBoard::new(&g, 8);
        let mut clock = FakeClock::new();
        let sr = DataFlash::new(&mut board, &mut clock, &g)
            .read_security_register()
            .unwrap();
        assert_eq!(sr[0], 0);
        assert_eq!(sr[127], 127);
    }
}
