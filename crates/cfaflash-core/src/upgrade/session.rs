//! Device session: exclusive ownership of one open board
//!
//! A [`FlashSession`] owns the device handle for its whole lifetime and
//! closes it exactly once, either through [`FlashSession::close`] or when
//! dropped. The flash geometry is bound once, after the model has been
//! resolved, and every flash operation goes through it.

use alloc::vec::Vec;

use super::release::FirmwareRelease;
use crate::error::{Error, Result};
use crate::flash::opcodes::Status;
use crate::flash::{DataFlash, FlashGeometry, PollConfig, SECURITY_REGISTER_SIZE};
use crate::model::{match_model, Candidate, MatchOptions};
use crate::transport::{CancelToken, Clock, RegisterDevice, RegisterWidth};

/// Number of key bytes at the start of the license page
pub const KEY_BYTES: usize = 8;

/// Exclusive session on an open board
pub struct FlashSession<D: RegisterDevice, C: Clock> {
    device: D,
    clock: C,
    geometry: Option<FlashGeometry>,
    poll: PollConfig,
    cancel: Option<CancelToken>,
    closed: bool,
}

impl<D: RegisterDevice, C: Clock> FlashSession<D, C> {
    /// Take ownership of an open device
    pub fn new(device: D, clock: C) -> Self {
        Self {
            device,
            clock,
            geometry: None,
            poll: PollConfig::default(),
            cancel: None,
            closed: false,
        }
    }

    /// Use custom status polling parameters
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Abort status polls when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Geometry bound to this session, if any
    pub fn geometry(&self) -> Option<&FlashGeometry> {
        self.geometry.as_ref()
    }

    /// Bind the flash geometry; only allowed once per session
    pub fn select_geometry(&mut self, geometry: FlashGeometry) -> Result<()> {
        if self.geometry.is_some() {
            return Err(Error::GeometryAlreadySelected);
        }
        self.geometry = Some(geometry);
        Ok(())
    }

    /// Match the board against `candidates` and bind the winner's geometry
    pub fn resolve(&mut self, candidates: &[Candidate], options: &MatchOptions) -> Result<Candidate> {
        let selected = match_model(candidates, &mut self.device, options)?.clone();
        self.select_geometry(selected.geometry.clone())?;
        Ok(selected)
    }

    /// Page-level flash driver for the bound geometry
    pub fn flash(&mut self) -> Result<DataFlash<'_, D, C>> {
        let geometry = self.geometry.as_ref().ok_or(Error::GeometryNotSelected)?;
        Ok(DataFlash::new(&mut self.device, &mut self.clock, geometry)
            .with_poll(self.poll)
            .with_cancel(self.cancel.clone()))
    }

    /// Read the DataFlash status register once
    pub fn read_status(&mut self) -> Result<Status> {
        self.flash()?.read_status()
    }

    /// Read the 128-byte security register
    pub fn read_security_register(&mut self) -> Result<[u8; SECURITY_REGISTER_SIZE]> {
        self.flash()?.read_security_register()
    }

    /// Read the key stored in the first bytes of the license page
    pub fn read_key(&mut self) -> Result<u64> {
        let page = self.read_license_page()?;
        let mut key = [0u8; KEY_BYTES];
        key.copy_from_slice(&page[..KEY_BYTES]);
        Ok(u64::from_be_bytes(key))
    }

    /// Store `key` (most significant byte first) in the license page
    pub fn write_key(&mut self, key: u64) -> Result<()> {
        log::info!("Writing key {:016X}", key);
        self.rewrite_license_page(|page| page[..KEY_BYTES].copy_from_slice(&key.to_be_bytes()))
    }

    /// License data following the key in the license page
    pub fn read_license(&mut self) -> Result<Vec<u8>> {
        let mut page = self.read_license_page()?;
        page.drain(..KEY_BYTES);
        Ok(page)
    }

    /// Erase the license data while keeping the key
    pub fn delete_license(&mut self) -> Result<()> {
        log::info!("Deleting license data");
        self.rewrite_license_page(|page| page[KEY_BYTES..].fill(0xFF))
    }

    /// Read and decode the firmware release register
    pub fn read_firmware_release(&mut self, register: u32) -> Result<FirmwareRelease> {
        let value = self.device.read_register(register, RegisterWidth::W32)?;
        Ok(FirmwareRelease::from_register(value))
    }

    fn license_page_index(&self) -> Result<u32> {
        self.geometry
            .as_ref()
            .map(|g| g.license_page)
            .ok_or(Error::GeometryNotSelected)
    }

    fn read_license_page(&mut self) -> Result<Vec<u8>> {
        let page = self.license_page_index()?;
        self.flash()?.read_page_vec(page)
    }

    /// Read-modify-write the license page and check it by reading it back
    fn rewrite_license_page(&mut self, modify: impl FnOnce(&mut [u8])) -> Result<()> {
        let index = self.license_page_index()?;
        let mut flash = self.flash()?;
        let mut page = flash.read_page_vec(index)?;
        modify(&mut page);
        flash.write_page(index, &page)?;
        let readback = flash.read_page_vec(index)?;
        compare_page(index, &page, &readback, 0..page.len())
    }

    /// Close the device; later calls do nothing
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        log::debug!("Closing device");
        self.device.close()
    }

    /// Check whether the device has been closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<D: RegisterDevice, C: Clock> Drop for FlashSession<D, C> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close device: {}", e);
        }
    }
}

/// Compare `actual` against `expected` over `range` of one page
///
/// Reports the first differing byte with its offset inside the page.
pub(crate) fn compare_page(
    page: u32,
    expected: &[u8],
    actual: &[u8],
    range: core::ops::Range<usize>,
) -> Result<()> {
    for offset in range {
        if expected[offset] != actual[offset] {
            log::error!(
                "Verify failed at page {} offset {}: expected 0x{:02X}, read 0x{:02X}",
                page,
                offset,
                expected[offset],
                actual[offset]
            );
            return Err(Error::VerifyMismatch {
                page,
                offset,
                expected: expected[offset],
                actual: actual[offset],
            });
        }
    }
    Ok(())
}
