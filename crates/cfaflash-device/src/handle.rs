//! DeviceHandle - an opened board behind a trait object

use cfaflash_core::error::Result;
use cfaflash_core::transport::{RegisterAccess, RegisterDevice, RegisterWidth};

/// An opened device
///
/// The handle owns the backend (emulated board, network bridge, ...) and
/// forwards register accesses to it, batched variants included, so
/// backends keep their fast paths.
pub struct DeviceHandle {
    device: Box<dyn RegisterDevice + Send>,
    name: String,
}

impl DeviceHandle {
    pub(crate) fn new(device: Box<dyn RegisterDevice + Send>, name: impl Into<String>) -> Self {
        Self {
            device,
            name: name.into(),
        }
    }

    /// Backend name the handle was opened with
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl RegisterAccess for DeviceHandle {
    fn read_register(&mut self, address: u32, width: RegisterWidth) -> Result<u32> {
        self.device.read_register(address, width)
    }

    fn write_register(&mut self, address: u32, width: RegisterWidth, value: u32) -> Result<()> {
        self.device.write_register(address, width, value)
    }

    fn read_register_repeated(
        &mut self,
        address: u32,
        width: RegisterWidth,
        values: &mut [u32],
    ) -> Result<()> {
        self.device.read_register_repeated(address, width, values)
    }

    fn write_register_repeated(
        &mut self,
        address: u32,
        width: RegisterWidth,
        values: &[u32],
    ) -> Result<()> {
        self.device.write_register_repeated(address, width, values)
    }
}

impl RegisterDevice for DeviceHandle {
    fn close(&mut self) -> Result<()> {
        log::debug!("Closing {} device", self.name);
        self.device.close()
    }
}
