//! Register transport trait definitions

use crate::error::{Error, Result};

/// Access width of a board register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RegisterWidth {
    /// 16-bit register access
    W16,
    /// 32-bit register access
    #[default]
    W32,
}

impl RegisterWidth {
    /// Parse a width given in bits
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            16 => Ok(Self::W16),
            32 => Ok(Self::W32),
            other => Err(Error::UnsupportedRegisterWidth(other)),
        }
    }

    /// Width in bits
    pub const fn bits(self) -> u32 {
        match self {
            Self::W16 => 16,
            Self::W32 => 32,
        }
    }

    /// Mask of the bits carried by one access
    pub const fn mask(self) -> u32 {
        match self {
            Self::W16 => 0xFFFF,
            Self::W32 => 0xFFFF_FFFF,
        }
    }
}

/// Register read/write transport
///
/// This trait represents a bus connection to a board that exposes
/// memory-mapped registers. Implementations report failures as
/// [`Error::RegisterIo`] with the offending address.
///
/// The batched variants exist purely as a performance hook for transports
/// that can queue many accesses in one round trip. Their default
/// implementations fall back to single accesses, so correctness never
/// depends on them.
pub trait RegisterAccess {
    /// Read one register
    fn read_register(&mut self, address: u32, width: RegisterWidth) -> Result<u32>;

    /// Write one register
    fn write_register(&mut self, address: u32, width: RegisterWidth, value: u32) -> Result<()>;

    /// Read the same register `values.len()` times in a row
    fn read_register_repeated(
        &mut self,
        address: u32,
        width: RegisterWidth,
        values: &mut [u32],
    ) -> Result<()> {
        for value in values.iter_mut() {
            *value = self.read_register(address, width)?;
        }
        Ok(())
    }

    /// Write each value to the same register in order
    fn write_register_repeated(
        &mut self,
        address: u32,
        width: RegisterWidth,
        values: &[u32],
    ) -> Result<()> {
        for &value in values {
            self.write_register(address, width, value)?;
        }
        Ok(())
    }
}

/// An open device handle
///
/// A device is a register transport that owns an underlying connection.
/// `close` releases it; the upgrade session calls it exactly once on every
/// exit path.
pub trait RegisterDevice: RegisterAccess {
    /// Release the underlying connection
    fn close(&mut self) -> Result<()>;
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &mut T {
    fn read_register(&mut self, address: u32, width: RegisterWidth) -> Result<u32> {
        (**self).read_register(address, width)
    }

    fn write_register(&mut self, address: u32, width: RegisterWidth, value: u32) -> Result<()> {
        (**self).write_register(address, width, value)
    }

    fn read_register_repeated(
        &mut self,
        address: u32,
        width: RegisterWidth,
        values: &mut [u32],
    ) -> Result<()> {
        (**self).read_register_repeated(address, width, values)
    }

    fn write_register_repeated(
        &mut self,
        address: u32,
        width: RegisterWidth,
        values: &[u32],
    ) -> Result<()> {
        (**self).write_register_repeated(address, width, values)
    }
}

impl<T: RegisterDevice + ?Sized> RegisterDevice for &mut T {
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

// Blanket impls for boxed devices to allow trait objects
#[cfg(feature = "alloc")]
impl RegisterAccess for alloc::boxed::Box<dyn RegisterDevice + Send> {
    fn read_register(&mut self, address: u32, width: RegisterWidth) -> Result<u32> {
        (**self).read_register(address, width)
    }

    fn write_register(&mut self, address: u32, width: RegisterWidth, value: u32) -> Result<()> {
        (**self).write_register(address, width, value)
    }

    fn read_register_repeated(
        &mut self,
        address: u32,
        width: RegisterWidth,
        values: &mut [u32],
    ) -> Result<()> {
        (**self).read_register_repeated(address, width, values)
    }

    fn write_register_repeated(
        &mut self,
        address: u32,
        width: RegisterWidth,
        values: &[u32],
    ) -> Result<()> {
        (**self).write_register_repeated(address, width, values)
    }
}

#[cfg(feature = "alloc")]
impl RegisterDevice for alloc::boxed::Box<dyn RegisterDevice + Send> {
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
