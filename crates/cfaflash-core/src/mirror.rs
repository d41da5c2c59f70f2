//! Bit-mirror transform
//!
//! Archives and raw `.rbf` files store bitstreams with bit 0 of every byte
//! first on the wire, while the flash holds the same data with bit 7
//! first. The transform reverses the bit order inside each byte and is its
//! own inverse.

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// Reverse the bit order of every byte in place
pub fn mirror_bits(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        *byte = byte.reverse_bits();
    }
}

/// Firmware bytes in bitstream order, as stored in the archive
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitstreamImage(Vec<u8>);

/// Firmware bytes in flash order, ready to be programmed
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImage(Vec<u8>);

#[cfg(feature = "alloc")]
impl BitstreamImage {
    /// Wrap payload bytes extracted from an archive or raw file
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Length of the image in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the image is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert to flash order. This is the only way to obtain a
    /// [`FlashImage`], so every programmed image is mirrored exactly once.
    pub fn into_flash_order(self) -> FlashImage {
        let mut bytes = self.0;
        mirror_bits(&mut bytes);
        FlashImage(bytes)
    }
}

#[cfg(feature = "alloc")]
impl FlashImage {
    /// Image bytes in flash order
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the image in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the image is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
