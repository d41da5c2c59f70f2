//! CLI command implementations
//!
//! Device commands receive an already opened [`cfaflash_device::DeviceHandle`]
//! and take ownership of it. Every device command closes it exactly once
//! before returning, whatever the outcome: through the upgrade
//! orchestrator, the flash session, or directly when the command fails
//! before handing the device on (unreadable input, unusable listen
//! address).
//!
//! Offline commands (`inspect`, `list-models`, `list-devices`) never open
//! a device.

mod device;
mod inspect;
mod list;
#[cfg(feature = "tcp")]
mod serve;
mod upgrade;

pub use device::{cmd_fwrelease, cmd_keyinfo, cmd_license, cmd_setkey};
pub use inspect::cmd_inspect;
pub use list::{list_devices, list_models};
#[cfg(feature = "tcp")]
pub use serve::cmd_serve;
pub use upgrade::{cmd_upgrade, UpgradeArgs};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the command layer itself
#[derive(Debug, Error)]
pub enum CommandError {
    /// Input file could not be read
    #[error("Failed to read {path}: {source}")]
    ReadInput {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Command needs a device but none was given
    #[error("This command needs a device (--device <name>)")]
    NoDevice,
}

/// Read a whole input file
pub(crate) fn read_input(path: &Path) -> Result<Vec<u8>, CommandError> {
    std::fs::read(path).map_err(|source| CommandError::ReadInput {
        path: path.to_path_buf(),
        source,
    })
}

/// Format a byte slice as rows of 16 hex bytes
pub(crate) fn hex_dump(data: &[u8]) -> Vec<String> {
    data.chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
            format!("{:04X}: {}", row * 16, bytes.join(" "))
        })
        .collect()
}
