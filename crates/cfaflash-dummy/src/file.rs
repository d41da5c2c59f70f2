//! Emulated board whose flash contents persist in a file

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cfaflash_core::error::{Error, Result};
use cfaflash_core::transport::{RegisterAccess, RegisterDevice, RegisterWidth};

use crate::{DummyBoard, DummyConfig};

/// A [`DummyBoard`] loaded from and saved to an image file
///
/// The file is read when the board is opened (a missing file means an
/// erased flash) and written back when the board is closed.
pub struct FileBackedBoard {
    board: DummyBoard,
    path: PathBuf,
}

impl FileBackedBoard {
    /// Open the board backed by `path`
    pub fn open(config: DummyConfig, path: &Path) -> io::Result<Self> {
        let board = match fs::read(path) {
            Ok(data) => {
                log::info!("Loaded {} bytes of flash from {}", data.len(), path.display());
                DummyBoard::with_data(config, &data)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("{} does not exist, starting with erased flash", path.display());
                DummyBoard::new(config)
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            board,
            path: path.to_path_buf(),
        })
    }

    /// The emulated board
    pub fn board(&self) -> &DummyBoard {
        &self.board
    }
}

impl RegisterAccess for FileBackedBoard {
    fn read_register(&mut self, address: u32, width: RegisterWidth) -> Result<u32> {
        self.board.read_register(address, width)
    }

    fn write_register(&mut self, address: u32, width: RegisterWidth, value: u32) -> Result<()> {
        self.board.write_register(address, width, value)
    }
}

impl RegisterDevice for FileBackedBoard {
    fn close(&mut self) -> Result<()> {
        self.board.close()?;
        fs::write(&self.path, self.board.data()).map_err(|e| {
            log::error!("Failed to save flash to {}: {}", self.path.display(), e);
            Error::DeviceClose
        })?;
        log::debug!("Saved flash to {}", self.path.display());
        Ok(())
    }
}
