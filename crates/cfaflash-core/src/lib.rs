//! cfaflash-core - Core library for CFA firmware upgrades
//!
//! This crate implements everything needed to take a CFA firmware archive
//! and put it into the page-oriented DataFlash of a register-mapped board:
//!
//! - [`archive`] decodes (and re-encodes) the segmented CFA container
//! - [`mirror`] converts bitstream byte order into flash byte order
//! - [`model`] holds the model catalog and the register-probing matcher
//! - [`flash`] drives the DataFlash through a select and a data register
//! - [`upgrade`] sequences parse, match, erase, program and verify
//!
//! The crate is `no_std` and only needs `alloc` for the archive and
//! upgrade layers. The register transport is injected through the
//! [`transport::RegisterAccess`] trait so any bus can be plugged in.
//!
//! # Features
//!
//! - `std` - Enable standard library support (RON model catalogs, wall clock)
//! - `alloc` - Enable heap allocation (required by every high-level module)
//!
//! # Example
//!
//! ```ignore
//! use cfaflash_core::upgrade::{Upgrader, UpgradeRequest};
//!
//! fn upgrade<D: RegisterDevice>(device: D, archive: Vec<u8>, catalog: &ModelCatalog) {
//!     let request = UpgradeRequest::archive(archive);
//!     match Upgrader::new(device, SystemClock::new()).run(&request, catalog) {
//!         Ok(report) => println!("wrote {} bytes", report.bytes_written),
//!         Err(e) => println!("upgrade failed: {}", e),
//!     }
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

#[cfg(feature = "alloc")]
pub mod archive;
pub mod error;
#[cfg(feature = "alloc")]
pub mod flash;
pub mod mirror;
#[cfg(feature = "alloc")]
pub mod model;
pub mod transport;
#[cfg(feature = "alloc")]
pub mod upgrade;

#[cfg(all(test, feature = "std"))]
pub(crate) mod testutil;

pub use error::{Error, FormatError, Result};
