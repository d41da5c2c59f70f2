//! Device access for cfaflash
//!
//! This crate turns a device string such as `dummy:model=7` or
//! `tcp:host=10.0.0.2,port=5025` into a [`DeviceHandle`], a boxed register
//! device the upgrade code can own. The CLI never names a backend type
//! directly.
//!
//! # Example
//!
//! ```ignore
//! use cfaflash_device::open_device;
//!
//! let handle = open_device("dummy:model=7", &catalog)?;
//! let report = Upgrader::new(handle, SystemClock::new()).run(&request, &catalog)?;
//! ```

mod error;
mod handle;
mod registry;
#[cfg(feature = "tcp")]
pub mod tcp;

pub use error::DeviceError;
pub use handle::DeviceHandle;
pub use registry::{
    available_devices, device_names_short, open_device, parse_device_params, DeviceInfo,
    DeviceParams,
};
