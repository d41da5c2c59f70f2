//! Upgrade orchestration and device-level operations
//!
//! [`Upgrader`] runs a complete firmware upgrade; [`FlashSession`] exposes
//! the smaller operations (key, license, security register, firmware
//! release) on a board whose model has been resolved.

mod progress;
mod release;
mod session;
mod upgrader;

pub use progress::{NoProgress, Phase, ProgressSink};
pub use release::{FirmwareRelease, FIRMWARE_RELEASE_REGISTER};
pub use session::{FlashSession, KEY_BYTES};
pub use upgrader::{
    UpgradeMode, UpgradeOutcome, UpgradeReport, UpgradeRequest, UpgradeSource, UpgradeState,
    Upgrader,
};
