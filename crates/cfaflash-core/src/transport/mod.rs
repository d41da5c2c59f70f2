//! Register transport abstractions
//!
//! The core never talks to a bus directly. Boards are reached through the
//! [`RegisterAccess`] trait, time through [`Clock`] and user aborts through
//! [`CancelToken`], so everything above this module can be exercised
//! against in-memory mocks.

mod clock;
mod traits;

pub use clock::*;
pub use traits::*;
