//! CFA firmware archive
//!
//! A CFA archive is a sequence of self-delimiting segments. Each segment
//! starts with a fixed stub (magic, description, type id, sizes, last
//! flag) followed by a type-specific header and the firmware payload:
//!
//! - **Type 1** segments carry a full flash geometry plus a packed list of
//!   models, each with register predicates identifying it
//! - **Type 2** segments only list bare model ids; predicates and geometry
//!   come from the model catalog
//!
//! All integers are little-endian `u32`.

mod encoder;
mod parser;
mod types;

pub use encoder::{encode_archive, encode_segment};
pub use parser::{parse_archive, ParseOptions, SegmentParser};
pub use types::*;
