//! Archive segment types

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::error::Result;
use crate::flash::FlashGeometry;
use crate::mirror::BitstreamImage;
use crate::model::ModelDescriptor;

/// Segment magic: `"CFA\0"` read as a little-endian `u32`
pub const CFA_MAGIC: u32 = 0x0041_4643;

/// Size of the fixed segment stub in bytes
pub const STUB_SIZE: usize = 92;

/// Size of the NUL-padded description field
pub const DESCRIPTION_LEN: usize = 64;

/// Modern type id of a Type 1 segment
pub const TYPE1_ID: u32 = 1;

/// Modern type id of a Type 2 segment
pub const TYPE2_ID: u32 = 2;

/// Decoded segment type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Multi-model segment with embedded geometry
    Type1,
    /// Bare model id list
    Type2,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type1 => write!(f, "type 1"),
            Self::Type2 => write!(f, "type 2"),
        }
    }
}

/// Fields shared by every segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentStub {
    /// Free-form description
    pub description: String,
    /// Raw segment type id as stored
    pub type_id: u32,
    /// Archive specification version
    pub specs_version: u32,
    /// Bytes from segment start to the firmware payload
    pub header_size: u32,
    /// Number of models declared in the header
    pub model_count: u32,
    /// Firmware payload size in bytes
    pub fw_size: u32,
    /// Whether this is the last segment of the archive
    pub is_last: bool,
}

/// Segment carrying its own geometry and model predicates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type1Segment {
    /// Common stub
    pub stub: SegmentStub,
    /// Flash geometry shared by all models of the segment
    pub geometry: FlashGeometry,
    /// Models in declaration order
    pub models: Vec<ModelDescriptor>,
    /// Firmware payload in bitstream order
    pub firmware: Vec<u8>,
}

/// Segment listing bare model ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type2Segment {
    /// Common stub
    pub stub: SegmentStub,
    /// Model ids in declaration order
    pub model_ids: Vec<u32>,
    /// Firmware payload in bitstream order
    pub firmware: Vec<u8>,
}

/// One decoded archive segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSegment {
    /// Multi-model segment
    Type1(Type1Segment),
    /// Bare model id segment
    Type2(Type2Segment),
}

fn new_stub(description: &str, type_id: u32, model_count: usize, fw_size: usize) -> SegmentStub {
    SegmentStub {
        description: description.into(),
        type_id,
        specs_version: 1,
        header_size: 0,
        model_count: model_count as u32,
        fw_size: fw_size as u32,
        is_last: false,
    }
}

impl Type1Segment {
    /// Build a segment; the header size is computed by the encoder
    pub fn new(
        description: &str,
        geometry: FlashGeometry,
        models: Vec<ModelDescriptor>,
        firmware: Vec<u8>,
    ) -> Self {
        Self {
            stub: new_stub(description, TYPE1_ID, models.len(), firmware.len()),
            geometry,
            models,
            firmware,
        }
    }
}

impl Type2Segment {
    /// Build a segment; the header size is computed by the encoder
    pub fn new(description: &str, model_ids: Vec<u32>, firmware: Vec<u8>) -> Self {
        Self {
            stub: new_stub(description, TYPE2_ID, model_ids.len(), firmware.len()),
            model_ids,
            firmware,
        }
    }
}

impl ArchiveSegment {
    /// Common stub
    pub fn stub(&self) -> &SegmentStub {
        match self {
            Self::Type1(s) => &s.stub,
            Self::Type2(s) => &s.stub,
        }
    }

    /// Mutable access to the common stub
    pub fn stub_mut(&mut self) -> &mut SegmentStub {
        match self {
            Self::Type1(s) => &mut s.stub,
            Self::Type2(s) => &mut s.stub,
        }
    }

    /// Segment type
    pub fn kind(&self) -> SegmentKind {
        match self {
            Self::Type1(_) => SegmentKind::Type1,
            Self::Type2(_) => SegmentKind::Type2,
        }
    }

    /// Firmware payload in bitstream order
    pub fn firmware(&self) -> &[u8] {
        match self {
            Self::Type1(s) => &s.firmware,
            Self::Type2(s) => &s.firmware,
        }
    }

    /// Model ids in declaration order
    pub fn model_ids(&self) -> Vec<u32> {
        match self {
            Self::Type1(s) => s.models.iter().map(|m| m.model_id).collect(),
            Self::Type2(s) => s.model_ids.clone(),
        }
    }

    /// Take the firmware payload out of the segment
    pub fn into_image(self) -> BitstreamImage {
        match self {
            Self::Type1(s) => BitstreamImage::new(s.firmware),
            Self::Type2(s) => BitstreamImage::new(s.firmware),
        }
    }
}

/// A fully decoded archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    /// Segments in archive order
    pub segments: Vec<ArchiveSegment>,
}

impl Archive {
    /// Take the firmware of one segment, discarding all others
    pub fn into_segment_image(mut self, index: usize) -> Option<BitstreamImage> {
        if index >= self.segments.len() {
            return None;
        }
        Some(self.segments.swap_remove(index).into_image())
    }

    /// One summary line per segment
    pub fn summaries(&self) -> Vec<SegmentSummary> {
        self.segments
            .iter()
            .enumerate()
            .map(|(index, s)| SegmentSummary {
                index,
                kind: s.kind(),
                description: s.stub().description.clone(),
                specs_version: s.stub().specs_version,
                model_ids: s.model_ids(),
                fw_size: s.firmware().len(),
            })
            .collect()
    }

    /// Parse an archive with default options
    pub fn parse(data: &[u8]) -> Result<Self> {
        super::parse_archive(data, &super::ParseOptions::default())
    }
}

/// Printable overview of one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSummary {
    /// Segment index within the archive
    pub index: usize,
    /// Segment type
    pub kind: SegmentKind,
    /// Description
    pub description: String,
    /// Specification version
    pub specs_version: u32,
    /// Declared model ids
    pub model_ids: Vec<u32>,
    /// Firmware size in bytes
    pub fw_size: usize,
}

impl fmt::Display for SegmentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} v{} \"{}\" models {:?}, firmware {} bytes",
            self.index, self.kind, self.specs_version, self.description, self.model_ids, self.fw_size
        )
    }
}
