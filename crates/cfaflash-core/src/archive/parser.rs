//! Cursor-based archive decoder
//!
//! Model records are packed back to back with no length table, so the
//! decoder walks a bounds-checked cursor over the header instead of
//! indexing it. Nothing is ever reinterpreted in place; every segment is
//! materialized into owned values.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::types::*;
use crate::error::{FormatError, Result};
use crate::flash::{EraseLayout, FlashGeometry, PageSize};
use crate::model::{ModelDescriptor, RegisterCheck};
use crate::transport::RegisterWidth;

/// Default id above which segment type ids use the legacy numbering
pub const DEFAULT_LEGACY_ID_CUTOFF: u32 = 100;

/// Archive decoding options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Raw type ids strictly above this value are legacy ids
    /// (`cutoff + 1` = Type 1, `cutoff + 2` = Type 2)
    pub legacy_id_cutoff: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            legacy_id_cutoff: DEFAULT_LEGACY_ID_CUTOFF,
        }
    }
}

impl ParseOptions {
    /// Map a raw segment type id to a segment kind
    pub fn segment_kind(&self, type_id: u32) -> core::result::Result<SegmentKind, FormatError> {
        let normalized = if type_id > self.legacy_id_cutoff {
            log::debug!("Segment type id {} uses legacy numbering", type_id);
            type_id - self.legacy_id_cutoff
        } else {
            type_id
        };
        match normalized {
            TYPE1_ID => Ok(SegmentKind::Type1),
            TYPE2_ID => Ok(SegmentKind::Type2),
            _ => Err(FormatError::UnknownSegmentType(type_id)),
        }
    }
}

/// Read a little-endian u32 at `pos`; caller guarantees bounds
fn le_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

/// Bounds-checked cursor over a segment header
///
/// Running past the end of the header is reported as
/// [`FormatError::HeaderOverrun`].
struct HeaderCursor<'a> {
    header: &'a [u8],
    pos: usize,
    segment_offset: usize,
}

impl<'a> HeaderCursor<'a> {
    fn new(header: &'a [u8], pos: usize, segment_offset: usize) -> Self {
        Self {
            header,
            pos,
            segment_offset,
        }
    }

    fn u32(&mut self) -> core::result::Result<u32, FormatError> {
        if self.pos + 4 > self.header.len() {
            return Err(FormatError::HeaderOverrun {
                offset: self.segment_offset,
                consumed: self.pos + 4,
                header_size: self.header.len() as u32,
            });
        }
        let value = le_u32(self.header, self.pos);
        self.pos += 4;
        Ok(value)
    }
}

/// Sequential segment decoder
pub struct SegmentParser<'a> {
    data: &'a [u8],
    offset: usize,
    options: ParseOptions,
    finished: bool,
}

impl<'a> SegmentParser<'a> {
    /// Create a parser over a complete archive
    pub fn new(data: &'a [u8], options: ParseOptions) -> Self {
        Self {
            data,
            offset: 0,
            options,
            finished: false,
        }
    }

    /// Byte offset of the next segment
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Decode the next segment
    ///
    /// Returns `Ok(None)` once a segment flagged as last was returned or
    /// the data is exhausted. A bad magic aborts the parse: there is no
    /// resynchronization.
    pub fn parse_next_segment(&mut self) -> Result<Option<(ArchiveSegment, bool)>> {
        if self.finished || self.offset >= self.data.len() {
            return Ok(None);
        }

        let offset = self.offset;
        let rest = &self.data[offset..];

        if rest.len() < 4 {
            return Err(truncated(offset, 4, rest.len()).into());
        }
        let magic = le_u32(rest, 0);
        if magic != CFA_MAGIC {
            log::error!("Bad CFA magic 0x{:08X} at offset 0x{:X}", magic, offset);
            return Err(FormatError::BadMagic {
                offset,
                found: magic,
            }
            .into());
        }
        if rest.len() < STUB_SIZE {
            return Err(truncated(offset, STUB_SIZE, rest.len()).into());
        }

        let stub = decode_stub(rest);
        if (stub.header_size as usize) < STUB_SIZE {
            return Err(FormatError::HeaderTooSmall {
                offset,
                header_size: stub.header_size,
            }
            .into());
        }

        let header_len = stub.header_size as usize;
        let total = header_len + stub.fw_size as usize;
        if rest.len() < total {
            return Err(truncated(offset + STUB_SIZE, total - STUB_SIZE, rest.len() - STUB_SIZE).into());
        }

        let segment = &rest[..total];
        let header = &segment[..header_len];
        let firmware = segment[header_len..].to_vec();

        let kind = self.options.segment_kind(stub.type_id)?;
        log::debug!(
            "Segment at 0x{:X}: {} \"{}\", {} models, {} bytes firmware",
            offset,
            kind,
            stub.description,
            stub.model_count,
            stub.fw_size
        );

        let is_last = stub.is_last;
        let parsed = match kind {
            SegmentKind::Type1 => ArchiveSegment::Type1(decode_type1(header, offset, stub, firmware)?),
            SegmentKind::Type2 => ArchiveSegment::Type2(decode_type2(header, offset, stub, firmware)?),
        };

        self.offset += total;
        if is_last {
            self.finished = true;
        }

        Ok(Some((parsed, is_last)))
    }
}

impl Iterator for SegmentParser<'_> {
    type Item = Result<ArchiveSegment>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.parse_next_segment() {
            Ok(Some((segment, _))) => Some(Ok(segment)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn truncated(offset: usize, needed: usize, available: usize) -> FormatError {
    FormatError::Truncated {
        offset,
        needed,
        available,
    }
}

fn decode_stub(data: &[u8]) -> SegmentStub {
    let desc = &data[4..4 + DESCRIPTION_LEN];
    let end = desc.iter().position(|&b| b == 0).unwrap_or(desc.len());
    let description: String = String::from_utf8_lossy(&desc[..end]).to_string();

    let base = 4 + DESCRIPTION_LEN;
    SegmentStub {
        description,
        type_id: le_u32(data, base),
        specs_version: le_u32(data, base + 4),
        header_size: le_u32(data, base + 8),
        model_count: le_u32(data, base + 12),
        fw_size: le_u32(data, base + 16),
        is_last: le_u32(data, base + 20) != 0,
    }
}

fn decode_type1(
    header: &[u8],
    offset: usize,
    stub: SegmentStub,
    firmware: Vec<u8>,
) -> Result<Type1Segment> {
    let mut cur = HeaderCursor::new(header, STUB_SIZE, offset);

    let page_size = cur.u32()?;
    let register_width = cur.u32()?;
    let select_register = cur.u32()?;
    let data_register = cur.u32()?;
    let enable_level = cur.u32()?;
    let erase_block_pages = cur.u32()?;
    let erase_block_count = cur.u32()?;
    let license_page = cur.u32()?;

    let slot_count = cur.u32()?;
    let mut slots = Vec::new();
    for _ in 0..slot_count {
        slots.push(cur.u32()?);
    }

    let invalid = FormatError::InvalidGeometry { offset };
    let geometry = FlashGeometry {
        page_size: PageSize::from_bytes(page_size).map_err(|_| invalid)?,
        register_width: RegisterWidth::from_bits(register_width).map_err(|_| invalid)?,
        select_register,
        data_register,
        enable_level,
        erase: EraseLayout::new(erase_block_pages, erase_block_count),
        slots,
        license_page,
    };
    if erase_block_pages == 0 || geometry.slots.is_empty() {
        return Err(invalid.into());
    }
    geometry.check_page_range().map_err(|_| invalid)?;

    let mut models = Vec::new();
    for _ in 0..stub.model_count {
        let model_id = cur.u32()?;
        let check_count = cur.u32()?;
        let mut checks = Vec::new();
        for _ in 0..check_count {
            let address = cur.u32()?;
            let expected = cur.u32()?;
            checks.push(RegisterCheck { address, expected });
        }
        log::trace!("Model {} with {} register checks", model_id, checks.len());
        models.push(ModelDescriptor { model_id, checks });
    }

    Ok(Type1Segment {
        stub,
        geometry,
        models,
        firmware,
    })
}

fn decode_type2(
    header: &[u8],
    offset: usize,
    stub: SegmentStub,
    firmware: Vec<u8>,
) -> Result<Type2Segment> {
    let mut cur = HeaderCursor::new(header, STUB_SIZE, offset);
    let mut model_ids = Vec::new();
    for _ in 0..stub.model_count {
        model_ids.push(cur.u32()?);
    }

    Ok(Type2Segment {
        stub,
        model_ids,
        firmware,
    })
}

/// Decode every segment of an archive
///
/// Stops at the first segment flagged as last or at the end of the data.
/// Duplicate model ids across segments are kept; the matcher decides.
pub fn parse_archive(data: &[u8], options: &ParseOptions) -> Result<Archive> {
    let mut parser = SegmentParser::new(data, *options);
    let mut segments = Vec::new();

    while let Some((segment, is_last)) = parser.parse_next_segment()? {
        segments.push(segment);
        if is_last {
            break;
        }
    }

    if segments.is_empty() {
        return Err(FormatError::Empty.into());
    }

    if parser.offset() < data.len() {
        log::warn!(
            "Ignoring {} bytes after the last archive segment",
            data.len() - parser.offset()
        );
    }

    log::info!("Parsed archive with {} segment(s)", segments.len());
    Ok(Archive { segments })
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::archive::encoder::encode_segment;
    use crate::error::Error;
    use crate::testutil;
    use alloc::vec;

    fn type1_segment() -> ArchiveSegment {
        let geometry = testutil::geometry(PageSize::P528, RegisterWidth::W16);
        let models = vec![
            ModelDescriptor {
                model_id: 3,
                checks: vec![
                    RegisterCheck { address: 0xF030, expected: 0x11 },
                    RegisterCheck { address: 0xF034, expected: 0x22 },
                ],
            },
            ModelDescriptor {
                model_id: 4,
                checks: vec![],
            },
            ModelDescriptor {
                model_id: 5,
                checks: vec![RegisterCheck { address: 0xF038, expected: 0xABCD }],
            },
        ];
        ArchiveSegment::Type1(Type1Segment::new(
            "multi model",
            geometry,
            models,
            (0..100u8).collect(),
        ))
    }

    fn type2_segment() -> ArchiveSegment {
        ArchiveSegment::Type2(Type2Segment::new("bare ids", vec![7, 9], vec![0xAA; 40]))
    }

    #[test]
    fn test_parse_type1_packed_models() {
        let bytes = encode_segment(&type1_segment());
        let archive = Archive::parse(&bytes).unwrap();
        let ArchiveSegment::Type1(seg) = &archive.segments[0] else {
            panic!("expected type 1");
        };
        assert_eq!(seg.models.len(), 3);
        assert_eq!(seg.models[0].checks.len(), 2);
        assert!(seg.models[1].checks.is_empty());
        assert_eq!(seg.models[2].model_id, 5);
        assert_eq!(seg.models[2].checks[0].expected, 0xABCD);
        assert_eq!(seg.geometry.page_size, PageSize::P528);
        assert_eq!(seg.geometry.register_width, RegisterWidth::W16);
        assert_eq!(seg.firmware.len(), 100);
        assert_eq!(seg.firmware[99], 99);
    }

    #[test]
    fn test_parse_roundtrip() {
        for original in [type1_segment(), type2_segment()] {
            let bytes = encode_segment(&original);
            let archive = Archive::parse(&bytes).unwrap();
            let reparsed = &archive.segments[0];
            assert_eq!(encode_segment(reparsed), bytes);
            assert_eq!(reparsed.model_ids(), original.model_ids());
            assert_eq!(reparsed.firmware(), original.firmware());
        }
    }

    #[test]
    fn test_stops_at_last_segment() {
        let mut first = type2_segment();
        let mut second = type1_segment();
        first.stub_mut().is_last = false;
        second.stub_mut().is_last = true;
        let mut bytes = encode_segment(&first);
        bytes.extend(encode_segment(&second));
        // Trailing garbage after the last segment is ignored
        bytes.extend_from_slice(b"garbage");

        let archive = Archive::parse(&bytes).unwrap();
        assert_eq!(archive.segments.len(), 2);
        assert_eq!(archive.segments[1].kind(), SegmentKind::Type1);
    }

    #[test]
    fn test_stops_when_exhausted() {
        let mut bytes = encode_segment(&type2_segment());
        bytes.extend(encode_segment(&type2_segment()));
        let archive = Archive::parse(&bytes).unwrap();
        assert_eq!(archive.segments.len(), 2);
    }

    #[test]
    fn test_bad_magic_aborts() {
        let mut bytes = encode_segment(&type2_segment());
        let second_start = bytes.len();
        bytes.extend(encode_segment(&type2_segment()));
        bytes[second_start] = 0x00;

        let err = Archive::parse(&bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::BadMagic { offset, .. }) if offset == second_start
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = encode_segment(&type2_segment());
        let err = Archive::parse(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::Truncated { .. })));
    }

    #[test]
    fn test_truncated_stub() {
        let bytes = encode_segment(&type2_segment());
        let err = Archive::parse(&bytes[..50]).unwrap_err();
        assert_eq!(
            err,
            Error::Format(FormatError::Truncated {
                offset: 0,
                needed: STUB_SIZE,
                available: 50
            })
        );
    }

    #[test]
    fn test_model_count_overruns_header() {
        let mut bytes = encode_segment(&type2_segment());
        // Claim 50 models in a header holding 2
        bytes[80..84].copy_from_slice(&50u32.to_le_bytes());
        let err = Archive::parse(&bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::HeaderOverrun { .. })
        ));
    }

    #[test]
    fn test_legacy_type_ids() {
        let options = ParseOptions::default();
        assert_eq!(options.segment_kind(1), Ok(SegmentKind::Type1));
        assert_eq!(options.segment_kind(2), Ok(SegmentKind::Type2));
        assert_eq!(options.segment_kind(101), Ok(SegmentKind::Type1));
        assert_eq!(options.segment_kind(102), Ok(SegmentKind::Type2));
        assert_eq!(
            options.segment_kind(3),
            Err(FormatError::UnknownSegmentType(3))
        );
        assert_eq!(
            options.segment_kind(100),
            Err(FormatError::UnknownSegmentType(100))
        );

        let mut segment = type2_segment();
        segment.stub_mut().type_id = 102;
        let archive = Archive::parse(&encode_segment(&segment)).unwrap();
        assert_eq!(archive.segments[0].kind(), SegmentKind::Type2);
    }

    #[test]
    fn test_invalid_geometry() {
        let mut bytes = encode_segment(&type1_segment());
        // Page size field follows the stub
        bytes[STUB_SIZE..STUB_SIZE + 4].copy_from_slice(&512u32.to_le_bytes());
        let err = Archive::parse(&bytes).unwrap_err();
        assert_eq!(
            err,
            Error::Format(FormatError::InvalidGeometry { offset: 0 })
        );
    }

    #[test]
    fn test_geometry_past_page_range() {
        let ArchiveSegment::Type1(mut seg) = type1_segment() else {
            unreachable!()
        };
        seg.geometry.erase = EraseLayout::new(0x1_0000, 0x1_0000);
        let err = Archive::parse(&encode_segment(&ArchiveSegment::Type1(seg.clone()))).unwrap_err();
        assert_eq!(
            err,
            Error::Format(FormatError::InvalidGeometry { offset: 0 })
        );

        seg.geometry.erase = EraseLayout::new(8, 4);
        seg.geometry.slots = vec![0, u32::MAX - 8];
        let err = Archive::parse(&encode_segment(&ArchiveSegment::Type1(seg))).unwrap_err();
        assert_eq!(
            err,
            Error::Format(FormatError::InvalidGeometry { offset: 0 })
        );
    }

    #[test]
    fn test_empty_archive() {
        assert_eq!(
            Archive::parse(&[]).unwrap_err(),
            Error::Format(FormatError::Empty)
        );
    }
}
