//! Archive encoder
//!
//! Writes segments back into the binary layout read by the parser. Counts
//! and sizes are taken from the segment contents; a recorded header size
//! larger than the encoded header is kept and zero padded.

use alloc::vec::Vec;

use super::types::*;

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn encode_body(segment: &ArchiveSegment) -> Vec<u8> {
    let mut body = Vec::new();
    match segment {
        ArchiveSegment::Type1(s) => {
            let g = &s.geometry;
            put_u32(&mut body, g.page_bytes() as u32);
            put_u32(&mut body, g.register_width.bits());
            put_u32(&mut body, g.select_register);
            put_u32(&mut body, g.data_register);
            put_u32(&mut body, g.enable_level);
            put_u32(&mut body, g.erase.block_pages);
            put_u32(&mut body, g.erase.block_count);
            put_u32(&mut body, g.license_page);
            put_u32(&mut body, g.slots.len() as u32);
            for &slot in &g.slots {
                put_u32(&mut body, slot);
            }
            for model in &s.models {
                put_u32(&mut body, model.model_id);
                put_u32(&mut body, model.checks.len() as u32);
                for check in &model.checks {
                    put_u32(&mut body, check.address);
                    put_u32(&mut body, check.expected);
                }
            }
        }
        ArchiveSegment::Type2(s) => {
            for &id in &s.model_ids {
                put_u32(&mut body, id);
            }
        }
    }
    body
}

fn model_count(segment: &ArchiveSegment) -> usize {
    match segment {
        ArchiveSegment::Type1(s) => s.models.len(),
        ArchiveSegment::Type2(s) => s.model_ids.len(),
    }
}

/// Encode one segment
pub fn encode_segment(segment: &ArchiveSegment) -> Vec<u8> {
    let stub = segment.stub();
    let body = encode_body(segment);
    let firmware = segment.firmware();
    let header_size = core::cmp::max(stub.header_size as usize, STUB_SIZE + body.len());

    let mut out = Vec::with_capacity(header_size + firmware.len());
    put_u32(&mut out, CFA_MAGIC);

    let mut description = [0u8; DESCRIPTION_LEN];
    let text = stub.description.as_bytes();
    let len = core::cmp::min(text.len(), DESCRIPTION_LEN);
    description[..len].copy_from_slice(&text[..len]);
    out.extend_from_slice(&description);

    put_u32(&mut out, stub.type_id);
    put_u32(&mut out, stub.specs_version);
    put_u32(&mut out, header_size as u32);
    put_u32(&mut out, model_count(segment) as u32);
    put_u32(&mut out, firmware.len() as u32);
    put_u32(&mut out, stub.is_last as u32);

    out.extend_from_slice(&body);
    out.resize(header_size, 0);
    out.extend_from_slice(firmware);
    out
}

/// Encode segments back to back, flagging the final one as last
pub fn encode_archive(segments: &[ArchiveSegment]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        let mut segment = segment.clone();
        segment.stub_mut().is_last = i + 1 == segments.len();
        out.extend(encode_segment(&segment));
    }
    out
}
