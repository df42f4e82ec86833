//! Directory and segment stream framing.
//!
//! Every stream opens with the same 38-byte header:
//! `[magic 8B | major u16 | minor u16 | flags u16 | start i64 | end i64 |
//! last_update i64]`. A directory stream (flag `DIRECTORY`) carries the leaf
//! envelope as `start`/`end`, then the [`SegmentDirectory`] body. A segment
//! stream carries the segment range, then `[pass_count u32]
//! [LatestValueSummary] [body]`, where the body is packed when the
//! `COMPRESSED` flag is set and a [`MutablePassStore`] body otherwise.

use sgl_codec::CompressedPassStore;
use sgl_codec::wire::{
    append_i64_le, append_u16_le, append_u32_le, read_array, read_i64_le, read_u16_le,
    read_u32_le,
};
use sgl_error::{Result, SubgridError};
use sgl_types::{GranuleRef, StreamFlags, Timestamp};

use crate::directory::SegmentDirectory;
use crate::latest::LatestValueSummary;
use crate::mutable::MutablePassStore;
use crate::segment::{Segment, SegmentStore, TimeRange};

pub const LEAF_MAGIC: [u8; 8] = *b"SGLLEAF\0";
pub const FORMAT_MAJOR: u16 = 1;
pub const FORMAT_MINOR: u16 = 0;
pub const STREAM_HEADER_BYTES: usize = 38;

/// Fixed header at the start of every directory and segment stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub flags: StreamFlags,
    pub start: Timestamp,
    pub end: Timestamp,
    pub last_update: Timestamp,
}

impl StreamHeader {
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&LEAF_MAGIC);
        append_u16_le(buf, FORMAT_MAJOR);
        append_u16_le(buf, FORMAT_MINOR);
        append_u16_le(buf, self.flags.bits());
        append_i64_le(buf, self.start.ticks());
        append_i64_le(buf, self.end.ticks());
        append_i64_le(buf, self.last_update.ticks());
    }

    /// Parse and validate magic, version and flags.
    pub fn read_from(bytes: &[u8], cursor: &mut usize) -> Result<Self> {
        let magic = read_array::<8>(bytes, cursor, "magic")?;
        if magic != LEAF_MAGIC {
            return Err(SubgridError::format(format!(
                "bad stream magic {magic:02x?}"
            )));
        }
        let major = read_u16_le(bytes, cursor, "major_version")?;
        let minor = read_u16_le(bytes, cursor, "minor_version")?;
        if major != FORMAT_MAJOR || minor > FORMAT_MINOR {
            return Err(SubgridError::format(format!(
                "unsupported stream version {major}.{minor}, expected {FORMAT_MAJOR}.{FORMAT_MINOR}"
            )));
        }
        let raw_flags = read_u16_le(bytes, cursor, "flags")?;
        let flags = StreamFlags::from_bits(raw_flags)
            .ok_or_else(|| SubgridError::format(format!("unknown stream flags {raw_flags:#06x}")))?;
        Ok(Self {
            flags,
            start: Timestamp::from_ticks(read_i64_le(bytes, cursor, "start")?),
            end: Timestamp::from_ticks(read_i64_le(bytes, cursor, "end")?),
            last_update: Timestamp::from_ticks(read_i64_le(bytes, cursor, "last_update")?),
        })
    }
}

fn ensure_consumed(bytes: &[u8], cursor: usize, stream: &str) -> Result<()> {
    if cursor == bytes.len() {
        Ok(())
    } else {
        Err(SubgridError::format(format!(
            "{} trailing bytes after {stream} stream",
            bytes.len() - cursor
        )))
    }
}

/// Serialize a directory with the leaf envelope `[leaf_start, leaf_end]`.
pub fn encode_directory(
    directory: &SegmentDirectory,
    leaf_start: Timestamp,
    leaf_end: Timestamp,
    last_update: Timestamp,
) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(
        STREAM_HEADER_BYTES + directory.global_latest().encoded_len() + 4,
    );
    StreamHeader {
        flags: StreamFlags::DIRECTORY,
        start: leaf_start,
        end: leaf_end,
        last_update,
    }
    .write_to(&mut buf);
    directory.write_to(&mut buf)?;
    Ok(buf)
}

/// Parse a directory stream read from `location`.
pub fn decode_directory(
    bytes: &[u8],
    location: Option<GranuleRef>,
) -> Result<(StreamHeader, SegmentDirectory)> {
    let mut cursor = 0;
    let header = StreamHeader::read_from(bytes, &mut cursor)?;
    if !header.flags.contains(StreamFlags::DIRECTORY) {
        return Err(SubgridError::format(
            "stream is not a subgrid directory",
        ));
    }
    let directory = SegmentDirectory::read_from(bytes, &mut cursor, location)?;
    ensure_consumed(bytes, cursor, "directory")?;
    Ok((header, directory))
}

/// Serialize a segment in whichever layout its store currently has.
pub fn encode_segment(segment: &Segment, last_update: Timestamp) -> Result<Vec<u8>> {
    let range = segment.range();
    let mut flags = StreamFlags::empty();
    flags.set(StreamFlags::COMPRESSED, segment.store().is_compressed());

    let mut buf = Vec::with_capacity(STREAM_HEADER_BYTES + segment.latest().encoded_len());
    StreamHeader {
        flags,
        start: range.start,
        end: range.end,
        last_update,
    }
    .write_to(&mut buf);
    append_u32_le(&mut buf, segment.pass_count());
    segment.latest().write_to(&mut buf);
    match segment.store() {
        SegmentStore::Compressed(store) => store.write_to(&mut buf)?,
        SegmentStore::Mutable(store) => store.write_to(&mut buf),
    }
    Ok(buf)
}

fn read_segment_prefix(
    bytes: &[u8],
    cursor: &mut usize,
    expected: TimeRange,
) -> Result<(StreamHeader, u32)> {
    let header = StreamHeader::read_from(bytes, cursor)?;
    if header.flags.contains(StreamFlags::DIRECTORY) {
        return Err(SubgridError::format(
            "directory stream where a segment was expected",
        ));
    }
    if header.start != expected.start || header.end != expected.end {
        return Err(SubgridError::format(format!(
            "segment stream covers [{}, {}), directory expects {expected}",
            header.start, header.end
        )));
    }
    let pass_count = read_u32_le(bytes, cursor, "segment_pass_count")?;
    Ok((header, pass_count))
}

/// Parse a segment stream whose directory entry says it covers `expected`.
pub fn decode_segment(
    bytes: &[u8],
    expected: TimeRange,
    location: Option<GranuleRef>,
) -> Result<Segment> {
    let mut cursor = 0;
    let (header, pass_count) = read_segment_prefix(bytes, &mut cursor, expected)?;
    let latest = LatestValueSummary::read_from(bytes, &mut cursor)?;
    let store = if header.flags.contains(StreamFlags::COMPRESSED) {
        SegmentStore::Compressed(CompressedPassStore::read_from(bytes, &mut cursor)?)
    } else {
        SegmentStore::Mutable(MutablePassStore::read_from(bytes, &mut cursor)?)
    };
    ensure_consumed(bytes, cursor, "segment")?;
    if store.pass_count() != pass_count {
        return Err(SubgridError::format(format!(
            "segment header claims {pass_count} passes, body holds {}",
            store.pass_count()
        )));
    }
    Ok(Segment::restored(expected, store, latest, location))
}

/// Read only the latest-value summary of a segment stream.
pub fn decode_segment_latest(bytes: &[u8], expected: TimeRange) -> Result<LatestValueSummary> {
    let mut cursor = 0;
    read_segment_prefix(bytes, &mut cursor, expected)?;
    LatestValueSummary::read_from(bytes, &mut cursor)
}
