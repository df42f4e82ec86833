//! Little-endian framing helpers.
//!
//! Writers append to a `Vec<u8>`; readers advance a caller-owned cursor and
//! report the field name on truncation so corrupt streams are diagnosable.

use sgl_error::{Result, SubgridError};

pub fn append_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

pub fn append_u16_le(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn append_i16_le(buf: &mut Vec<u8>, value: i16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn append_u32_le(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn append_i32_le(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn append_u64_le(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn append_i64_le(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn append_f32_le(buf: &mut Vec<u8>, value: f32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Append a count as `i32`, the width the stream formats use for counts.
pub fn append_count_i32(buf: &mut Vec<u8>, count: usize, field: &str) -> Result<()> {
    let value = i32::try_from(count).map_err(|_| SubgridError::out_of_range(field, count))?;
    append_i32_le(buf, value);
    Ok(())
}

pub fn read_array<const N: usize>(
    bytes: &[u8],
    cursor: &mut usize,
    field: &str,
) -> Result<[u8; N]> {
    let end = cursor
        .checked_add(N)
        .ok_or_else(|| SubgridError::format(format!("overflow reading field {field}")))?;
    if end > bytes.len() {
        return Err(SubgridError::format(format!(
            "field {field} out of bounds: need {N} bytes at offset {}, total {}",
            *cursor,
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[*cursor..end]);
    *cursor = end;
    Ok(out)
}

pub fn read_u8(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<u8> {
    let [value] = read_array::<1>(bytes, cursor, field)?;
    Ok(value)
}

pub fn read_u16_le(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array::<2>(bytes, cursor, field)?))
}

pub fn read_i16_le(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<i16> {
    Ok(i16::from_le_bytes(read_array::<2>(bytes, cursor, field)?))
}

pub fn read_u32_le(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array::<4>(bytes, cursor, field)?))
}

pub fn read_i32_le(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array::<4>(bytes, cursor, field)?))
}

pub fn read_u64_le(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array::<8>(bytes, cursor, field)?))
}

pub fn read_i64_le(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<i64> {
    Ok(i64::from_le_bytes(read_array::<8>(bytes, cursor, field)?))
}

pub fn read_f32_le(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<f32> {
    Ok(f32::from_le_bytes(read_array::<4>(bytes, cursor, field)?))
}

/// Read an `i32` count and reject negatives.
pub fn read_count_i32(bytes: &[u8], cursor: &mut usize, field: &str) -> Result<usize> {
    let raw = read_i32_le(bytes, cursor, field)?;
    usize::try_from(raw).map_err(|_| SubgridError::format(format!("negative {field}: {raw}")))
}
