//! Primitive ISO-9660 field parsing utilities.
//!
//! All multi-byte numerics in volume descriptors and directory records
//! occur as *both-endian* pairs, little-endian first; the parser
//! cross-checks both halves and fails when they disagree.

use std::io::Read;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use super::{Error, Result};

/// Parses a both-endian `u16` (little-then-big, 4 bytes).
pub fn both_u16(src: &mut impl Read) -> Result<u16> {
    let little = src.read_u16::<LittleEndian>()?;
    let big = src.read_u16::<BigEndian>()?;
    if little != big {
        return Err(Error::BothEndianMismatch);
    }
    Ok(little)
}

/// Parses a both-endian `u32` (little-then-big, 8 bytes).
pub fn both_u32(src: &mut impl Read) -> Result<u32> {
    let little = src.read_u32::<LittleEndian>()?;
    let big = src.read_u32::<BigEndian>()?;
    if little != big {
        return Err(Error::BothEndianMismatch);
    }
    Ok(little)
}

/// Parses a `u8`.
pub fn u8(src: &mut impl Read) -> Result<u8> {
    Ok(src.read_u8()?)
}

/// Parses a little-endian `u32` (path-table locations are single-endian).
pub fn u32_le(src: &mut impl Read) -> Result<u32> {
    Ok(src.read_u32::<LittleEndian>()?)
}

/// Parses a big-endian `u32`.
pub fn u32_be(src: &mut impl Read) -> Result<u32> {
    Ok(src.read_u32::<BigEndian>()?)
}

/// Parses a fixed-size byte array.
pub fn bytes<const N: usize>(src: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    src.read_exact(&mut buf)?;
    Ok(buf)
}

/// Reads and discards `n` bytes.
pub fn skip(src: &mut impl Read, n: usize) -> Result<()> {
    let mut remaining = n;
    let mut buf = [0u8; 64];
    while remaining > 0 {
        let take = remaining.min(buf.len());
        src.read_exact(&mut buf[..take])?;
        remaining -= take;
    }
    Ok(())
}

/// Parses a space-padded `strA`/`strD` identifier field.
pub fn padded_str<const N: usize>(src: &mut impl Read) -> Result<String> {
    let raw = bytes::<N>(src)?;
    let text = String::from_utf8_lossy(&raw);
    Ok(text.trim_end_matches([' ', '\0']).to_string())
}

/// Converts a calendar tuple with a quarter-hour GMT offset into epoch
/// seconds.
fn to_epoch(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    gmt_offset: i8,
) -> Option<i64> {
    let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
    let time = date.and_hms_opt(hour, minute, second)?;
    Some(time.and_utc().timestamp() - gmt_offset as i64 * 15 * 60)
}

/// Parses the 7-byte short timestamp of directory records. A zero month
/// means "not recorded".
pub fn short_time(src: &mut impl Read) -> Result<Option<i64>> {
    let raw = bytes::<6>(src)?;
    let gmt_offset = src.read_i8()?;
    if raw[1] == 0 {
        return Ok(None);
    }
    Ok(to_epoch(
        raw[0] as i32 + 1900,
        raw[1] as u32,
        raw[2] as u32,
        raw[3] as u32,
        raw[4] as u32,
        raw[5] as u32,
        gmt_offset,
    ))
}

/// Parses the 17-byte long timestamp of volume descriptors (ASCII
/// digits). A zero year means "not recorded".
pub fn long_time(src: &mut impl Read) -> Result<Option<i64>> {
    let digits = bytes::<16>(src)?;
    let gmt_offset = src.read_i8()?;

    let field = |from: usize, to: usize| -> Option<i64> {
        std::str::from_utf8(&digits[from..to]).ok()?.parse().ok()
    };
    let year = field(0, 4).unwrap_or(0);
    if year == 0 {
        return Ok(None);
    }
    let (month, day) = (field(4, 6).unwrap_or(0), field(6, 8).unwrap_or(0));
    let (hour, minute) = (field(8, 10).unwrap_or(0), field(10, 12).unwrap_or(0));
    let second = field(12, 14).unwrap_or(0);
    Ok(to_epoch(
        year as i32,
        month as u32,
        day as u32,
        hour as u32,
        minute as u32,
        second as u32,
        gmt_offset,
    ))
}
