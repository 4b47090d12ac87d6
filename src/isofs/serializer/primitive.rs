//! Primitive ISO-9660 field serialisation utilities.
//!
//! Counterparts of the parser primitives: both-endian numerics are
//! written little-endian first, identifiers are space-padded, and the
//! two timestamp shapes mirror their on-disk encodings.

use std::io::{self, Write};

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

/// Serialises a both-endian `u16` (little-then-big, 4 bytes).
pub fn both_u16(dest: &mut dyn Write, n: u16) -> io::Result<()> {
    dest.write_u16::<LittleEndian>(n)?;
    dest.write_u16::<BigEndian>(n)
}

/// Serialises a both-endian `u32` (little-then-big, 8 bytes).
pub fn both_u32(dest: &mut dyn Write, n: u32) -> io::Result<()> {
    dest.write_u32::<LittleEndian>(n)?;
    dest.write_u32::<BigEndian>(n)
}

/// Serialises a byte field of exactly `len` bytes, truncating or
/// padding with `pad`.
pub fn padded_bytes(dest: &mut dyn Write, data: &[u8], len: usize, pad: u8) -> io::Result<()> {
    let take = data.len().min(len);
    dest.write_all(&data[..take])?;
    for _ in take..len {
        dest.write_u8(pad)?;
    }
    Ok(())
}

/// Serialises a space-padded `strA`/`strD` identifier field.
pub fn padded_str(dest: &mut dyn Write, text: &str, len: usize) -> io::Result<()> {
    padded_bytes(dest, text.as_bytes(), len, b' ')
}

fn calendar(epoch: i64) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp(epoch, 0)
}

/// Serialises the 7-byte short timestamp of directory records; `None`
/// writes the all-zero "not recorded" form.
pub fn short_time(dest: &mut dyn Write, epoch: Option<i64>) -> io::Result<()> {
    use chrono::{Datelike, Timelike};
    match epoch.and_then(calendar) {
        Some(utc) if (1900..=2155).contains(&utc.year()) => {
            dest.write_u8((utc.year() - 1900) as u8)?;
            dest.write_u8(utc.month() as u8)?;
            dest.write_u8(utc.day() as u8)?;
            dest.write_u8(utc.hour() as u8)?;
            dest.write_u8(utc.minute() as u8)?;
            dest.write_u8(utc.second() as u8)?;
            dest.write_i8(0)
        }
        _ => dest.write_all(&[0u8; 7]),
    }
}

/// Serialises the 17-byte long timestamp of volume descriptors; `None`
/// writes the all-`'0'` "not recorded" form.
pub fn long_time(dest: &mut dyn Write, epoch: Option<i64>) -> io::Result<()> {
    use chrono::{Datelike, Timelike};
    match epoch.and_then(calendar) {
        Some(utc) => {
            let digits = format!(
                "{:04}{:02}{:02}{:02}{:02}{:02}{:02}",
                utc.year().clamp(0, 9999),
                utc.month(),
                utc.day(),
                utc.hour(),
                utc.minute(),
                utc.second(),
                0
            );
            dest.write_all(digits.as_bytes())?;
            dest.write_i8(0)
        }
        None => {
            dest.write_all(b"0000000000000000")?;
            dest.write_i8(0)
        }
    }
}
