//! Binary reader for the ISO-9660 on-disk structures: volume
//! descriptors, directory records and the system-use area.

pub mod primitive;
pub mod susp;


use std::fmt;
use std::io::{self, Cursor, Read};

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use self::primitive::{both_u16, both_u32, bytes, padded_str, short_time, skip, u32_be, u32_le, u8 as read_u8};

/// Result of ISO structure parsing with error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Logical sector size; descriptors always live on 2048-byte sectors.
pub const SECTOR_SIZE: u64 = 2048;

/// First volume-descriptor sector.
pub const DESCRIPTOR_START: u64 = 16;

/// ISO structure parsing errors.
#[derive(Debug)]
pub enum Error {
    /// Underlying stream failure.
    IO(io::Error),
    /// The little- and big-endian halves of a numeric field disagree.
    BothEndianMismatch,
    /// The descriptor identifier is not `CD001`.
    BadIdentifier([u8; 5]),
    /// The descriptor version is not 1.
    BadVersion(u8),
    /// A directory record does not fit its enclosing extent.
    TruncatedRecord,
    /// No primary volume descriptor before the set terminator.
    MissingPrimaryDescriptor,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IO(err) => write!(f, "i/o error: {err}"),
            Error::BothEndianMismatch => {
                write!(f, "little- and big-endian field values differ")
            }
            Error::BadIdentifier(id) => write!(f, "unknown descriptor identifier {id:?}"),
            Error::BadVersion(version) => write!(f, "unknown descriptor version {version}"),
            Error::TruncatedRecord => write!(f, "directory record extends past its extent"),
            Error::MissingPrimaryDescriptor => write!(f, "no primary volume descriptor"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}

/// Volume descriptor types, in on-disk order of appearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum DescriptorType {
    BootRecord = 0,
    Primary = 1,
    Supplementary = 2,
    VolumePartition = 3,
    Terminator = 255,
}

/// A parsed volume descriptor.
#[derive(Debug)]
pub enum Descriptor {
    Primary(VolumeDescriptor),
    Supplementary(VolumeDescriptor),
    Boot,
    VolumePartition,
    Terminator,
    Unknown(u8),
}

/// The fields shared by primary and supplementary volume descriptors.
#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    pub system_id: String,
    pub volume_id: String,
    pub volume_space_size: u32,
    pub logical_block_size: u16,
    pub path_table_size: u32,
    pub type_l_path_table: u32,
    pub type_m_path_table: u32,
    pub root: DirectoryRecord,
    /// Set when the escape-sequences field announces a Joliet (UCS-2)
    /// hierarchy: `25 2F 40`, `25 2F 43` or `25 2F 45`.
    pub joliet: bool,
}

/// Flag bits of a directory record.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordFlags {
    pub hidden: bool,
    pub is_dir: bool,
    pub is_associated: bool,
    pub has_extended_info: bool,
    pub has_permissions: bool,
    pub continued: bool,
}

impl RecordFlags {
    fn from_byte(byte: u8) -> RecordFlags {
        RecordFlags {
            hidden: byte & 0x01 != 0,
            is_dir: byte & 0x02 != 0,
            is_associated: byte & 0x04 != 0,
            has_extended_info: byte & 0x08 != 0,
            has_permissions: byte & 0x10 != 0,
            continued: byte & 0x80 != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = 0u8;
        if self.hidden {
            byte |= 0x01;
        }
        if self.is_dir {
            byte |= 0x02;
        }
        if self.is_associated {
            byte |= 0x04;
        }
        if self.has_extended_info {
            byte |= 0x08;
        }
        if self.has_permissions {
            byte |= 0x10;
        }
        if self.continued {
            byte |= 0x80;
        }
        byte
    }
}

/// A variable-length directory record.
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
    pub record_length: u8,
    pub extent_attribute_length: u8,
    pub extent_location: u32,
    pub data_length: u32,
    pub recorded_at: Option<i64>,
    pub flags: RecordFlags,
    pub file_unit_size: u8,
    pub interleave_gap: u8,
    pub sequence_number: u16,
    pub identifier: Vec<u8>,
    pub system_use: Vec<u8>,
}

impl DirectoryRecord {
    /// True for the `.` and `..` records that open every directory.
    pub fn is_dot(&self) -> bool {
        self.identifier == [0] || self.identifier == [1]
    }

    /// The base-hierarchy name: ASCII, lowered, with the `;version`
    /// suffix and trailing dots stripped.
    pub fn iso_name(&self) -> String {
        let raw = String::from_utf8_lossy(&self.identifier).to_lowercase();
        let stem = raw.split(';').next().unwrap_or(&raw);
        stem.trim_end_matches('.').to_string()
    }

    /// The Joliet name: the identifier decoded as UTF-16BE, verbatim.
    pub fn joliet_name(&self) -> String {
        let units: Vec<u16> = self
            .identifier
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    }
}

/// Verifies the `CD001` identifier and version of a descriptor header.
fn check_descriptor_header(src: &mut impl Read) -> Result<()> {
    let id = bytes::<5>(src)?;
    if &id != b"CD001" {
        return Err(Error::BadIdentifier(id));
    }
    let version = read_u8(src)?;
    if version != 1 {
        return Err(Error::BadVersion(version));
    }
    Ok(())
}

/// Parses one 2048-byte volume descriptor sector.
pub fn parse_descriptor(sector: &[u8]) -> Result<Descriptor> {
    let mut src = Cursor::new(sector);
    let type_byte = read_u8(&mut src)?;
    check_descriptor_header(&mut src)?;

    match DescriptorType::from_u8(type_byte) {
        Some(DescriptorType::Primary) => Ok(Descriptor::Primary(parse_volume(&mut src)?)),
        Some(DescriptorType::Supplementary) => {
            Ok(Descriptor::Supplementary(parse_volume(&mut src)?))
        }
        Some(DescriptorType::BootRecord) => Ok(Descriptor::Boot),
        Some(DescriptorType::VolumePartition) => Ok(Descriptor::VolumePartition),
        Some(DescriptorType::Terminator) => Ok(Descriptor::Terminator),
        None => Ok(Descriptor::Unknown(type_byte)),
    }
}

/// Parses the body shared by primary and supplementary descriptors; the
/// cursor sits just past the 7-byte header.
fn parse_volume(src: &mut impl Read) -> Result<VolumeDescriptor> {
    skip(src, 1)?; // unused, always zero
    let system_id = padded_str::<32>(src)?;
    let volume_id = padded_str::<32>(src)?;
    skip(src, 8)?;
    let volume_space_size = both_u32(src)?;
    let escapes = bytes::<32>(src)?;
    let joliet = escapes.starts_with(&[0x25, 0x2f, 0x40])
        || escapes.starts_with(&[0x25, 0x2f, 0x43])
        || escapes.starts_with(&[0x25, 0x2f, 0x45]);
    let _volume_set_size = both_u16(src)?;
    let _sequence_number = both_u16(src)?;
    let logical_block_size = both_u16(src)?;
    let path_table_size = both_u32(src)?;
    let type_l_path_table = u32_le(src)?;
    let _optional_type_l = u32_le(src)?;
    let type_m_path_table = u32_be(src)?;
    let _optional_type_m = u32_be(src)?;
    let root = parse_record(src)?.ok_or(Error::TruncatedRecord)?;

    Ok(VolumeDescriptor {
        system_id,
        volume_id,
        volume_space_size,
        logical_block_size,
        path_table_size,
        type_l_path_table,
        type_m_path_table,
        root,
        joliet,
    })
}

/// Parses one directory record; a zero length byte yields `None`.
pub fn parse_record(src: &mut impl Read) -> Result<Option<DirectoryRecord>> {
    let record_length = read_u8(src)?;
    if record_length == 0 {
        return Ok(None);
    }
    let extent_attribute_length = read_u8(src)?;
    let extent_location = both_u32(src)?;
    let data_length = both_u32(src)?;
    let recorded_at = short_time(src)?;
    let flags = RecordFlags::from_byte(read_u8(src)?);
    let file_unit_size = read_u8(src)?;
    let interleave_gap = read_u8(src)?;
    let sequence_number = both_u16(src)?;
    let identifier_length = read_u8(src)? as usize;

    let mut identifier = vec![0u8; identifier_length];
    src.read_exact(&mut identifier).map_err(|_| Error::TruncatedRecord)?;
    if identifier_length % 2 == 0 {
        skip(src, 1)?; // pad byte keeps the record even
    }

    let fixed = 33 + identifier_length + (identifier_length + 1) % 2;
    let system_use_len = (record_length as usize)
        .checked_sub(fixed)
        .ok_or(Error::TruncatedRecord)?;
    let mut system_use = vec![0u8; system_use_len];
    src.read_exact(&mut system_use).map_err(|_| Error::TruncatedRecord)?;

    Ok(Some(DirectoryRecord {
        record_length,
        extent_attribute_length,
        extent_location,
        data_length,
        recorded_at,
        flags,
        file_unit_size,
        interleave_gap,
        sequence_number,
        identifier,
        system_use,
    }))
}

/// Iterates the records of one directory extent, skipping the zero
/// padding that aligns records to sector boundaries.
pub struct RecordIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordIter<'a> {
    pub fn new(data: &'a [u8]) -> RecordIter<'a> {
        RecordIter { data, pos: 0 }
    }

    fn step(&mut self) -> Result<Option<DirectoryRecord>> {
        loop {
            if self.pos >= self.data.len() {
                return Ok(None);
            }
            if self.data[self.pos] == 0 {
                // records never span sectors; jump to the next boundary
                let sector = SECTOR_SIZE as usize;
                let next = (self.pos / sector + 1) * sector;
                if next >= self.data.len() {
                    return Ok(None);
                }
                self.pos = next;
                continue;
            }
            let length = self.data[self.pos] as usize;
            if self.pos + length > self.data.len() {
                return Err(Error::TruncatedRecord);
            }
            let mut src = Cursor::new(&self.data[self.pos..self.pos + length]);
            let record = parse_record(&mut src)?;
            self.pos += length;
            return Ok(record);
        }
    }
}

impl Iterator for RecordIter<'_> {
    type Item = Result<DirectoryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}
