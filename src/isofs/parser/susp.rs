//! System-use area parsing: SUSP framing and the Rock Ridge entries.
//!
//! Each entry is a 2-byte signature, a length byte and a version byte,
//! followed by its payload. Parsing is lenient: a malformed entry ends
//! the scan and whatever was gathered so far stands.

use std::io::Cursor;

use super::primitive::{both_u32, short_time};

/// POSIX attributes from a `PX` entry (lengths 36 and 44 are accepted;
/// the longer form carries a serial number).
#[derive(Debug, Clone, Copy)]
pub struct PosixAttributes {
    pub mode: u32,
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
    pub serial: Option<u32>,
}

/// POSIX timestamps from a `TF` entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps {
    pub created: Option<i64>,
    pub modified: Option<i64>,
    pub accessed: Option<i64>,
    pub attributes: Option<i64>,
}

/// Everything the system-use area of one record can tell us.
#[derive(Debug, Clone, Default)]
pub struct SystemUse {
    /// A `SP` entry was present (SUSP in use, Rock Ridge likely).
    pub has_sp: bool,
    pub posix: Option<PosixAttributes>,
    pub timestamps: Timestamps,
    /// The true name from `NM`, already concatenated over continuations.
    pub name: Option<String>,
    /// The symlink target assembled from `SL` component records.
    pub link_target: Option<String>,
    pub device_number: Option<u64>,
    /// Deep-directory relocation markers.
    pub relocated: bool,
    pub child_link: Option<u32>,
    pub parent_link: Option<u32>,
    pub sparse_size: Option<u64>,
}

impl SystemUse {
    /// True when any Rock Ridge entry was seen.
    pub fn has_rock_ridge(&self) -> bool {
        self.posix.is_some()
            || self.name.is_some()
            || self.link_target.is_some()
            || self.timestamps.modified.is_some()
    }
}

/// Parses the system-use area of one directory record.
pub fn parse_system_use(data: &[u8]) -> SystemUse {
    let mut out = SystemUse::default();
    let mut pos = 0;
    let mut link_parts: Vec<String> = Vec::new();

    while pos + 4 <= data.len() {
        let signature = [data[pos], data[pos + 1]];
        let length = data[pos + 2] as usize;
        if length < 4 || pos + length > data.len() {
            break;
        }
        let payload = &data[pos + 4..pos + length];
        match &signature {
            b"SP" => {
                if payload.len() >= 2 && payload[0] == 0xbe && payload[1] == 0xef {
                    out.has_sp = true;
                }
            }
            b"PX" => {
                let mut src = Cursor::new(payload);
                let parsed = (|| -> super::Result<PosixAttributes> {
                    let mode = both_u32(&mut src)?;
                    let links = both_u32(&mut src)?;
                    let uid = both_u32(&mut src)?;
                    let gid = both_u32(&mut src)?;
                    let serial = if length == 44 { Some(both_u32(&mut src)?) } else { None };
                    Ok(PosixAttributes { mode, links, uid, gid, serial })
                })();
                match parsed {
                    Ok(posix) => out.posix = Some(posix),
                    Err(_) => break,
                }
            }
            b"PN" => {
                let mut src = Cursor::new(payload);
                let device = (|| -> super::Result<u64> {
                    let high = both_u32(&mut src)? as u64;
                    let low = both_u32(&mut src)? as u64;
                    Ok(high << 32 | low)
                })();
                match device {
                    Ok(device) => out.device_number = Some(device),
                    Err(_) => break,
                }
            }
            b"SL" => {
                if payload.is_empty() {
                    break;
                }
                // flags byte, then component records
                let mut component = 1;
                while component + 2 <= payload.len() {
                    let flags = payload[component];
                    let content_len = payload[component + 1] as usize;
                    if component + 2 + content_len > payload.len() {
                        break;
                    }
                    let content = &payload[component + 2..component + 2 + content_len];
                    if flags & 0x08 != 0 {
                        link_parts.clear();
                        link_parts.push(String::new()); // root: leading separator
                    } else if flags & 0x04 != 0 {
                        link_parts.push("..".to_string());
                    } else if flags & 0x02 != 0 {
                        link_parts.push(".".to_string());
                    } else {
                        link_parts.push(String::from_utf8_lossy(content).into_owned());
                    }
                    component += 2 + content_len;
                }
                out.link_target = Some(link_parts.join("/"));
            }
            b"NM" => {
                if payload.is_empty() {
                    break;
                }
                let flags = payload[0];
                // flag bits 1 and 2 denote "." and ".."; no name carried
                if flags & 0x06 == 0 {
                    let chunk = String::from_utf8_lossy(&payload[1..]).into_owned();
                    match &mut out.name {
                        Some(name) => name.push_str(&chunk),
                        None => out.name = Some(chunk),
                    }
                }
            }
            b"CL" => {
                let mut src = Cursor::new(payload);
                out.child_link = both_u32(&mut src).ok();
            }
            b"PL" => {
                let mut src = Cursor::new(payload);
                out.parent_link = both_u32(&mut src).ok();
            }
            b"RE" => out.relocated = true,
            b"TF" => {
                if payload.is_empty() {
                    break;
                }
                let flags = payload[0];
                let long_form = flags & 0x80 != 0;
                let mut src = Cursor::new(&payload[1..]);
                let mut next = |wanted: bool| -> Option<i64> {
                    if !wanted {
                        return None;
                    }
                    if long_form {
                        super::primitive::long_time(&mut src).ok().flatten()
                    } else {
                        short_time(&mut src).ok().flatten()
                    }
                };
                out.timestamps.created = next(flags & 0x01 != 0);
                out.timestamps.modified = next(flags & 0x02 != 0);
                out.timestamps.accessed = next(flags & 0x04 != 0);
                out.timestamps.attributes = next(flags & 0x08 != 0);
            }
            b"SF" => {
                let mut src = Cursor::new(payload);
                let size = (|| -> super::Result<u64> {
                    let high = both_u32(&mut src)? as u64;
                    let low = both_u32(&mut src)? as u64;
                    Ok(high << 32 | low)
                })();
                out.sparse_size = size.ok();
            }
            // CE continuation areas and informative entries (ER, ES, ST)
            // are recognised but not followed
            b"CE" | b"ER" | b"ES" | b"ST" | b"RR" => {}
            _ => break,
        }
        pos += length;
    }

    out
}
