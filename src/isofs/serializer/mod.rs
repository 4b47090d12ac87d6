//! ISO-9660 image writer.
//!
//! Serialises the merged view of a filesystem as a complete image:
//! system area, primary (and optional Joliet supplementary) volume
//! descriptor, set terminator, L/M path tables per hierarchy, directory
//! extents and shared file extents. Rock Ridge entries (`SP`, `PX`,
//! `NM`, `TF`) ride in the base hierarchy's system-use areas when
//! enabled.

pub mod primitive;

use std::collections::BTreeMap;
use std::io::{self, Write};

use tracing::debug;

use crate::archive::Stream;
use crate::errors::{Error, Result};
use crate::info::Namespace;
use crate::isofs::names::SlugTable;
use crate::isofs::{IsoOptions, RockRidge};
use crate::mode::OpenMode;
use crate::path::{basename, dirname};
use crate::vfs::{now_epoch, Vfs};

use self::primitive::{both_u16, both_u32, long_time, padded_bytes, padded_str, short_time};

const BLOCK: usize = 2048;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

/// One resource of the source filesystem, with everything the image
/// needs to know about it.
struct Entry {
    path: String,
    name: String,
    /// Basename of the compliance-escaped slug; empty for the root.
    slug: String,
    is_dir: bool,
    size: u64,
    mtime: i64,
    mode: Option<u32>,
    uid: u32,
    gid: u32,
    parent: usize,
    children: Vec<usize>,
}

/// The fully computed image layout.
struct Plan {
    entries: Vec<Entry>,
    /// Directory entry indices in breadth-first order; root first.
    dirs: Vec<usize>,
    dir_number: BTreeMap<usize, u16>,
    base_extent: Vec<u32>,
    base_size: Vec<u32>,
    joliet_extent: Vec<u32>,
    joliet_size: Vec<u32>,
    file_extent: Vec<u32>,
    base_table: (u32, u32),
    joliet_table: (u32, u32),
    base_table_size: u32,
    joliet_table_size: u32,
    total_blocks: u32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Hierarchy {
    Base,
    Joliet,
}

/// Serialises the merged view of `fs` as an ISO-9660 image.
pub(crate) fn write_image(fs: &dyn Vfs, out: &mut dyn Stream, options: &IsoOptions) -> Result<()> {
    let entries = collect(fs, options)?;
    let plan = lay_out(entries, options);
    debug!(blocks = plan.total_blocks, dirs = plan.dirs.len(), "laid out iso image");
    emit(fs, out, &plan, options).map_err(|err| Error::operation_failed_with("/", err))
}

/// Walks the source filesystem and gathers the entry table, slugs
/// assigned along the way.
fn collect(fs: &dyn Vfs, options: &IsoOptions) -> Result<Vec<Entry>> {
    let strict = options.interchange_level < 4;
    let mut slugs = SlugTable::new();
    let mut index_of = BTreeMap::new();
    let mut entries = vec![Entry {
        path: "/".to_string(),
        name: String::new(),
        slug: String::new(),
        is_dir: true,
        size: 0,
        mtime: now_epoch(),
        mode: None,
        uid: 0,
        gid: 0,
        parent: 0,
        children: Vec::new(),
    }];
    index_of.insert("/".to_string(), 0);

    for (path, info) in fs.walk(&[Namespace::Details, Namespace::Access])? {
        let slug_path = slugs.slugify_path(&path, info.is_dir, strict);
        let parent = *index_of
            .get(&dirname(&path))
            .ok_or_else(|| Error::operation_failed(&path))?;
        let index = entries.len();
        entries.push(Entry {
            name: info.name.clone(),
            slug: basename(&slug_path),
            is_dir: info.is_dir,
            size: info.size(),
            mtime: info.modified().unwrap_or_else(now_epoch),
            mode: info.permissions(),
            uid: info.access.as_ref().and_then(|a| a.uid).unwrap_or(0),
            gid: info.access.as_ref().and_then(|a| a.gid).unwrap_or(0),
            parent,
            children: Vec::new(),
            path: path.clone(),
        });
        entries[parent].children.push(index);
        index_of.insert(path, index);
    }

    // records within a directory are stored sorted by identifier
    let order: Vec<Vec<usize>> = entries
        .iter()
        .map(|entry| {
            let mut children = entry.children.clone();
            children.sort_by(|a, b| entries[*a].slug.cmp(&entries[*b].slug));
            children
        })
        .collect();
    for (entry, children) in entries.iter_mut().zip(order) {
        entry.children = children;
    }
    Ok(entries)
}

fn blocks(bytes: u64) -> u32 {
    bytes.div_ceil(BLOCK as u64) as u32
}

fn base_identifier(entry: &Entry) -> Vec<u8> {
    if entry.is_dir {
        entry.slug.as_bytes().to_vec()
    } else {
        format!("{};1", entry.slug).into_bytes()
    }
}

fn joliet_identifier(entry: &Entry) -> Vec<u8> {
    entry
        .name
        .encode_utf16()
        .take(110)
        .flat_map(|unit| unit.to_be_bytes())
        .collect()
}

fn record_length(id_len: usize, susp_len: usize) -> usize {
    33 + id_len + (id_len + 1) % 2 + susp_len
}

/// Bytes a directory's records occupy, honouring the rule that a record
/// never crosses a sector boundary; rounded up to whole blocks.
fn content_size(record_lengths: &[usize]) -> u32 {
    let mut pos = 0usize;
    for length in record_lengths {
        let remaining = BLOCK - pos % BLOCK;
        if *length > remaining {
            pos += remaining;
        }
        pos += length;
    }
    blocks(pos as u64) * BLOCK as u32
}

fn susp_px(entry: &Entry, version: RockRidge) -> Vec<u8> {
    let mode = if entry.is_dir {
        S_IFDIR | entry.mode.unwrap_or(0o755)
    } else {
        S_IFREG | entry.mode.unwrap_or(0o644)
    };
    let links = if entry.is_dir { 2 } else { 1 };
    let length = match version {
        RockRidge::V1_09 => 36u8,
        RockRidge::V1_12 => 44u8,
    };
    let mut buf = vec![b'P', b'X', length, 1];
    for value in [mode, links, entry.uid, entry.gid] {
        let _ = both_u32(&mut buf, value);
    }
    if version == RockRidge::V1_12 {
        let _ = both_u32(&mut buf, 0); // serial number
    }
    buf
}

fn susp_tf(mtime: i64) -> Vec<u8> {
    let mut buf = vec![b'T', b'F', 12, 1, 0x02];
    let _ = short_time(&mut buf, Some(mtime));
    buf
}

fn susp_nm(name: &str, budget: usize) -> Vec<u8> {
    let mut bytes = name.as_bytes();
    if bytes.len() > budget {
        let mut cut = budget;
        while cut > 0 && !name.is_char_boundary(cut) {
            cut -= 1;
        }
        bytes = &bytes[..cut];
    }
    let mut buf = vec![b'N', b'M', (5 + bytes.len()) as u8, 1, 0];
    buf.extend_from_slice(bytes);
    buf
}

const SUSP_SP: [u8; 7] = [b'S', b'P', 7, 1, 0xbe, 0xef, 0];

/// The Rock Ridge entries of one child record: `NM`, `PX`, `TF`,
/// padded to an even length.
fn susp_for(entry: &Entry, version: RockRidge, id_len: usize) -> Vec<u8> {
    let px = susp_px(entry, version);
    let tf = susp_tf(entry.mtime);
    let fixed = 33 + id_len + (id_len + 1) % 2;
    let budget = 255usize.saturating_sub(fixed + px.len() + tf.len() + 5 + 1);
    let mut susp = susp_nm(&entry.name, budget);
    susp.extend_from_slice(&px);
    susp.extend_from_slice(&tf);
    if susp.len() % 2 != 0 {
        susp.push(0);
    }
    susp
}

/// The record lengths of one directory extent: `.`, `..`, children.
fn dir_record_lengths(plan_entries: &[Entry], dir: usize, hierarchy: Hierarchy, options: &IsoOptions) -> Vec<usize> {
    let rock_ridge = options.rock_ridge.filter(|_| hierarchy == Hierarchy::Base);
    let dot_susp = match (dir, rock_ridge) {
        (0, Some(_)) => SUSP_SP.len(),
        _ => 0,
    };
    let mut lengths = vec![record_length(1, dot_susp), record_length(1, 0)];
    for &child in &plan_entries[dir].children {
        let entry = &plan_entries[child];
        let id_len = match hierarchy {
            Hierarchy::Base => base_identifier(entry).len(),
            Hierarchy::Joliet => joliet_identifier(entry).len(),
        };
        let susp_len = match (hierarchy, rock_ridge) {
            (Hierarchy::Base, Some(version)) => susp_for(entry, version, id_len).len(),
            _ => 0,
        };
        lengths.push(record_length(id_len, susp_len));
    }
    lengths
}

/// The serialised size of one hierarchy's path table.
fn path_table_size(entries: &[Entry], dirs: &[usize], hierarchy: Hierarchy) -> u32 {
    let mut size = 0usize;
    for &dir in dirs {
        let id_len = if dir == 0 {
            1
        } else {
            match hierarchy {
                Hierarchy::Base => entries[dir].slug.len(),
                Hierarchy::Joliet => joliet_identifier(&entries[dir]).len(),
            }
        };
        size += 8 + id_len + id_len % 2;
    }
    size as u32
}

/// Assigns every extent in the image.
fn lay_out(entries: Vec<Entry>, options: &IsoOptions) -> Plan {
    // breadth-first directory numbering, root = 1
    let mut dirs = vec![0usize];
    let mut head = 0;
    while head < dirs.len() {
        let dir = dirs[head];
        head += 1;
        dirs.extend(entries[dir].children.iter().copied().filter(|&c| entries[c].is_dir));
    }
    let dir_number: BTreeMap<usize, u16> =
        dirs.iter().enumerate().map(|(i, &d)| (d, (i + 1) as u16)).collect();

    let count = entries.len();
    let mut base_size = vec![0u32; count];
    let mut joliet_size = vec![0u32; count];
    for &dir in &dirs {
        base_size[dir] = content_size(&dir_record_lengths(&entries, dir, Hierarchy::Base, options));
        if options.joliet {
            joliet_size[dir] =
                content_size(&dir_record_lengths(&entries, dir, Hierarchy::Joliet, options));
        }
    }

    let base_table_size = path_table_size(&entries, &dirs, Hierarchy::Base);
    let joliet_table_size = if options.joliet {
        path_table_size(&entries, &dirs, Hierarchy::Joliet)
    } else {
        0
    };

    let mut cursor: u32 = 16;
    cursor += 1; // primary descriptor
    if options.joliet {
        cursor += 1;
    }
    cursor += 1; // set terminator

    let table_blocks = blocks(base_table_size as u64);
    let base_table = (cursor, cursor + table_blocks);
    cursor += table_blocks * 2;
    let joliet_table = if options.joliet {
        let table_blocks = blocks(joliet_table_size as u64);
        let locations = (cursor, cursor + table_blocks);
        cursor += table_blocks * 2;
        locations
    } else {
        (0, 0)
    };

    let mut base_extent = vec![0u32; count];
    let mut joliet_extent = vec![0u32; count];
    for &dir in &dirs {
        base_extent[dir] = cursor;
        cursor += blocks(base_size[dir] as u64);
    }
    if options.joliet {
        for &dir in &dirs {
            joliet_extent[dir] = cursor;
            cursor += blocks(joliet_size[dir] as u64);
        }
    }

    let mut file_extent = vec![0u32; count];
    for (index, entry) in entries.iter().enumerate() {
        if !entry.is_dir {
            file_extent[index] = cursor;
            cursor += blocks(entry.size);
        }
    }

    Plan {
        entries,
        dirs,
        dir_number,
        base_extent,
        base_size,
        joliet_extent,
        joliet_size,
        file_extent,
        base_table,
        joliet_table,
        base_table_size,
        joliet_table_size,
        total_blocks: cursor,
    }
}

/// A write counter so block padding can be computed while streaming.
struct Counted<'a> {
    dest: &'a mut dyn Stream,
    written: u64,
}

impl Counted<'_> {
    fn pad_to_block(&mut self) -> io::Result<()> {
        let partial = (self.written % BLOCK as u64) as usize;
        if partial != 0 {
            self.write_all(&vec![0u8; BLOCK - partial])?;
        }
        Ok(())
    }
}

impl Write for Counted<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.dest.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dest.flush()
    }
}

/// One directory record, fully resolved.
struct RecordSpec<'a> {
    extent: u32,
    data_length: u32,
    mtime: Option<i64>,
    is_dir: bool,
    identifier: &'a [u8],
    system_use: &'a [u8],
}

fn render_record(spec: &RecordSpec<'_>) -> Vec<u8> {
    let length = record_length(spec.identifier.len(), spec.system_use.len());
    let mut buf = Vec::with_capacity(length);
    buf.push(length as u8);
    buf.push(0); // extended attribute record length
    let _ = both_u32(&mut buf, spec.extent);
    let _ = both_u32(&mut buf, spec.data_length);
    let _ = short_time(&mut buf, spec.mtime);
    buf.push(if spec.is_dir { 0x02 } else { 0x00 });
    buf.push(0); // file unit size
    buf.push(0); // interleave gap
    let _ = both_u16(&mut buf, 1); // volume sequence number
    buf.push(spec.identifier.len() as u8);
    buf.extend_from_slice(spec.identifier);
    if spec.identifier.len() % 2 == 0 {
        buf.push(0);
    }
    buf.extend_from_slice(spec.system_use);
    buf
}

/// Renders one directory extent, records padded away from sector
/// boundaries, zero-filled to the directory's data length.
fn render_dir(plan: &Plan, dir: usize, hierarchy: Hierarchy, options: &IsoOptions) -> Vec<u8> {
    let rock_ridge = options.rock_ridge.filter(|_| hierarchy == Hierarchy::Base);
    let (extent, size) = match hierarchy {
        Hierarchy::Base => (&plan.base_extent, &plan.base_size),
        Hierarchy::Joliet => (&plan.joliet_extent, &plan.joliet_size),
    };
    let parent = plan.entries[dir].parent;

    let mut buf: Vec<u8> = Vec::with_capacity(size[dir] as usize);
    let mut push_record = |buf: &mut Vec<u8>, rendered: Vec<u8>| {
        let remaining = BLOCK - buf.len() % BLOCK;
        if rendered.len() > remaining {
            buf.resize(buf.len() + remaining, 0);
        }
        buf.extend_from_slice(&rendered);
    };

    let dot_susp: &[u8] = match (dir, rock_ridge) {
        (0, Some(_)) => &SUSP_SP,
        _ => &[],
    };
    push_record(
        &mut buf,
        render_record(&RecordSpec {
            extent: extent[dir],
            data_length: size[dir],
            mtime: Some(plan.entries[dir].mtime),
            is_dir: true,
            identifier: &[0],
            system_use: dot_susp,
        }),
    );
    push_record(
        &mut buf,
        render_record(&RecordSpec {
            extent: extent[parent],
            data_length: size[parent],
            mtime: Some(plan.entries[parent].mtime),
            is_dir: true,
            identifier: &[1],
            system_use: &[],
        }),
    );

    for &child in &plan.entries[dir].children {
        let entry = &plan.entries[child];
        let identifier = match hierarchy {
            Hierarchy::Base => base_identifier(entry),
            Hierarchy::Joliet => joliet_identifier(entry),
        };
        let system_use = match rock_ridge {
            Some(version) => susp_for(entry, version, identifier.len()),
            None => Vec::new(),
        };
        let (child_extent, child_length) = if entry.is_dir {
            (extent[child], size[child])
        } else {
            (plan.file_extent[child], entry.size as u32)
        };
        push_record(
            &mut buf,
            render_record(&RecordSpec {
                extent: child_extent,
                data_length: child_length,
                mtime: Some(entry.mtime),
                is_dir: entry.is_dir,
                identifier: &identifier,
                system_use: &system_use,
            }),
        );
    }

    buf.resize(size[dir] as usize, 0);
    buf
}

/// Renders one hierarchy's path table in the requested byte order.
fn render_path_table(plan: &Plan, hierarchy: Hierarchy, little: bool) -> Vec<u8> {
    let extent = match hierarchy {
        Hierarchy::Base => &plan.base_extent,
        Hierarchy::Joliet => &plan.joliet_extent,
    };
    let mut buf = Vec::new();
    for &dir in &plan.dirs {
        let identifier: Vec<u8> = if dir == 0 {
            vec![0]
        } else {
            match hierarchy {
                Hierarchy::Base => plan.entries[dir].slug.as_bytes().to_vec(),
                Hierarchy::Joliet => joliet_identifier(&plan.entries[dir]),
            }
        };
        let parent_number = plan.dir_number[&plan.entries[dir].parent];
        buf.push(identifier.len() as u8);
        buf.push(0); // extended attribute record length
        if little {
            buf.extend_from_slice(&extent[dir].to_le_bytes());
            buf.extend_from_slice(&parent_number.to_le_bytes());
        } else {
            buf.extend_from_slice(&extent[dir].to_be_bytes());
            buf.extend_from_slice(&parent_number.to_be_bytes());
        }
        buf.extend_from_slice(&identifier);
        if identifier.len() % 2 != 0 {
            buf.push(0);
        }
    }
    buf
}

/// Writes a primary or supplementary volume descriptor sector.
fn write_volume_descriptor(
    dest: &mut Counted<'_>,
    plan: &Plan,
    hierarchy: Hierarchy,
) -> io::Result<()> {
    let joliet = hierarchy == Hierarchy::Joliet;
    let now = now_epoch();

    dest.write_all(&[if joliet { 2 } else { 1 }])?;
    dest.write_all(b"CD001\x01")?;
    dest.write_all(&[0])?;
    padded_str(dest, "", 32)?; // system identifier
    padded_str(dest, "ISOIMAGE", 32)?;
    dest.write_all(&[0u8; 8])?;
    both_u32(dest, plan.total_blocks)?;
    if joliet {
        // UCS-2 level 3 escape sequence
        padded_bytes(dest, &[0x25, 0x2f, 0x45], 32, 0)?;
    } else {
        dest.write_all(&[0u8; 32])?;
    }
    both_u16(dest, 1)?; // volume set size
    both_u16(dest, 1)?; // volume sequence number
    both_u16(dest, BLOCK as u16)?;
    let (table_size, table) = match hierarchy {
        Hierarchy::Base => (plan.base_table_size, plan.base_table),
        Hierarchy::Joliet => (plan.joliet_table_size, plan.joliet_table),
    };
    both_u32(dest, table_size)?;
    dest.write_all(&table.0.to_le_bytes())?;
    dest.write_all(&0u32.to_le_bytes())?;
    dest.write_all(&table.1.to_be_bytes())?;
    dest.write_all(&0u32.to_be_bytes())?;

    let (extent, size) = match hierarchy {
        Hierarchy::Base => (plan.base_extent[0], plan.base_size[0]),
        Hierarchy::Joliet => (plan.joliet_extent[0], plan.joliet_size[0]),
    };
    let root = render_record(&RecordSpec {
        extent,
        data_length: size,
        mtime: Some(plan.entries[0].mtime),
        is_dir: true,
        identifier: &[0],
        system_use: &[],
    });
    dest.write_all(&root)?;

    padded_str(dest, "", 128)?; // volume set identifier
    padded_str(dest, "", 128)?; // publisher
    padded_str(dest, "", 128)?; // data preparer
    padded_str(dest, "", 128)?; // application
    padded_str(dest, "", 37)?; // copyright file
    padded_str(dest, "", 37)?; // abstract file
    padded_str(dest, "", 37)?; // bibliographic file
    long_time(dest, Some(now))?;
    long_time(dest, Some(now))?;
    long_time(dest, None)?;
    long_time(dest, None)?;
    dest.write_all(&[1, 0])?; // file structure version + unused
    dest.write_all(&[0u8; 512])?; // application use
    dest.write_all(&[0u8; 653])?;
    Ok(())
}

fn emit(fs: &dyn Vfs, out: &mut dyn Stream, plan: &Plan, options: &IsoOptions) -> io::Result<()> {
    let mut dest = Counted { dest: out, written: 0 };

    // system area
    for _ in 0..16 {
        dest.write_all(&[0u8; BLOCK])?;
    }

    write_volume_descriptor(&mut dest, plan, Hierarchy::Base)?;
    if options.joliet {
        write_volume_descriptor(&mut dest, plan, Hierarchy::Joliet)?;
    }
    dest.write_all(&[255])?;
    dest.write_all(b"CD001\x01")?;
    dest.write_all(&vec![0u8; BLOCK - 7])?;

    for little in [true, false] {
        dest.write_all(&render_path_table(plan, Hierarchy::Base, little))?;
        dest.pad_to_block()?;
    }
    if options.joliet {
        for little in [true, false] {
            dest.write_all(&render_path_table(plan, Hierarchy::Joliet, little))?;
            dest.pad_to_block()?;
        }
    }

    for &dir in &plan.dirs {
        dest.write_all(&render_dir(plan, dir, Hierarchy::Base, options))?;
    }
    if options.joliet {
        for &dir in &plan.dirs {
            dest.write_all(&render_dir(plan, dir, Hierarchy::Joliet, options))?;
        }
    }

    for (index, entry) in plan.entries.iter().enumerate() {
        if entry.is_dir || entry.size == 0 {
            continue;
        }
        let mut source = fs
            .openbin(&entry.path, OpenMode::read())
            .map_err(|err| io::Error::other(format!("reading {}: {err}", plan.entries[index].path)))?;
        io::copy(&mut source, &mut dest)?;
        dest.pad_to_block()?;
    }

    dest.flush()
}
