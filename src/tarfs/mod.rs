//! TAR archive filesystem.
//!
//! The reader loads the complete member table on open, keeping each
//! member's data offset so file bodies can be served as windows over the
//! backing stream. Compressed containers (gzip, bzip2 or xz, detected by
//! magic bytes) are inflated into a shared buffer first. Directories
//! that only exist as the prefix of a member name are implied.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;

use crate::archive::{modification_attempt, ArchiveFs, ArchiveHandle, SaveTarget, Saver, SharedStream, Stream};
use crate::errors::{Error, Result};
use crate::info::{Access, Details, FormatInfo, Info, InfoUpdate, Meta, Namespace, ResourceType, TarInfo};
use crate::mode::OpenMode;
use crate::path::{abspath, frombase, isbase, iteratepath, join, splitext, validatepath};
use crate::vfs::file::{BufferFile, WindowFile};
use crate::vfs::{now_epoch, page_slice, VFile, Vfs};

#[cfg(test)]
mod tests;

const INVALID_PATH_CHARS: &str = "\0\u{1}";

/// Compression applied around the TAR container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TarCompression {
    #[default]
    None,
    Gz,
    Bz2,
    Xz,
}

impl TarCompression {
    /// Maps an output filename extension to a compression, the way the
    /// writer infers it: `.gz`/`.tgz`, `.bz2`/`.tbz`, `.xz`/`.txz`.
    fn from_extension(ext: &str) -> TarCompression {
        match ext {
            ".gz" | ".tgz" => TarCompression::Gz,
            ".bz2" | ".tbz" => TarCompression::Bz2,
            ".xz" | ".txz" => TarCompression::Xz,
            _ => TarCompression::None,
        }
    }

    /// Detects the compression from the container's magic bytes.
    fn detect(magic: &[u8]) -> TarCompression {
        if magic.starts_with(&[0x1f, 0x8b]) {
            TarCompression::Gz
        } else if magic.starts_with(b"BZh") {
            TarCompression::Bz2
        } else if magic.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            TarCompression::Xz
        } else {
            TarCompression::None
        }
    }
}

/// Writer options for TAR archives.
#[derive(Clone)]
pub struct TarOptions {
    /// Compression to apply; `None` infers it from the output filename.
    pub compression: Option<TarCompression>,
    /// Copy buffer size for streaming entry bodies.
    pub buffer_size: usize,
}

impl Default for TarOptions {
    fn default() -> TarOptions {
        TarOptions { compression: None, buffer_size: 8192 }
    }
}

/// Opens a read-write filesystem in a TAR archive.
pub fn open(handle: ArchiveHandle) -> Result<ArchiveFs> {
    open_with(handle, TarOptions::default(), None)
}

/// Opens a TAR filesystem with explicit writer options and an optional
/// scratch store for the overlay.
pub fn open_with(
    handle: ArchiveHandle,
    options: TarOptions,
    proxy: Option<Box<dyn Vfs>>,
) -> Result<ArchiveFs> {
    ArchiveFs::open(
        handle,
        proxy,
        &|stream| Ok(Box::new(TarReadFs::open(stream)?) as Box<dyn Vfs>),
        &|target| Box::new(TarSaver { target, options: options.clone() }) as Box<dyn Saver>,
    )
}

/// Where member bodies are read from.
enum TarSource {
    /// Uncompressed container: windows over the shared stream.
    Stream { stream: SharedStream, start: u64 },
    /// Compressed container, inflated whole at open.
    Buffer(Arc<Vec<u8>>),
}

/// One row of the member table.
struct TarMember {
    entry_type: EntryType,
    size: u64,
    offset: u64,
    mtime: u64,
    mode: u32,
    uid: u64,
    gid: u64,
    uname: Option<String>,
    gname: Option<String>,
    linkname: Option<String>,
}

impl TarMember {
    fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    fn is_file(&self) -> bool {
        matches!(self.entry_type, EntryType::Regular | EntryType::Continuous)
    }

    fn kind(&self) -> ResourceType {
        match self.entry_type {
            EntryType::Regular | EntryType::Continuous => ResourceType::File,
            EntryType::Directory => ResourceType::Directory,
            EntryType::Symlink | EntryType::Link => ResourceType::Symlink,
            EntryType::Block => ResourceType::BlockDevice,
            EntryType::Char => ResourceType::CharacterDevice,
            EntryType::Fifo => ResourceType::Fifo,
            _ => ResourceType::Unknown,
        }
    }
}

/// A read-only filesystem within a TAR archive.
pub struct TarReadFs {
    source: TarSource,
    members: BTreeMap<String, TarMember>,
}

impl TarReadFs {
    /// Scans the member table of the archive behind `stream`.
    pub fn open(stream: SharedStream) -> Result<TarReadFs> {
        let start = stream.position().unwrap_or(0);
        let mut magic = [0u8; 6];
        let read = stream
            .read_at(start, &mut magic)
            .map_err(|err| Error::create_failed_with("failed to read tar magic", err))?;

        let source = match TarCompression::detect(&magic[..read]) {
            TarCompression::None => TarSource::Stream { stream, start },
            compression => {
                let mut raw = stream.clone();
                raw.seek(SeekFrom::Start(start))
                    .map_err(|err| Error::create_failed_with("failed to rewind tar stream", err))?;
                let mut inflated = Vec::new();
                let mut decoder: Box<dyn Read> = match compression {
                    TarCompression::Gz => Box::new(flate2::read::MultiGzDecoder::new(raw)),
                    TarCompression::Bz2 => Box::new(bzip2::read::BzDecoder::new(raw)),
                    TarCompression::Xz => Box::new(xz2::read::XzDecoder::new(raw)),
                    TarCompression::None => unreachable!(),
                };
                decoder.read_to_end(&mut inflated).map_err(|err| {
                    Error::create_failed_with("failed to decompress tar container", err)
                })?;
                TarSource::Buffer(Arc::new(inflated))
            }
        };

        let members = match &source {
            TarSource::Stream { stream, start } => {
                let mut raw = stream.clone();
                raw.seek(SeekFrom::Start(*start))
                    .map_err(|err| Error::create_failed_with("failed to rewind tar stream", err))?;
                Self::scan(Archive::new(raw))?
            }
            TarSource::Buffer(buffer) => {
                Self::scan(Archive::new(io::Cursor::new(buffer.as_slice())))?
            }
        };

        debug!(members = members.len(), "opened tar archive");
        Ok(TarReadFs { source, members })
    }

    fn scan<R: Read>(mut archive: Archive<R>) -> Result<BTreeMap<String, TarMember>> {
        let mut members = BTreeMap::new();
        let entries = archive
            .entries()
            .map_err(|err| Error::create_failed_with("failed to iterate tar members", err))?;
        for entry in entries {
            let entry =
                entry.map_err(|err| Error::create_failed_with("failed to read tar member", err))?;
            let entry_type = entry.header().entry_type();
            match entry_type {
                EntryType::Regular
                | EntryType::Continuous
                | EntryType::Directory
                | EntryType::Symlink
                | EntryType::Link
                | EntryType::Block
                | EntryType::Char
                | EntryType::Fifo => {}
                _ => continue,
            }
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let path = abspath(name.trim_end_matches('/'))
                .map_err(|_| Error::create_failed(format!("invalid member name {name:?}")))?;
            if path == "/" {
                continue;
            }
            let header = entry.header();
            let linkname = entry
                .link_name_bytes()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
            members.insert(
                path,
                TarMember {
                    entry_type,
                    size: entry.size(),
                    offset: entry.raw_file_position(),
                    mtime: header.mtime().unwrap_or(0),
                    mode: header.mode().unwrap_or(0),
                    uid: header.uid().unwrap_or(0),
                    gid: header.gid().unwrap_or(0),
                    uname: header.username().ok().flatten().map(str::to_string),
                    gname: header.groupname().ok().flatten().map(str::to_string),
                    linkname,
                },
            );
        }
        Ok(members)
    }

    fn validate(path: &str) -> Result<String> {
        validatepath(path, INVALID_PATH_CHARS)
    }

    /// True iff `path` is a member directory or implied by one below it.
    fn dir_like(&self, path: &str) -> bool {
        if path == "/" {
            return true;
        }
        match self.members.get(path) {
            Some(member) => member.is_dir(),
            None => self.members.keys().any(|member| isbase(path, member) && member != path),
        }
    }

    fn contains(&self, path: &str) -> bool {
        path == "/"
            || self.members.contains_key(path)
            || self.members.keys().any(|member| isbase(path, member))
    }

    fn info_for(&self, path: &str, namespaces: &[Namespace]) -> Result<Info> {
        let name = crate::path::basename(path);
        match self.members.get(path) {
            Some(member) => {
                let mut info = Info::new(name, member.is_dir());
                if namespaces.contains(&Namespace::Details) {
                    info.details = Some(Details {
                        size: member.size,
                        kind: Some(member.kind()),
                        modified: Some(member.mtime as i64),
                        accessed: None,
                        created: None,
                    });
                }
                if namespaces.contains(&Namespace::Access) {
                    info.access = Some(Access {
                        permissions: Some(member.mode),
                        uid: Some(member.uid as u32),
                        gid: Some(member.gid as u32),
                        user: member.uname.clone(),
                        group: member.gname.clone(),
                    });
                }
                if namespaces.contains(&Namespace::Tar) {
                    info.format = Some(FormatInfo::Tar(TarInfo {
                        name: crate::path::relpath(path).to_string(),
                        size: member.size,
                        mtime: member.mtime,
                        mode: member.mode,
                        uid: member.uid,
                        gid: member.gid,
                        uname: member.uname.clone(),
                        gname: member.gname.clone(),
                        linkname: member.linkname.clone(),
                        is_file: member.is_file(),
                        is_dir: member.is_dir(),
                        is_symlink: member.kind() == ResourceType::Symlink,
                        is_block: member.kind() == ResourceType::BlockDevice,
                        is_character: member.kind() == ResourceType::CharacterDevice,
                        is_fifo: member.kind() == ResourceType::Fifo,
                    }));
                }
                Ok(info)
            }
            None if self.dir_like(path) => {
                // implied directory: size 0, no modification time
                let mut info = Info::new(name, true);
                if namespaces.contains(&Namespace::Details) {
                    info.details = Some(Details {
                        size: 0,
                        kind: Some(ResourceType::Directory),
                        ..Details::default()
                    });
                }
                Ok(info)
            }
            None => Err(Error::not_found(path)),
        }
    }
}

impl Vfs for TarReadFs {
    fn getinfo(&self, path: &str, namespaces: &[Namespace]) -> Result<Info> {
        let path = Self::validate(path)?;
        self.info_for(&path, namespaces)
    }

    fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let path = Self::validate(path)?;
        if !self.contains(&path) {
            return Err(Error::not_found(path));
        }
        if !self.dir_like(&path) {
            return Err(Error::directory_expected(path));
        }
        let mut seen = std::collections::BTreeSet::new();
        let mut names = Vec::new();
        for member in self.members.keys() {
            if isbase(&path, member) && member != &path {
                let rest = frombase(&path, member);
                if let Some(first) = iteratepath(&rest).into_iter().next() {
                    if seen.insert(first.clone()) {
                        names.push(first);
                    }
                }
            }
        }
        Ok(names)
    }

    fn scandir(
        &self,
        path: &str,
        namespaces: &[Namespace],
        page: Option<(usize, usize)>,
    ) -> Result<Vec<Info>> {
        let names = self.listdir(path)?;
        let path = Self::validate(path)?;
        let entries = names
            .into_iter()
            .map(|name| self.info_for(&join(&path, &name), namespaces))
            .collect::<Result<Vec<_>>>()?;
        Ok(page_slice(entries, page))
    }

    fn openbin(&self, path: &str, mode: OpenMode) -> Result<Box<dyn VFile>> {
        let path = Self::validate(path)?;
        if mode.writing() {
            return Err(modification_attempt(&path));
        }
        let member = match self.members.get(&path) {
            Some(member) if member.is_file() => member,
            Some(_) => return Err(Error::file_expected(path)),
            None if self.dir_like(&path) => return Err(Error::file_expected(path)),
            None => return Err(Error::not_found(path)),
        };
        match &self.source {
            TarSource::Stream { stream, start } => Ok(Box::new(WindowFile::new(
                stream.clone(),
                start + member.offset,
                member.size,
            ))),
            TarSource::Buffer(buffer) => Ok(Box::new(BufferFile::slice(
                Arc::clone(buffer),
                member.offset as usize,
                (member.offset + member.size) as usize,
            ))),
        }
    }

    fn makedir(&self, path: &str, _permissions: Option<u32>, _recreate: bool) -> Result<()> {
        Err(modification_attempt(path))
    }

    fn remove(&self, path: &str) -> Result<()> {
        Err(modification_attempt(path))
    }

    fn removedir(&self, path: &str) -> Result<()> {
        Err(modification_attempt(path))
    }

    fn setinfo(&self, path: &str, _update: &InfoUpdate) -> Result<()> {
        Err(modification_attempt(path))
    }

    fn getmeta(&self) -> Meta {
        Meta {
            case_insensitive: false,
            unicode_paths: true,
            read_only: true,
            supports_rename: false,
            max_path_length: None,
            invalid_path_chars: INVALID_PATH_CHARS,
            thread_safe: true,
            virtual_fs: false,
            network: false,
        }
    }
}

/// A TAR archive serialiser.
struct TarSaver {
    target: SaveTarget,
    options: TarOptions,
}

impl Saver for TarSaver {
    fn save(&mut self, fs: &dyn Vfs) -> Result<()> {
        let compression = self.options.compression.unwrap_or_else(|| {
            // infer from the destination filename when bound to a path
            self.target
                .path()
                .and_then(|p| p.to_str())
                .map(|p| TarCompression::from_extension(&splitext(p).1))
                .unwrap_or_default()
        });
        let buffer_size = self.options.buffer_size;
        self.target.save_with(&mut |out| write_tar(fs, out, compression, buffer_size))
    }
}

/// Serialises the merged view of `fs` as a (possibly compressed) TAR
/// archive.
fn write_tar(
    fs: &dyn Vfs,
    out: &mut dyn Stream,
    compression: TarCompression,
    buffer_size: usize,
) -> Result<()> {
    match compression {
        TarCompression::None => {
            let mut builder = Builder::new(&mut *out);
            append_all(&mut builder, fs, buffer_size)?;
            builder.finish().map_err(|err| Error::operation_failed_with("/", err))
        }
        TarCompression::Gz => {
            let encoder = flate2::write::GzEncoder::new(&mut *out, flate2::Compression::default());
            let mut builder = Builder::new(encoder);
            append_all(&mut builder, fs, buffer_size)?;
            let encoder =
                builder.into_inner().map_err(|err| Error::operation_failed_with("/", err))?;
            encoder.finish().map_err(|err| Error::operation_failed_with("/", err))?;
            Ok(())
        }
        TarCompression::Bz2 => {
            let encoder = bzip2::write::BzEncoder::new(&mut *out, bzip2::Compression::default());
            let mut builder = Builder::new(encoder);
            append_all(&mut builder, fs, buffer_size)?;
            let encoder =
                builder.into_inner().map_err(|err| Error::operation_failed_with("/", err))?;
            encoder.finish().map_err(|err| Error::operation_failed_with("/", err))?;
            Ok(())
        }
        TarCompression::Xz => {
            let encoder = xz2::write::XzEncoder::new(&mut *out, 6);
            let mut builder = Builder::new(encoder);
            append_all(&mut builder, fs, buffer_size)?;
            let encoder =
                builder.into_inner().map_err(|err| Error::operation_failed_with("/", err))?;
            encoder.finish().map_err(|err| Error::operation_failed_with("/", err))?;
            Ok(())
        }
    }
}

fn append_all<W: Write>(builder: &mut Builder<W>, fs: &dyn Vfs, buffer_size: usize) -> Result<()> {
    let namespaces = [Namespace::Details, Namespace::Access];
    for (path, info) in fs.walk(&namespaces)? {
        let mut header = Header::new_ustar();
        let mtime = info.modified().unwrap_or_else(now_epoch).max(0) as u64;
        header.set_mtime(mtime);

        let default_mode = if info.is_dir { 0o755 } else { 0o420 };
        header.set_mode(info.permissions().unwrap_or(default_mode));
        if let Some(access) = &info.access {
            if let Some(uid) = access.uid {
                header.set_uid(uid as u64);
            }
            if let Some(gid) = access.gid {
                header.set_gid(gid as u64);
            }
            if let Some(user) = &access.user {
                header
                    .set_username(user)
                    .map_err(|err| Error::operation_failed_with(&path, err))?;
            }
            if let Some(group) = &access.group {
                header
                    .set_groupname(group)
                    .map_err(|err| Error::operation_failed_with(&path, err))?;
            }
        }

        let rel = crate::path::relpath(&path).to_string();
        if info.is_dir {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, &rel, io::empty())
                .map_err(|err| Error::operation_failed_with(&path, err))?;
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_size(info.size());
            let source = io::BufReader::with_capacity(
                buffer_size.max(512),
                fs.openbin(&path, OpenMode::read())?,
            );
            builder
                .append_data(&mut header, &rel, source)
                .map_err(|err| Error::operation_failed_with(&path, err))?;
        }
    }
    Ok(())
}
