//! 7z archive filesystem.
//!
//! The library exposes whole-archive extraction only, so the reader
//! opens once to enumerate members, then re-opens the stream from its
//! initial position on every `openbin` and decompresses exactly the
//! requested entry into memory. Passwords thread through both the
//! enumeration and the per-read re-open.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};

use sevenz_rust::{Password, SevenZArchiveEntry, SevenZMethod, SevenZMethodConfiguration, SevenZReader, SevenZWriter};
use tracing::debug;

use crate::archive::{modification_attempt, ArchiveFs, ArchiveHandle, SaveTarget, Saver, SharedStream, Stream};
use crate::errors::{Error, Result};
use crate::info::{Details, FormatInfo, Info, InfoUpdate, Meta, Namespace, ResourceType, SevenZInfo};
use crate::mode::OpenMode;
use crate::path::{abspath, dirname, validatepath};
use crate::vfs::file::BufferFile;
use crate::vfs::{page_slice, VFile, Vfs};

#[cfg(test)]
mod tests;

const INVALID_PATH_CHARS: &str = "\0\u{1}";

// Windows attribute bits, as the 7z format stores them; the UNIX mode
// rides in the high 16 bits when the extension flag is set.
const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;
const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x20;
const FILE_ATTRIBUTE_UNIX_EXTENSION: u32 = 0x8000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

/// Reader and writer options for 7z archives.
#[derive(Clone, Default)]
pub struct SevenZOptions {
    /// Password for encrypted content, on both the read and write side.
    pub password: Option<String>,
    /// Whether the writer should also encrypt the member list.
    pub encrypt_header: bool,
}

/// Opens a read-write filesystem in a 7z archive.
pub fn open(handle: ArchiveHandle) -> Result<ArchiveFs> {
    open_with(handle, SevenZOptions::default(), None)
}

/// Opens a 7z filesystem with explicit options and an optional scratch
/// store for the overlay.
pub fn open_with(
    handle: ArchiveHandle,
    options: SevenZOptions,
    proxy: Option<Box<dyn Vfs>>,
) -> Result<ArchiveFs> {
    let reader_options = options.clone();
    ArchiveFs::open(
        handle,
        proxy,
        &move |stream| {
            Ok(Box::new(SevenZReadFs::open(stream, reader_options.clone())?) as Box<dyn Vfs>)
        },
        &|target| Box::new(SevenZSaver { target, options: options.clone() }) as Box<dyn Saver>,
    )
}

fn password_of(options: &SevenZOptions) -> Password {
    match &options.password {
        Some(password) => Password::from(password.as_str()),
        None => Password::empty(),
    }
}

fn map_read_error(path: &str, err: sevenz_rust::Error) -> Error {
    match err {
        err @ sevenz_rust::Error::PasswordRequired => Error::permission_denied_with(path, err),
        err => Error::operation_failed_with(path, err),
    }
}

/// Snapshot of one archive member.
struct SevenZMember {
    is_dir: bool,
    size: u64,
    empty_stream: bool,
    compressed_size: u64,
    crc: u64,
    attributes: u32,
}

/// A read-only filesystem within a 7z archive.
pub struct SevenZReadFs {
    stream: SharedStream,
    start: u64,
    length: u64,
    options: SevenZOptions,
    members: BTreeMap<String, SevenZMember>,
    bydir: BTreeMap<String, Vec<String>>,
}

impl SevenZReadFs {
    /// Enumerates the members of the archive behind `stream`.
    pub fn open(stream: SharedStream, options: SevenZOptions) -> Result<SevenZReadFs> {
        let start = stream.position().unwrap_or(0);
        let length = stream
            .len()
            .map_err(|err| Error::create_failed_with("failed to measure 7z stream", err))?
            .saturating_sub(start);

        let mut handle = stream.clone();
        handle
            .seek(SeekFrom::Start(start))
            .map_err(|err| Error::create_failed_with("failed to rewind 7z stream", err))?;
        let reader = SevenZReader::new(handle, length, password_of(&options)).map_err(|err| {
            match err {
                err @ sevenz_rust::Error::PasswordRequired => Error::CreateFailed {
                    msg: "7z archive is password protected".to_string(),
                    cause: Some(Box::new(Error::permission_denied_with("/", err))),
                },
                err => Error::create_failed_with("failed to open 7z archive", err),
            }
        })?;

        let mut members = BTreeMap::new();
        let mut bydir: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in &reader.archive().files {
            let name = entry.name().replace('\\', "/");
            let path = abspath(&name)
                .map_err(|_| Error::create_failed(format!("invalid entry name {name:?}")))?;
            if path == "/" {
                continue;
            }
            members.insert(
                path.clone(),
                SevenZMember {
                    is_dir: entry.is_directory(),
                    size: entry.size(),
                    empty_stream: !entry.has_stream(),
                    compressed_size: entry.compressed_size,
                    crc: entry.crc,
                    attributes: entry.windows_attributes,
                },
            );
            bydir.entry(dirname(&path)).or_default().push(path);
        }

        debug!(members = members.len(), "opened 7z archive");
        Ok(SevenZReadFs { stream, start, length, options, members, bydir })
    }

    fn validate(path: &str) -> Result<String> {
        validatepath(path, INVALID_PATH_CHARS)
    }

    fn info_for(&self, path: &str, namespaces: &[Namespace]) -> Result<Info> {
        if path == "/" {
            return Ok(Info::new("", true));
        }
        let member = self.members.get(path).ok_or_else(|| Error::not_found(path))?;
        let mut info = Info::new(crate::path::basename(path), member.is_dir);
        if namespaces.contains(&Namespace::Details) {
            info.details = Some(Details {
                size: member.size,
                kind: Some(if member.is_dir { ResourceType::Directory } else { ResourceType::File }),
                ..Details::default()
            });
        }
        if namespaces.contains(&Namespace::SevenZ) {
            info.format = Some(FormatInfo::SevenZ(SevenZInfo {
                has_stream: !member.empty_stream,
                is_empty_stream: member.empty_stream,
                compressed_size: member.compressed_size,
                crc: member.crc,
                windows_attributes: member.attributes,
            }));
        }
        Ok(info)
    }

    /// Re-opens the archive and decompresses exactly one member.
    fn extract(&self, path: &str) -> Result<Vec<u8>> {
        let mut handle = self.stream.clone();
        handle
            .seek(SeekFrom::Start(self.start))
            .map_err(|err| Error::operation_failed_with(path, err))?;
        let mut reader = SevenZReader::new(handle, self.length, password_of(&self.options))
            .map_err(|err| map_read_error(path, err))?;

        let wanted = crate::path::relpath(path).to_string();
        let mut data = Vec::new();
        let mut found = false;
        let mut read_failure = None;
        reader
            .for_each_entries(&mut |entry: &sevenz_rust::SevenZArchiveEntry, entry_reader: &mut dyn Read| {
                let name = entry.name().replace('\\', "/");
                if name != wanted {
                    return Ok(true);
                }
                found = true;
                if let Err(err) = entry_reader.read_to_end(&mut data) {
                    read_failure = Some(err);
                }
                Ok(false)
            })
            .map_err(|err| map_read_error(path, err))?;

        if let Some(err) = read_failure {
            return Err(Error::operation_failed_with(path, err));
        }
        if !found {
            return Err(Error::not_found(path));
        }
        Ok(data)
    }
}

impl Vfs for SevenZReadFs {
    fn getinfo(&self, path: &str, namespaces: &[Namespace]) -> Result<Info> {
        let path = Self::validate(path)?;
        self.info_for(&path, namespaces)
    }

    fn listdir(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.scandir(path, &[], None)?.into_iter().map(|info| info.name).collect())
    }

    fn scandir(
        &self,
        path: &str,
        namespaces: &[Namespace],
        page: Option<(usize, usize)>,
    ) -> Result<Vec<Info>> {
        let path = Self::validate(path)?;
        if path != "/" {
            let member = self.members.get(&path).ok_or_else(|| Error::not_found(&path))?;
            if !member.is_dir {
                return Err(Error::directory_expected(path));
            }
        }
        let entries = self
            .bydir
            .get(&path)
            .map(|children| {
                children
                    .iter()
                    .map(|child| self.info_for(child, namespaces))
                    .collect::<Result<Vec<_>>>()
            })
            .unwrap_or_else(|| Ok(Vec::new()))?;
        Ok(page_slice(entries, page))
    }

    fn openbin(&self, path: &str, mode: OpenMode) -> Result<Box<dyn VFile>> {
        let path = Self::validate(path)?;
        if mode.writing() {
            return Err(modification_attempt(&path));
        }
        let member = self.members.get(&path).ok_or_else(|| Error::not_found(&path))?;
        if member.is_dir {
            return Err(Error::file_expected(path));
        }
        if member.empty_stream {
            // empty members bypass the re-open entirely
            return Ok(Box::new(BufferFile::new(Vec::new())));
        }
        Ok(Box::new(BufferFile::new(self.extract(&path)?)))
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

/// A 7z archive serialiser.
struct SevenZSaver {
    target: SaveTarget,
    options: SevenZOptions,
}

impl Saver for SevenZSaver {
    fn save(&mut self, fs: &dyn Vfs) -> Result<()> {
        let options = self.options.clone();
        self.target.save_with(&mut |out| write_sevenz(fs, out, &options))
    }
}

/// Serialises the merged view of `fs` as a 7z archive.
fn write_sevenz(fs: &dyn Vfs, out: &mut dyn Stream, options: &SevenZOptions) -> Result<()> {
    let mut writer = SevenZWriter::new(&mut *out)
        .map_err(|err| Error::operation_failed_with("/", err))?;

    if let Some(password) = &options.password {
        writer.set_content_methods(vec![
            sevenz_rust::AesEncoderOptions::new(Password::from(password.as_str())).into(),
            SevenZMethodConfiguration::new(SevenZMethod::LZMA2),
        ]);
    }

    for (path, info) in fs.walk(&[Namespace::Details, Namespace::Access])? {
        let mut entry = SevenZArchiveEntry::default();
        entry.name = crate::path::relpath(&path).to_string();

        let mut attributes = if info.is_dir {
            FILE_ATTRIBUTE_DIRECTORY | FILE_ATTRIBUTE_UNIX_EXTENSION | (S_IFDIR << 16)
        } else {
            FILE_ATTRIBUTE_ARCHIVE | FILE_ATTRIBUTE_UNIX_EXTENSION | (S_IFREG << 16)
        };
        if let Some(mode) = info.permissions() {
            attributes |= mode << 16;
        }
        entry.has_windows_attributes = true;
        entry.windows_attributes = attributes;

        if info.is_dir || info.size() == 0 {
            entry.is_directory = info.is_dir;
            entry.has_stream = false;
            writer
                .push_archive_entry(entry, None::<&[u8]>)
                .map_err(|err| Error::operation_failed_with(&path, err))?;
        } else {
            entry.is_directory = false;
            entry.has_stream = true;
            let source = fs.openbin(&path, OpenMode::read())?;
            writer
                .push_archive_entry(entry, Some(source))
                .map_err(|err| Error::operation_failed_with(&path, err))?;
        }
    }

    writer.finish().map_err(|err| Error::operation_failed_with("/", err))?;
    Ok(())
}
