//! ZIP archive filesystem.
//!
//! The reader snapshots the central directory on open: an ordered name
//! list, a per-entry metadata record, and the set of directories implied
//! by entry prefixes (ZIP does not require explicit directory entries).
//! The writer walks the source filesystem breadth-first and streams file
//! bodies through the configured compression, with Zip64 extensions
//! enabled unconditionally.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::Mutex;

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::archive::{modification_attempt, ArchiveFs, ArchiveHandle, SaveTarget, Saver, SharedStream, Stream};
use crate::errors::{Error, Result};
use crate::info::{Details, FormatInfo, Info, InfoUpdate, Meta, Namespace, ResourceType, ZipInfo};
use crate::mode::OpenMode;
use crate::path::{abspath, frombase, isbase, iteratepath, join, recursepath, relpath, validatepath};
use crate::vfs::file::BufferFile;
use crate::vfs::{now_epoch, page_slice, VFile, Vfs};


const INVALID_PATH_CHARS: &str = "\0\u{1}";

/// Writer options for ZIP archives.
#[derive(Clone)]
pub struct ZipOptions {
    /// Compression method for file bodies.
    pub compression: CompressionMethod,
    /// Copy buffer size for streaming entry bodies.
    pub buffer_size: usize,
}

impl Default for ZipOptions {
    fn default() -> ZipOptions {
        ZipOptions { compression: CompressionMethod::Deflated, buffer_size: 8192 }
    }
}

/// Opens a read-write filesystem in a ZIP archive.
pub fn open(handle: ArchiveHandle) -> Result<ArchiveFs> {
    open_with(handle, ZipOptions::default(), None)
}

/// Opens a ZIP filesystem with explicit writer options and an optional
/// scratch store for the overlay.
pub fn open_with(
    handle: ArchiveHandle,
    options: ZipOptions,
    proxy: Option<Box<dyn Vfs>>,
) -> Result<ArchiveFs> {
    ArchiveFs::open(
        handle,
        proxy,
        &|stream| Ok(Box::new(ZipReadFs::open(stream)?) as Box<dyn Vfs>),
        &|target| Box::new(ZipSaver { target, options: options.clone() }) as Box<dyn Saver>,
    )
}

/// Snapshot of one central-directory entry.
struct ZipEntry {
    index: usize,
    is_dir: bool,
    size: u64,
    compressed_size: u64,
    crc32: u32,
    compression: String,
    date_time: Option<(u16, u8, u8, u8, u8, u8)>,
    unix_mode: Option<u32>,
}

/// A read-only filesystem within a ZIP archive.
pub struct ZipReadFs {
    archive: Mutex<ZipArchive<SharedStream>>,
    entries: BTreeMap<String, ZipEntry>,
    namelist: Vec<String>,
    directories: BTreeSet<String>,
}

impl ZipReadFs {
    /// Parses the central directory of the archive behind `stream`.
    pub fn open(stream: SharedStream) -> Result<ZipReadFs> {
        let mut archive = ZipArchive::new(stream)
            .map_err(|err| Error::create_failed_with("failed to open zip archive", err))?;

        let mut entries = BTreeMap::new();
        let mut namelist = Vec::with_capacity(archive.len());
        let mut directories = BTreeSet::new();
        directories.insert("/".to_string());

        for index in 0..archive.len() {
            let file = archive
                .by_index_raw(index)
                .map_err(|err| Error::create_failed_with("failed to read zip entry", err))?;
            let raw_name = file.name().to_string();
            let is_dir = raw_name.ends_with('/');
            let path = abspath(raw_name.trim_end_matches('/'))
                .map_err(|_| Error::create_failed(format!("invalid entry name {raw_name:?}")))?;
            if path == "/" {
                continue;
            }
            let date_time = file
                .last_modified()
                .map(|dt| (dt.year(), dt.month(), dt.day(), dt.hour(), dt.minute(), dt.second()));
            entries.insert(
                path.clone(),
                ZipEntry {
                    index,
                    is_dir,
                    size: file.size(),
                    compressed_size: file.compressed_size(),
                    crc32: file.crc32(),
                    compression: format!("{:?}", file.compression()),
                    date_time,
                    unix_mode: file.unix_mode(),
                },
            );
            // every prefix of an entry is an implied directory
            for prefix in recursepath(&path) {
                if prefix != path {
                    directories.insert(prefix);
                }
            }
            if is_dir {
                directories.insert(path.clone());
            }
            namelist.push(path);
        }

        debug!(entries = namelist.len(), "opened zip archive");
        Ok(ZipReadFs { archive: Mutex::new(archive), entries, namelist, directories })
    }

    fn validate(path: &str) -> Result<String> {
        validatepath(path, INVALID_PATH_CHARS)
    }

    fn info_for(&self, path: &str, namespaces: &[Namespace]) -> Result<Info> {
        if !self.contains(path) {
            return Err(Error::not_found(path));
        }
        let is_dir = self.directories.contains(path);
        let mut info = Info::new(crate::path::basename(path), is_dir);

        match self.entries.get(path) {
            Some(entry) => {
                if namespaces.contains(&Namespace::Details) {
                    info.details = Some(Details {
                        size: entry.size,
                        kind: Some(if entry.is_dir {
                            ResourceType::Directory
                        } else {
                            ResourceType::File
                        }),
                        modified: entry.date_time.and_then(dos_to_epoch),
                        accessed: None,
                        created: None,
                    });
                }
                if namespaces.contains(&Namespace::Zip) {
                    info.format = Some(FormatInfo::Zip(ZipInfo {
                        compression: entry.compression.clone(),
                        crc32: entry.crc32,
                        compressed_size: entry.compressed_size,
                        file_size: entry.size,
                        date_time: entry.date_time,
                        unix_mode: entry.unix_mode,
                    }));
                }
            }
            None if namespaces.contains(&Namespace::Details) => {
                // implied directory
                info.details = Some(Details {
                    size: 0,
                    kind: Some(ResourceType::Directory),
                    ..Details::default()
                });
            }
            None => {}
        }
        Ok(info)
    }

    fn contains(&self, path: &str) -> bool {
        path == "/" || self.directories.contains(path) || self.entries.contains_key(path)
    }

    /// Immediate child names of `path`, in archive order.
    fn children(&self, path: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for candidate in self.namelist.iter().chain(self.directories.iter()) {
            if isbase(path, candidate) && candidate != path {
                let rest = frombase(path, candidate);
                if let Some(first) = iteratepath(&rest).into_iter().next() {
                    if seen.insert(first.clone()) {
                        names.push(first);
                    }
                }
            }
        }
        names
    }
}

impl Vfs for ZipReadFs {
    fn getinfo(&self, path: &str, namespaces: &[Namespace]) -> Result<Info> {
        let path = Self::validate(path)?;
        self.info_for(&path, namespaces)
    }

    fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let path = Self::validate(path)?;
        if !self.contains(&path) {
            return Err(Error::not_found(path));
        }
        if !self.directories.contains(&path) {
            return Err(Error::directory_expected(path));
        }
        Ok(self.children(&path))
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
        if self.directories.contains(&path) {
            return Err(Error::file_expected(path));
        }
        let entry = self.entries.get(&path).ok_or_else(|| Error::not_found(&path))?;

        let mut archive = self.archive.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = archive
            .by_index(entry.index)
            .map_err(|err| Error::operation_failed_with(&path, err))?;
        let mut data = Vec::with_capacity(entry.size as usize);
        file.read_to_end(&mut data).map_err(|err| Error::operation_failed_with(&path, err))?;
        Ok(Box::new(BufferFile::new(data)))
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

/// A ZIP archive serialiser.
struct ZipSaver {
    target: SaveTarget,
    options: ZipOptions,
}

impl Saver for ZipSaver {
    fn save(&mut self, fs: &dyn Vfs) -> Result<()> {
        let options = self.options.clone();
        self.target.save_with(&mut |out| write_zip(fs, out, &options))
    }
}

/// Serialises the merged view of `fs` as a ZIP archive.
fn write_zip(fs: &dyn Vfs, out: &mut dyn Stream, options: &ZipOptions) -> Result<()> {
    let mut writer = ZipWriter::new(out);

    for (path, info) in fs.walk(&[Namespace::Details])? {
        // names are relative; directory names end with a slash
        let zip_name = relpath(&path).to_string();
        let modified = info.modified().unwrap_or_else(now_epoch);
        let entry_options = SimpleFileOptions::default()
            .compression_method(options.compression)
            .large_file(true)
            .last_modified_time(epoch_to_datetime(modified));

        if info.is_dir {
            // only childless directories are written explicitly
            if fs.isempty(&path)? {
                writer
                    .add_directory(zip_name, entry_options)
                    .map_err(|err| Error::operation_failed_with(&path, err))?;
            }
        } else {
            writer
                .start_file(zip_name, entry_options)
                .map_err(|err| Error::operation_failed_with(&path, err))?;
            let mut source = fs.openbin(&path, OpenMode::read())?;
            copy_buffered(&mut source, &mut writer, options.buffer_size)
                .map_err(|err| Error::operation_failed_with(&path, err))?;
        }
    }

    writer.finish().map_err(|err| Error::operation_failed_with("/", err))?;
    Ok(())
}

fn copy_buffered(
    source: &mut dyn Read,
    dest: &mut dyn std::io::Write,
    buffer_size: usize,
) -> std::io::Result<()> {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    loop {
        let read = source.read(&mut buffer)?;
        if read == 0 {
            return Ok(());
        }
        dest.write_all(&buffer[..read])?;
    }
}

/// DOS date tuple to epoch seconds.
fn dos_to_epoch((year, month, day, hour, minute, second): (u16, u8, u8, u8, u8, u8)) -> Option<i64> {
    let date = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?;
    let time = date.and_hms_opt(hour as u32, minute as u32, second as u32)?;
    Some(time.and_utc().timestamp())
}

/// Epoch seconds to a ZIP timestamp, saturating outside the DOS range.
fn epoch_to_datetime(epoch: i64) -> zip::DateTime {
    use chrono::{Datelike, Timelike};
    let Some(utc) = chrono::DateTime::from_timestamp(epoch, 0) else {
        return zip::DateTime::default();
    };
    zip::DateTime::from_date_and_time(
        utc.year() as u16,
        utc.month() as u8,
        utc.day() as u8,
        utc.hour() as u8,
        utc.minute() as u8,
        utc.second() as u8,
    )
    .unwrap_or_default()
}
