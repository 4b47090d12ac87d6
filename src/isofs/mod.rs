//! ISO-9660 archive filesystem.
//!
//! The reader parses volume descriptors at sector 16, chooses a naming
//! hierarchy (Rock Ridge over Joliet over the 8.3 ISO base), and walks
//! directory extents on demand, memoising path lookups in a path-table
//! cache. The writer serialises a complete image with optional Joliet
//! and Rock Ridge hierarchies, mapping arbitrary Unicode names onto
//! unique 8.3-compliant slugs in the base hierarchy.

pub mod names;
pub mod parser;
pub mod serializer;

#[cfg(test)]
mod tests;

use moka::sync::Cache;
use tracing::debug;

use crate::archive::{modification_attempt, ArchiveFs, ArchiveHandle, SaveTarget, Saver, SharedStream};
use crate::errors::{Error, Result};
use crate::info::{Access, Details, FormatInfo, Info, InfoUpdate, IsoInfo, Meta, Namespace, ResourceType};
use crate::mode::OpenMode;
use crate::path::{join, recursepath, validatepath};
use crate::vfs::file::WindowFile;
use crate::vfs::{page_slice, VFile, Vfs};

use self::parser::susp::{parse_system_use, SystemUse};
use self::parser::{Descriptor, DirectoryRecord, DESCRIPTOR_START, SECTOR_SIZE};

const INVALID_PATH_CHARS: &str = "\0\u{1}";

/// Rock Ridge revision emitted by the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RockRidge {
    V1_09,
    V1_12,
}

/// Writer options for ISO-9660 images.
#[derive(Debug, Clone)]
pub struct IsoOptions {
    /// Interchange level 1-4; below 4 the base names are strict 8.3
    /// uppercase.
    pub interchange_level: u8,
    /// Also emit a Joliet (UCS-2) hierarchy.
    pub joliet: bool,
    /// Also emit Rock Ridge POSIX extensions.
    pub rock_ridge: Option<RockRidge>,
}

impl Default for IsoOptions {
    fn default() -> IsoOptions {
        IsoOptions { interchange_level: 1, joliet: true, rock_ridge: Some(RockRidge::V1_09) }
    }
}

/// Opens a read-write filesystem in an ISO image.
pub fn open(handle: ArchiveHandle) -> Result<ArchiveFs> {
    open_with(handle, IsoOptions::default(), None)
}

/// Opens an ISO filesystem with explicit writer options and an optional
/// scratch store for the overlay.
pub fn open_with(
    handle: ArchiveHandle,
    options: IsoOptions,
    proxy: Option<Box<dyn Vfs>>,
) -> Result<ArchiveFs> {
    ArchiveFs::open(
        handle,
        proxy,
        &|stream| Ok(Box::new(IsoReadFs::open(stream)?) as Box<dyn Vfs>),
        &|target| Box::new(IsoSaver { target, options: options.clone() }) as Box<dyn Saver>,
    )
}

/// Which naming hierarchy the reader traverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hierarchy {
    /// The base ISO tree, optionally with Rock Ridge names.
    Base { rock_ridge: bool },
    /// The Joliet (UTF-16BE) tree of the supplementary descriptor.
    Joliet,
}

/// A resolved directory record with its canonical name and system-use
/// attributes.
#[derive(Clone)]
struct IsoNode {
    record: DirectoryRecord,
    name: String,
    susp: Option<SystemUse>,
}

impl IsoNode {
    fn is_dir(&self) -> bool {
        self.record.flags.is_dir
    }

    fn link_target(&self) -> Option<String> {
        self.susp.as_ref().and_then(|susp| susp.link_target.clone())
    }
}

/// A read-only filesystem over an ISO-9660 image byte stream.
pub struct IsoReadFs {
    stream: SharedStream,
    start: u64,
    block_size: u64,
    hierarchy: Hierarchy,
    /// Memoised path -> directory-record lookups; holds at least `/` and
    /// grows as paths are resolved.
    path_table: Cache<String, IsoNode>,
}

impl IsoReadFs {
    /// Parses the volume descriptors of the image behind `stream` and
    /// selects the richest available hierarchy.
    pub fn open(stream: SharedStream) -> Result<IsoReadFs> {
        let start = stream.position().unwrap_or(0);

        let mut primary = None;
        let mut joliet = None;
        let mut sector = [0u8; SECTOR_SIZE as usize];
        for index in 0..64 {
            let offset = start + (DESCRIPTOR_START + index) * SECTOR_SIZE;
            stream
                .read_exact_at(offset, &mut sector)
                .map_err(|err| Error::create_failed_with("failed to read volume descriptor", err))?;
            match parser::parse_descriptor(&sector)
                .map_err(|err| Error::create_failed_with("malformed volume descriptor", err))?
            {
                Descriptor::Primary(volume) => primary = primary.or(Some(volume)),
                Descriptor::Supplementary(volume) if volume.joliet => {
                    joliet = joliet.or(Some(volume))
                }
                Descriptor::Terminator => break,
                _ => {}
            }
        }
        let primary = primary.ok_or_else(|| {
            Error::create_failed_with("no primary volume descriptor", parser::Error::MissingPrimaryDescriptor)
        })?;

        let block_size = primary.logical_block_size as u64;

        // Rock Ridge announces itself with an SP entry on the root's
        // first record
        let rock_ridge = {
            let extent = start + primary.root.extent_location as u64 * block_size;
            let mut first = vec![0u8; (primary.root.data_length as usize).min(SECTOR_SIZE as usize)];
            stream
                .read_exact_at(extent, &mut first)
                .map_err(|err| Error::create_failed_with("failed to read root directory", err))?;
            match parser::RecordIter::new(&first).next() {
                Some(Ok(record)) => parse_system_use(&record.system_use).has_sp,
                _ => false,
            }
        };

        let (hierarchy, volume) = if rock_ridge {
            (Hierarchy::Base { rock_ridge: true }, &primary)
        } else if let Some(volume) = &joliet {
            (Hierarchy::Joliet, volume)
        } else {
            (Hierarchy::Base { rock_ridge: false }, &primary)
        };
        debug!(?hierarchy, block_size, "opened iso image");

        let root = IsoNode { record: volume.root.clone(), name: String::new(), susp: None };
        let path_table = Cache::builder().build();
        path_table.insert("/".to_string(), root);

        Ok(IsoReadFs {
            stream,
            start,
            block_size: volume.logical_block_size as u64,
            hierarchy,
            path_table,
        })
    }

    fn validate(path: &str) -> Result<String> {
        validatepath(path, INVALID_PATH_CHARS)
    }

    /// Reads and resolves the children of a directory node.
    fn read_dir(&self, node: &IsoNode) -> Result<Vec<IsoNode>> {
        let offset = self.start + node.record.extent_location as u64 * self.block_size;
        let mut data = vec![0u8; node.record.data_length as usize];
        self.stream
            .read_exact_at(offset, &mut data)
            .map_err(|err| Error::operation_failed_with(&node.name, err))?;

        let mut children = Vec::new();
        for record in parser::RecordIter::new(&data) {
            let record = record.map_err(|err| Error::operation_failed_with(&node.name, err))?;
            if record.is_dot() {
                continue;
            }
            let (name, susp) = match self.hierarchy {
                Hierarchy::Joliet => (record.joliet_name(), None),
                Hierarchy::Base { rock_ridge } => {
                    let susp = parse_system_use(&record.system_use);
                    let name = match (&susp.name, rock_ridge) {
                        (Some(name), true) => name.clone(),
                        _ => record.iso_name(),
                    };
                    (name, Some(susp))
                }
            };
            if name.is_empty() {
                continue;
            }
            children.push(IsoNode { record, name, susp });
        }
        Ok(children)
    }

    /// Resolves `path` to a record, descending from the longest cached
    /// prefix and memoising every record met along the way.
    fn resolve(&self, path: &str) -> Result<IsoNode> {
        if let Some(node) = self.path_table.get(path) {
            return Ok(node);
        }
        for subpath in recursepath(path) {
            let node = self.path_table.get(&subpath).ok_or_else(|| Error::not_found(&subpath))?;
            if subpath == path {
                break;
            }
            if !node.is_dir() {
                return Err(Error::directory_expected(subpath));
            }
            for child in self.read_dir(&node)? {
                self.path_table.insert(join(&subpath, &child.name), child);
            }
        }
        self.path_table.get(path).ok_or_else(|| Error::not_found(path))
    }

    fn info_for(&self, path: &str, node: &IsoNode, namespaces: &[Namespace]) -> Info {
        let mut info = Info::new(crate::path::basename(path), node.is_dir());
        let susp = node.susp.as_ref();
        if namespaces.contains(&Namespace::Details) {
            let kind = if node.link_target().is_some() {
                ResourceType::Symlink
            } else if node.is_dir() {
                ResourceType::Directory
            } else {
                match susp.and_then(|s| s.posix).map(|px| px.mode & 0o170000) {
                    Some(0o060000) => ResourceType::BlockDevice,
                    Some(0o020000) => ResourceType::CharacterDevice,
                    Some(0o010000) => ResourceType::Fifo,
                    Some(0o140000) => ResourceType::Socket,
                    _ => ResourceType::File,
                }
            };
            let timestamps = susp.map(|s| s.timestamps).unwrap_or_default();
            info.details = Some(Details {
                size: if node.is_dir() { 0 } else { node.record.data_length as u64 },
                kind: Some(kind),
                modified: timestamps.modified.or(node.record.recorded_at),
                accessed: timestamps.accessed,
                created: timestamps.created,
            });
        }
        if namespaces.contains(&Namespace::Access) {
            if let Some(posix) = susp.and_then(|s| s.posix) {
                info.access = Some(Access {
                    permissions: Some(posix.mode & 0o7777),
                    uid: Some(posix.uid),
                    gid: Some(posix.gid),
                    user: None,
                    group: None,
                });
            }
        }
        if namespaces.contains(&Namespace::Iso) {
            info.format = Some(FormatInfo::Iso(IsoInfo {
                identifier: String::from_utf8_lossy(&node.record.identifier).into_owned(),
                extent_location: node.record.extent_location,
                data_length: node.record.data_length,
                is_dir: node.is_dir(),
                hidden: node.record.flags.hidden,
                is_associated: node.record.flags.is_associated,
                has_rock_ridge: susp.map(|s| s.has_rock_ridge()).unwrap_or(false),
                link_target: node.link_target(),
            }));
        }
        info
    }
}

impl Vfs for IsoReadFs {
    fn getinfo(&self, path: &str, namespaces: &[Namespace]) -> Result<Info> {
        let path = Self::validate(path)?;
        let node = self.resolve(&path)?;
        Ok(self.info_for(&path, &node, namespaces))
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
        let node = self.resolve(&path)?;
        if !node.is_dir() {
            return Err(Error::directory_expected(path));
        }
        let mut entries = Vec::new();
        for child in self.read_dir(&node)? {
            let child_path = join(&path, &child.name);
            entries.push(self.info_for(&child_path, &child, namespaces));
            self.path_table.insert(child_path, child);
        }
        Ok(page_slice(entries, page))
    }

    fn openbin(&self, path: &str, mode: OpenMode) -> Result<Box<dyn VFile>> {
        let path = Self::validate(path)?;
        if mode.writing() {
            return Err(modification_attempt(&path));
        }
        let node = self.resolve(&path)?;
        if node.is_dir() {
            return Err(Error::file_expected(path));
        }
        let offset = self.start + node.record.extent_location as u64 * self.block_size;
        Ok(Box::new(WindowFile::new(self.stream.clone(), offset, node.record.data_length as u64)))
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
        let extended = match self.hierarchy {
            Hierarchy::Base { rock_ridge } => rock_ridge,
            Hierarchy::Joliet => true,
        };
        Meta {
            case_insensitive: !extended,
            unicode_paths: extended,
            read_only: true,
            supports_rename: false,
            max_path_length: if extended { None } else { Some(255) },
            invalid_path_chars: INVALID_PATH_CHARS,
            thread_safe: true,
            virtual_fs: false,
            network: false,
        }
    }
}

/// An ISO-9660 image serialiser.
struct IsoSaver {
    target: SaveTarget,
    options: IsoOptions,
}

impl Saver for IsoSaver {
    fn save(&mut self, fs: &dyn Vfs) -> Result<()> {
        let options = self.options.clone();
        self.target.save_with(&mut |out| serializer::write_image(fs, out, &options))
    }
}
