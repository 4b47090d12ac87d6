//! arcfs - a uniform virtual filesystem over archive containers.
//!
//! A caller opens an archive stored in a backing byte container (a
//! filesystem path or an in-memory byte stream) and performs directory
//! traversal, metadata queries and binary reads through one [`Vfs`]
//! contract; for writable handles, mutations accumulate in a
//! copy-on-write overlay and the whole archive is rewritten on close.
//!
//! Supported containers: ZIP, TAR (with gzip/bzip2/xz variants), 7z and
//! ISO-9660 (with Joliet and Rock Ridge extensions).

mod archive;
mod errors;
mod info;
mod memory;
mod mode;
mod opener;
mod overlay;
mod path;
mod vfs;

pub mod isofs;
pub mod sevenzfs;
pub mod tarfs;
pub mod zipfs;

pub use archive::{ArchiveFs, ArchiveHandle, SaveTarget, Saver, SharedStream, Stream};
pub use errors::{Cause, Error, Result};
pub use info::{
    Access, Details, FormatInfo, Info, InfoUpdate, IsoInfo, Meta, Namespace, ResourceType,
    SevenZInfo, TarInfo, ZipInfo,
};
pub use memory::MemoryFs;
pub use mode::OpenMode;
pub use opener::{default_registry, open_archive, Registry};
pub use overlay::WriteOverlay;
pub use vfs::file::{BufferFile, VFile, WindowFile};
pub use vfs::{Vfs, WalkOrder};

pub use path::{
    abspath, basename, dirname, forcedir, frombase, isbase, iteratepath, join, normpath, parts,
    recursepath, relpath, split, splitext, validatepath,
};
