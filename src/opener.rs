//! Extension registry mapping archive filenames to their backend ---
//! [`Registry`].
//!
//! Rather than a runtime plugin loader, consumers register
//! `(suffix, builder)` pairs; the longest matching suffix wins, and the
//! first registration wins ties. [`default_registry`] wires up every
//! built-in backend.

use std::path::Path;

use crate::archive::{ArchiveFs, ArchiveHandle};
use crate::errors::{Error, Result};


type Builder = Box<dyn Fn(ArchiveHandle) -> Result<ArchiveFs> + Send + Sync>;

/// A suffix-keyed table of archive openers.
pub struct Registry {
    entries: Vec<(String, Builder)>,
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Registry {
        Registry { entries: Vec::new() }
    }

    /// Registers a backend builder for a filename suffix.
    pub fn register(
        &mut self,
        suffix: impl Into<String>,
        builder: impl Fn(ArchiveHandle) -> Result<ArchiveFs> + Send + Sync + 'static,
    ) {
        self.entries.push((suffix.into(), Box::new(builder)));
    }

    /// Resolves the builder for a filename: longest suffix wins, first
    /// registration wins ties.
    pub fn builder_for(&self, filename: &str) -> Option<&Builder> {
        let mut best: Option<&(String, Builder)> = None;
        for entry in &self.entries {
            if !filename.ends_with(entry.0.as_str()) {
                continue;
            }
            // a later entry only replaces a strictly shorter suffix
            if best.map(|b| entry.0.len() > b.0.len()).unwrap_or(true) {
                best = Some(entry);
            }
        }
        best.map(|(_, builder)| builder)
    }

    /// Opens the archive at `path` with the backend its extension maps
    /// to.
    ///
    /// The handle mode follows from the file's state: an existing
    /// readable file opens read-write (read-only when unwritable), a
    /// missing file in a writable directory opens as a fresh archive.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<ArchiveFs> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let builder = self
            .builder_for(&filename)
            .ok_or_else(|| Error::unsupported(format!("archive extension of {filename:?}")))?;
        builder(ArchiveHandle::path(path))
    }
}

/// A registry with every built-in backend registered.
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(".zip", crate::zipfs::open);
    registry.register(".tar", crate::tarfs::open);
    registry.register(".tar.gz", crate::tarfs::open);
    registry.register(".tgz", crate::tarfs::open);
    registry.register(".tar.bz2", crate::tarfs::open);
    registry.register(".tbz", crate::tarfs::open);
    registry.register(".tar.xz", crate::tarfs::open);
    registry.register(".txz", crate::tarfs::open);
    registry.register(".7z", crate::sevenzfs::open);
    registry.register(".iso", crate::isofs::open);
    registry
}

/// Opens an archive through the default registry.
pub fn open_archive(path: impl AsRef<Path>) -> Result<ArchiveFs> {
    default_registry().open(path)
}
