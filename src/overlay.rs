//! Copy-on-write overlay that makes a read-only backend writable ---
//! [`WriteOverlay`].
//!
//! Mutations land in a scratch filesystem layered over the read-only
//! backend; deletions are tracked in a tombstone set. A path exists in
//! the overlay iff it exists in the write layer, or it exists in the
//! read layer and is not tombstoned. All mutations are discarded when
//! the overlay is dropped without a prior flush.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use crate::errors::{Error, Result};
use crate::info::{Info, InfoUpdate, Meta, Namespace};
use crate::memory::MemoryFs;
use crate::mode::OpenMode;
use crate::path::{dirname, join, validatepath};
use crate::vfs::{page_slice, VFile, Vfs};

#[cfg(test)]
mod tests;

/// A writable view over a read-only filesystem.
pub struct WriteOverlay {
    rfs: Box<dyn Vfs>,
    wfs: Box<dyn Vfs>,
    removed: Mutex<BTreeSet<String>>,
    invalid_chars: &'static str,
}

impl WriteOverlay {
    /// Wraps `read_fs` with an in-memory scratch store.
    pub fn new(read_fs: Box<dyn Vfs>) -> WriteOverlay {
        WriteOverlay::with_scratch(read_fs, Box::new(MemoryFs::new()))
    }

    /// Wraps `read_fs` with a caller-supplied scratch store.
    pub fn with_scratch(read_fs: Box<dyn Vfs>, scratch: Box<dyn Vfs>) -> WriteOverlay {
        let invalid_chars = read_fs.getmeta().invalid_path_chars;
        WriteOverlay { rfs: read_fs, wfs: scratch, removed: Mutex::new(BTreeSet::new()), invalid_chars }
    }

    fn validate(&self, path: &str) -> Result<String> {
        validatepath(path, self.invalid_chars)
    }

    fn removed(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.removed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_removed(&self, path: &str) -> bool {
        self.removed().contains(path)
    }

    /// Copies a resource from the read layer into the scratch layer,
    /// carrying every known info namespace along.
    fn copy_up(&self, path: &str) -> Result<()> {
        trace!(path, "copy-up into scratch layer");
        let info = self.rfs.getinfo(path, Namespace::ALL)?;
        if info.is_dir {
            self.wfs.makedirs(path, info.permissions())?;
        } else {
            let data = self.rfs.getbytes(path)?;
            self.wfs.setbytes(path, &data)?;
        }
        self.wfs.setinfo(path, &InfoUpdate::from_info(&info))
    }
}

impl Vfs for WriteOverlay {
    fn getinfo(&self, path: &str, namespaces: &[Namespace]) -> Result<Info> {
        let path = self.validate(path)?;
        if self.wfs.exists(&path) {
            return self.wfs.getinfo(&path, namespaces);
        }
        if self.rfs.exists(&path) && !self.is_removed(&path) {
            return self.rfs.getinfo(&path, namespaces);
        }
        Err(Error::not_found(path))
    }

    fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let path = self.validate(path)?;
        if !self.getinfo(&path, &[])?.is_dir {
            return Err(Error::directory_expected(path));
        }

        let mut names = Vec::new();
        if self.wfs.isdir(&path) {
            names.extend(self.wfs.listdir(&path)?);
        }
        if self.rfs.isdir(&path) && !self.is_removed(&path) {
            names.extend(self.rfs.listdir(&path)?);
        }

        let removed = self.removed();
        let mut seen = BTreeSet::new();
        Ok(names
            .into_iter()
            .filter(|name| !removed.contains(&join(&path, name)))
            .filter(|name| seen.insert(name.clone()))
            .collect())
    }

    fn scandir(
        &self,
        path: &str,
        namespaces: &[Namespace],
        page: Option<(usize, usize)>,
    ) -> Result<Vec<Info>> {
        let path = self.validate(path)?;
        if !self.exists(&path) {
            return Err(Error::not_found(path));
        }
        if !self.isdir(&path) {
            return Err(Error::directory_expected(path));
        }

        let mut entries = Vec::new();
        if self.wfs.isdir(&path) {
            entries.extend(self.wfs.scandir(&path, namespaces, None)?);
        }
        if self.rfs.isdir(&path) && !self.is_removed(&path) {
            entries.extend(self.rfs.scandir(&path, namespaces, None)?);
        }

        let mut seen = BTreeSet::new();
        let merged: Vec<Info> = entries
            .into_iter()
            .filter(|info| self.exists(&join(&path, &info.name)))
            .filter(|info| seen.insert(info.name.clone()))
            .collect();
        Ok(page_slice(merged, page))
    }

    fn openbin(&self, path: &str, mode: OpenMode) -> Result<Box<dyn VFile>> {
        let path = self.validate(path)?;
        let parent = dirname(&path);

        if !self.exists(&path) {
            if !self.isdir(&parent) {
                return Err(Error::not_found(parent));
            }
            if mode.create() {
                self.removed().remove(&path);
                self.wfs.makedirs(&parent, None)?;
                return self.wfs.openbin(&path, mode);
            }
            return Err(Error::not_found(path));
        }
        if self.wfs.exists(&path) {
            return self.wfs.openbin(&path, mode);
        }
        if !mode.writing() {
            return self.rfs.openbin(&path, mode);
        }
        self.wfs.makedirs(&parent, None)?;
        self.copy_up(&path)?;
        self.wfs.openbin(&path, mode)
    }

    fn makedir(&self, path: &str, permissions: Option<u32>, recreate: bool) -> Result<()> {
        let path = self.validate(path)?;
        let parent = dirname(&path);

        if self.exists(&path) {
            if !recreate {
                return Err(Error::directory_exists(path));
            }
        } else if !self.exists(&parent) {
            return Err(Error::not_found(parent));
        } else if self.isfile(&parent) {
            return Err(Error::directory_expected(parent));
        }

        self.removed().remove(&path);
        self.wfs.makedirs(&parent, None)?;
        self.wfs.makedir(&path, permissions, true)
    }

    fn remove(&self, path: &str) -> Result<()> {
        let path = self.validate(path)?;
        if self.getinfo(&path, &[])?.is_dir {
            return Err(Error::file_expected(path));
        }
        self.removed().insert(path.clone());
        if self.wfs.isfile(&path) {
            self.wfs.remove(&path)?;
        }
        Ok(())
    }

    fn removedir(&self, path: &str) -> Result<()> {
        let path = self.validate(path)?;
        if path == "/" {
            return Err(Error::operation_failed(path));
        }
        if !self.isempty(&path)? {
            return Err(Error::directory_not_empty(path));
        }
        self.removed().insert(path.clone());
        if self.wfs.isdir(&path) {
            self.wfs.removedir(&path)?;
        }
        Ok(())
    }

    fn setinfo(&self, path: &str, update: &InfoUpdate) -> Result<()> {
        let path = self.validate(path)?;
        if !self.exists(&path) {
            return Err(Error::not_found(path));
        }
        if !self.wfs.exists(&path) && self.rfs.exists(&path) {
            self.wfs.makedirs(&dirname(&path), None)?;
            self.copy_up(&path)?;
        }
        self.wfs.setinfo(&path, update)
    }

    fn getmeta(&self) -> Meta {
        Meta {
            read_only: false,
            supports_rename: false,
            thread_safe: false,
            ..self.rfs.getmeta()
        }
    }

    fn close(&self) -> Result<()> {
        self.wfs.close()?;
        self.rfs.close()
    }

    fn exists(&self, path: &str) -> bool {
        let Ok(path) = self.validate(path) else { return false };
        if self.wfs.exists(&path) {
            return true;
        }
        self.rfs.exists(&path) && !self.is_removed(&path)
    }

    /// Create-or-copy-up append: ensures the parent, pulls a read-layer
    /// file into the scratch layer, clears any tombstone, then appends.
    fn appendbytes(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = self.validate(path)?;
        let parent = dirname(&path);
        if !self.isdir(&parent) {
            return Err(Error::not_found(parent));
        }
        self.wfs.makedirs(&parent, None)?;
        if self.exists(&path) && !self.isfile(&path) {
            return Err(Error::file_expected(path));
        }
        if self.rfs.isfile(&path) && !self.is_removed(&path) && !self.wfs.isfile(&path) {
            self.copy_up(&path)?;
        }
        self.removed().remove(&path);
        self.wfs.appendbytes(&path, data)
    }
}
