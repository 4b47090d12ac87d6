//! Defines the uniform virtual filesystem contract --- [`Vfs`].
//!
//! Every archive backend implements the primitive operations; the derived
//! operations (`exists`, `walk`, convenience I/O) are default methods so
//! that the overlay and the façade stay generic over `dyn Vfs`.

pub mod file;

use std::collections::VecDeque;
use std::io::{Read, Write};

use crate::errors::{Error, Result};
use crate::info::{Info, InfoUpdate, Meta, Namespace, ResourceType};
use crate::mode::OpenMode;
use crate::path::{join, recursepath};

pub use self::file::VFile;

/// Virtual filesystem interface.
///
/// All operations are blocking and synchronous; paths are validated and
/// normalised by the implementation. Mutating operations on read-only
/// backends fail with [`Error::ResourceReadOnly`].
pub trait Vfs: Send + Sync {
    /// Returns metadata for the resource at `path`, restricted to the
    /// requested namespaces (`basic` is always included).
    fn getinfo(&self, path: &str, namespaces: &[Namespace]) -> Result<Info>;

    /// Returns the basenames of the entries in the directory at `path`.
    fn listdir(&self, path: &str) -> Result<Vec<String>>;

    /// Returns metadata for the entries in the directory at `path`,
    /// optionally sliced to the half-open page `(start, end)`.
    fn scandir(
        &self,
        path: &str,
        namespaces: &[Namespace],
        page: Option<(usize, usize)>,
    ) -> Result<Vec<Info>>;

    /// Opens the file at `path` as a scoped byte handle.
    ///
    /// The handle's lifetime is unrelated to the filesystem's; dropping
    /// it never closes the parent.
    fn openbin(&self, path: &str, mode: OpenMode) -> Result<Box<dyn VFile>>;

    /// Creates a directory at `path`. With `recreate`, an existing
    /// directory is tolerated.
    fn makedir(&self, path: &str, permissions: Option<u32>, recreate: bool) -> Result<()>;

    /// Removes the regular file at `path`.
    fn remove(&self, path: &str) -> Result<()>;

    /// Removes the empty directory at `path`; the root is never removable.
    fn removedir(&self, path: &str) -> Result<()>;

    /// Applies a partial metadata update to the resource at `path`.
    fn setinfo(&self, path: &str, update: &InfoUpdate) -> Result<()>;

    /// Reports the capabilities of this filesystem.
    fn getmeta(&self) -> Meta;

    /// Releases the filesystem. Idempotent; the default is a no-op.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.getinfo(path, &[]).is_ok()
    }

    fn isdir(&self, path: &str) -> bool {
        self.getinfo(path, &[]).map(|info| info.is_dir).unwrap_or(false)
    }

    fn isfile(&self, path: &str) -> bool {
        self.getinfo(path, &[]).map(|info| !info.is_dir).unwrap_or(false)
    }

    /// True iff `path` is a directory with no entries.
    fn isempty(&self, path: &str) -> Result<bool> {
        Ok(self.listdir(path)?.is_empty())
    }

    fn gettype(&self, path: &str) -> Result<ResourceType> {
        Ok(self.getinfo(path, &[Namespace::Details])?.kind())
    }

    fn getsize(&self, path: &str) -> Result<u64> {
        Ok(self.getinfo(path, &[Namespace::Details])?.size())
    }

    /// Creates every missing directory on the way to `path`.
    fn makedirs(&self, path: &str, permissions: Option<u32>) -> Result<()> {
        for prefix in recursepath(path) {
            if prefix != "/" {
                self.makedir(&prefix, permissions, true)?;
            }
        }
        Ok(())
    }

    fn getbytes(&self, path: &str) -> Result<Vec<u8>> {
        let mut handle = self.openbin(path, OpenMode::read())?;
        let mut data = Vec::new();
        handle.read_to_end(&mut data).map_err(|err| Error::operation_failed_with(path, err))?;
        Ok(data)
    }

    fn gettext(&self, path: &str) -> Result<String> {
        let data = self.getbytes(path)?;
        String::from_utf8(data).map_err(|err| Error::operation_failed_with(path, err))
    }

    fn setbytes(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut handle = self.openbin(path, OpenMode::write())?;
        handle.write_all(data).map_err(|err| Error::operation_failed_with(path, err))?;
        handle.flush().map_err(|err| Error::operation_failed_with(path, err))
    }

    fn settext(&self, path: &str, text: &str) -> Result<()> {
        self.setbytes(path, text.as_bytes())
    }

    /// Appends to `path`, creating it if missing.
    fn appendbytes(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut handle = self.openbin(path, OpenMode::append())?;
        handle.write_all(data).map_err(|err| Error::operation_failed_with(path, err))?;
        handle.flush().map_err(|err| Error::operation_failed_with(path, err))
    }

    /// Creates an empty file at `path`, or refreshes its mtime.
    fn touch(&self, path: &str) -> Result<()> {
        if self.exists(path) {
            let now = now_epoch();
            self.setinfo(path, &InfoUpdate::default().modified(now))
        } else {
            self.setbytes(path, b"")
        }
    }

    /// Breadth-first traversal from the root, yielding every resource
    /// below it with the requested namespaces.
    fn walk(&self, namespaces: &[Namespace]) -> Result<Vec<(String, Info)>> {
        self.walk_ordered(namespaces, WalkOrder::Breadth)
    }

    /// Traversal from the root in the requested order.
    ///
    /// Breadth-first yields a directory's entries before descending
    /// (archive writers rely on parents preceding their children);
    /// depth-first descends into each directory as soon as it is met.
    fn walk_ordered(
        &self,
        namespaces: &[Namespace],
        order: WalkOrder,
    ) -> Result<Vec<(String, Info)>> {
        let mut collected = Vec::new();
        let mut queue = VecDeque::from(["/".to_string()]);
        let next = |queue: &mut VecDeque<String>| match order {
            WalkOrder::Breadth => queue.pop_front(),
            WalkOrder::Depth => queue.pop_back(),
        };
        while let Some(dir) = next(&mut queue) {
            let mut subdirs = Vec::new();
            for info in self.scandir(&dir, namespaces, None)? {
                let path = join(&dir, &info.name);
                if info.is_dir {
                    subdirs.push(path.clone());
                }
                collected.push((path, info));
            }
            if order == WalkOrder::Depth {
                // reversed so the first subdirectory is explored first
                subdirs.reverse();
            }
            queue.extend(subdirs);
        }
        Ok(collected)
    }
}

/// Traversal order for [`Vfs::walk_ordered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    Breadth,
    Depth,
}

/// Applies a `(start, end)` page to a fully collected listing.
pub(crate) fn page_slice<T>(items: Vec<T>, page: Option<(usize, usize)>) -> Vec<T> {
    match page {
        Some((start, end)) => {
            items.into_iter().skip(start).take(end.saturating_sub(start)).collect()
        }
        None => items,
    }
}

/// Current time as epoch seconds.
pub(crate) fn now_epoch() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
