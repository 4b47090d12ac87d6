//! Archive lifecycle: backing handles, the save-on-close protocol and the
//! read-write façade --- [`ArchiveFs`].
//!
//! A backing handle is either a filesystem path or a byte stream. Streams
//! are wrapped in a [`SharedStream`], a reference-counted seekable stream
//! guarded by a single mutex; the backend, the saver and every live file
//! handle share clones of it, and the stream lives as long as the longest
//! holder.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::errors::{Error, Result};
use crate::info::{Info, InfoUpdate, Meta, Namespace};
use crate::memory::MemoryFs;
use crate::mode::OpenMode;
use crate::overlay::WriteOverlay;
use crate::vfs::{VFile, Vfs};

/// A seekable byte stream usable as an archive backing handle.
pub trait Stream: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> Stream for T {}

/// A clone-shared, mutex-guarded backing stream.
///
/// All seek/read state of the underlying stream is guarded by one mutex;
/// concurrent callers serialise on it at the granularity of a single
/// primitive. Capabilities are declared at construction because a Rust
/// stream cannot be probed for them at runtime.
#[derive(Clone)]
pub struct SharedStream {
    inner: Arc<Mutex<Box<dyn Stream>>>,
    readable: bool,
    writable: bool,
}

impl SharedStream {
    /// Wraps a readable and writable stream.
    pub fn new(stream: impl Stream + 'static) -> SharedStream {
        SharedStream::with_capabilities(stream, true, true)
    }

    /// Wraps a stream with explicitly declared capabilities.
    pub fn with_capabilities(
        stream: impl Stream + 'static,
        readable: bool,
        writable: bool,
    ) -> SharedStream {
        SharedStream { inner: Arc::new(Mutex::new(Box::new(stream))), readable, writable }
    }

    pub fn readable(&self) -> bool {
        self.readable
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Stream>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current position of the underlying stream.
    pub fn position(&self) -> io::Result<u64> {
        self.lock().stream_position()
    }

    /// Total length of the underlying stream; the position is preserved.
    pub fn len(&self) -> io::Result<u64> {
        let mut guard = self.lock();
        let position = guard.stream_position()?;
        let length = guard.seek(SeekFrom::End(0))?;
        guard.seek(SeekFrom::Start(position))?;
        Ok(length)
    }

    pub fn is_empty(&self) -> bool {
        self.len().map(|n| n == 0).unwrap_or(true)
    }

    /// Seeks to `offset` and reads, in one locked step.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if !self.readable {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "stream is not readable"));
        }
        let mut guard = self.lock();
        guard.seek(SeekFrom::Start(offset))?;
        guard.read(buf)
    }

    /// Like [`SharedStream::read_at`], but fills the whole buffer.
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if !self.readable {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "stream is not readable"));
        }
        let mut guard = self.lock();
        guard.seek(SeekFrom::Start(offset))?;
        guard.read_exact(buf)
    }

    /// Recovers the wrapped stream once every other clone is dropped.
    pub fn into_inner(self) -> Option<Box<dyn Stream>> {
        Arc::try_unwrap(self.inner)
            .ok()
            .map(|mutex| mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

impl Read for SharedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.readable {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "stream is not readable"));
        }
        self.lock().read(buf)
    }
}

impl Write for SharedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "stream is not writable"));
        }
        self.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

impl Seek for SharedStream {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        self.lock().seek(target)
    }
}

/// A backing byte container for an archive: a filesystem path, or a
/// (shared) byte stream.
pub enum ArchiveHandle {
    Path(PathBuf),
    Stream(SharedStream),
}

impl ArchiveHandle {
    pub fn path(path: impl AsRef<Path>) -> ArchiveHandle {
        ArchiveHandle::Path(path.as_ref().to_path_buf())
    }

    /// A readable and writable in-process stream.
    pub fn stream(stream: impl Stream + 'static) -> ArchiveHandle {
        ArchiveHandle::Stream(SharedStream::new(stream))
    }

    /// A stream the caller already shares.
    pub fn shared(stream: SharedStream) -> ArchiveHandle {
        ArchiveHandle::Stream(stream)
    }

    /// A read-only in-memory archive.
    pub fn bytes(data: Vec<u8>) -> ArchiveHandle {
        ArchiveHandle::Stream(SharedStream::with_capabilities(io::Cursor::new(data), true, false))
    }
}

/// Where and how a serialised archive lands on close.
pub struct SaveTarget {
    dest: SaveDest,
    overwrite: bool,
    initial_position: u64,
}

enum SaveDest {
    Path(PathBuf),
    Stream(SharedStream),
}

impl SaveTarget {
    /// The destination filename, when the target is a path.
    pub fn path(&self) -> Option<&Path> {
        match &self.dest {
            SaveDest::Path(path) => Some(path),
            SaveDest::Stream(_) => None,
        }
    }

    /// Runs a serialiser against the target, honouring the overwrite
    /// protocol.
    ///
    /// File targets that overwrite an existing archive are staged to
    /// `<path>.tmp` and renamed into place; a failed serialisation leaves
    /// the original archive intact. Stream targets that overwrite stage
    /// through an anonymous temporary file, then rewind the output to its
    /// initial position and copy the staged bytes in.
    pub fn save_with(
        &mut self,
        serialize: &mut dyn FnMut(&mut dyn Stream) -> Result<()>,
    ) -> Result<()> {
        match &self.dest {
            SaveDest::Path(path) => {
                let display_path = path.display().to_string();
                if self.overwrite {
                    let staging = PathBuf::from(format!("{display_path}.tmp"));
                    let mut file = File::create(&staging)
                        .map_err(|err| Error::operation_failed_with(&display_path, err))?;
                    serialize(&mut file)?;
                    drop(file);
                    fs::rename(&staging, path)
                        .map_err(|err| Error::operation_failed_with(&display_path, err))?;
                } else {
                    let mut file = File::create(path)
                        .map_err(|err| Error::operation_failed_with(&display_path, err))?;
                    serialize(&mut file)?;
                }
                debug!(path = %display_path, "archive saved");
                Ok(())
            }
            SaveDest::Stream(stream) => {
                let mut output = stream.clone();
                if self.overwrite {
                    let mut staging = tempfile::tempfile()
                        .map_err(|err| Error::operation_failed_with("<stream>", err))?;
                    serialize(&mut staging)?;
                    staging
                        .seek(SeekFrom::Start(0))
                        .and_then(|_| output.seek(SeekFrom::Start(self.initial_position)))
                        .and_then(|_| io::copy(&mut staging, &mut output))
                        .map_err(|err| Error::operation_failed_with("<stream>", err))?;
                } else {
                    output
                        .seek(SeekFrom::Start(self.initial_position))
                        .map_err(|err| Error::operation_failed_with("<stream>", err))?;
                    serialize(&mut output)?;
                }
                output.flush().map_err(|err| Error::operation_failed_with("<stream>", err))?;
                debug!("archive saved to stream");
                Ok(())
            }
        }
    }
}

/// An archive serialiser, bound to its output at construction.
pub trait Saver: Send {
    /// Serialises the merged view of `fs` into the bound target.
    fn save(&mut self, fs: &dyn Vfs) -> Result<()>;
}

/// The mutation primitives of a read-only backend all answer with this.
pub(crate) fn modification_attempt(path: &str) -> Error {
    Error::read_only(path)
}

/// Tests whether a filesystem path can be (over)written.
fn writable_path(path: &Path) -> bool {
    if path.exists() {
        OpenOptions::new().write(true).open(path).is_ok()
    } else {
        match File::create(path) {
            Ok(file) => {
                drop(file);
                let _ = fs::remove_file(path);
                true
            }
            Err(_) => false,
        }
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    }
}

/// A read-write filesystem in an archive.
///
/// Reads go through the copy-on-write overlay to the read-only backend;
/// mutations accumulate in the overlay's scratch store and are serialised
/// into the backing handle when the filesystem is closed.
pub struct ArchiveFs {
    inner: Box<dyn Vfs>,
    saver: Mutex<Option<Box<dyn Saver>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ArchiveFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveFs")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ArchiveFs {
    /// Builds the façade for one backend.
    ///
    /// `open_reader` constructs the read-only backend from a shared
    /// stream; `make_saver` binds the serialiser to its output. Either
    /// side may end up absent: a missing or write-only handle yields a
    /// pure writable filesystem, an unwritable handle a filesystem whose
    /// mutations are discarded on close.
    pub(crate) fn open(
        handle: ArchiveHandle,
        proxy: Option<Box<dyn Vfs>>,
        open_reader: &dyn Fn(SharedStream) -> Result<Box<dyn Vfs>>,
        make_saver: &dyn Fn(SaveTarget) -> Box<dyn Saver>,
    ) -> Result<ArchiveFs> {
        let mut reader: Option<Box<dyn Vfs>> = None;
        let mut saver: Option<Box<dyn Saver>> = None;

        match handle {
            ArchiveHandle::Path(path) => {
                let path = absolutize(&path);
                if path.exists() {
                    let file = File::open(&path).map_err(|err| {
                        Error::create_failed_with(
                            format!("could not open {}", path.display()),
                            err,
                        )
                    })?;
                    let stream = SharedStream::with_capabilities(file, true, false);
                    reader = Some(open_reader(stream)?);
                }
                if writable_path(&path) {
                    saver = Some(make_saver(SaveTarget {
                        dest: SaveDest::Path(path),
                        overwrite: reader.is_some(),
                        initial_position: 0,
                    }));
                }
            }
            ArchiveHandle::Stream(stream) => {
                let initial_position = stream.position().unwrap_or(0);
                if stream.readable() {
                    reader = Some(open_reader(stream.clone())?);
                }
                if stream.writable() {
                    saver = Some(make_saver(SaveTarget {
                        dest: SaveDest::Stream(stream),
                        overwrite: reader.is_some(),
                        initial_position,
                    }));
                }
            }
        }

        if reader.is_none() && saver.is_none() {
            return Err(Error::create_failed("handle is neither readable nor writable"));
        }

        let scratch = proxy.unwrap_or_else(|| Box::new(MemoryFs::new()));
        let inner: Box<dyn Vfs> = match reader {
            Some(read_fs) => Box::new(WriteOverlay::with_scratch(read_fs, scratch)),
            None => scratch,
        };

        Ok(ArchiveFs { inner, saver: Mutex::new(saver), closed: AtomicBool::new(false) })
    }
}

impl Vfs for ArchiveFs {
    fn getinfo(&self, path: &str, namespaces: &[Namespace]) -> Result<Info> {
        self.inner.getinfo(path, namespaces)
    }

    fn listdir(&self, path: &str) -> Result<Vec<String>> {
        self.inner.listdir(path)
    }

    fn scandir(
        &self,
        path: &str,
        namespaces: &[Namespace],
        page: Option<(usize, usize)>,
    ) -> Result<Vec<Info>> {
        self.inner.scandir(path, namespaces, page)
    }

    fn openbin(&self, path: &str, mode: OpenMode) -> Result<Box<dyn VFile>> {
        self.inner.openbin(path, mode)
    }

    fn makedir(&self, path: &str, permissions: Option<u32>, recreate: bool) -> Result<()> {
        self.inner.makedir(path, permissions, recreate)
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.inner.remove(path)
    }

    fn removedir(&self, path: &str) -> Result<()> {
        self.inner.removedir(path)
    }

    fn setinfo(&self, path: &str, update: &InfoUpdate) -> Result<()> {
        self.inner.setinfo(path, update)
    }

    fn getmeta(&self) -> Meta {
        self.inner.getmeta()
    }

    /// Saves the merged view through the bound serialiser, then releases
    /// the wrapped filesystem. A second call is a no-op.
    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let saver = self.saver.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(mut saver) = saver {
            saver.save(self.inner.as_ref())?;
        }
        self.inner.close()
    }
}
