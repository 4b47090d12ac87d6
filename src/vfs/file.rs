//! Byte handles returned by [`super::Vfs::openbin`].
//!
//! Two reusable read-only implementations live here: [`WindowFile`]
//! reads a contiguous window of the shared backing stream under the
//! backend lock, [`BufferFile`] serves an in-memory byte range. Both
//! follow the same seek policy: seeking before 0 is an error, seeking
//! past the end clamps to the end.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::archive::SharedStream;

/// A scoped byte handle over an archived file.
///
/// Closing (dropping) a handle never closes the parent filesystem.
pub trait VFile: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send + ?Sized> VFile for T {}

fn read_only_write() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "file handle is read-only")
}

fn negative_seek() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "cannot seek before the start of the file")
}

/// Resolves a seek target against the clamp-at-end policy shared by all
/// read-only archive handles.
fn resolve_seek(pos: u64, len: u64, target: SeekFrom) -> io::Result<u64> {
    let absolute = match target {
        SeekFrom::Start(offset) => offset as i128,
        SeekFrom::Current(delta) => pos as i128 + delta as i128,
        SeekFrom::End(delta) => len as i128 + delta as i128,
    };
    if absolute < 0 {
        return Err(negative_seek());
    }
    Ok((absolute as u64).min(len))
}

/// A read-only `[start, start + len)` window over the shared backing
/// stream.
///
/// Every read locks the stream, seeks to the absolute position and reads;
/// concurrent handles therefore serialise on the backend lock.
pub struct WindowFile {
    stream: SharedStream,
    start: u64,
    len: u64,
    pos: u64,
}

impl WindowFile {
    pub fn new(stream: SharedStream, start: u64, len: u64) -> WindowFile {
        WindowFile { stream, start, len, pos: 0 }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for WindowFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = (self.len - self.pos) as usize;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let take = remaining.min(buf.len());
        let read = self.stream.read_at(self.start + self.pos, &mut buf[..take])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for WindowFile {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(self.pos, self.len, target)?;
        Ok(self.pos)
    }
}

impl Write for WindowFile {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(read_only_write())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A read-only handle over an in-memory byte range.
///
/// Backends that must decompress whole entries (ZIP, 7z, compressed TAR)
/// hand the inflated bytes to a `BufferFile`.
pub struct BufferFile {
    data: Arc<Vec<u8>>,
    start: usize,
    end: usize,
    pos: u64,
}

impl BufferFile {
    /// Wraps an owned buffer whole.
    pub fn new(data: Vec<u8>) -> BufferFile {
        let end = data.len();
        BufferFile { data: Arc::new(data), start: 0, end, pos: 0 }
    }

    /// Wraps a `[start, end)` range of a shared buffer.
    pub fn slice(data: Arc<Vec<u8>>, start: usize, end: usize) -> BufferFile {
        BufferFile { data, start, end, pos: 0 }
    }

    pub fn len(&self) -> u64 {
        (self.end - self.start) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl Read for BufferFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let offset = self.start + self.pos as usize;
        let remaining = self.end - offset;
        let take = remaining.min(buf.len());
        buf[..take].copy_from_slice(&self.data[offset..offset + take]);
        self.pos += take as u64;
        Ok(take)
    }
}

impl Seek for BufferFile {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(self.pos, self.len(), target)?;
        Ok(self.pos)
    }
}

impl Write for BufferFile {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(read_only_write())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom, Write};

    use super::BufferFile;

    #[test]
    fn buffer_file_reads_from_start() {
        let mut file = BufferFile::new(b"Hello, World".to_vec());
        let mut buf = [0u8; 5];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"Hello");
    }

    #[test]
    fn seek_set_then_read_returns_prefix() {
        let mut file = BufferFile::new(b"abcdef".to_vec());
        file.seek(SeekFrom::Start(4)).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 3];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn seek_end_minus_one_lands_on_last_byte() {
        let mut file = BufferFile::new(b"abcdef".to_vec());
        file.seek(SeekFrom::Start(2)).unwrap();
        let pos = file.seek(SeekFrom::End(-1)).unwrap();
        assert_eq!(pos, 5);
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"f");
    }

    #[test]
    fn seek_past_end_clamps() {
        let mut file = BufferFile::new(b"abc".to_vec());
        assert_eq!(file.seek(SeekFrom::Start(100)).unwrap(), 3);
        assert_eq!(file.seek(SeekFrom::End(5)).unwrap(), 3);
    }

    #[test]
    fn seek_before_start_is_an_error() {
        let mut file = BufferFile::new(b"abc".to_vec());
        assert!(file.seek(SeekFrom::Current(-1)).is_err());
        assert!(file.seek(SeekFrom::End(-4)).is_err());
    }

    #[test]
    fn writes_are_rejected() {
        let mut file = BufferFile::new(b"abc".to_vec());
        assert!(file.write(b"x").is_err());
    }
}
