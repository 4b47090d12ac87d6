#![cfg(test)]

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use tar::{Builder, EntryType, Header};

use crate::archive::SharedStream;
use crate::errors::Error;
use crate::info::{FormatInfo, Namespace, ResourceType};
use crate::mode::OpenMode;
use crate::tarfs::{TarCompression, TarReadFs};
use crate::vfs::Vfs;

fn append_file(builder: &mut Builder<impl Write>, name: &str, data: &[u8]) {
    let mut header = Header::new_ustar();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mtime(1_500_000_000);
    header.set_mode(0o644);
    builder.append_data(&mut header, name, data).unwrap();
}

/// A TAR whose only member is a deeply nested file.
fn nested_fixture() -> Vec<u8> {
    let mut builder = Builder::new(Cursor::new(Vec::new()));
    append_file(&mut builder, "foo/bar/baz/spam.txt", b"bacon");
    builder.into_inner().unwrap().into_inner()
}

fn open_bytes(data: Vec<u8>) -> TarReadFs {
    let stream = SharedStream::with_capabilities(Cursor::new(data), true, false);
    TarReadFs::open(stream).expect("fixture archive opens")
}

#[test]
fn implied_directories_from_single_member() {
    let fs = open_bytes(nested_fixture());
    assert!(fs.isdir("/foo"));
    assert!(fs.isdir("/foo/bar"));
    assert!(fs.isdir("/foo/bar/baz"));
    assert!(fs.isfile("/foo/bar/baz/spam.txt"));
    assert_eq!(fs.listdir("/foo").unwrap(), vec!["bar"]);
    assert_eq!(fs.getinfo("/foo", &[Namespace::Details]).unwrap().size(), 0);
}

#[test]
fn implied_directory_has_no_mtime() {
    let fs = open_bytes(nested_fixture());
    let info = fs.getinfo("/foo", &[Namespace::Details]).unwrap();
    assert!(info.details.unwrap().modified.is_none());
}

#[test]
fn member_window_reads() {
    let fs = open_bytes(nested_fixture());
    assert_eq!(fs.getbytes("/foo/bar/baz/spam.txt").unwrap(), b"bacon");

    let mut handle = fs.openbin("/foo/bar/baz/spam.txt", OpenMode::read()).unwrap();
    handle.seek(SeekFrom::End(-1)).unwrap();
    let mut last = Vec::new();
    handle.read_to_end(&mut last).unwrap();
    assert_eq!(last, b"n");
}

#[test]
fn tar_namespace_exposes_header_fields() {
    let fs = open_bytes(nested_fixture());
    let info = fs
        .getinfo("/foo/bar/baz/spam.txt", &[Namespace::Details, Namespace::Access, Namespace::Tar])
        .unwrap();
    assert_eq!(info.modified(), Some(1_500_000_000));
    assert_eq!(info.permissions(), Some(0o644));
    let Some(FormatInfo::Tar(raw)) = info.format else {
        panic!("tar namespace missing");
    };
    assert!(raw.is_file && !raw.is_dir);
    assert_eq!(raw.size, 5);
    assert_eq!(raw.name, "foo/bar/baz/spam.txt");
}

#[test]
fn implied_directory_has_no_access_namespace() {
    let fs = open_bytes(nested_fixture());
    let info = fs.getinfo("/foo", &[Namespace::Access]).unwrap();
    assert!(info.access.is_none());
}

#[test]
fn openbin_requires_a_real_file() {
    let fs = open_bytes(nested_fixture());
    assert!(matches!(
        fs.openbin("/foo", OpenMode::read()),
        Err(Error::FileExpected { .. })
    ));
    assert!(matches!(
        fs.openbin("/nope", OpenMode::read()),
        Err(Error::ResourceNotFound { .. })
    ));
    assert!(matches!(
        fs.openbin("/foo/bar/baz/spam.txt", OpenMode::write()),
        Err(Error::ResourceReadOnly { .. })
    ));
}

#[test]
fn gzip_container_is_detected_and_inflated() {
    let raw = nested_fixture();
    let mut encoder =
        flate2::write::GzEncoder::new(Cursor::new(Vec::new()), flate2::Compression::default());
    encoder.write_all(&raw).unwrap();
    let compressed = encoder.finish().unwrap().into_inner();

    let fs = open_bytes(compressed);
    assert_eq!(fs.getbytes("/foo/bar/baz/spam.txt").unwrap(), b"bacon");
}

#[test]
fn xz_container_is_detected_and_inflated() {
    let raw = nested_fixture();
    let mut encoder = xz2::write::XzEncoder::new(Cursor::new(Vec::new()), 6);
    encoder.write_all(&raw).unwrap();
    let compressed = encoder.finish().unwrap().into_inner();

    let fs = open_bytes(compressed);
    assert!(fs.isfile("/foo/bar/baz/spam.txt"));
}

#[test]
fn compression_maps() {
    assert_eq!(TarCompression::from_extension(".gz"), TarCompression::Gz);
    assert_eq!(TarCompression::from_extension(".tgz"), TarCompression::Gz);
    assert_eq!(TarCompression::from_extension(".bz2"), TarCompression::Bz2);
    assert_eq!(TarCompression::from_extension(".txz"), TarCompression::Xz);
    assert_eq!(TarCompression::from_extension(".tar"), TarCompression::None);
    assert_eq!(TarCompression::detect(&[0x1f, 0x8b, 0x08]), TarCompression::Gz);
    assert_eq!(TarCompression::detect(b"BZh91AY"), TarCompression::Bz2);
    assert_eq!(TarCompression::detect(b"ustar"), TarCompression::None);
}

#[test]
fn writer_reader_round_trip_uncompressed() {
    let stream = SharedStream::with_capabilities(Cursor::new(Vec::new()), false, true);
    let archive = crate::tarfs::open(crate::archive::ArchiveHandle::shared(stream.clone())).unwrap();
    archive.makedirs("/dir", None).unwrap();
    archive.settext("/dir/file.txt", "contents").unwrap();
    archive.close().unwrap();
    drop(archive);

    let mut written = stream.into_inner().expect("facade released its clones");
    written.seek(SeekFrom::Start(0)).unwrap();
    let reread = TarReadFs::open(SharedStream::with_capabilities(written, true, false)).unwrap();
    assert!(reread.isdir("/dir"));
    assert_eq!(reread.gettext("/dir/file.txt").unwrap(), "contents");
    assert_eq!(reread.gettype("/dir/file.txt").unwrap(), ResourceType::File);
}
