#![cfg(test)]

use std::io::{Cursor, Seek, SeekFrom};

use crate::archive::{ArchiveHandle, SharedStream};
use crate::errors::Error;
use crate::info::{FormatInfo, Namespace};
use crate::mode::OpenMode;
use crate::sevenzfs::{SevenZOptions, SevenZReadFs};
use crate::vfs::Vfs;

/// Writes a small 7z archive through the façade and hands back its bytes.
fn fixture(options: SevenZOptions) -> Box<dyn crate::archive::Stream> {
    let stream = SharedStream::with_capabilities(Cursor::new(Vec::new()), false, true);
    let archive =
        crate::sevenzfs::open_with(ArchiveHandle::shared(stream.clone()), options, None).unwrap();
    archive.makedirs("/docs", None).unwrap();
    archive.settext("/docs/readme.txt", "seven zip contents").unwrap();
    archive.settext("/empty.bin", "").unwrap();
    archive.close().unwrap();
    drop(archive);
    let mut written = stream.into_inner().expect("facade released its clones");
    written.seek(SeekFrom::Start(0)).unwrap();
    written
}

fn reopen(stream: Box<dyn crate::archive::Stream>, options: SevenZOptions) -> crate::errors::Result<SevenZReadFs> {
    SevenZReadFs::open(SharedStream::with_capabilities(stream, true, false), options)
}

#[test]
fn round_trip_members_and_contents() {
    let written = fixture(SevenZOptions::default());
    let fs = reopen(written, SevenZOptions::default()).unwrap();

    assert!(fs.isdir("/docs"));
    assert!(fs.isfile("/docs/readme.txt"));
    assert_eq!(fs.listdir("/docs").unwrap(), vec!["readme.txt"]);
    assert_eq!(fs.gettext("/docs/readme.txt").unwrap(), "seven zip contents");
}

#[test]
fn empty_member_reads_as_empty_handle() {
    let written = fixture(SevenZOptions::default());
    let fs = reopen(written, SevenZOptions::default()).unwrap();
    // an empty stream yields an empty handle, not a missing-resource error
    assert_eq!(fs.getbytes("/empty.bin").unwrap(), Vec::<u8>::new());
}

#[test]
fn seven_namespace_exposes_attributes() {
    let written = fixture(SevenZOptions::default());
    let fs = reopen(written, SevenZOptions::default()).unwrap();
    let info = fs
        .getinfo("/docs/readme.txt", &[Namespace::Details, Namespace::SevenZ])
        .unwrap();
    assert_eq!(info.size(), 18);
    let Some(FormatInfo::SevenZ(raw)) = info.format else {
        panic!("7z namespace missing");
    };
    assert!(raw.has_stream);
    assert!(!raw.is_empty_stream);
}

#[test]
fn mutation_is_rejected() {
    let written = fixture(SevenZOptions::default());
    let fs = reopen(written, SevenZOptions::default()).unwrap();
    assert!(matches!(fs.remove("/empty.bin"), Err(Error::ResourceReadOnly { .. })));
    assert!(matches!(
        fs.openbin("/docs/readme.txt", OpenMode::write()),
        Err(Error::ResourceReadOnly { .. })
    ));
}

#[test]
fn password_protected_reads() {
    let password = SevenZOptions { password: Some("pwd".to_string()), encrypt_header: false };
    let written = fixture(password.clone());
    let fs = reopen(written, password).unwrap();
    assert_eq!(fs.gettext("/docs/readme.txt").unwrap(), "seven zip contents");
}

#[test]
fn missing_password_is_permission_denied() {
    let protected = SevenZOptions { password: Some("pwd".to_string()), encrypt_header: false };
    let written = fixture(protected);
    let fs = reopen(written, SevenZOptions::default()).unwrap();
    assert!(matches!(
        fs.getbytes("/docs/readme.txt"),
        Err(Error::PermissionDenied { .. })
    ));
}

#[test]
fn wrong_password_is_operation_failed() {
    let protected = SevenZOptions { password: Some("pwd".to_string()), encrypt_header: false };
    let written = fixture(protected);
    let wrong = SevenZOptions { password: Some("password".to_string()), encrypt_header: false };
    let fs = reopen(written, wrong).unwrap();
    assert!(matches!(
        fs.getbytes("/docs/readme.txt"),
        Err(Error::OperationFailed { .. })
    ));
}
