#![cfg(test)]

use std::io::{Read, Seek, SeekFrom, Write};

use crate::errors::Error;
use crate::info::Namespace;
use crate::memory::MemoryFs;
use crate::mode::OpenMode;
use crate::vfs::Vfs;

#[test]
fn root_exists_and_is_empty() {
    let fs = MemoryFs::new();
    assert!(fs.isdir("/"));
    assert!(fs.isempty("/").unwrap());
    assert!(fs.listdir("/").unwrap().is_empty());
}

#[test]
fn set_and_get_bytes() {
    let fs = MemoryFs::new();
    fs.setbytes("/file.bin", b"content").expect("write succeeds");
    assert_eq!(fs.getbytes("/file.bin").unwrap(), b"content");
    assert_eq!(fs.getsize("/file.bin").unwrap(), 7);
    assert!(fs.isfile("/file.bin"));
}

#[test]
fn makedir_then_listdir() {
    let fs = MemoryFs::new();
    fs.makedir("/a", None, false).unwrap();
    fs.makedir("/a/b", None, false).unwrap();
    fs.settext("/a/b/c.txt", "x").unwrap();
    assert_eq!(fs.listdir("/").unwrap(), vec!["a"]);
    assert_eq!(fs.listdir("/a").unwrap(), vec!["b"]);
    assert_eq!(fs.listdir("/a/b").unwrap(), vec!["c.txt"]);
}

#[test]
fn makedir_missing_parent_fails() {
    let fs = MemoryFs::new();
    assert!(matches!(
        fs.makedir("/missing/dir", None, false),
        Err(Error::ResourceNotFound { .. })
    ));
}

#[test]
fn makedir_existing_requires_recreate() {
    let fs = MemoryFs::new();
    fs.makedir("/dir", None, false).unwrap();
    assert!(matches!(fs.makedir("/dir", None, false), Err(Error::DirectoryExists { .. })));
    fs.makedir("/dir", None, true).expect("recreate tolerates the directory");
}

#[test]
fn makedirs_is_recursive() {
    let fs = MemoryFs::new();
    fs.makedirs("/x/y/z", None).unwrap();
    assert!(fs.isdir("/x/y/z"));
}

#[test]
fn remove_only_removes_files() {
    let fs = MemoryFs::new();
    fs.makedir("/dir", None, false).unwrap();
    fs.settext("/file", "data").unwrap();
    assert!(matches!(fs.remove("/dir"), Err(Error::FileExpected { .. })));
    fs.remove("/file").unwrap();
    assert!(!fs.exists("/file"));
}

#[test]
fn removedir_requires_empty() {
    let fs = MemoryFs::new();
    fs.makedirs("/a/b", None).unwrap();
    assert!(matches!(fs.removedir("/a"), Err(Error::DirectoryNotEmpty { .. })));
    fs.removedir("/a/b").unwrap();
    fs.removedir("/a").unwrap();
    assert!(!fs.exists("/a"));
}

#[test]
fn removedir_rejects_root() {
    let fs = MemoryFs::new();
    assert!(fs.removedir("/").is_err());
}

#[test]
fn open_missing_file_for_read_fails() {
    let fs = MemoryFs::new();
    assert!(matches!(
        fs.openbin("/nope", OpenMode::read()),
        Err(Error::ResourceNotFound { .. })
    ));
}

#[test]
fn append_mode_appends() {
    let fs = MemoryFs::new();
    fs.setbytes("/log", b"one").unwrap();
    fs.appendbytes("/log", b"two").unwrap();
    assert_eq!(fs.getbytes("/log").unwrap(), b"onetwo");
}

#[test]
fn truncating_write_discards_old_content() {
    let fs = MemoryFs::new();
    fs.setbytes("/f", b"0123456789").unwrap();
    fs.setbytes("/f", b"ab").unwrap();
    assert_eq!(fs.getbytes("/f").unwrap(), b"ab");
}

#[test]
fn handle_writes_are_visible_in_tree() {
    let fs = MemoryFs::new();
    let mut handle = fs.openbin("/f", OpenMode::write()).unwrap();
    handle.write_all(b"hello").unwrap();
    drop(handle);
    assert_eq!(fs.getbytes("/f").unwrap(), b"hello");
}

#[test]
fn handle_seek_and_overwrite() {
    let fs = MemoryFs::new();
    fs.setbytes("/f", b"abcdef").unwrap();
    let mut handle = fs.openbin("/f", OpenMode::parse("r+").unwrap()).unwrap();
    handle.seek(SeekFrom::Start(2)).unwrap();
    handle.write_all(b"XY").unwrap();
    handle.seek(SeekFrom::Start(0)).unwrap();
    let mut out = String::new();
    handle.read_to_string(&mut out).unwrap();
    assert_eq!(out, "abXYef");
}

#[test]
fn getinfo_namespaces() {
    let fs = MemoryFs::new();
    fs.settext("/f", "1234").unwrap();
    let info = fs.getinfo("/f", &[Namespace::Details, Namespace::Access]).unwrap();
    assert_eq!(info.name, "f");
    assert!(!info.is_dir);
    assert_eq!(info.size(), 4);
    assert!(info.details.as_ref().unwrap().modified.is_some());
    assert!(info.access.is_some());

    let bare = fs.getinfo("/f", &[]).unwrap();
    assert!(bare.details.is_none());
    assert!(bare.access.is_none());
}

#[test]
fn setinfo_updates_metadata() {
    let fs = MemoryFs::new();
    fs.settext("/f", "x").unwrap();
    let update = crate::info::InfoUpdate { modified: Some(42), permissions: Some(0o600), ..Default::default() };
    fs.setinfo("/f", &update).unwrap();
    let info = fs.getinfo("/f", &[Namespace::Details, Namespace::Access]).unwrap();
    assert_eq!(info.modified(), Some(42));
    assert_eq!(info.permissions(), Some(0o600));
}

#[test]
fn walk_is_breadth_first() {
    let fs = MemoryFs::new();
    fs.makedirs("/a/b", None).unwrap();
    fs.settext("/a/b/deep.txt", "x").unwrap();
    fs.settext("/top.txt", "y").unwrap();
    let paths: Vec<String> = fs.walk(&[]).unwrap().into_iter().map(|(p, _)| p).collect();
    assert_eq!(paths, vec!["/a", "/top.txt", "/a/b", "/a/b/deep.txt"]);
}

#[test]
fn walk_depth_first_descends_eagerly() {
    use crate::vfs::WalkOrder;

    let fs = MemoryFs::new();
    fs.makedirs("/a/sub", None).unwrap();
    fs.settext("/a/sub/s.txt", "x").unwrap();
    fs.makedirs("/b", None).unwrap();
    fs.settext("/b/y.txt", "y").unwrap();

    let breadth: Vec<String> = fs.walk(&[]).unwrap().into_iter().map(|(p, _)| p).collect();
    assert_eq!(breadth, vec!["/a", "/b", "/a/sub", "/b/y.txt", "/a/sub/s.txt"]);

    let depth: Vec<String> = fs
        .walk_ordered(&[], WalkOrder::Depth)
        .unwrap()
        .into_iter()
        .map(|(p, _)| p)
        .collect();
    assert_eq!(depth, vec!["/a", "/b", "/a/sub", "/a/sub/s.txt", "/b/y.txt"]);
}

#[test]
fn touch_creates_then_refreshes() {
    let fs = MemoryFs::new();
    fs.touch("/marker").unwrap();
    assert!(fs.isfile("/marker"));
    assert_eq!(fs.getsize("/marker").unwrap(), 0);
    fs.touch("/marker").expect("touching an existing file refreshes it");
}

#[test]
fn scandir_pagination() {
    let fs = MemoryFs::new();
    for name in ["a", "b", "c", "d"] {
        fs.settext(&format!("/{name}"), "x").unwrap();
    }
    let page = fs.scandir("/", &[], Some((1, 3))).unwrap();
    let names: Vec<&str> = page.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["b", "c"]);
}
