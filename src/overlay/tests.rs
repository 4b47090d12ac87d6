#![cfg(test)]

use crate::errors::Error;
use crate::info::Namespace;
use crate::memory::MemoryFs;
use crate::overlay::WriteOverlay;
use crate::vfs::Vfs;

/// A read layer seeded with a few fixed resources.
fn seeded_overlay() -> WriteOverlay {
    let read = MemoryFs::new();
    read.settext("/root.txt", "x").unwrap();
    read.makedirs("/deep/nested", None).unwrap();
    read.settext("/deep/nested/file.bin", "payload").unwrap();
    WriteOverlay::new(Box::new(read))
}

#[test]
fn untouched_overlay_mirrors_read_layer() {
    let overlay = seeded_overlay();
    assert!(overlay.exists("/root.txt"));
    assert!(overlay.isdir("/deep"));
    assert_eq!(overlay.gettext("/deep/nested/file.bin").unwrap(), "payload");

    let read = MemoryFs::new();
    read.settext("/root.txt", "x").unwrap();
    assert_eq!(
        overlay.getinfo("/root.txt", &[Namespace::Details]).unwrap().size(),
        read.getinfo("/root.txt", &[Namespace::Details]).unwrap().size()
    );
    assert_eq!(overlay.listdir("/").unwrap().len(), 2);
}

#[test]
fn remove_tombstones_the_read_layer() {
    let overlay = seeded_overlay();
    overlay.remove("/root.txt").expect("remove succeeds");
    assert!(!overlay.exists("/root.txt"));
    assert!(matches!(overlay.getbytes("/root.txt"), Err(Error::ResourceNotFound { .. })));
    assert!(!overlay.listdir("/").unwrap().contains(&"root.txt".to_string()));
}

#[test]
fn recreate_after_remove_clears_the_tombstone() {
    let overlay = seeded_overlay();
    overlay.remove("/root.txt").unwrap();
    overlay.settext("/root.txt", "y").expect("recreate succeeds");
    assert!(overlay.exists("/root.txt"));
    assert_eq!(overlay.gettext("/root.txt").unwrap(), "y");
}

#[test]
fn writes_shadow_the_read_layer() {
    let overlay = seeded_overlay();
    overlay.settext("/root.txt", "updated").unwrap();
    assert_eq!(overlay.gettext("/root.txt").unwrap(), "updated");
    // the listing still shows a single entry for the path
    let names = overlay.listdir("/").unwrap();
    assert_eq!(names.iter().filter(|n| n.as_str() == "root.txt").count(), 1);
}

#[test]
fn append_copies_up_then_appends() {
    let overlay = seeded_overlay();
    overlay.appendbytes("/deep/nested/file.bin", b"-more").unwrap();
    assert_eq!(overlay.gettext("/deep/nested/file.bin").unwrap(), "payload-more");
}

#[test]
fn append_creates_missing_files() {
    let overlay = seeded_overlay();
    overlay.appendbytes("/fresh.log", b"line").unwrap();
    assert_eq!(overlay.getbytes("/fresh.log").unwrap(), b"line");
}

#[test]
fn open_for_write_copies_metadata_up() {
    let overlay = seeded_overlay();
    let before = overlay.getinfo("/deep/nested/file.bin", &[Namespace::Details]).unwrap();
    overlay
        .openbin("/deep/nested/file.bin", crate::mode::OpenMode::parse("r+").unwrap())
        .unwrap();
    let after = overlay.getinfo("/deep/nested/file.bin", &[Namespace::Details]).unwrap();
    assert_eq!(before.size(), after.size());
}

#[test]
fn makedir_rules() {
    let overlay = seeded_overlay();
    assert!(matches!(
        overlay.makedir("/deep", None, false),
        Err(Error::DirectoryExists { .. })
    ));
    overlay.makedir("/deep", None, true).expect("recreate tolerated");
    assert!(matches!(
        overlay.makedir("/nowhere/new", None, false),
        Err(Error::ResourceNotFound { .. })
    ));
    assert!(matches!(
        overlay.makedir("/root.txt/child", None, false),
        Err(Error::DirectoryExpected { .. })
    ));
    overlay.makedir("/fresh", None, false).unwrap();
    assert!(overlay.isdir("/fresh"));
}

#[test]
fn removedir_requires_empty_in_merged_view() {
    let overlay = seeded_overlay();
    assert!(matches!(
        overlay.removedir("/deep"),
        Err(Error::DirectoryNotEmpty { .. })
    ));
    overlay.remove("/deep/nested/file.bin").unwrap();
    overlay.removedir("/deep/nested").unwrap();
    overlay.removedir("/deep").unwrap();
    assert!(!overlay.exists("/deep"));
}

#[test]
fn remove_then_makedir_leaves_a_directory() {
    let overlay = seeded_overlay();
    overlay.remove("/root.txt").unwrap();
    overlay.makedir("/root.txt", None, false).unwrap();
    assert!(overlay.isdir("/root.txt"));
}

#[test]
fn listings_union_both_layers() {
    let overlay = seeded_overlay();
    overlay.settext("/extra.txt", "z").unwrap();
    let mut names = overlay.listdir("/").unwrap();
    names.sort();
    assert_eq!(names, vec!["deep", "extra.txt", "root.txt"]);
}

#[test]
fn scandir_honours_pagination_after_dedup() {
    let overlay = seeded_overlay();
    overlay.settext("/root.txt", "shadowed").unwrap();
    overlay.settext("/aaa.txt", "w").unwrap();
    let all = overlay.scandir("/", &[], None).unwrap();
    assert_eq!(all.len(), 3);
    let page = overlay.scandir("/", &[], Some((0, 2))).unwrap();
    assert_eq!(page.len(), 2);
}

#[test]
fn setinfo_copies_up_only_once() {
    let overlay = seeded_overlay();
    overlay.settext("/root.txt", "fresh").unwrap();
    let update = crate::info::InfoUpdate { modified: Some(7), ..Default::default() };
    overlay.setinfo("/root.txt", &update).unwrap();
    // the scratch copy, not the read layer copy, received the update
    assert_eq!(overlay.gettext("/root.txt").unwrap(), "fresh");
    assert_eq!(overlay.getinfo("/root.txt", &[Namespace::Details]).unwrap().modified(), Some(7));
}

#[test]
fn overlay_meta_is_writable_and_not_thread_safe() {
    let overlay = seeded_overlay();
    let meta = overlay.getmeta();
    assert!(!meta.read_only);
    assert!(!meta.thread_safe);
}
