#![cfg(test)]

use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::archive::{ArchiveHandle, SharedStream};
use crate::errors::Error;
use crate::info::{FormatInfo, Namespace, ResourceType};
use crate::isofs::{IsoOptions, IsoReadFs, RockRidge};
use crate::mode::OpenMode;
use crate::vfs::Vfs;

/// Writes an image through the façade and hands back a readable stream.
fn written_image(options: IsoOptions, populate: impl Fn(&dyn Vfs)) -> IsoReadFs {
    let stream = SharedStream::with_capabilities(Cursor::new(Vec::new()), false, true);
    let archive =
        crate::isofs::open_with(ArchiveHandle::shared(stream.clone()), options, None).unwrap();
    populate(&archive);
    archive.close().unwrap();
    drop(archive);

    let mut inner = stream.into_inner().expect("facade released its clones");
    inner.seek(SeekFrom::Start(0)).unwrap();
    IsoReadFs::open(SharedStream::with_capabilities(inner, true, false)).unwrap()
}

fn unicode_tree(fs: &dyn Vfs) {
    fs.settext("/éé.txt", "accents").unwrap();
    fs.settext("/üü.txt", "umlauts").unwrap();
    fs.settext("/☭☭.txt", "hammers").unwrap();
    fs.makedir("/😋", None, false).unwrap();
    fs.settext("/😋/éé.txt", "nested").unwrap();
}

#[test]
fn rock_ridge_round_trip_keeps_unicode_names() {
    let fs = written_image(IsoOptions::default(), unicode_tree);

    let mut names = fs.listdir("/").unwrap();
    names.sort();
    assert_eq!(names, vec!["éé.txt", "üü.txt", "☭☭.txt", "😋"]);
    assert_eq!(fs.gettext("/éé.txt").unwrap(), "accents");
    assert_eq!(fs.gettext("/üü.txt").unwrap(), "umlauts");
    assert_eq!(fs.gettext("/☭☭.txt").unwrap(), "hammers");
    assert_eq!(fs.gettext("/😋/éé.txt").unwrap(), "nested");
    assert!(fs.isdir("/😋"));
}

#[test]
fn joliet_round_trip_keeps_unicode_names() {
    let options = IsoOptions { interchange_level: 1, joliet: true, rock_ridge: None };
    let fs = written_image(options, unicode_tree);

    let mut names = fs.listdir("/").unwrap();
    names.sort();
    assert_eq!(names, vec!["éé.txt", "üü.txt", "☭☭.txt", "😋"]);
    assert_eq!(fs.gettext("/😋/éé.txt").unwrap(), "nested");
}

#[test]
fn bare_level_one_serves_slugged_names() {
    let options = IsoOptions { interchange_level: 1, joliet: false, rock_ridge: None };
    let fs = written_image(options, |fs| {
        fs.settext("/éé.txt", "accents").unwrap();
        fs.settext("/üü.txt", "umlauts").unwrap();
    });

    // both names slugify to "__.TXT"; the collision resolver must keep
    // them distinct in the base hierarchy
    let mut names = fs.listdir("/").unwrap();
    names.sort();
    assert_eq!(names, vec!["__.txt", "__1.txt"]);

    let mut contents: Vec<String> =
        names.iter().map(|n| fs.gettext(&format!("/{n}")).unwrap()).collect();
    contents.sort();
    assert_eq!(contents, vec!["accents", "umlauts"]);
}

#[test]
fn slugs_stay_injective_under_collisions() {
    let fs = written_image(IsoOptions::default(), |fs| {
        for i in 0..12 {
            fs.settext(&format!("/δατα-{i}.bin"), &format!("payload-{i}")).unwrap();
        }
    });
    let names = fs.listdir("/").unwrap();
    assert_eq!(names.len(), 12);
    for i in 0..12 {
        assert_eq!(fs.gettext(&format!("/δατα-{i}.bin")).unwrap(), format!("payload-{i}"));
    }
}

#[test]
fn nested_directories_round_trip() {
    let fs = written_image(IsoOptions::default(), |fs| {
        fs.makedirs("/a/b/c", None).unwrap();
        fs.settext("/a/b/c/deep.txt", "deep contents").unwrap();
        fs.settext("/a/top.txt", "shallow").unwrap();
    });

    assert!(fs.isdir("/a/b/c"));
    assert_eq!(fs.listdir("/a/b").unwrap(), vec!["c"]);
    assert_eq!(fs.gettext("/a/b/c/deep.txt").unwrap(), "deep contents");
    // resolving a deep path directly must work off the path-table cache
    let fresh = written_image(IsoOptions::default(), |fs| {
        fs.makedirs("/a/b/c", None).unwrap();
        fs.settext("/a/b/c/deep.txt", "deep contents").unwrap();
    });
    assert_eq!(fresh.getbytes("/a/b/c/deep.txt").unwrap(), b"deep contents");
}

#[test]
fn file_handles_share_the_stream_and_clamp_seeks() {
    let fs = written_image(IsoOptions::default(), |fs| {
        fs.settext("/data.bin", "0123456789").unwrap();
    });

    let mut first = fs.openbin("/data.bin", OpenMode::read()).unwrap();
    let mut second = fs.openbin("/data.bin", OpenMode::read()).unwrap();

    first.seek(SeekFrom::Start(5)).unwrap();
    let mut tail = String::new();
    first.read_to_string(&mut tail).unwrap();
    assert_eq!(tail, "56789");

    // the second handle's position is independent
    let mut head = [0u8; 3];
    second.read_exact(&mut head).unwrap();
    assert_eq!(&head, b"012");

    assert_eq!(second.seek(SeekFrom::End(-1)).unwrap(), 9);
    assert_eq!(second.seek(SeekFrom::End(10)).unwrap(), 10);
    assert!(second.seek(SeekFrom::Current(-100)).is_err());
}

#[test]
fn intermediate_file_component_is_directory_expected() {
    let fs = written_image(IsoOptions::default(), |fs| {
        fs.settext("/file.txt", "x").unwrap();
    });
    assert!(matches!(
        fs.getinfo("/file.txt/below", &[]),
        Err(Error::DirectoryExpected { .. })
    ));
    assert!(matches!(fs.getinfo("/missing", &[]), Err(Error::ResourceNotFound { .. })));
}

#[test]
fn details_and_access_namespaces() {
    let fs = written_image(IsoOptions::default(), |fs| {
        fs.settext("/file.txt", "seven b").unwrap();
    });
    let info = fs
        .getinfo("/file.txt", &[Namespace::Details, Namespace::Access, Namespace::Iso])
        .unwrap();
    assert_eq!(info.size(), 7);
    assert_eq!(info.kind(), ResourceType::File);
    assert!(info.modified().is_some());
    assert_eq!(info.permissions(), Some(0o644));

    let Some(FormatInfo::Iso(raw)) = info.format else {
        panic!("iso namespace missing");
    };
    assert!(raw.has_rock_ridge);
    assert_eq!(raw.data_length, 7);
    assert!(!raw.is_dir);
}

#[test]
fn meta_follows_the_selected_hierarchy() {
    let rich = written_image(IsoOptions::default(), |fs| {
        fs.settext("/f", "x").unwrap();
    });
    let meta = rich.getmeta();
    assert!(meta.unicode_paths);
    assert!(!meta.case_insensitive);
    assert_eq!(meta.max_path_length, None);
    assert!(meta.read_only);

    let bare = written_image(
        IsoOptions { interchange_level: 1, joliet: false, rock_ridge: None },
        |fs| {
            fs.settext("/f", "x").unwrap();
        },
    );
    let meta = bare.getmeta();
    assert!(!meta.unicode_paths);
    assert!(meta.case_insensitive);
    assert_eq!(meta.max_path_length, Some(255));
}

#[test]
fn mutation_is_rejected() {
    let fs = written_image(IsoOptions::default(), |fs| {
        fs.settext("/f", "x").unwrap();
    });
    assert!(matches!(fs.remove("/f"), Err(Error::ResourceReadOnly { .. })));
    assert!(matches!(
        fs.openbin("/f", OpenMode::write()),
        Err(Error::ResourceReadOnly { .. })
    ));
}

#[test]
fn overlay_updates_survive_a_rewrite() {
    // write an image, reopen it read-write, mutate, close, reread
    let stream = SharedStream::with_capabilities(Cursor::new(Vec::new()), false, true);
    let archive = crate::isofs::open(ArchiveHandle::shared(stream.clone())).unwrap();
    archive.settext("/keep.txt", "kept").unwrap();
    archive.settext("/drop.txt", "dropped").unwrap();
    archive.close().unwrap();
    drop(archive);
    let mut image = stream.into_inner().unwrap();
    image.seek(SeekFrom::Start(0)).unwrap();

    let rw = SharedStream::new(image);
    let archive = crate::isofs::open(ArchiveHandle::shared(rw.clone())).unwrap();
    assert_eq!(archive.gettext("/keep.txt").unwrap(), "kept");
    archive.remove("/drop.txt").unwrap();
    archive.settext("/new.txt", "fresh").unwrap();
    archive.close().unwrap();
    drop(archive);

    rw.clone().seek(SeekFrom::Start(0)).unwrap();
    let reread = IsoReadFs::open(rw).unwrap();
    let mut names = reread.listdir("/").unwrap();
    names.sort();
    assert_eq!(names, vec!["keep.txt", "new.txt"]);
    assert_eq!(reread.gettext("/keep.txt").unwrap(), "kept");
    assert_eq!(reread.gettext("/new.txt").unwrap(), "fresh");
    assert!(!reread.exists("/drop.txt"));
}
