#![cfg(test)]

use crate::errors::Error;
use crate::path::{
    abspath, basename, dirname, forcedir, frombase, isbase, iteratepath, join, normpath, parts,
    recursepath, relpath, split, splitext, validatepath,
};

#[test]
fn test_normpath() {
    assert_eq!(normpath("/a/b/c").unwrap(), "/a/b/c");
    assert_eq!(normpath("/a/b/../c").unwrap(), "/a/c");
    assert_eq!(normpath("/a/./b//c").unwrap(), "/a/b/c");
    assert_eq!(normpath("/").unwrap(), "/");
    assert_eq!(normpath("a/b/../c").unwrap(), "a/c");
    assert_eq!(normpath("").unwrap(), "");
}

#[test]
fn test_normpath_back_reference() {
    assert!(matches!(normpath("/.."), Err(Error::IllegalBackReference { .. })));
    assert!(matches!(normpath("/a/../.."), Err(Error::IllegalBackReference { .. })));
    assert!(matches!(normpath("../a"), Err(Error::IllegalBackReference { .. })));
}

#[test]
fn test_abspath() {
    assert_eq!(abspath("a/b").unwrap(), "/a/b");
    assert_eq!(abspath("/a/b").unwrap(), "/a/b");
    assert_eq!(abspath("").unwrap(), "/");
}

#[test]
fn test_validatepath() {
    assert_eq!(validatepath("foo/bar", "\0").unwrap(), "/foo/bar");
    assert!(matches!(validatepath("foo\0bar", "\0"), Err(Error::InvalidPath { .. })));
    assert!(matches!(validatepath("foo\u{1}", "\0\u{1}"), Err(Error::InvalidPath { .. })));
}

#[test]
fn test_relpath_forcedir() {
    assert_eq!(relpath("/a/b"), "a/b");
    assert_eq!(relpath("a/b"), "a/b");
    assert_eq!(forcedir("/a"), "/a/");
    assert_eq!(forcedir("/a/"), "/a/");
}

#[test]
fn test_join() {
    assert_eq!(join("/", "foo"), "/foo");
    assert_eq!(join("/foo", "bar"), "/foo/bar");
    assert_eq!(join("/foo/", "bar/baz"), "/foo/bar/baz");
    assert_eq!(join("/foo", ""), "/foo");
}

#[test]
fn test_split_dirname_basename() {
    assert_eq!(split("/foo/bar"), ("/foo".to_string(), "bar".to_string()));
    assert_eq!(split("/foo"), ("/".to_string(), "foo".to_string()));
    assert_eq!(split("/"), ("/".to_string(), "".to_string()));
    assert_eq!(dirname("/foo/bar/baz"), "/foo/bar");
    assert_eq!(basename("/foo/bar/baz"), "baz");
}

#[test]
fn test_isbase_frombase() {
    assert!(isbase("/", "/foo"));
    assert!(isbase("/foo", "/foo/bar"));
    assert!(isbase("/foo", "/foo"));
    assert!(!isbase("/foo", "/foobar"));
    assert_eq!(frombase("/foo", "/foo/bar/baz"), "/bar/baz");
    assert_eq!(frombase("/", "/foo"), "/foo");
    assert_eq!(frombase("/foo", "/foo"), "/");
}

#[test]
fn test_recursepath() {
    assert_eq!(recursepath("/a/b/c"), vec!["/", "/a", "/a/b", "/a/b/c"]);
    assert_eq!(recursepath("/"), vec!["/"]);
}

#[test]
fn test_iteratepath_parts() {
    assert_eq!(iteratepath("/a/b/c"), vec!["a", "b", "c"]);
    assert!(iteratepath("/").is_empty());
    assert_eq!(parts("/a/b"), vec!["/", "a", "b"]);
}

#[test]
fn test_splitext() {
    assert_eq!(splitext("/foo/bar.txt"), ("/foo/bar".to_string(), ".txt".to_string()));
    assert_eq!(splitext("/foo/archive.tar.gz"), ("/foo/archive.tar".to_string(), ".gz".to_string()));
    assert_eq!(splitext("/foo/bar"), ("/foo/bar".to_string(), "".to_string()));
    assert_eq!(splitext("/foo/.hidden"), ("/foo/.hidden".to_string(), "".to_string()));
}
