//! In-memory filesystem used as the overlay's default scratch store ---
//! [`MemoryFs`].

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{Error, Result};
use crate::info::{Access, Details, Info, InfoUpdate, Meta, Namespace, ResourceType};
use crate::mode::OpenMode;
use crate::path::{dirname, iteratepath, validatepath};
use crate::vfs::{now_epoch, VFile, Vfs};

#[cfg(test)]
mod tests;

#[derive(Clone, Default)]
struct NodeMeta {
    modified: Option<i64>,
    accessed: Option<i64>,
    created: Option<i64>,
    permissions: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    user: Option<String>,
    group: Option<String>,
}

impl NodeMeta {
    fn stamped(permissions: Option<u32>) -> NodeMeta {
        let now = now_epoch();
        NodeMeta {
            modified: Some(now),
            created: Some(now),
            permissions,
            ..NodeMeta::default()
        }
    }

    fn apply(&mut self, update: &InfoUpdate) {
        if let Some(modified) = update.modified {
            self.modified = Some(modified);
        }
        if let Some(accessed) = update.accessed {
            self.accessed = Some(accessed);
        }
        if let Some(created) = update.created {
            self.created = Some(created);
        }
        if let Some(permissions) = update.permissions {
            self.permissions = Some(permissions);
        }
        if let Some(uid) = update.uid {
            self.uid = Some(uid);
        }
        if let Some(gid) = update.gid {
            self.gid = Some(gid);
        }
        if let Some(user) = &update.user {
            self.user = Some(user.clone());
        }
        if let Some(group) = &update.group {
            self.group = Some(group.clone());
        }
    }
}

struct DirNode {
    children: BTreeMap<String, Node>,
    meta: NodeMeta,
}

struct FileNode {
    data: Arc<Mutex<Vec<u8>>>,
    meta: NodeMeta,
}

enum Node {
    Dir(DirNode),
    File(FileNode),
}

impl Node {
    fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    fn meta(&self) -> &NodeMeta {
        match self {
            Node::Dir(dir) => &dir.meta,
            Node::File(file) => &file.meta,
        }
    }

    fn meta_mut(&mut self) -> &mut NodeMeta {
        match self {
            Node::Dir(dir) => &mut dir.meta,
            Node::File(file) => &mut file.meta,
        }
    }

    fn size(&self) -> u64 {
        match self {
            Node::Dir(_) => 0,
            Node::File(file) => lock_data(&file.data).len() as u64,
        }
    }
}

fn lock_data(data: &Arc<Mutex<Vec<u8>>>) -> MutexGuard<'_, Vec<u8>> {
    data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An in-memory virtual filesystem.
///
/// File contents are shared with their open handles, so writes through a
/// handle are visible to subsequent reads through the tree.
pub struct MemoryFs {
    root: Mutex<Node>,
}

impl Default for MemoryFs {
    fn default() -> MemoryFs {
        MemoryFs::new()
    }
}

impl MemoryFs {
    pub fn new() -> MemoryFs {
        MemoryFs {
            root: Mutex::new(Node::Dir(DirNode {
                children: BTreeMap::new(),
                meta: NodeMeta::stamped(Some(0o755)),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Node> {
        self.root.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn validate(path: &str) -> Result<String> {
        validatepath(path, "\0")
    }

    fn info_for(name: &str, node: &Node, namespaces: &[Namespace]) -> Info {
        let mut info = Info::new(name, node.is_dir());
        if namespaces.contains(&Namespace::Details) {
            let meta = node.meta();
            info.details = Some(Details {
                size: node.size(),
                kind: Some(if node.is_dir() { ResourceType::Directory } else { ResourceType::File }),
                modified: meta.modified,
                accessed: meta.accessed,
                created: meta.created,
            });
        }
        if namespaces.contains(&Namespace::Access) {
            let meta = node.meta();
            info.access = Some(Access {
                permissions: meta.permissions,
                uid: meta.uid,
                gid: meta.gid,
                user: meta.user.clone(),
                group: meta.group.clone(),
            });
        }
        info
    }
}

fn find<'a>(root: &'a Node, path: &str) -> Option<&'a Node> {
    let mut node = root;
    for component in iteratepath(path) {
        match node {
            Node::Dir(dir) => node = dir.children.get(&component)?,
            Node::File(_) => return None,
        }
    }
    Some(node)
}

fn find_mut<'a>(root: &'a mut Node, path: &str) -> Option<&'a mut Node> {
    let mut node = root;
    for component in iteratepath(path) {
        match node {
            Node::Dir(dir) => node = dir.children.get_mut(&component)?,
            Node::File(_) => return None,
        }
    }
    Some(node)
}

/// Resolves the parent directory of `path` for a mutation.
fn parent_dir<'a>(root: &'a mut Node, path: &str) -> Result<&'a mut DirNode> {
    let parent = dirname(path);
    match find_mut(root, &parent) {
        Some(Node::Dir(dir)) => Ok(dir),
        Some(Node::File(_)) => Err(Error::directory_expected(parent)),
        None => Err(Error::not_found(parent)),
    }
}

impl Vfs for MemoryFs {
    fn getinfo(&self, path: &str, namespaces: &[Namespace]) -> Result<Info> {
        let path = Self::validate(path)?;
        let root = self.lock();
        let node = find(&root, &path).ok_or_else(|| Error::not_found(&path))?;
        let name = crate::path::basename(&path);
        Ok(Self::info_for(&name, node, namespaces))
    }

    fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let path = Self::validate(path)?;
        let root = self.lock();
        match find(&root, &path) {
            Some(Node::Dir(dir)) => Ok(dir.children.keys().cloned().collect()),
            Some(Node::File(_)) => Err(Error::directory_expected(path)),
            None => Err(Error::not_found(path)),
        }
    }

    fn scandir(
        &self,
        path: &str,
        namespaces: &[Namespace],
        page: Option<(usize, usize)>,
    ) -> Result<Vec<Info>> {
        let path = Self::validate(path)?;
        let root = self.lock();
        let entries = match find(&root, &path) {
            Some(Node::Dir(dir)) => dir
                .children
                .iter()
                .map(|(name, node)| Self::info_for(name, node, namespaces))
                .collect::<Vec<_>>(),
            Some(Node::File(_)) => return Err(Error::directory_expected(path)),
            None => return Err(Error::not_found(path)),
        };
        Ok(crate::vfs::page_slice(entries, page))
    }

    fn openbin(&self, path: &str, mode: OpenMode) -> Result<Box<dyn VFile>> {
        let path = Self::validate(path)?;
        let mut root = self.lock();

        if !mode.writing() {
            return match find(&root, &path) {
                Some(Node::File(file)) => Ok(Box::new(MemFile {
                    data: Arc::clone(&file.data),
                    pos: 0,
                    writable: false,
                    append: false,
                })),
                Some(Node::Dir(_)) => Err(Error::file_expected(path)),
                None => Err(Error::not_found(path)),
            };
        }

        match find_mut(&mut root, &path) {
            Some(Node::Dir(_)) => return Err(Error::file_expected(path)),
            Some(Node::File(file)) => {
                if mode.exclusive() {
                    return Err(Error::operation_failed(path));
                }
                if mode.truncate() {
                    lock_data(&file.data).clear();
                }
                file.meta.modified = Some(now_epoch());
                let data = Arc::clone(&file.data);
                let append = mode.appending();
                return Ok(Box::new(MemFile { data, pos: 0, writable: true, append }));
            }
            None => {}
        }

        if !mode.create() {
            return Err(Error::not_found(path));
        }
        let name = crate::path::basename(&path);
        let parent = parent_dir(&mut root, &path)?;
        let data = Arc::new(Mutex::new(Vec::new()));
        parent.children.insert(
            name,
            Node::File(FileNode { data: Arc::clone(&data), meta: NodeMeta::stamped(Some(0o644)) }),
        );
        Ok(Box::new(MemFile { data, pos: 0, writable: true, append: mode.appending() }))
    }

    fn makedir(&self, path: &str, permissions: Option<u32>, recreate: bool) -> Result<()> {
        let path = Self::validate(path)?;
        let mut root = self.lock();
        if path == "/" {
            return if recreate { Ok(()) } else { Err(Error::directory_exists(path)) };
        }
        let name = crate::path::basename(&path);
        let parent = parent_dir(&mut root, &path)?;
        match parent.children.get(&name) {
            Some(Node::Dir(_)) if recreate => Ok(()),
            Some(_) => Err(Error::directory_exists(path)),
            None => {
                parent.children.insert(
                    name,
                    Node::Dir(DirNode {
                        children: BTreeMap::new(),
                        meta: NodeMeta::stamped(permissions.or(Some(0o755))),
                    }),
                );
                Ok(())
            }
        }
    }

    fn remove(&self, path: &str) -> Result<()> {
        let path = Self::validate(path)?;
        let mut root = self.lock();
        if path == "/" {
            return Err(Error::file_expected(path));
        }
        match find(&root, &path) {
            Some(Node::Dir(_)) => return Err(Error::file_expected(path)),
            Some(Node::File(_)) => {}
            None => return Err(Error::not_found(path)),
        }
        let name = crate::path::basename(&path);
        parent_dir(&mut root, &path)?.children.remove(&name);
        Ok(())
    }

    fn removedir(&self, path: &str) -> Result<()> {
        let path = Self::validate(path)?;
        let mut root = self.lock();
        if path == "/" {
            return Err(Error::operation_failed(path));
        }
        match find(&root, &path) {
            Some(Node::Dir(dir)) if !dir.children.is_empty() => {
                return Err(Error::directory_not_empty(path))
            }
            Some(Node::Dir(_)) => {}
            Some(Node::File(_)) => return Err(Error::directory_expected(path)),
            None => return Err(Error::not_found(path)),
        }
        let name = crate::path::basename(&path);
        parent_dir(&mut root, &path)?.children.remove(&name);
        Ok(())
    }

    fn setinfo(&self, path: &str, update: &InfoUpdate) -> Result<()> {
        let path = Self::validate(path)?;
        let mut root = self.lock();
        match find_mut(&mut root, &path) {
            Some(node) => {
                node.meta_mut().apply(update);
                Ok(())
            }
            None => Err(Error::not_found(path)),
        }
    }

    fn getmeta(&self) -> Meta {
        Meta {
            case_insensitive: false,
            unicode_paths: true,
            read_only: false,
            supports_rename: false,
            max_path_length: None,
            invalid_path_chars: "\0",
            thread_safe: true,
            virtual_fs: true,
            network: false,
        }
    }
}

/// A handle over a shared in-memory file buffer.
struct MemFile {
    data: Arc<Mutex<Vec<u8>>>,
    pos: u64,
    writable: bool,
    append: bool,
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = lock_data(&self.data);
        let offset = (self.pos as usize).min(data.len());
        let take = (data.len() - offset).min(buf.len());
        buf[..take].copy_from_slice(&data[offset..offset + take]);
        self.pos += take as u64;
        Ok(take)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "file handle is read-only"));
        }
        let mut data = lock_data(&self.data);
        if self.append {
            self.pos = data.len() as u64;
        }
        let offset = self.pos as usize;
        if offset > data.len() {
            data.resize(offset, 0);
        }
        let overlap = (data.len() - offset).min(buf.len());
        data[offset..offset + overlap].copy_from_slice(&buf[..overlap]);
        data.extend_from_slice(&buf[overlap..]);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let len = lock_data(&self.data).len() as i128;
        let absolute = match target {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => len + delta as i128,
        };
        if absolute < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }
        self.pos = absolute as u64;
        Ok(self.pos)
    }
}
