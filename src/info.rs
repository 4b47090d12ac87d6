//! Resource metadata: namespaces, the [`Info`] product, and per-backend
//! capability reports.

use std::collections::BTreeMap;

/// Kind of an archived resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharacterDevice,
    Fifo,
    Socket,
    Unknown,
}

/// Metadata namespace selector.
///
/// A closed set: the three portable namespaces plus one raw namespace per
/// container format. Backends return exactly the namespaces asked for;
/// a name that maps to no variant simply selects nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Always present: name and directory flag.
    Basic,
    /// Size, kind and timestamps.
    Details,
    /// Permissions and ownership.
    Access,
    /// Raw ZIP central-directory fields.
    Zip,
    /// Raw TAR header fields.
    Tar,
    /// Raw 7z entry fields.
    SevenZ,
    /// Raw ISO directory-record fields.
    Iso,
}

impl Namespace {
    /// All namespaces, used by the overlay's copy-up.
    pub const ALL: &'static [Namespace] = &[
        Namespace::Basic,
        Namespace::Details,
        Namespace::Access,
        Namespace::Zip,
        Namespace::Tar,
        Namespace::SevenZ,
        Namespace::Iso,
    ];

    /// Resolves a namespace name; unknown names select nothing.
    pub fn from_name(name: &str) -> Option<Namespace> {
        match name {
            "basic" => Some(Namespace::Basic),
            "details" => Some(Namespace::Details),
            "access" => Some(Namespace::Access),
            "zip" => Some(Namespace::Zip),
            "tar" => Some(Namespace::Tar),
            "7z" => Some(Namespace::SevenZ),
            "iso" => Some(Namespace::Iso),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Namespace::Basic => "basic",
            Namespace::Details => "details",
            Namespace::Access => "access",
            Namespace::Zip => "zip",
            Namespace::Tar => "tar",
            Namespace::SevenZ => "7z",
            Namespace::Iso => "iso",
        }
    }
}

/// `details` namespace: size, kind and timestamps (epoch seconds).
#[derive(Debug, Clone, Default)]
pub struct Details {
    pub size: u64,
    pub kind: Option<ResourceType>,
    pub modified: Option<i64>,
    pub accessed: Option<i64>,
    pub created: Option<i64>,
}

/// `access` namespace: POSIX mode bits and ownership where the container
/// supports them.
#[derive(Debug, Clone, Default)]
pub struct Access {
    pub permissions: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub user: Option<String>,
    pub group: Option<String>,
}

/// Raw ZIP central-directory fields.
#[derive(Debug, Clone, Default)]
pub struct ZipInfo {
    pub compression: String,
    pub crc32: u32,
    pub compressed_size: u64,
    pub file_size: u64,
    pub date_time: Option<(u16, u8, u8, u8, u8, u8)>,
    pub unix_mode: Option<u32>,
}

/// Raw TAR header fields, plus the member-kind booleans.
#[derive(Debug, Clone, Default)]
pub struct TarInfo {
    pub name: String,
    pub size: u64,
    pub mtime: u64,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub uname: Option<String>,
    pub gname: Option<String>,
    pub linkname: Option<String>,
    pub is_file: bool,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub is_block: bool,
    pub is_character: bool,
    pub is_fifo: bool,
}

/// Raw 7z entry fields.
#[derive(Debug, Clone, Default)]
pub struct SevenZInfo {
    pub has_stream: bool,
    pub is_empty_stream: bool,
    pub compressed_size: u64,
    pub crc: u64,
    pub windows_attributes: u32,
}

/// Raw ISO directory-record fields.
#[derive(Debug, Clone, Default)]
pub struct IsoInfo {
    pub identifier: String,
    pub extent_location: u32,
    pub data_length: u32,
    pub is_dir: bool,
    pub hidden: bool,
    pub is_associated: bool,
    pub has_rock_ridge: bool,
    pub link_target: Option<String>,
}

/// Per-format raw metadata, one variant per container namespace.
#[derive(Debug, Clone)]
pub enum FormatInfo {
    Zip(ZipInfo),
    Tar(TarInfo),
    SevenZ(SevenZInfo),
    Iso(IsoInfo),
}

/// Resource metadata: the `basic` namespace inline, every other
/// namespace as an optional sub-record.
#[derive(Debug, Clone)]
pub struct Info {
    /// Basename of the resource.
    pub name: String,
    /// Directory flag.
    pub is_dir: bool,
    pub details: Option<Details>,
    pub access: Option<Access>,
    pub format: Option<FormatInfo>,
}

impl Info {
    pub fn new(name: impl Into<String>, is_dir: bool) -> Info {
        Info { name: name.into(), is_dir, details: None, access: None, format: None }
    }

    pub fn with_details(mut self, details: Details) -> Info {
        self.details = Some(details);
        self
    }

    pub fn with_access(mut self, access: Access) -> Info {
        self.access = Some(access);
        self
    }

    pub fn with_format(mut self, format: FormatInfo) -> Info {
        self.format = Some(format);
        self
    }

    /// Size in bytes; directories and detail-less entries report 0.
    pub fn size(&self) -> u64 {
        self.details.as_ref().map(|d| d.size).unwrap_or(0)
    }

    /// Resource kind, falling back to the directory flag.
    pub fn kind(&self) -> ResourceType {
        match self.details.as_ref().and_then(|d| d.kind) {
            Some(kind) => kind,
            None if self.is_dir => ResourceType::Directory,
            None => ResourceType::File,
        }
    }

    pub fn modified(&self) -> Option<i64> {
        self.details.as_ref().and_then(|d| d.modified)
    }

    pub fn permissions(&self) -> Option<u32> {
        self.access.as_ref().and_then(|a| a.permissions)
    }
}

/// Partial metadata update for [`crate::vfs::Vfs::setinfo`].
#[derive(Debug, Clone, Default)]
pub struct InfoUpdate {
    pub modified: Option<i64>,
    pub accessed: Option<i64>,
    pub created: Option<i64>,
    pub permissions: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl InfoUpdate {
    /// Extracts every settable field from an [`Info`], for copy-up.
    pub fn from_info(info: &Info) -> InfoUpdate {
        let details = info.details.as_ref();
        let access = info.access.as_ref();
        InfoUpdate {
            modified: details.and_then(|d| d.modified),
            accessed: details.and_then(|d| d.accessed),
            created: details.and_then(|d| d.created),
            permissions: access.and_then(|a| a.permissions),
            uid: access.and_then(|a| a.uid),
            gid: access.and_then(|a| a.gid),
            user: access.and_then(|a| a.user.clone()),
            group: access.and_then(|a| a.group.clone()),
        }
    }

    pub fn modified(mut self, epoch: i64) -> InfoUpdate {
        self.modified = Some(epoch);
        self
    }
}

/// Per-filesystem capability report.
#[derive(Debug, Clone)]
pub struct Meta {
    pub case_insensitive: bool,
    pub unicode_paths: bool,
    pub read_only: bool,
    pub supports_rename: bool,
    pub max_path_length: Option<usize>,
    pub invalid_path_chars: &'static str,
    pub thread_safe: bool,
    pub virtual_fs: bool,
    pub network: bool,
}

impl Default for Meta {
    fn default() -> Meta {
        Meta {
            case_insensitive: false,
            unicode_paths: true,
            read_only: false,
            supports_rename: false,
            max_path_length: None,
            invalid_path_chars: "\0",
            thread_safe: true,
            virtual_fs: false,
            network: false,
        }
    }
}

impl Meta {
    /// Renders the report as a name -> value mapping, mirroring the
    /// namespace-keyed queries of the portable metadata surface.
    pub fn entries(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        map.insert("case_insensitive", self.case_insensitive.to_string());
        map.insert("unicode_paths", self.unicode_paths.to_string());
        map.insert("read_only", self.read_only.to_string());
        map.insert("supports_rename", self.supports_rename.to_string());
        map.insert(
            "max_path_length",
            self.max_path_length.map(|n| n.to_string()).unwrap_or_default(),
        );
        map.insert("invalid_path_chars", self.invalid_path_chars.escape_default().to_string());
        map.insert("thread_safe", self.thread_safe.to_string());
        map.insert("virtual", self.virtual_fs.to_string());
        map.insert("network", self.network.to_string());
        map
    }
}
