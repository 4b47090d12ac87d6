//! Defines the error taxonomy shared by every archive backend --- [`Error`].

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Result of archive filesystem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed underlying library error, chained as the cause of an [`Error`].
pub type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// Archive filesystem errors.
///
/// Every backend normalises its library errors into this taxonomy; the
/// offending path is carried alongside, and the underlying error (if any)
/// is chained through [`StdError::source`].
#[derive(Debug)]
pub enum Error {
    /// The archive could not be constructed: malformed container, wrong
    /// password at open, or a handle that is neither readable nor
    /// writable.
    CreateFailed { msg: String, cause: Option<Cause> },
    /// The path does not exist.
    ResourceNotFound { path: String },
    /// The operation required a directory, but the path is a file or an
    /// implied non-directory.
    DirectoryExpected { path: String },
    /// The operation required a file, but the path is a directory.
    FileExpected { path: String },
    /// `removedir` was called on a populated directory.
    DirectoryNotEmpty { path: String },
    /// `makedir` without `recreate` on an existing path.
    DirectoryExists { path: String },
    /// A mutation was attempted on a read-only backend.
    ResourceReadOnly { path: String },
    /// A password is needed or invalid for encrypted content.
    PermissionDenied { path: String, cause: Option<Cause> },
    /// A transient or generic codec error during I/O.
    OperationFailed { path: String, cause: Option<Cause> },
    /// The path contains NUL or another container-forbidden character.
    InvalidPath { path: String },
    /// The path normalises to a location outside the root.
    IllegalBackReference { path: String },
    /// The extension is not registered, or the backend is missing.
    Unsupported { what: String },
}

impl Error {
    pub fn create_failed(msg: impl Into<String>) -> Self {
        Error::CreateFailed { msg: msg.into(), cause: None }
    }

    pub fn create_failed_with(msg: impl Into<String>, cause: impl Into<Cause>) -> Self {
        Error::CreateFailed { msg: msg.into(), cause: Some(cause.into()) }
    }

    pub fn not_found(path: impl AsRef<str>) -> Self {
        Error::ResourceNotFound { path: path.as_ref().to_string() }
    }

    pub fn directory_expected(path: impl AsRef<str>) -> Self {
        Error::DirectoryExpected { path: path.as_ref().to_string() }
    }

    pub fn file_expected(path: impl AsRef<str>) -> Self {
        Error::FileExpected { path: path.as_ref().to_string() }
    }

    pub fn directory_not_empty(path: impl AsRef<str>) -> Self {
        Error::DirectoryNotEmpty { path: path.as_ref().to_string() }
    }

    pub fn directory_exists(path: impl AsRef<str>) -> Self {
        Error::DirectoryExists { path: path.as_ref().to_string() }
    }

    pub fn read_only(path: impl AsRef<str>) -> Self {
        Error::ResourceReadOnly { path: path.as_ref().to_string() }
    }

    pub fn permission_denied(path: impl AsRef<str>) -> Self {
        Error::PermissionDenied { path: path.as_ref().to_string(), cause: None }
    }

    pub fn permission_denied_with(path: impl AsRef<str>, cause: impl Into<Cause>) -> Self {
        Error::PermissionDenied { path: path.as_ref().to_string(), cause: Some(cause.into()) }
    }

    pub fn operation_failed(path: impl AsRef<str>) -> Self {
        Error::OperationFailed { path: path.as_ref().to_string(), cause: None }
    }

    pub fn operation_failed_with(path: impl AsRef<str>, cause: impl Into<Cause>) -> Self {
        Error::OperationFailed { path: path.as_ref().to_string(), cause: Some(cause.into()) }
    }

    pub fn invalid_path(path: impl AsRef<str>) -> Self {
        Error::InvalidPath { path: path.as_ref().to_string() }
    }

    pub fn illegal_back_reference(path: impl AsRef<str>) -> Self {
        Error::IllegalBackReference { path: path.as_ref().to_string() }
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Error::Unsupported { what: what.into() }
    }

    /// The path the error reports on, when the kind carries one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::ResourceNotFound { path }
            | Error::DirectoryExpected { path }
            | Error::FileExpected { path }
            | Error::DirectoryNotEmpty { path }
            | Error::DirectoryExists { path }
            | Error::ResourceReadOnly { path }
            | Error::PermissionDenied { path, .. }
            | Error::OperationFailed { path, .. }
            | Error::InvalidPath { path }
            | Error::IllegalBackReference { path } => Some(path),
            Error::CreateFailed { .. } | Error::Unsupported { .. } => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CreateFailed { msg, .. } => write!(f, "unable to create filesystem: {msg}"),
            Error::ResourceNotFound { path } => write!(f, "resource '{path}' not found"),
            Error::DirectoryExpected { path } => write!(f, "path '{path}' should be a directory"),
            Error::FileExpected { path } => write!(f, "path '{path}' should be a file"),
            Error::DirectoryNotEmpty { path } => write!(f, "directory '{path}' is not empty"),
            Error::DirectoryExists { path } => write!(f, "directory '{path}' exists"),
            Error::ResourceReadOnly { path } => write!(f, "resource '{path}' is read-only"),
            Error::PermissionDenied { path, .. } => {
                write!(f, "permission denied on '{path}'")
            }
            Error::OperationFailed { path, .. } => {
                write!(f, "operation failed on '{path}'")
            }
            Error::InvalidPath { path } => write!(f, "path '{path}' is invalid"),
            Error::IllegalBackReference { path } => {
                write!(f, "path '{path}' contains back-references outside of filesystem")
            }
            Error::Unsupported { what } => write!(f, "not supported: {what}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::CreateFailed { cause, .. }
            | Error::PermissionDenied { cause, .. }
            | Error::OperationFailed { cause, .. } => {
                cause.as_ref().map(|c| c.as_ref() as &(dyn StdError + 'static))
            }
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match &err {
            Error::ResourceNotFound { .. } => io::ErrorKind::NotFound,
            Error::ResourceReadOnly { .. } | Error::PermissionDenied { .. } => {
                io::ErrorKind::PermissionDenied
            }
            Error::InvalidPath { .. } | Error::IllegalBackReference { .. } => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
