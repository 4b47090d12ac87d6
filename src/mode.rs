//! Open-mode strings for binary file handles --- [`OpenMode`].

use crate::errors::{Error, Result};

/// Parsed open mode for [`crate::vfs::Vfs::openbin`].
///
/// Mode strings follow the usual `r`/`w`/`a`/`x` alphabet with an
/// optional `+` for read-write and an optional, ignored `b`/`t` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    reading: bool,
    writing: bool,
    appending: bool,
    create: bool,
    truncate: bool,
    exclusive: bool,
}

impl OpenMode {
    /// Parses a mode string, rejecting unknown or contradictory modes.
    pub fn parse(mode: &str) -> Result<OpenMode> {
        let mut base = None;
        let mut update = false;
        for c in mode.chars() {
            match c {
                'r' | 'w' | 'a' | 'x' => {
                    if base.replace(c).is_some() {
                        return Err(Error::unsupported(format!("mode {mode:?}")));
                    }
                }
                '+' => update = true,
                'b' | 't' => {}
                _ => return Err(Error::unsupported(format!("mode {mode:?}"))),
            }
        }
        let mode = match base {
            Some('r') => OpenMode {
                reading: true,
                writing: update,
                appending: false,
                create: false,
                truncate: false,
                exclusive: false,
            },
            Some('w') => OpenMode {
                reading: update,
                writing: true,
                appending: false,
                create: true,
                truncate: true,
                exclusive: false,
            },
            Some('a') => OpenMode {
                reading: update,
                writing: true,
                appending: true,
                create: true,
                truncate: false,
                exclusive: false,
            },
            Some('x') => OpenMode {
                reading: update,
                writing: true,
                appending: false,
                create: true,
                truncate: false,
                exclusive: true,
            },
            _ => return Err(Error::unsupported(format!("mode {mode:?}"))),
        };
        Ok(mode)
    }

    /// Plain read mode (`r`).
    pub fn read() -> OpenMode {
        OpenMode {
            reading: true,
            writing: false,
            appending: false,
            create: false,
            truncate: false,
            exclusive: false,
        }
    }

    /// Truncating write mode (`w`).
    pub fn write() -> OpenMode {
        OpenMode {
            reading: false,
            writing: true,
            appending: false,
            create: true,
            truncate: true,
            exclusive: false,
        }
    }

    /// Appending write mode (`a`).
    pub fn append() -> OpenMode {
        OpenMode {
            reading: false,
            writing: true,
            appending: true,
            create: true,
            truncate: false,
            exclusive: false,
        }
    }

    pub fn reading(&self) -> bool {
        self.reading
    }

    pub fn writing(&self) -> bool {
        self.writing
    }

    pub fn appending(&self) -> bool {
        self.appending
    }

    pub fn create(&self) -> bool {
        self.create
    }

    pub fn truncate(&self) -> bool {
        self.truncate
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }
}

#[cfg(test)]
mod tests {
    use super::OpenMode;

    #[test]
    fn parse_read() {
        let mode = OpenMode::parse("r").unwrap();
        assert!(mode.reading() && !mode.writing() && !mode.create());
        let mode = OpenMode::parse("rb").unwrap();
        assert!(mode.reading() && !mode.writing());
    }

    #[test]
    fn parse_read_write() {
        let mode = OpenMode::parse("r+").unwrap();
        assert!(mode.reading() && mode.writing() && !mode.create() && !mode.truncate());
    }

    #[test]
    fn parse_write() {
        let mode = OpenMode::parse("wb").unwrap();
        assert!(mode.writing() && mode.create() && mode.truncate());
        assert!(!mode.reading());
    }

    #[test]
    fn parse_append() {
        let mode = OpenMode::parse("a").unwrap();
        assert!(mode.writing() && mode.appending() && mode.create() && !mode.truncate());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(OpenMode::parse("").is_err());
        assert!(OpenMode::parse("z").is_err());
        assert!(OpenMode::parse("rw").is_err());
        assert!(OpenMode::parse("+").is_err());
    }
}
