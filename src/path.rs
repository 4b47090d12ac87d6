//! Total functions over archive paths.
//!
//! Paths are UTF-8 strings with `/` separators, absolute once normalised.
//! Every function here takes normalised input and produces normalised
//! output, so backends can treat the path algebra as closed.

use crate::errors::{Error, Result};

#[cfg(test)]
mod tests;

/// Normalises a path, collapsing `.` and `..` and redundant separators.
///
/// Back-references that would escape the root fail with
/// [`Error::IllegalBackReference`].
pub fn normpath(path: &str) -> Result<String> {
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                if stack.pop().is_none() {
                    return Err(Error::illegal_back_reference(path));
                }
            }
            name => stack.push(name),
        }
    }
    let joined = stack.join("/");
    if absolute {
        Ok(format!("/{joined}"))
    } else if joined.is_empty() {
        Ok(String::new())
    } else {
        Ok(joined)
    }
}

/// Makes a path absolute (relative paths are anchored at the root), then
/// normalises it.
pub fn abspath(path: &str) -> Result<String> {
    if path.starts_with('/') {
        normpath(path)
    } else {
        normpath(&format!("/{path}"))
    }
}

/// Validates and canonicalises a caller-supplied path.
///
/// Characters in `invalid_chars` fail with [`Error::InvalidPath`]; the
/// result is absolute and normalised.
pub fn validatepath(path: &str, invalid_chars: &str) -> Result<String> {
    if path.chars().any(|c| invalid_chars.contains(c)) {
        return Err(Error::invalid_path(path));
    }
    abspath(path)
}

/// Strips the leading separator, making the path relative.
pub fn relpath(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Appends a trailing `/` unless one is already present.
pub fn forcedir(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Joins a parent path and a child name with a single separator.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() || parent == "/" {
        format!("/{}", relpath(name))
    } else if name.is_empty() {
        parent.to_string()
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), relpath(name))
    }
}

/// Splits a path into `(parent, basename)`.
///
/// The root splits into `("/", "")`.
pub fn split(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/".to_string(), trimmed[1..].to_string()),
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

/// The parent directory of a path; the root is its own parent.
pub fn dirname(path: &str) -> String {
    split(path).0
}

/// The final component of a path; empty for the root.
pub fn basename(path: &str) -> String {
    split(path).1
}

/// True iff `base` is the path itself or one of its prefix directories.
pub fn isbase(base: &str, path: &str) -> bool {
    base == "/" || path == base || path.starts_with(&forcedir(base))
}

/// Removes the `base` prefix from `path`, keeping the result absolute.
///
/// Callers must ensure [`isbase`] holds; the full path is returned
/// unchanged otherwise.
pub fn frombase(base: &str, path: &str) -> String {
    if base == "/" || base.is_empty() {
        return path.to_string();
    }
    if path == base {
        return "/".to_string();
    }
    match path.strip_prefix(&forcedir(base)) {
        Some(rest) => format!("/{rest}"),
        None => path.to_string(),
    }
}

/// Every prefix of an absolute path, from `/` down to the path itself.
pub fn recursepath(path: &str) -> Vec<String> {
    let mut prefixes = vec!["/".to_string()];
    let mut current = String::new();
    for component in relpath(path).split('/').filter(|c| !c.is_empty()) {
        current.push('/');
        current.push_str(component);
        prefixes.push(current.clone());
    }
    prefixes
}

/// The individual components of a path, without the root.
pub fn iteratepath(path: &str) -> Vec<String> {
    relpath(path).split('/').filter(|c| !c.is_empty()).map(str::to_string).collect()
}

/// Like [`iteratepath`], but with the root as the first element.
pub fn parts(path: &str) -> Vec<String> {
    let mut all = vec!["/".to_string()];
    all.extend(iteratepath(path));
    all
}

/// Splits the extension off a path: `("archive.tar", ".gz")`.
///
/// A leading dot on the basename does not start an extension.
pub fn splitext(path: &str) -> (String, String) {
    let base = basename(path);
    let last_dot = base.char_indices().skip(1).filter(|(_, c)| *c == '.').map(|(i, _)| i).last();
    match last_dot {
        Some(idx) => {
            let cut = path.len() - (base.len() - idx);
            (path[..cut].to_string(), path[cut..].to_string())
        }
        None => (path.to_string(), String::new()),
    }
}
