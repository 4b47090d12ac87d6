//! ISO-compliant name slugging.
//!
//! The base ISO hierarchy only stores short ASCII identifiers, so every
//! source path is mapped to a compliance-escaped *slug*; the slug table
//! keeps the mapping injective by incrementing a trailing digit run on
//! collision. The original Unicode names survive in the Joliet and Rock
//! Ridge hierarchies.

use std::collections::{BTreeMap, BTreeSet};

use crate::path::{join, split};

/// Escapes a name the ISO-9660 way: every non-ASCII code point becomes
/// an underscore.
///
/// `slugify("épatant")` is `"_patant"`.
pub fn slugify(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii() { c } else { '_' }).collect()
}

/// Increments a name to avoid a collision.
///
/// The trailing run of digits of the stem (the extension excluded) is
/// incremented as an integer, or `1` is appended when absent; the stem
/// is cropped so the result still fits `max_length`.
///
/// `increment("foo.txt", false, 8)` is `"foo1.txt"`;
/// `increment("bar10", true, 8)` is `"bar11"`;
/// `increment("bar99", true, 5)` is `"ba100"`.
pub fn increment(name: &str, is_dir: bool, max_length: usize) -> String {
    let (stem, ext) = if !is_dir && name.contains('.') {
        let dot = name.rfind('.').unwrap_or(name.len());
        (&name[..dot], &name[dot..])
    } else {
        (name, "")
    };

    let boundary = stem
        .char_indices()
        .rev()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(0);
    let (base, tag) = stem.split_at(boundary + 1);
    let tag = (tag.parse::<u64>().unwrap_or(0) + 1).to_string();

    let mut base = base.to_string();
    if base.len() + tag.len() > max_length {
        base.truncate(max_length.saturating_sub(tag.len()));
    }
    format!("{base}{tag}{ext}")
}

/// The source-path to stored-slug mapping of one ISO write.
///
/// Guaranteed injective: no two source paths resolve to the same slug.
pub struct SlugTable {
    by_path: BTreeMap<String, String>,
    slugs: BTreeSet<String>,
}

impl Default for SlugTable {
    fn default() -> SlugTable {
        SlugTable::new()
    }
}

impl SlugTable {
    pub fn new() -> SlugTable {
        let mut by_path = BTreeMap::new();
        let mut slugs = BTreeSet::new();
        by_path.insert("/".to_string(), "/".to_string());
        slugs.insert("/".to_string());
        SlugTable { by_path, slugs }
    }

    /// The slug a path resolved to, if it was registered.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    /// Slugifies `path` under its (already slugified) parent, resolving
    /// collisions by [`increment`], and records the result.
    ///
    /// With `strict`, the slug is uppercased (interchange levels 1-3).
    pub fn slugify_path(&mut self, path: &str, is_dir: bool, strict: bool) -> String {
        let (parent, base) = split(path);
        let slug_parent = self.by_path.get(&parent).cloned().unwrap_or_else(|| "/".to_string());

        let mut slug_base = if is_dir {
            truncated(&slugify(&base), 8)
        } else {
            match base.rfind('.') {
                Some(dot) if dot > 0 => {
                    let stem = truncated(&slugify(&base[..dot]), 8);
                    // 8.3: the extension keeps its dot plus at most three
                    // characters
                    format!("{stem}{}", truncated(&slugify(&base[dot..]), 4))
                }
                _ => truncated(&slugify(&base), 8),
            }
        };
        if strict {
            slug_base = slug_base.to_uppercase();
        }

        let mut slug = join(&slug_parent, &slug_base);
        while self.slugs.contains(&slug) {
            slug_base = increment(&slug_base, is_dir, 8);
            slug = join(&slug_parent, &slug_base);
        }

        self.by_path.insert(path.to_string(), slug.clone());
        self.slugs.insert(slug.clone());
        slug
    }
}

fn truncated(name: &str, limit: usize) -> String {
    name.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::{increment, slugify, SlugTable};

    #[test]
    fn slugify_replaces_non_ascii() {
        assert_eq!(slugify("épatant"), "_patant");
        assert_eq!(slugify("☭☭"), "__");
        assert_eq!(slugify("plain"), "plain");
    }

    #[test]
    fn increment_appends_or_bumps_digits() {
        assert_eq!(increment("foo.txt", false, 8), "foo1.txt");
        assert_eq!(increment("bar10", true, 8), "bar11");
        assert_eq!(increment("bar99", true, 5), "ba100");
        assert_eq!(increment("ABC", true, 8), "ABC1");
    }

    #[test]
    fn colliding_slugs_stay_distinct() {
        let mut table = SlugTable::new();
        let first = table.slugify_path("/ébc.txt", false, true);
        let second = table.slugify_path("/àbc.txt", false, true);
        assert_eq!(first, "/_BC.TXT");
        assert_eq!(second, "/_BC1.TXT");
        assert_ne!(first, second);
    }

    #[test]
    fn nested_paths_follow_their_parent_slug() {
        let mut table = SlugTable::new();
        let dir = table.slugify_path("/😋", true, true);
        assert_eq!(dir, "/_");
        let file = table.slugify_path("/😋/éé.txt", false, true);
        assert!(file.starts_with("/_/"), "file slug was {file}");
    }

    #[test]
    fn injective_over_many_collisions() {
        let mut table = SlugTable::new();
        let mut seen = std::collections::BTreeSet::new();
        for i in 0..32 {
            let slug = table.slugify_path(&format!("/ünïque-{i:02}.txt"), false, true);
            assert!(seen.insert(slug.clone()), "slug {slug} repeated");
        }
    }
}
