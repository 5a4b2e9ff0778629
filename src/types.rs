//! Shared types used across loading, rendering and dependency tracking.
//!
//! [`ContentPath`] is the identity of a content unit everywhere in the crate:
//! the store is keyed by it, render contexts record it as a dependency, and
//! the persisted dependency graph serializes it as a plain string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::metadata::Metadata;

/// Unique key of one logical content unit: a directory tuple plus a name.
///
/// The directory is relative to the content root (`contents/`), so
/// `contents/blog/2024/post.md` becomes `(["blog", "2024"], "post.md")`.
/// Ordering is by directory first, then name, which keeps listings of the
/// store grouped by directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct ContentPath {
    pub dir: Vec<String>,
    pub name: String,
}

impl ContentPath {
    pub fn new<S: Into<String>>(dir: &[&str], name: S) -> Self {
        Self {
            dir: dir.iter().map(|s| s.to_string()).collect(),
            name: name.into(),
        }
    }

    /// Parse `"a/b/c.md"` (leading slash optional) into `(["a", "b"], "c.md")`.
    ///
    /// No `.`/`..` normalization happens here; use [`ContentPath::resolve`]
    /// for references written by authors.
    pub fn parse(s: &str) -> Self {
        let mut parts: Vec<String> = s
            .split('/')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        let name = parts.pop().unwrap_or_default();
        Self { dir: parts, name }
    }

    /// Resolve an author-written reference against this path's directory.
    ///
    /// - `"/x/y.md"` is absolute from the content root
    /// - `"y.md"`, `"./y.md"`, `"../z/y.md"` are relative to `self.dir`
    ///
    /// Returns `None` when `..` climbs above the content root or the
    /// reference has no final name; callers report that as not found.
    pub fn resolve(&self, reference: &str) -> Option<ContentPath> {
        let (mut stack, rest) = match reference.strip_prefix('/') {
            Some(rest) => (Vec::new(), rest),
            None => (self.dir.clone(), reference),
        };
        for segment in rest.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    stack.pop()?;
                }
                s => stack.push(s.to_string()),
            }
        }
        if matches!(rest.rsplit('/').next(), Some("" | "." | "..")) {
            return None;
        }
        let name = stack.pop()?;
        Some(ContentPath { dir: stack, name })
    }

    /// Absolute reference form (`"/a/b/c.md"`) as accepted by [`resolve`](Self::resolve).
    pub fn to_reference(&self) -> String {
        format!("/{}", self)
    }

    /// True when `prefix` is a leading part of this path's directory.
    pub fn in_dir(&self, prefix: &[String], recurse: bool) -> bool {
        if recurse {
            self.dir.starts_with(prefix)
        } else {
            self.dir == prefix
        }
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.dir {
            write!(f, "{}/", segment)?;
        }
        write!(f, "{}", self.name)
    }
}

impl From<ContentPath> for String {
    fn from(p: ContentPath) -> String {
        p.to_string()
    }
}

impl From<String> for ContentPath {
    fn from(s: String) -> Self {
        ContentPath::parse(&s)
    }
}

/// Normalized load record produced by a loader for one content unit.
///
/// Immutable once the store is built; post-load hooks are the only code
/// allowed to amend `metadata`.
#[derive(Debug, Clone)]
pub struct ContentSource {
    pub contentpath: ContentPath,
    pub metadata: Metadata,
    /// Markup text for HTML-bearing content. `None` for binaries and
    /// metadata-only records; binaries are copied from `source_path`.
    pub body: Option<String>,
    /// Theme directory name this content came from, `None` for the project.
    pub package: Option<String>,
    pub source_path: PathBuf,
    pub mtime: Option<SystemTime>,
}

impl ContentSource {
    /// In-memory source with no backing file. Used by tests and by
    /// loaders that synthesize content.
    pub fn inline(contentpath: ContentPath, metadata: Metadata, body: Option<String>) -> Self {
        Self {
            contentpath,
            metadata,
            body,
            package: None,
            source_path: PathBuf::new(),
            mtime: None,
        }
    }

    /// Modification time in milliseconds since the epoch, if known.
    pub fn mtime_millis(&self) -> Option<i64> {
        self.mtime.map(system_time_millis)
    }
}

/// Milliseconds since the Unix epoch; times before the epoch clamp to zero.
pub fn system_time_millis(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Arguments distinguishing one output of a content from another.
///
/// Every content renders with `PageArgs::default()` except paginated or
/// grouped index pages, which get one `PageArgs` per output page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageArgs {
    /// 1-based page number.
    pub cur_page: usize,
    /// Page count of the listing. Filenames never depend on it, so a link
    /// target built from `page=` leaves it at 1.
    pub num_pages: usize,
    /// Group this page lists, for indexes with `groupby`.
    pub group_value: Option<String>,
    /// Articles shown on this page, in display order.
    pub articles: Vec<ContentPath>,
}

impl Default for PageArgs {
    fn default() -> Self {
        Self {
            cur_page: 1,
            num_pages: 1,
            group_value: None,
            articles: Vec::new(),
        }
    }
}

impl PageArgs {
    /// Key used to cache filenames: two outputs with the same page number
    /// and group share a filename.
    pub fn filename_key(&self) -> String {
        match &self.group_value {
            Some(g) => format!("{}:{}", self.cur_page, g),
            None => self.cur_page.to_string(),
        }
    }
}
