//! Filename conventions shared by loaders, URLs and header ids.
//!
//! Three small pure functions live here:
//!
//! - [`split_name`]: `post.md` → (`post`, `.md`), used for `stem`/`ext` metadata
//! - [`escape_filename`]: makes a template-produced filename safe for both
//!   the filesystem and URLs
//! - [`slugify`]: turns heading text into an anchor id
//!
//! ## Escaping
//!
//! Filenames produced by a filename template may embed author data (group
//! values such as tag names, titles). Characters that would change the
//! meaning of a path or a URL are replaced by `%XX` with the byte's
//! uppercase hex value:
//!
//! - `"my post.html"` → `"my%20post.html"`
//! - `"c/c++.html"` → `"c%2Fc++.html"`
//! - `"12:30.html"` → `"12%3A30.html"`
//!
//! `%` itself is escaped too, so the mapping is injective and stable across
//! builds.

/// Characters replaced by [`escape_filename`].
const HOSTILE_CHARS: &[char] = &[
    ' ', '/', '\\', ':', '%', '?', '#', '*', '"', '<', '>', '|', '\t', '\r', '\n',
];

/// Split a file name into stem and extension (extension keeps its dot).
///
/// - `"post.md"` → `("post", ".md")`
/// - `"archive.tar.gz"` → `("archive.tar", ".gz")`
/// - `"README"` → `("README", "")`
/// - `".htaccess"` → `(".htaccess", "")`
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(pos) => (&name[..pos], &name[pos..]),
    }
}

/// Escape path-hostile characters as `%XX`.
pub fn escape_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if HOSTILE_CHARS.contains(&c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Lowercase, ASCII-alphanumeric-and-dash slug of a heading.
///
/// Non-ASCII letters are kept (anchors may be Unicode); runs of anything
/// else collapse to one `-`. Returns `"h"` for text with no usable chars so
/// callers always get a non-empty id.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.trim().chars() {
        if c.is_alphanumeric() || c == '_' {
            if dash && !slug.is_empty() {
                slug.push('-');
            }
            dash = false;
            slug.extend(c.to_lowercase());
        } else {
            dash = true;
        }
    }
    if slug.is_empty() {
        "h".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_simple_extension() {
        assert_eq!(split_name("post.md"), ("post", ".md"));
    }

    #[test]
    fn split_keeps_inner_dots_in_stem() {
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
    }

    #[test]
    fn split_without_extension() {
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name(".htaccess"), (".htaccess", ""));
    }

    #[test]
    fn escape_space_slash_colon() {
        assert_eq!(escape_filename("my post.html"), "my%20post.html");
        assert_eq!(escape_filename("c/c++.html"), "c%2Fc++.html");
        assert_eq!(escape_filename("12:30.html"), "12%3A30.html");
    }

    #[test]
    fn escape_percent_keeps_mapping_injective() {
        assert_eq!(escape_filename("100%.html"), "100%25.html");
        assert_ne!(escape_filename("a b"), escape_filename("a%20b"));
    }

    #[test]
    fn escape_leaves_safe_names_alone() {
        assert_eq!(escape_filename("index_2.html"), "index_2.html");
        assert_eq!(escape_filename("日本.html"), "日本.html");
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Getting   started  "), "getting-started");
        assert_eq!(slugify("snake_case name"), "snake_case-name");
    }

    #[test]
    fn slugify_empty_falls_back() {
        assert_eq!(slugify("!!!"), "h");
        assert_eq!(slugify(""), "h");
    }
}
