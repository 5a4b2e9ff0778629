//! URL arithmetic for output links.
//!
//! Output URLs are always built as `site_url + path`, where `path` is a
//! root-relative, normalized, percent-encoded path. Linking from one page
//! to another then reduces to comparing origins and computing a relative
//! path between two such paths ([`relative_path`]).

/// `scheme://host[:port]` and path parts of a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitUrl<'a> {
    pub scheme: &'a str,
    pub host: &'a str,
    pub path: &'a str,
}

/// True for URLs with a scheme (`https:`, `mailto:`) or a network location (`//host`).
pub fn is_absolute(url: &str) -> bool {
    if url.starts_with("//") {
        return true;
    }
    match url.find(':') {
        Some(pos) => {
            let scheme = &url[..pos];
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !url[..pos].contains('/')
        }
        None => false,
    }
}

/// Split `https://example.com/a/b` into scheme, host and path.
///
/// Relative URLs have an empty scheme and host.
pub fn split(url: &str) -> SplitUrl<'_> {
    let (scheme, rest) = match url.find("://") {
        Some(pos) if is_absolute(url) => (&url[..pos], &url[pos + 3..]),
        _ => match url.strip_prefix("//") {
            Some(rest) => ("", rest),
            None => {
                return SplitUrl {
                    scheme: "",
                    host: "",
                    path: url,
                };
            }
        },
    };
    let path_start = rest.find('/').unwrap_or(rest.len());
    SplitUrl {
        scheme,
        host: &rest[..path_start],
        path: &rest[path_start..],
    }
}

/// Normalize `.` and `..` segments of a `/`-separated path.
///
/// Leading and trailing slashes are preserved. `..` above the root is
/// dropped, so the result never climbs out of the root.
pub fn normalize_path(path: &str) -> String {
    let leading = path.starts_with('/');
    let trailing = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    let mut out = String::new();
    if leading {
        out.push('/');
    }
    out.push_str(&stack.join("/"));
    if trailing && !stack.is_empty() {
        out.push('/');
    }
    out
}

/// Percent-encode each segment of a path, keeping the separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a root-relative path onto a base URL ending in `/`.
pub fn join(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    format!("{}/{}", base, path.trim_start_matches('/'))
}

/// Relative reference from the page at `from` to `to` (both root-relative).
///
/// A trailing slash on `to` is kept; linking a page's own directory yields
/// `./`.
pub fn relative_path(from: &str, to: &str) -> String {
    let from_dir: Vec<&str> = {
        let mut parts: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
        if !from.ends_with('/') {
            parts.pop();
        }
        parts
    };
    let mut to_parts: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();
    let to_file = if to.ends_with('/') {
        ""
    } else {
        to_parts.pop().unwrap_or("")
    };

    let common = from_dir
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = "../".repeat(from_dir.len() - common);
    for part in &to_parts[common..] {
        rel.push_str(part);
        rel.push('/');
    }
    rel.push_str(to_file);
    if rel.is_empty() { "./".to_string() } else { rel }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_detection() {
        assert!(is_absolute("https://example.com/x"));
        assert!(is_absolute("//cdn.example.com/x"));
        assert!(is_absolute("mailto:me@example.com"));
        assert!(!is_absolute("/root/relative"));
        assert!(!is_absolute("relative/path.html"));
        assert!(!is_absolute("a/b:c.html"));
    }

    #[test]
    fn split_url_parts() {
        let u = split("https://example.com:8080/a/b.html");
        assert_eq!(u.scheme, "https");
        assert_eq!(u.host, "example.com:8080");
        assert_eq!(u.path, "/a/b.html");
        let u = split("http://example.com");
        assert_eq!(u.path, "");
        let u = split("/a/b");
        assert_eq!((u.scheme, u.host, u.path), ("", "", "/a/b"));
    }

    #[test]
    fn normalize_dots() {
        assert_eq!(normalize_path("/a/b/../abc.html"), "/a/abc.html");
        assert_eq!(normalize_path("/a/./b/"), "/a/b/");
        assert_eq!(normalize_path("/../../x"), "/x");
        assert_eq!(normalize_path("a//b"), "a/b");
    }

    #[test]
    fn encode_keeps_separators() {
        assert_eq!(encode_path("/a b/c%20d.html"), "/a%20b/c%2520d.html");
        assert_eq!(encode_path("/日本/x.html"), "/%E6%97%A5%E6%9C%AC/x.html");
    }

    #[test]
    fn join_base_and_path() {
        assert_eq!(join("https://e.com/blog/", "/a/b.html"), "https://e.com/blog/a/b.html");
        assert_eq!(join("https://e.com/", "x.html"), "https://e.com/x.html");
    }

    #[test]
    fn relative_between_pages() {
        assert_eq!(relative_path("/a/b/doc.html", "/a/abc.html"), "../abc.html");
        assert_eq!(relative_path("/a/b/doc.html", "/a/b/other.html"), "other.html");
        assert_eq!(relative_path("/index.html", "/x/y/z.html"), "x/y/z.html");
        assert_eq!(relative_path("/a/x.html", "/b/y.html"), "../b/y.html");
    }

    #[test]
    fn relative_keeps_trailing_slash() {
        assert_eq!(relative_path("/a/b/doc.html", "/a/"), "../");
        assert_eq!(relative_path("/a/b/doc.html", "/a/b/"), "./");
        assert_eq!(relative_path("/doc.html", "/c/"), "c/");
    }
}
