//! Loaders: turn source files into [`ContentSource`] records.
//!
//! A loader is picked by file extension through the [`LoaderRegistry`];
//! anything without a registered loader is loaded as a binary. One file may
//! yield several contents (a YAML file holding a sequence of mappings).
//!
//! | Extensions | Loader | Body | Default `type` |
//! |------------|--------|------|----------------|
//! | `.md`, `.markdown` | [`MarkdownLoader`] | HTML from markdown | from config (`article`) |
//! | `.html`, `.htm` | [`HtmlLoader`] | verbatim | from config (`article`) |
//! | `.yml`, `.yaml` | [`YamlLoader`] | none | `index` |
//! | anything else | [`BinaryLoader`] | none (bytes copied) | `binary` |
//!
//! Markdown and HTML files may start with YAML (`---`) or TOML (`+++`)
//! front matter.

use pulldown_cmark::{Options, Parser, html};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

use crate::metadata::{self, Metadata, MetadataError};
use crate::types::{ContentPath, ContentSource};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Metadata {
        path: PathBuf,
        source: MetadataError,
    },
    #[error("{path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// Converts one source file into content records.
pub trait Loader: Send + Sync {
    /// Lowercase extensions (with dot) this loader handles.
    fn extensions(&self) -> &[&'static str];

    fn load(&self, path: &Path, contentpath: ContentPath) -> Result<Vec<ContentSource>, LoadError>;
}

fn read_text(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn file_source(path: &Path, contentpath: ContentPath, metadata: Metadata, body: Option<String>) -> ContentSource {
    let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
    ContentSource {
        contentpath,
        metadata,
        body,
        package: None,
        source_path: path.to_path_buf(),
        mtime,
    }
}

fn front_matter(path: &Path, text: &str) -> Result<(Metadata, String), LoadError> {
    let (meta, body) = metadata::parse_front_matter(text).map_err(|source| LoadError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((meta, body.to_string()))
}

// =========================================================================
// Markdown
// =========================================================================

static TEMPLATE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{.*?\}\}|\{%.*?%\}|\{#.*?#\}").expect("template tag pattern must compile")
});

/// Replace template tags with inert placeholders so markdown leaves them alone.
fn protect_template_tags(text: &str) -> (String, Vec<String>) {
    let mut tags = Vec::new();
    let protected = TEMPLATE_TAG.replace_all(text, |caps: &regex::Captures<'_>| {
        tags.push(caps[0].to_string());
        format!("quiretag{}x", tags.len() - 1)
    });
    (protected.into_owned(), tags)
}

fn restore_template_tags(html: &str, tags: &[String]) -> String {
    let mut out = html.to_string();
    for (i, tag) in tags.iter().enumerate().rev() {
        out = out.replace(&format!("quiretag{}x", i), tag);
    }
    out
}

/// Markdown to HTML, leaving `{{ }}`, `{% %}` and `{# #}` untouched.
pub fn markdown_to_html(text: &str) -> String {
    let (protected, tags) = protect_template_tags(text);
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(&protected, options);
    let mut out = String::with_capacity(protected.len() * 3 / 2);
    html::push_html(&mut out, parser);
    restore_template_tags(&out, &tags)
}

pub struct MarkdownLoader;

impl Loader for MarkdownLoader {
    fn extensions(&self) -> &[&'static str] {
        &[".md", ".markdown"]
    }

    fn load(&self, path: &Path, contentpath: ContentPath) -> Result<Vec<ContentSource>, LoadError> {
        let text = read_text(path)?;
        let (meta, body) = front_matter(path, &text)?;
        let html = markdown_to_html(&body);
        Ok(vec![file_source(path, contentpath, meta, Some(html))])
    }
}

// =========================================================================
// HTML
// =========================================================================

pub struct HtmlLoader;

impl Loader for HtmlLoader {
    fn extensions(&self) -> &[&'static str] {
        &[".html", ".htm"]
    }

    fn load(&self, path: &Path, contentpath: ContentPath) -> Result<Vec<ContentSource>, LoadError> {
        let text = read_text(path)?;
        let (meta, body) = front_matter(path, &text)?;
        Ok(vec![file_source(path, contentpath, meta, Some(body))])
    }
}

// =========================================================================
// YAML
// =========================================================================

/// Metadata-only contents. A top-level sequence of mappings yields one
/// content per element, named by its `name` key.
pub struct YamlLoader;

impl YamlLoader {
    fn with_default_type(mut meta: Metadata) -> Metadata {
        meta.entry("type".to_string())
            .or_insert_with(|| Value::String("index".into()));
        meta
    }
}

impl Loader for YamlLoader {
    fn extensions(&self) -> &[&'static str] {
        &[".yml", ".yaml"]
    }

    fn load(&self, path: &Path, contentpath: ContentPath) -> Result<Vec<ContentSource>, LoadError> {
        let text = read_text(path)?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|e| LoadError::Metadata {
            path: path.to_path_buf(),
            source: MetadataError::Yaml(e),
        })?;
        match metadata::yaml_to_json(doc) {
            Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    let Value::Object(map) = item else {
                        return Err(LoadError::Invalid {
                            path: path.to_path_buf(),
                            message: "sequence elements must be mappings".into(),
                        });
                    };
                    let meta: Metadata = map.into_iter().collect();
                    let name = meta
                        .get("name")
                        .map(metadata::value_to_string)
                        .filter(|n| !n.is_empty() && !n.contains('/'))
                        .ok_or_else(|| LoadError::Invalid {
                            path: path.to_path_buf(),
                            message: "sequence elements need a `name` key".into(),
                        })?;
                    let cp = ContentPath {
                        dir: contentpath.dir.clone(),
                        name,
                    };
                    Ok(file_source(path, cp, Self::with_default_type(meta), None))
                })
                .collect(),
            Value::Object(map) => {
                let meta: Metadata = map.into_iter().collect();
                Ok(vec![file_source(path, contentpath, Self::with_default_type(meta), None)])
            }
            Value::Null => Ok(vec![file_source(
                path,
                contentpath,
                Self::with_default_type(Metadata::new()),
                None,
            )]),
            _ => Err(LoadError::Invalid {
                path: path.to_path_buf(),
                message: "YAML content must be a mapping or a sequence of mappings".into(),
            }),
        }
    }
}

// =========================================================================
// Binary
// =========================================================================

pub struct BinaryLoader;

impl Loader for BinaryLoader {
    fn extensions(&self) -> &[&'static str] {
        &[]
    }

    fn load(&self, path: &Path, contentpath: ContentPath) -> Result<Vec<ContentSource>, LoadError> {
        if !path.is_file() {
            return Err(LoadError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a file"),
            });
        }
        let mut meta = Metadata::new();
        meta.insert("type".to_string(), Value::String("binary".into()));
        Ok(vec![file_source(path, contentpath, meta, None)])
    }
}

// =========================================================================
// Registry
// =========================================================================

/// Extension → loader table with a binary fallback.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn Loader>>,
    by_ext: HashMap<&'static str, usize>,
    binary: BinaryLoader,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(MarkdownLoader));
        registry.register(Box::new(HtmlLoader));
        registry.register(Box::new(YamlLoader));
        registry
    }
}

impl LoaderRegistry {
    /// Registry that loads everything as binary.
    pub fn empty() -> Self {
        Self {
            loaders: Vec::new(),
            by_ext: HashMap::new(),
            binary: BinaryLoader,
        }
    }

    /// Register a loader; later registrations take over shared extensions.
    pub fn register(&mut self, loader: Box<dyn Loader>) {
        let idx = self.loaders.len();
        for ext in loader.extensions() {
            self.by_ext.insert(ext, idx);
        }
        self.loaders.push(loader);
    }

    fn for_path(&self, path: &Path) -> &dyn Loader {
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_default();
        match self.by_ext.get(ext.as_str()) {
            Some(&idx) => self.loaders[idx].as_ref(),
            None => &self.binary,
        }
    }

    pub fn load(&self, path: &Path, contentpath: ContentPath) -> Result<Vec<ContentSource>, LoadError> {
        self.for_path(path).load(path, contentpath)
    }

    /// Load as binary regardless of extension (`files/` trees).
    pub fn load_binary(&self, path: &Path, contentpath: ContentPath) -> Result<Vec<ContentSource>, LoadError> {
        self.binary.load(path, contentpath)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn markdown_with_front_matter() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "post.md", "---\ntitle: Hi\n---\n# Head\n\nText *em*\n");
        let loaded = LoaderRegistry::default()
            .load(&path, ContentPath::new(&["blog"], "post.md"))
            .unwrap();
        assert_eq!(loaded.len(), 1);
        let src = &loaded[0];
        assert_eq!(src.metadata["title"], json!("Hi"));
        assert!(!src.metadata.contains_key("type"));
        let body = src.body.as_deref().unwrap();
        assert!(body.contains("<h1>Head</h1>"));
        assert!(body.contains("<em>em</em>"));
        assert!(src.mtime.is_some());
    }

    #[test]
    fn markdown_keeps_template_tags() {
        let html = markdown_to_html("Link: {{ link_to(target=\"a_b.md\") }}\n\n{% if x %}*y*{% endif %}");
        assert!(html.contains("{{ link_to(target=\"a_b.md\") }}"), "{html}");
        assert!(html.contains("{% if x %}<em>y</em>{% endif %}"), "{html}");
    }

    #[test]
    fn html_body_is_verbatim() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "page.html", "+++\ntitle = \"P\"\n+++\n<p>raw</p>\n");
        let loaded = LoaderRegistry::default()
            .load(&path, ContentPath::new(&[], "page.html"))
            .unwrap();
        assert_eq!(loaded[0].metadata["title"], json!("P"));
        assert_eq!(loaded[0].body.as_deref(), Some("<p>raw</p>\n"));
    }

    #[test]
    fn yaml_mapping_defaults_to_index() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "index.yml", "title: Home\nindexpage_max_articles: 3\n");
        let loaded = LoaderRegistry::default()
            .load(&path, ContentPath::new(&[], "index.yml"))
            .unwrap();
        assert_eq!(loaded[0].metadata["type"], json!("index"));
        assert!(loaded[0].body.is_none());
    }

    #[test]
    fn yaml_sequence_splits_into_contents() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "feeds.yml",
            "- name: atom.yml\n  type: feed\n- name: tags.yml\n  groupby: tags\n",
        );
        let loaded = LoaderRegistry::default()
            .load(&path, ContentPath::new(&["x"], "feeds.yml"))
            .unwrap();
        let names: Vec<String> = loaded.iter().map(|s| s.contentpath.to_string()).collect();
        assert_eq!(names, vec!["x/atom.yml", "x/tags.yml"]);
        assert_eq!(loaded[0].metadata["type"], json!("feed"));
        assert_eq!(loaded[1].metadata["type"], json!("index"));
    }

    #[test]
    fn yaml_sequence_without_name_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "bad.yml", "- type: feed\n");
        assert!(matches!(
            LoaderRegistry::default().load(&path, ContentPath::new(&[], "bad.yml")),
            Err(LoadError::Invalid { .. })
        ));
    }

    #[test]
    fn unknown_extension_is_binary() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "logo.svg", "<svg/>");
        let loaded = LoaderRegistry::default()
            .load(&path, ContentPath::new(&[], "logo.svg"))
            .unwrap();
        assert_eq!(loaded[0].metadata["type"], json!("binary"));
        assert!(loaded[0].body.is_none());
    }

    #[test]
    fn load_binary_ignores_extension() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "raw.md", "# not rendered");
        let loaded = LoaderRegistry::default()
            .load_binary(&path, ContentPath::new(&[], "raw.md"))
            .unwrap();
        assert_eq!(loaded[0].metadata["type"], json!("binary"));
    }

    #[test]
    fn bad_front_matter_is_metadata_error() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "x.md", "---\ntitle: [unclosed\n---\nbody");
        assert!(matches!(
            LoaderRegistry::default().load(&path, ContentPath::new(&[], "x.md")),
            Err(LoadError::Metadata { .. })
        ));
    }
}
