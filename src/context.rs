//! Per-output render state.
//!
//! A [`BuildContext`] exists for one output file: one content, or one page
//! of a paginated index. It records every content the render reads (the
//! forward dependency edges persisted by [`crate::depends`]), memoizes
//! derived values, and owns the rendered-HTML cache with its recursion
//! guard.
//!
//! ## Rendered HTML cache
//!
//! Each content's HTML is tracked as [`CacheState`]:
//!
//! ```text
//! NotStarted ──get_html──▶ InProgress ──render ok──▶ Done(html, headers)
//!                              │
//!                              └── re-entered: sentinel, no recursion
//! ```
//!
//! A template that asks for the headers of the content being rendered
//! (`link_to(target=".", fragment="Intro")` inside its own body) hits
//! `InProgress` and gets an empty sentinel instead of recursing.
//!
//! ## Links
//!
//! | Call | Result |
//! |------|--------|
//! | [`url`](BuildContext::url) | absolute URL: `site_url` + encoded path |
//! | [`path_to`](BuildContext::path_to) | relative path from the current page, or absolute when cross-origin, asked for, or rendering a feed |
//!
//! The lock around the shared state is never held while rendering, so
//! template functions called during a render can take it again.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, ConfigError};
use crate::content::{Content, ContentKind, OutputStrategy};
use crate::feed;
use crate::functions;
use crate::html::{self, Header, HtmlError};
use crate::metadata;
use crate::naming;
use crate::site::Site;
use crate::store::ContentNotFound;
use crate::template::TemplateError;
use crate::types::{ContentPath, PageArgs};
use crate::url;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    NotFound(#[from] ContentNotFound),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("IO error writing {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Output path escapes the output directory: {0}")]
    OutputEscapesRoot(String),
    #[error("Malformed HTML in {content}: {source}")]
    Html { content: ContentPath, source: HtmlError },
    #[error("Feed {content}: {message}")]
    Feed { content: ContentPath, message: String },
    #[error("{function}(): {message}")]
    Argument { function: &'static str, message: String },
}

impl RenderError {
    /// Name of the error class, as shown in build reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(ConfigError::NotFound { .. }) => "ConfigNotFound",
            Self::Config(ConfigError::Io { .. }) => "IoError",
            Self::Config(_) => "ValueError",
            Self::NotFound(_) => "ContentNotFound",
            Self::Template(_) => "TemplateError",
            Self::Io { .. } => "IoError",
            Self::OutputEscapesRoot(_) => "OutputPathError",
            Self::Html { .. } | Self::Feed { .. } | Self::Argument { .. } => "ValueError",
        }
    }

    pub fn argument(function: &'static str, message: impl Into<String>) -> Self {
        Self::Argument {
            function,
            message: message.into(),
        }
    }
}

/// Rendered body of one content with its header anchors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Rendered {
    pub html: String,
    pub headers: Vec<Header>,
}

#[derive(Debug, Clone)]
pub enum CacheState {
    NotStarted,
    InProgress,
    Done(Arc<Rendered>),
}

#[derive(Debug, Default)]
struct RenderState {
    depends: BTreeSet<ContentPath>,
    always_rebuild: bool,
    cache: HashMap<(String, ContentPath), Value>,
    html: HashMap<ContentPath, CacheState>,
    /// Typed error raised inside a template function, reported in place of
    /// the generic template error Tera wraps it in.
    pending_error: Option<RenderError>,
}

/// Render state for one output. Clones share the same state.
#[derive(Debug, Clone)]
pub struct BuildContext {
    site: Arc<Site>,
    page: ContentPath,
    args: PageArgs,
    force_abs: bool,
    state: Arc<Mutex<RenderState>>,
}

fn dir_prefix(dir: &[String]) -> String {
    if dir.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", dir.join("/"))
    }
}

/// `dir/filename` relative to the output root, or `None` if `..` segments
/// climb out of it.
fn output_relative(dir: &[String], filename: &str) -> Option<PathBuf> {
    let mut stack: Vec<&str> = Vec::new();
    for segment in dir.iter().map(String::as_str).chain(filename.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop()?;
            }
            s => stack.push(s),
        }
    }
    if stack.is_empty() {
        return None;
    }
    Some(stack.iter().collect())
}

impl BuildContext {
    pub fn new(site: Arc<Site>, page: ContentPath, args: PageArgs) -> Self {
        let state = RenderState {
            depends: BTreeSet::from([page.clone()]),
            ..RenderState::default()
        };
        Self {
            site,
            page,
            args,
            force_abs: false,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Make every link absolute (feed output).
    pub fn with_absolute_links(mut self) -> Self {
        self.force_abs = true;
        self
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn config(&self) -> &Config {
        &self.site.config
    }

    pub fn page(&self) -> &ContentPath {
        &self.page
    }

    pub fn args(&self) -> &PageArgs {
        &self.args
    }

    pub fn page_content(&self) -> Result<&Content, RenderError> {
        Ok(self.site.store.get_path(&self.page)?)
    }

    // =====================================================================
    // Recorded state
    // =====================================================================

    pub fn add_depend(&self, path: &ContentPath) {
        self.state.lock().depends.insert(path.clone());
    }

    pub fn depends(&self) -> BTreeSet<ContentPath> {
        self.state.lock().depends.clone()
    }

    /// Flag the output as depending on something outside the site (clock,
    /// environment), so it is rebuilt every time.
    pub fn mark_always_rebuild(&self) {
        self.state.lock().always_rebuild = true;
    }

    pub fn is_always_rebuild(&self) -> bool {
        self.state.lock().always_rebuild
    }

    pub fn get_cache(&self, name: &str, path: &ContentPath) -> Option<Value> {
        self.state
            .lock()
            .cache
            .get(&(name.to_string(), path.clone()))
            .cloned()
    }

    pub fn set_cache(&self, name: &str, path: &ContentPath, value: Value) {
        self.state
            .lock()
            .cache
            .insert((name.to_string(), path.clone()), value);
    }

    /// Keep the first typed error raised by a template function.
    pub(crate) fn stash_error(&self, error: RenderError) {
        let mut state = self.state.lock();
        if state.pending_error.is_none() {
            state.pending_error = Some(error);
        }
    }

    /// Prefer a stashed typed error over the template error wrapping it.
    fn finish_render(&self, result: Result<String, TemplateError>) -> Result<String, RenderError> {
        let pending = self.state.lock().pending_error.take();
        match (result, pending) {
            (Ok(text), _) => Ok(text),
            (Err(_), Some(err)) => Err(err),
            (Err(err), None) => Err(err.into()),
        }
    }

    /// Resolve `reference` against `base` and record the dependency.
    pub fn resolve(&self, reference: &str, base: &ContentPath) -> Result<&Content, RenderError> {
        let content = self.site.store.get(reference, Some(base))?;
        self.add_depend(content.path());
        Ok(content)
    }

    // =====================================================================
    // HTML, headers, abstracts
    // =====================================================================

    /// Rendered body of `content`, computed once per context.
    pub fn get_html(&self, content: &Content) -> Result<Arc<Rendered>, RenderError> {
        let path = content.path();
        self.add_depend(path);
        {
            let mut state = self.state.lock();
            match state.html.get(path).cloned().unwrap_or(CacheState::NotStarted) {
                CacheState::Done(rendered) => return Ok(rendered),
                CacheState::InProgress => {
                    debug!(content = %path, "recursive html reference");
                    return Ok(Arc::new(Rendered::default()));
                }
                CacheState::NotStarted => {
                    state.html.insert(path.clone(), CacheState::InProgress);
                }
            }
        }

        let result = self.render_html(content);
        let mut state = self.state.lock();
        match result {
            Ok(rendered) => {
                let rendered = Arc::new(rendered);
                state
                    .html
                    .insert(path.clone(), CacheState::Done(rendered.clone()));
                Ok(rendered)
            }
            Err(err) => {
                state.html.remove(path);
                Err(err)
            }
        }
    }

    fn render_html(&self, content: &Content) -> Result<Rendered, RenderError> {
        let body = self.render_body(content)?;
        if body.trim().is_empty() {
            return Ok(Rendered::default());
        }
        let short = content.get_bool(self.config(), "short_header_id")?;
        let (html, headers) = html::add_header_ids(&body, &content.path().to_string(), short)
            .map_err(|source| RenderError::Html {
                content: content.path().clone(),
                source,
            })?;
        Ok(Rendered { html, headers })
    }

    /// Evaluate the content's body as a template, with its imports.
    fn render_body(&self, content: &Content) -> Result<String, RenderError> {
        let Some(body) = content.body() else {
            return Ok(String::new());
        };
        let config = self.config();
        let mut imports = Vec::new();
        if let Some(raw) = content.source().metadata.get("imports")
            && let Value::Array(own) = config.format_value(content.dir(), "imports", raw)?
        {
            imports.extend(own.iter().map(metadata::value_to_string));
        }
        for module in config.get_list(content.dir(), "imports")? {
            if !imports.contains(&module) {
                imports.push(module);
            }
        }

        let context = self.template_context(content)?;
        let result = self.site.templates.render_inline(
            &content.path().to_string(),
            body,
            &imports,
            &context,
            |tera| functions::register(tera, self, content.path()),
        );
        self.finish_render(result)
    }

    pub fn get_headers(&self, content: &Content) -> Result<Vec<Header>, RenderError> {
        Ok(self.get_html(content)?.headers.clone())
    }

    /// Body truncated to `length` visible characters; `None` uses
    /// `abstract_length`, `0` keeps everything.
    pub fn get_abstract(&self, content: &Content, length: Option<usize>) -> Result<String, RenderError> {
        let length = match length {
            Some(n) => n,
            None => content.get_int(self.config(), "abstract_length")?.max(0) as usize,
        };
        let cache_name = format!("abstract:{}", length);
        if let Some(Value::String(text)) = self.get_cache(&cache_name, content.path()) {
            self.add_depend(content.path());
            return Ok(text);
        }
        let rendered = self.get_html(content)?;
        let text = html::truncate(&rendered.html, length).map_err(|source| RenderError::Html {
            content: content.path().clone(),
            source,
        })?;
        self.set_cache(&cache_name, content.path(), Value::String(text.clone()));
        Ok(text)
    }

    /// `title` metadata, else per `title_fallback`.
    pub fn title(&self, content: &Content) -> Result<String, RenderError> {
        if let Some(v) = content.source().metadata.get("title") {
            let title = metadata::value_to_string(v);
            if !title.is_empty() {
                return Ok(title);
            }
        }
        let mode = content.get_str(self.config(), "title_fallback")?;
        let first_header = |ctx: &Self| -> Result<Option<String>, RenderError> {
            Ok(ctx.get_headers(content)?.into_iter().next().map(|h| h.text))
        };
        match mode.as_str() {
            "filename" => Ok(content.stem()),
            "header" => Ok(first_header(self)?.unwrap_or_default()),
            "header_or_filename" => Ok(first_header(self)?.unwrap_or_else(|| content.stem())),
            _ => Err(ConfigError::invalid(
                "title_fallback",
                &Value::String(mode),
                "expected filename, header or header_or_filename",
            )
            .into()),
        }
    }

    // =====================================================================
    // Filenames, output paths, URLs
    // =====================================================================

    /// Output file name of `content` for `args`.
    ///
    /// Explicit `filename` metadata is used verbatim, except for index
    /// pages past the first or of a group, which always go through the
    /// filename templates. Template output is escaped with
    /// [`naming::escape_filename`].
    pub fn filename(&self, content: &Content, args: &PageArgs) -> Result<String, RenderError> {
        let cache_name = format!("filename:{}", args.filename_key());
        if let Some(Value::String(name)) = self.get_cache(&cache_name, content.path()) {
            return Ok(name);
        }
        let config = self.config();
        let paged = content.kind() == ContentKind::Index
            && (args.cur_page > 1 || args.group_value.is_some());

        let name = match content.source().metadata.get("filename") {
            Some(explicit) if !paged => metadata::value_to_string(explicit),
            _ => {
                let keys = content.kind().filename_template_keys(args);
                let mut template = None;
                for key in keys {
                    if let Some(v) = content.get_opt(config, key)? {
                        let text = metadata::value_to_string(&v);
                        if !text.is_empty() {
                            template = Some(text);
                            break;
                        }
                    }
                }
                let template = template.ok_or_else(|| ConfigError::NotFound {
                    key: keys[0].to_string(),
                    dir: content.path().to_string(),
                })?;

                let mut context = tera::Context::new();
                context.insert("content", &self.name_proxy(content)?);
                context.insert("cur_page", &args.cur_page);
                context.insert("group_value", &args.group_value);
                let rendered = self.site.templates.render_inline(
                    &format!("{}:{}", content.path(), keys[0]),
                    &template,
                    &[],
                    &context,
                    |_| {},
                )?;
                naming::escape_filename(rendered.trim())
            }
        };
        self.set_cache(&cache_name, content.path(), Value::String(name.clone()));
        Ok(name)
    }

    /// Path of the output file relative to the output root.
    pub fn output_path(&self, content: &Content, args: &PageArgs) -> Result<PathBuf, RenderError> {
        let filename = self.filename(content, args)?;
        output_relative(content.dir(), &filename)
            .ok_or_else(|| RenderError::OutputEscapesRoot(format!("{}{}", dir_prefix(content.dir()), filename)))
    }

    /// Root-relative, encoded URL path, or an absolute `canonical_url`.
    fn url_path(&self, content: &Content, args: &PageArgs) -> Result<String, RenderError> {
        let first_page = args.cur_page <= 1 && args.group_value.is_none();
        if first_page && let Some(canonical) = content.source().metadata.get("canonical_url") {
            let canonical = metadata::value_to_string(canonical);
            if url::is_absolute(&canonical) || canonical.starts_with('/') {
                return Ok(canonical);
            }
            let dir = url::encode_path(&dir_prefix(content.dir()));
            return Ok(url::normalize_path(&format!("{}{}", dir, canonical)));
        }

        let filename = self.filename(content, args)?;
        let mut path = url::normalize_path(&format!("{}{}", dir_prefix(content.dir()), filename));
        let strip = content.get_str(self.config(), "strip_index_filename")?;
        if !strip.is_empty() && path.rsplit('/').next() == Some(strip.as_str()) {
            path.truncate(path.len() - strip.len());
        }
        Ok(url::encode_path(&path))
    }

    /// Absolute URL of `content` for `args`.
    pub fn url(&self, content: &Content, args: &PageArgs) -> Result<String, RenderError> {
        let path = self.url_path(content, args)?;
        if url::is_absolute(&path) {
            return Ok(path);
        }
        let site_url = content.get_str(self.config(), "site_url")?;
        Ok(url::join(&site_url, &path))
    }

    /// Link from the current page to `target`'s first page.
    pub fn path_to(&self, target: &Content, fragment: Option<&str>, abs: bool) -> Result<String, RenderError> {
        self.path_to_page(target, &PageArgs::default(), fragment, abs)
    }

    /// Link from the current page to one page of `target`.
    ///
    /// Absolute when `abs`, `use_abs_path`, a feed render, or when the two
    /// URLs differ in scheme or host; relative otherwise. A fragment naming
    /// a header's text is replaced by that header's id.
    pub fn path_to_page(
        &self,
        target: &Content,
        args: &PageArgs,
        fragment: Option<&str>,
        abs: bool,
    ) -> Result<String, RenderError> {
        self.add_depend(target.path());
        let page = self.page_content()?;
        let target_url = self.url(target, args)?;
        let page_url = self.url(page, &self.args)?;

        let from = url::split(&page_url);
        let to = url::split(&target_url);
        let absolute = abs
            || self.force_abs
            || from.scheme != to.scheme
            || from.host != to.host
            || page.get_bool(self.config(), "use_abs_path")?;
        let mut link = if absolute {
            target_url.clone()
        } else {
            url::relative_path(from.path, to.path)
        };

        if let Some(fragment) = fragment.filter(|f| !f.is_empty()) {
            link.push('#');
            link.push_str(&self.resolve_fragment(target, fragment)?);
        }
        Ok(link)
    }

    pub(crate) fn resolve_fragment(&self, target: &Content, fragment: &str) -> Result<String, RenderError> {
        let headers = self.get_headers(target)?;
        if headers.iter().any(|h| h.id == fragment) {
            return Ok(fragment.to_string());
        }
        Ok(headers
            .iter()
            .find(|h| h.text == fragment)
            .map(|h| h.id.clone())
            .unwrap_or_else(|| fragment.to_string()))
    }

    // =====================================================================
    // Template bindings
    // =====================================================================

    /// Fields available while a filename template is rendered: no URL or
    /// title, since both depend on the filename.
    fn name_proxy(&self, content: &Content) -> Result<Map<String, Value>, RenderError> {
        let config = self.config();
        let mut map = content.formatted_metadata(config)?;
        let path = content.path();
        map.insert("name".into(), Value::String(path.name.clone()));
        map.insert("dir".into(), json!(path.dir));
        map.insert("path".into(), Value::String(path.to_string()));
        map.insert("reference".into(), Value::String(path.to_reference()));
        map.insert("stem".into(), Value::String(content.stem()));
        map.insert("ext".into(), Value::String(content.ext(config)?));
        map.insert("type".into(), Value::String(content.kind().to_string()));
        Ok(map)
    }

    /// Template view of a content. Records `content` as a dependency.
    pub fn proxy(&self, content: &Content) -> Result<Value, RenderError> {
        self.add_depend(content.path());
        let config = self.config();
        let mut map = self.name_proxy(content)?;
        map.insert("title".into(), Value::String(self.title(content)?));
        let args = PageArgs::default();
        map.insert("filename".into(), Value::String(self.filename(content, &args)?));
        map.insert("url".into(), Value::String(self.url(content, &args)?));
        let date = content.date(config)?.map(|d| d.to_rfc3339());
        map.insert("date".into(), json!(date));
        map.insert("tags".into(), json!(content.get_list(config, "tags")?));
        map.insert("package".into(), json!(content.source().package));
        Ok(Value::Object(map))
    }

    fn site_binding(&self, dir: &[String]) -> Result<Value, RenderError> {
        let config = self.config();
        Ok(json!({
            "title": config.get_str(dir, "site_title")?,
            "url": config.get_str(dir, "site_url")?,
            "lang": config.get_str(dir, "lang")?,
            "charset": config.get_str(dir, "charset")?,
        }))
    }

    /// `content`, `page` and `site` bindings.
    fn template_context(&self, content: &Content) -> Result<tera::Context, RenderError> {
        let mut context = tera::Context::new();
        context.insert("content", &self.proxy(content)?);
        context.insert("page", &self.proxy(self.page_content()?)?);
        context.insert("site", &self.site_binding(content.dir())?);
        Ok(context)
    }

    // =====================================================================
    // Output
    // =====================================================================

    /// Render the page content through its page template.
    pub fn render_page(&self) -> Result<String, RenderError> {
        let content = self.page_content()?;
        let config = self.config();
        let rendered = self.get_html(content)?;
        let mut context = self.template_context(content)?;
        context.insert("html", &rendered.html);
        context.insert("headers", &rendered.headers);
        context.insert("cur_page", &self.args.cur_page);
        context.insert("num_pages", &self.args.num_pages);
        context.insert("group_value", &self.args.group_value);

        let template_key = if content.kind() == ContentKind::Index {
            let articles = self
                .args
                .articles
                .iter()
                .map(|p| self.proxy(self.site.store.get_path(p)?))
                .collect::<Result<Vec<_>, RenderError>>()?;
            context.insert("articles", &articles);
            let neighbour = |page: usize| -> Result<Option<String>, RenderError> {
                if page < 1 || page > self.args.num_pages {
                    return Ok(None);
                }
                let args = PageArgs {
                    cur_page: page,
                    num_pages: self.args.num_pages,
                    group_value: self.args.group_value.clone(),
                    articles: Vec::new(),
                };
                self.path_to_page(content, &args, None, false).map(Some)
            };
            context.insert("prev_url", &neighbour(self.args.cur_page - 1)?);
            context.insert("next_url", &neighbour(self.args.cur_page + 1)?);
            "index_template"
        } else {
            context.insert("articles", &Vec::<Value>::new());
            context.insert("prev_url", &Value::Null);
            context.insert("next_url", &Value::Null);
            "article_template"
        };

        let template = content.get_str(config, template_key)?;
        let result = self.site.templates.render(&template, &context, |tera| {
            functions::register(tera, self, content.path())
        });
        self.finish_render(result)
    }

    /// Produce this context's output file and return the paths written.
    pub fn build(&self) -> Result<Vec<PathBuf>, RenderError> {
        let content = self.page_content()?;
        self.site.hooks.pre_build(content, &self.args);

        let bytes = match content.kind().output() {
            OutputStrategy::None => return Ok(Vec::new()),
            OutputStrategy::Copy => {
                let source = &content.source().source_path;
                fs::read(source).map_err(|e| RenderError::Io {
                    path: source.clone(),
                    source: e,
                })?
            }
            OutputStrategy::Page => self.render_page()?.into_bytes(),
            OutputStrategy::Feed => feed::render(self, content)?,
        };

        let path = self.site.paths.output.join(self.output_path(content, &self.args)?);
        write_file(&path, &bytes)?;
        if self.site.hooks.has_post_build() {
            let rewritten = self.site.hooks.post_build(content, &path, bytes.clone());
            if rewritten != bytes {
                write_file(&path, &rewritten)?;
            }
        }
        debug!(content = %content.path(), path = %path.display(), "written");
        Ok(vec![path])
    }
}

fn write_file(path: &std::path::Path, bytes: &[u8]) -> Result<(), RenderError> {
    let io_err = |source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, bytes).map_err(io_err)
}

/// Current time for the `now()` template function.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{layer, site_with, source};
    use serde_json::json;
    use tempfile::TempDir;

    fn ctx_for(site: &Arc<Site>, reference: &str) -> BuildContext {
        BuildContext::new(site.clone(), ContentPath::parse(reference), PageArgs::default())
    }

    // =========================================================================
    // Filenames and URLs
    // =========================================================================

    #[test]
    fn filename_from_template_and_escaped() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![source(&["blog"], "my post.md", &[], Some("x"))],
        );
        let ctx = ctx_for(&site, "blog/my post.md");
        let content = ctx.page_content().unwrap();
        assert_eq!(ctx.filename(content, &PageArgs::default()).unwrap(), "my%20post.html");
        assert_eq!(
            ctx.url(content, &PageArgs::default()).unwrap(),
            "http://localhost:8888/blog/my%2520post.html"
        );
    }

    #[test]
    fn explicit_filename_is_verbatim_and_relative_to_dir() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::new();
        config.add_root_layer(layer(&[("site_url", json!("https://example.com"))]));
        let site = site_with(
            tmp.path(),
            config,
            vec![
                source(&["a", "b"], "doc.md", &[], Some("x")),
                source(&["a", "b"], "other.md", &[("filename", json!("../abc.html"))], Some("y")),
            ],
        );
        let ctx = ctx_for(&site, "a/b/doc.md");
        let other = site.store.get("/a/b/other.md", None).unwrap();
        assert_eq!(
            ctx.url(other, &PageArgs::default()).unwrap(),
            "https://example.com/a/abc.html"
        );
        assert_eq!(ctx.path_to(other, None, false).unwrap(), "../abc.html");
        assert_eq!(
            ctx.output_path(other, &PageArgs::default()).unwrap(),
            PathBuf::from("a/abc.html")
        );
    }

    #[test]
    fn output_path_cannot_escape_root() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![source(&["a"], "x.md", &[("filename", json!("../../evil.html"))], Some("x"))],
        );
        let ctx = ctx_for(&site, "a/x.md");
        let content = ctx.page_content().unwrap();
        let err = ctx.output_path(content, &PageArgs::default()).unwrap_err();
        assert_eq!(err.kind(), "OutputPathError");
    }

    #[test]
    fn index_pages_use_page_templates() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![source(&[], "index.yml", &[("type", json!("index")), ("filename", json!("home.html"))], None)],
        );
        let ctx = ctx_for(&site, "index.yml");
        let index = ctx.page_content().unwrap();
        let mut args = PageArgs::default();
        assert_eq!(ctx.filename(index, &args).unwrap(), "home.html");
        args.cur_page = 2;
        assert_eq!(ctx.filename(index, &args).unwrap(), "index_2.html");
        args.group_value = Some("rust lang".into());
        assert_eq!(ctx.filename(index, &args).unwrap(), "index_rust%20lang_2.html");
    }

    #[test]
    fn page_filenames_ignore_page_count() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![source(&[], "index.yml", &[("type", json!("index"))], None)],
        );
        let written = PageArgs {
            cur_page: 2,
            num_pages: 7,
            ..PageArgs::default()
        };
        let linked = PageArgs {
            cur_page: 2,
            ..PageArgs::default()
        };
        let a = ctx_for(&site, "index.yml");
        let b = ctx_for(&site, "index.yml");
        let index = a.page_content().unwrap();
        assert_eq!(a.filename(index, &written).unwrap(), "index_2.html");
        assert_eq!(b.filename(index, &linked).unwrap(), "index_2.html");

        let mut config = Config::new();
        config.add_root_layer(
            [(
                "indexpage_filename_templ2".to_string(),
                json!("{{ content.stem }}_{{ cur_page }}_of_{{ num_pages }}.html"),
            )]
            .into_iter()
            .collect(),
        );
        let site = site_with(
            tmp.path(),
            config,
            vec![source(&[], "index.yml", &[("type", json!("index"))], None)],
        );
        let ctx = ctx_for(&site, "index.yml");
        assert!(ctx.filename(ctx.page_content().unwrap(), &written).is_err());
    }

    #[test]
    fn canonical_url_rules() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![
                source(&["d"], "abs.md", &[("canonical_url", json!("https://other.org/x"))], Some("a")),
                source(&["d"], "root.md", &[("canonical_url", json!("/r/x.html"))], Some("b")),
                source(&["d"], "rel.md", &[("canonical_url", json!("../y.html"))], Some("c")),
            ],
        );
        let ctx = ctx_for(&site, "d/abs.md");
        let get = |r: &str| site.store.get(r, None).unwrap();
        let args = PageArgs::default();
        assert_eq!(ctx.url(get("/d/abs.md"), &args).unwrap(), "https://other.org/x");
        assert_eq!(ctx.url(get("/d/root.md"), &args).unwrap(), "http://localhost:8888/r/x.html");
        assert_eq!(ctx.url(get("/d/rel.md"), &args).unwrap(), "http://localhost:8888/y.html");
    }

    #[test]
    fn strip_index_filename_leaves_trailing_slash() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::new();
        config.add_root_layer(layer(&[("strip_index_filename", json!("index.html"))]));
        let site = site_with(
            tmp.path(),
            config,
            vec![
                source(&[], "page.md", &[], Some("p")),
                source(&["docs"], "index.md", &[], Some("d")),
            ],
        );
        let ctx = ctx_for(&site, "page.md");
        let docs = site.store.get("/docs/index.md", None).unwrap();
        assert_eq!(ctx.url(docs, &PageArgs::default()).unwrap(), "http://localhost:8888/docs/");
        assert_eq!(ctx.path_to(docs, None, false).unwrap(), "docs/");
    }

    #[test]
    fn cross_origin_links_are_absolute() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![
                source(&[], "here.md", &[], Some("h")),
                source(&[], "there.md", &[("canonical_url", json!("https://elsewhere.net/t.html"))], Some("t")),
            ],
        );
        let ctx = ctx_for(&site, "here.md");
        let there = site.store.get("/there.md", None).unwrap();
        assert_eq!(ctx.path_to(there, None, false).unwrap(), "https://elsewhere.net/t.html");
        let here = site.store.get("/here.md", None).unwrap();
        assert_eq!(ctx.path_to(here, None, true).unwrap(), "http://localhost:8888/here.html");
        assert_eq!(ctx.path_to(here, None, false).unwrap(), "here.html");
    }

    // =========================================================================
    // HTML, headers, recursion guard
    // =========================================================================

    #[test]
    fn headers_get_unique_ids_and_fragments_resolve() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![
                source(&[], "a.md", &[], Some("<h2>Intro</h2><p>x</p><h2>Intro</h2>")),
                source(&[], "b.md", &[], Some("b")),
            ],
        );
        let ctx = ctx_for(&site, "b.md");
        let a = site.store.get("/a.md", None).unwrap();
        let headers = ctx.get_headers(a).unwrap();
        assert_eq!(headers.len(), 2);
        assert_ne!(headers[0].id, headers[1].id);
        let link = ctx.path_to(a, Some("Intro"), false).unwrap();
        assert_eq!(link, format!("a.html#{}", headers[0].id));
        assert!(ctx.depends().contains(a.path()));
    }

    #[test]
    fn self_reference_does_not_recurse() {
        let tmp = TempDir::new().unwrap();
        let body = "<h1>Top</h1>{{ link_to(target=\"loop.md\", fragment=\"Top\") }}";
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![source(&[], "loop.md", &[], Some(body))],
        );
        let ctx = ctx_for(&site, "loop.md");
        let content = ctx.page_content().unwrap();
        let rendered = ctx.get_html(content).unwrap();
        assert!(rendered.html.contains("href=\"loop.html#Top\""));
        assert_eq!(rendered.headers.len(), 1);
    }

    #[test]
    fn abstract_respects_budget() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![source(&[], "a.md", &[], Some("<p>Hello <b>brave</b> world</p>"))],
        );
        let ctx = ctx_for(&site, "a.md");
        let a = ctx.page_content().unwrap();
        assert_eq!(ctx.get_abstract(a, Some(8)).unwrap(), "<p>Hello <b>br</b></p>");
        assert_eq!(ctx.get_abstract(a, Some(0)).unwrap(), "<p>Hello <b>brave</b> world</p>");
    }

    #[test]
    fn title_fallback_modes() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::new();
        config.add(&["h".to_string()], layer(&[("title_fallback", json!("header"))]));
        config.add(&["bad".to_string()], layer(&[("title_fallback", json!("nope"))]));
        let site = site_with(
            tmp.path(),
            config,
            vec![
                source(&[], "plain-name.md", &[], Some("<p>x</p>")),
                source(&["h"], "x.md", &[], Some("<h1>From Header</h1>")),
                source(&["bad"], "y.md", &[], Some("y")),
            ],
        );
        let ctx = ctx_for(&site, "plain-name.md");
        let get = |r: &str| site.store.get(r, None).unwrap();
        assert_eq!(ctx.title(get("/plain-name.md")).unwrap(), "plain-name");
        assert_eq!(ctx.title(get("/h/x.md")).unwrap(), "From Header");
        assert_eq!(ctx.title(get("/bad/y.md")).unwrap_err().kind(), "ValueError");
    }

    #[test]
    fn function_errors_keep_their_kind() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![source(&[], "a.md", &[], Some("{{ link_to(target=\"missing.md\") }}"))],
        );
        let ctx = ctx_for(&site, "a.md");
        let err = ctx.get_html(ctx.page_content().unwrap()).unwrap_err();
        assert_eq!(err.kind(), "ContentNotFound");
    }

    #[test]
    fn template_errors_report_line() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![source(&[], "a.md", &[], Some("ok\n{{ nope( }}"))],
        );
        let ctx = ctx_for(&site, "a.md");
        match ctx.get_html(ctx.page_content().unwrap()).unwrap_err() {
            RenderError::Template(t) => {
                assert_eq!(t.name, "a.md");
                assert_eq!(t.line, Some(2));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    // =========================================================================
    // Build
    // =========================================================================

    #[test]
    fn build_writes_article_page() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![source(&["blog"], "post.md", &[("title", json!("Hello"))], Some("<p>body</p>"))],
        );
        let written = ctx_for(&site, "blog/post.md").build().unwrap();
        assert_eq!(written, vec![site.paths.output.join("blog/post.html")]);
        let html = fs::read_to_string(&written[0]).unwrap();
        assert!(html.contains("<title>Hello | (FIXME-site_title)</title>"));
        assert!(html.contains("<p>body</p>"));
    }

    #[test]
    fn snippets_write_nothing() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![source(&[], "nav.html", &[("type", json!("snippet"))], Some("<nav/>"))],
        );
        assert!(ctx_for(&site, "nav.html").build().unwrap().is_empty());
    }

    #[test]
    fn now_marks_always_rebuild() {
        let tmp = TempDir::new().unwrap();
        let site = site_with(
            tmp.path(),
            Config::new(),
            vec![source(&[], "a.md", &[], Some("built {{ now() }}"))],
        );
        let ctx = ctx_for(&site, "a.md");
        ctx.build().unwrap();
        assert!(ctx.is_always_rebuild());
    }
}
