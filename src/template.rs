//! Template engine wrapper around [Tera](https://keats.github.io/tera/).
//!
//! One [`TemplateEngine`] is loaded per site from the `templates/` and
//! `modules/` directories of every theme and of the project. Names are
//! paths relative to those directories (`page_article.html`,
//! `macros/nav.html`); a project template shadows a theme template of the
//! same name, and an earlier theme shadows a later one.
//!
//! Two built-in templates, `page_article.html` and `page_index.html`, are
//! always present so a project without templates still builds.
//!
//! Rendering never mutates the loaded engine: each render clones it and
//! lets the caller register functions bound to that render (see
//! [`crate::functions`]). Autoescaping is disabled because rendered
//! article HTML is passed into page templates verbatim.
//!
//! # Errors
//!
//! Tera reports parse failures as nested error chains with a `line:col`
//! marker somewhere in the debug output. [`TemplateError`] flattens that
//! into a template name, a line number and a few lines of surrounding
//! source with the failing line marked `>>`.

use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tera::{Context, Tera};
use thiserror::Error;
use walkdir::WalkDir;

/// Lines of source shown on each side of a failing line.
const CONTEXT_LINES: usize = 2;

const BUILTIN_ARTICLE: &str = r#"<!DOCTYPE html>
<html lang="{{ site.lang }}">
<head>
<meta charset="{{ site.charset }}">
<title>{{ content.title }} | {{ site.title }}</title>
</head>
<body>
<article>
<h1>{{ content.title }}</h1>
{{ html }}
</article>
</body>
</html>
"#;

const BUILTIN_INDEX: &str = r#"<!DOCTYPE html>
<html lang="{{ site.lang }}">
<head>
<meta charset="{{ site.charset }}">
<title>{{ content.title }} | {{ site.title }}</title>
</head>
<body>
<h1>{{ content.title }}{% if group_value %}: {{ group_value }}{% endif %}</h1>
{% for article in articles %}
<section>
<h2>{{ link_to(target=article.reference) }}</h2>
{{ abstract_of(target=article.reference) }}
</section>
{% endfor %}
<nav>
{% if prev_url %}<a rel="prev" href="{{ prev_url }}">&laquo;</a>{% endif %}
{{ cur_page }} / {{ num_pages }}
{% if next_url %}<a rel="next" href="{{ next_url }}">&raquo;</a>{% endif %}
</nav>
</body>
</html>
"#;

static LINE_COL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+):(\d+)").expect("line:col pattern must compile"));
static PARSE_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Failed to parse '([^']+)'").expect("parse target pattern must compile")
});

/// A template failed to parse or render.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}{}: {message}", .line.map(|l| format!(":{l}")).unwrap_or_default())]
pub struct TemplateError {
    /// Template name, or the content path for inline article bodies.
    pub name: String,
    /// 1-based line in the author's source, when Tera reported one.
    pub line: Option<usize>,
    pub message: String,
    /// `(line number, text)` pairs around `line`.
    pub context: Vec<(usize, String)>,
}

impl TemplateError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            line: None,
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Context lines formatted for display, failing line marked `>>`.
    pub fn excerpt(&self) -> Vec<String> {
        self.context
            .iter()
            .map(|(n, text)| {
                let marker = if Some(*n) == self.line { ">>" } else { "  " };
                format!("{} {:>4} | {}", marker, n, text)
            })
            .collect()
    }
}

/// Loaded templates plus the sources they were parsed from.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    tera: Tera,
    sources: HashMap<String, String>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Engine holding only the built-in page templates.
    pub fn new() -> Self {
        let mut sources = HashMap::new();
        sources.insert("page_article.html".to_string(), BUILTIN_ARTICLE.to_string());
        sources.insert("page_index.html".to_string(), BUILTIN_INDEX.to_string());
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        let mut engine = Self { tera, sources };
        // Built-ins are static and known to parse.
        let _ = engine.rebuild();
        engine
    }

    /// Load every file under `dirs`, in increasing priority: a template in
    /// a later directory replaces one of the same name from an earlier one.
    /// Missing directories are skipped.
    pub fn load(&mut self, dirs: &[impl AsRef<Path>]) -> Result<(), TemplateError> {
        for dir in dirs {
            let dir = dir.as_ref();
            if !dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
                let entry = entry.map_err(|e| TemplateError::new(dir.display().to_string(), e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
                if rel
                    .components()
                    .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
                {
                    continue;
                }
                let name = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let text = fs::read_to_string(entry.path())
                    .map_err(|e| TemplateError::new(name.clone(), e.to_string()))?;
                self.sources.insert(name, text);
            }
        }
        self.rebuild()
    }

    /// Add or replace one template from source text.
    pub fn add_raw(&mut self, name: &str, source: &str) -> Result<(), TemplateError> {
        self.sources.insert(name.to_string(), source.to_string());
        self.rebuild()
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Template names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Re-parse all sources at once so imports between templates resolve
    /// regardless of load order.
    fn rebuild(&mut self) -> Result<(), TemplateError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_templates(self.sources.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map_err(|e| {
                let name = PARSE_TARGET
                    .captures(&format!("{}", e))
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "templates".to_string());
                let source = self.sources.get(&name).map(String::as_str).unwrap_or("");
                parse_tera_error(&e, &name, source, 0)
            })?;
        self.tera = tera;
        Ok(())
    }

    /// Render a named template. `register` adds render-bound functions to
    /// the per-render clone before evaluation.
    pub fn render(
        &self,
        name: &str,
        context: &Context,
        register: impl FnOnce(&mut Tera),
    ) -> Result<String, TemplateError> {
        if !self.has_template(name) {
            return Err(TemplateError::new(name, "template not found"));
        }
        let mut tera = self.tera.clone();
        register(&mut tera);
        tera.render(name, context).map_err(|e| {
            let source = self.sources.get(name).map(String::as_str).unwrap_or("");
            parse_tera_error(&e, name, source, 0)
        })
    }

    /// Render `source` as a one-off template named `name`, with
    /// `{% import %}` lines prepended for every module in `imports`.
    ///
    /// Line numbers in errors refer to `source`, not the prepended text.
    pub fn render_inline(
        &self,
        name: &str,
        source: &str,
        imports: &[String],
        context: &Context,
        register: impl FnOnce(&mut Tera),
    ) -> Result<String, TemplateError> {
        let mut text = String::new();
        for module in imports {
            text.push_str(&format!(
                "{{% import \"{}\" as {} %}}\n",
                module,
                module_alias(module)
            ));
        }
        text.push_str(source);

        let mut tera = self.tera.clone();
        register(&mut tera);
        tera.add_raw_template(name, &text)
            .and_then(|_| tera.render(name, context))
            .map_err(|e| parse_tera_error(&e, name, source, imports.len()))
    }
}

/// Identifier a module is imported as: its file stem with non-identifier
/// characters replaced by `_`.
pub fn module_alias(module: &str) -> String {
    let file = module.rsplit('/').next().unwrap_or(module);
    let stem = file.split('.').next().unwrap_or(file);
    let mut alias: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if alias.is_empty() || alias.starts_with(|c: char| c.is_ascii_digit()) {
        alias.insert(0, '_');
    }
    alias
}

/// Flatten a Tera error chain into a [`TemplateError`].
///
/// `offset` is the number of lines prepended to `source` before parsing.
fn parse_tera_error(error: &tera::Error, name: &str, source: &str, offset: usize) -> TemplateError {
    let line = LINE_COL
        .captures(&format!("{:?}", error))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .filter(|l| *l > offset)
        .map(|l| l - offset);
    let context = line
        .map(|l| context_lines(source, l, CONTEXT_LINES))
        .unwrap_or_default();
    TemplateError {
        name: name.to_string(),
        line,
        message: format_tera_error(error),
        context,
    }
}

fn context_lines(source: &str, line: usize, around: usize) -> Vec<(usize, String)> {
    let lines: Vec<&str> = source.lines().collect();
    if line == 0 || line > lines.len() {
        return Vec::new();
    }
    let start = line.saturating_sub(around + 1);
    let end = (line + around).min(lines.len());
    lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, text)| (start + i + 1, text.to_string()))
        .collect()
}

/// Walk the error's `source()` chain and join the useful messages.
fn format_tera_error(error: &tera::Error) -> String {
    use std::error::Error;

    let mut messages = Vec::new();
    let mut current: Option<&dyn Error> = Some(error);
    while let Some(err) = current {
        let cleaned = err
            .to_string()
            .replace("'__tera_one_off'", "template")
            .trim()
            .to_string();
        if !cleaned.is_empty() && !messages.contains(&cleaned) {
            messages.push(cleaned);
        }
        current = err.source();
    }
    if messages.is_empty() {
        "template error".to_string()
    } else {
        messages.join(": ")
    }
}
