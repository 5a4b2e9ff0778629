//! Layered site configuration.
//!
//! Configuration is a stack of sparse key/value layers. A lookup for a key
//! at a directory walks from the most specific layer to the least specific
//! one and returns the first hit:
//!
//! ```text
//! contents/blog/2024/config.toml   ← dir ("blog", "2024")
//! contents/blog/config.toml        ← dir ("blog",)
//! contents/config.toml             ← dir ()
//! config.toml                      ← project root layer
//! themes/*/contents/**/config.toml ← theme directory layers, most specific first
//! themes/*/config.toml             ← theme layers, registration order
//! built-in defaults                ← see `default_layer`
//! ```
//!
//! Within one directory level, the most recently added layer wins
//! ([`Config::add`]). [`Config::add_fallback`] registers a layer that loses
//! against every project layer, the root layer included, and against
//! fallbacks already registered for the same level (theme directory
//! configs, earlier themes first).
//!
//! ## Cumulative keys
//!
//! Keys listed in [`CUMULATIVE_KEYS`] do not short-circuit: every layer's
//! value is collected, most specific first, and duplicates are dropped
//! keeping the first occurrence. `imports` uses this so that a theme's
//! macro modules stay available when a subdirectory adds its own.
//!
//! ## Value formatting
//!
//! Raw values are normalized by key name, no matter which layer supplied
//! them ([`Config::format_value`]):
//!
//! | Keys | Result |
//! |------|--------|
//! | `draft`, `short_header_id`, `use_abs_path` | boolean (`yes`/`no`/`on`/`off`/`true`/`false`/`1`/`0`) |
//! | `imports`, `tags`, `directories`, `themes` | list (comma-separated strings are split) |
//! | `date`, `updated` | RFC 3339 string, localized with `timezone` |
//! | `site_url` | string with a trailing `/` |
//! | `timezone` | validated UTC offset |
//! | `order`, `indexpage_*` counts, `abstract_length`, `feed_num_articles`, `max_processes` | integer |
//!
//! An unrecognized boolean token or a non-integer count is a fatal
//! [`ConfigError::InvalidValue`].

use chrono::FixedOffset;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::metadata::{self, Metadata};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TOML parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config key not found: {key} (at /{dir})")]
    NotFound { key: String, dir: String },
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(key: &str, value: &Value, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: metadata::value_to_string(value),
            reason: reason.into(),
        }
    }
}

/// Keys whose values accumulate across all layers instead of overriding.
pub const CUMULATIVE_KEYS: &[&str] = &["imports"];

/// Conversion applied to a key's raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Bool,
    List,
    Date,
    Url,
    Int,
    Timezone,
    Raw,
}

fn format_of(key: &str) -> Format {
    match key {
        "draft" | "short_header_id" | "use_abs_path" => Format::Bool,
        "imports" | "tags" | "directories" | "themes" => Format::List,
        "date" | "updated" => Format::Date,
        "site_url" => Format::Url,
        "timezone" => Format::Timezone,
        "order"
        | "indexpage_max_articles"
        | "indexpage_orphan"
        | "indexpage_max_num_pages"
        | "abstract_length"
        | "feed_num_articles"
        | "max_processes" => Format::Int,
        _ => Format::Raw,
    }
}

/// Built-in defaults, the lowest layer of every lookup.
pub fn default_layer() -> Metadata {
    let defaults = json!({
        "site_url": "http://localhost:8888/",
        "site_title": "(FIXME-site_title)",
        "lang": "en-US",
        "charset": "utf-8",
        "timezone": "UTC",
        "draft": false,
        "type": "article",
        "title_fallback": "filename",
        "article_template": "page_article.html",
        "index_template": "page_index.html",
        "filename_templ": "{{ content.stem }}{{ content.ext }}",
        "indexpage_filename_templ": "{{ content.stem }}.html",
        "indexpage_filename_templ2": "{{ content.stem }}_{{ cur_page }}.html",
        "indexpage_group_filename_templ": "{{ content.stem }}_{{ group_value }}.html",
        "indexpage_group_filename_templ2": "{{ content.stem }}_{{ group_value }}_{{ cur_page }}.html",
        "indexpage_max_articles": 5,
        "indexpage_orphan": 1,
        "indexpage_max_num_pages": 0,
        "groupby": "",
        "feed_type": "atom",
        "feed_num_articles": 10,
        "abstract_length": 500,
        "short_header_id": false,
        "use_abs_path": false,
        "strip_index_filename": "",
        "imports": "",
        "themes": "",
    });
    match defaults {
        Value::Object(map) => map.into_iter().collect(),
        _ => Metadata::new(),
    }
}

/// Hierarchical configuration resolver.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory tuple → layers, highest priority first.
    dirs: HashMap<Vec<String>, Vec<Metadata>>,
    /// Project `config.toml` layers, highest priority first.
    root: Vec<Metadata>,
    /// Directory tuple → fallback layers, consulted after `root`.
    fallbacks: HashMap<Vec<String>, Vec<Metadata>>,
    /// Theme layers in registration order.
    themes: Vec<Metadata>,
    defaults: Metadata,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            dirs: HashMap::new(),
            root: Vec::new(),
            fallbacks: HashMap::new(),
            themes: Vec::new(),
            defaults: default_layer(),
        }
    }

    /// Add a layer for `dir` that overrides every layer already there.
    pub fn add(&mut self, dir: &[String], layer: Metadata) {
        self.dirs.entry(dir.to_vec()).or_default().insert(0, layer);
    }

    /// Add a layer for `dir` below every project layer and below the
    /// fallbacks already registered for `dir`.
    pub fn add_fallback(&mut self, dir: &[String], layer: Metadata) {
        self.fallbacks.entry(dir.to_vec()).or_default().push(layer);
    }

    /// Add a project root layer (overrides earlier root layers).
    pub fn add_root_layer(&mut self, layer: Metadata) {
        self.root.insert(0, layer);
    }

    /// Register a theme's layer after all previously registered themes.
    pub fn add_theme_layer(&mut self, layer: Metadata) {
        self.themes.push(layer);
    }

    /// All layers consulted for `dir`, in lookup order.
    fn layers<'a>(&'a self, dir: &[String]) -> Vec<&'a Metadata> {
        let mut layers = Vec::new();
        for depth in (0..=dir.len()).rev() {
            if let Some(level) = self.dirs.get(&dir[..depth]) {
                layers.extend(level.iter());
            }
        }
        layers.extend(self.root.iter());
        for depth in (0..=dir.len()).rev() {
            if let Some(level) = self.fallbacks.get(&dir[..depth]) {
                layers.extend(level.iter());
            }
        }
        layers.extend(self.themes.iter());
        layers.push(&self.defaults);
        layers
    }

    /// First raw (unformatted) value for `key` visible from `dir`.
    pub fn lookup_raw(&self, dir: &[String], key: &str) -> Option<&Value> {
        self.layers(dir).into_iter().find_map(|layer| layer.get(key))
    }

    /// Formatted value of `key` at `dir`, or `None` when no layer defines it.
    pub fn get_opt(&self, dir: &[String], key: &str) -> Result<Option<Value>, ConfigError> {
        if CUMULATIVE_KEYS.contains(&key) {
            return self.get_cumulative(dir, key).map(Some);
        }
        match self.lookup_raw(dir, key) {
            Some(raw) => self.format_value(dir, key, raw).map(Some),
            None => Ok(None),
        }
    }

    /// Formatted value of `key` at `dir`; missing keys are an error.
    pub fn get(&self, dir: &[String], key: &str) -> Result<Value, ConfigError> {
        self.get_opt(dir, key)?.ok_or_else(|| ConfigError::NotFound {
            key: key.to_string(),
            dir: dir.join("/"),
        })
    }

    /// Formatted value of `key` at `dir`, or `default` when no layer has it.
    pub fn get_or(&self, dir: &[String], key: &str, default: Value) -> Result<Value, ConfigError> {
        Ok(self.get_opt(dir, key)?.unwrap_or(default))
    }

    fn get_cumulative(&self, dir: &[String], key: &str) -> Result<Value, ConfigError> {
        let mut items: Vec<Value> = Vec::new();
        for layer in self.layers(dir) {
            let Some(raw) = layer.get(key) else { continue };
            if let Value::Array(values) = self.format_value(dir, key, raw)? {
                for v in values {
                    if !items.contains(&v) {
                        items.push(v);
                    }
                }
            }
        }
        Ok(Value::Array(items))
    }

    pub fn get_str(&self, dir: &[String], key: &str) -> Result<String, ConfigError> {
        Ok(metadata::value_to_string(&self.get(dir, key)?))
    }

    pub fn get_bool(&self, dir: &[String], key: &str) -> Result<bool, ConfigError> {
        let value = self.get(dir, key)?;
        value
            .as_bool()
            .ok_or_else(|| ConfigError::invalid(key, &value, "expected a boolean"))
    }

    pub fn get_int(&self, dir: &[String], key: &str) -> Result<i64, ConfigError> {
        let value = self.get(dir, key)?;
        value
            .as_i64()
            .ok_or_else(|| ConfigError::invalid(key, &value, "expected an integer"))
    }

    /// List value as strings; scalars become one-element lists.
    pub fn get_list(&self, dir: &[String], key: &str) -> Result<Vec<String>, ConfigError> {
        Ok(match self.get_opt(dir, key)? {
            Some(Value::Array(items)) => items.iter().map(metadata::value_to_string).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![metadata::value_to_string(&other)],
        })
    }

    /// `timezone` at `dir` as a fixed offset.
    pub fn timezone(&self, dir: &[String]) -> Result<FixedOffset, ConfigError> {
        let raw = self.get_str(dir, "timezone")?;
        metadata::parse_timezone(&raw)
            .ok_or_else(|| ConfigError::invalid("timezone", &Value::String(raw), "expected a UTC offset"))
    }

    /// Normalize a raw value by key name. `dir` selects the timezone used
    /// for naive dates.
    pub fn format_value(&self, dir: &[String], key: &str, raw: &Value) -> Result<Value, ConfigError> {
        match format_of(key) {
            Format::Raw => Ok(raw.clone()),
            Format::Bool => format_bool(key, raw),
            Format::List => Ok(format_list(raw)),
            Format::Int => format_int(key, raw),
            Format::Url => Ok(match raw {
                Value::String(s) if !s.ends_with('/') => Value::String(format!("{}/", s)),
                other => other.clone(),
            }),
            Format::Timezone => {
                let s = metadata::value_to_string(raw);
                metadata::parse_timezone(&s)
                    .map(|_| Value::String(s.trim().to_string()))
                    .ok_or_else(|| ConfigError::invalid(key, raw, "expected a UTC offset"))
            }
            Format::Date => match raw {
                Value::Null => Ok(Value::Null),
                Value::String(s) => {
                    let tz = self.timezone(dir)?;
                    metadata::parse_date(s, &tz)
                        .map(|dt| Value::String(dt.to_rfc3339()))
                        .ok_or_else(|| ConfigError::invalid(key, raw, "unrecognized date format"))
                }
                other => Err(ConfigError::invalid(key, other, "expected a date string")),
            },
        }
    }
}

fn format_bool(key: &str, raw: &Value) -> Result<Value, ConfigError> {
    let parsed = match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "on" | "1" => Some(true),
            "false" | "no" | "n" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    };
    parsed
        .map(Value::Bool)
        .ok_or_else(|| ConfigError::invalid(key, raw, "expected a boolean"))
}

fn format_list(raw: &Value) -> Value {
    match raw {
        Value::Array(items) => Value::Array(items.clone()),
        Value::Null => Value::Array(Vec::new()),
        Value::String(s) => Value::Array(
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
        other => Value::Array(vec![other.clone()]),
    }
}

fn format_int(key: &str, raw: &Value) -> Result<Value, ConfigError> {
    let parsed = match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .map(Value::from)
        .ok_or_else(|| ConfigError::invalid(key, raw, "expected an integer"))
}

/// Load `config.toml` from a directory as a layer.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(dir: &Path) -> Result<Option<Metadata>, ConfigError> {
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    load_layer_file(&config_path).map(Some)
}

/// Parse one TOML file into a layer.
pub fn load_layer_file(path: &Path) -> Result<Metadata, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table: toml::Table = toml::from_str(&content).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(metadata::toml_table_to_metadata(table))
}

/// Resolve the effective worker count.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(max_processes: Option<usize>) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    max_processes
        .filter(|n| *n > 0)
        .map(|n| n.min(cores))
        .unwrap_or(cores)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Quire Configuration
# ===================
#
# Place this file at the project root. Any directory under contents/ may
# carry its own config.toml; keys set there override this file for every
# content in that directory and below. Front matter overrides both.

# Site
site_url = "http://localhost:8888/"  # Base URL; trailing slash added if missing
site_title = "(FIXME-site_title)"
lang = "en-US"
charset = "utf-8"
timezone = "UTC"                     # Offset for naive dates: "UTC", "+09:00", "-0500"

# Themes: directories (relative to the project root) with their own
# config.toml, contents/, templates/, modules/ and files/. Earlier themes
# win over later ones; the project wins over every theme.
themes = ""

# Content defaults
draft = false                        # Drafts are excluded from listings
type = "article"                     # binary | article | snippet | index | feed
title_fallback = "filename"          # filename | header | header_or_filename
article_template = "page_article.html"
index_template = "page_index.html"
imports = ""                         # Comma list of modules/ files, imported in every body

# Output filenames (Tera expressions)
filename_templ = "{{ content.stem }}{{ content.ext }}"
indexpage_filename_templ = "{{ content.stem }}.html"
indexpage_filename_templ2 = "{{ content.stem }}_{{ cur_page }}.html"
indexpage_group_filename_templ = "{{ content.stem }}_{{ group_value }}.html"
indexpage_group_filename_templ2 = "{{ content.stem }}_{{ group_value }}_{{ cur_page }}.html"

# URLs
use_abs_path = false                 # Absolute links everywhere instead of relative ones
strip_index_filename = ""            # e.g. "index.html" → links end in "/"

# Index pages
indexpage_max_articles = 5           # Articles per page
indexpage_orphan = 1                 # A last page this small is merged into the previous one
indexpage_max_num_pages = 0          # 0 = unlimited
groupby = ""                         # Metadata key to group by (e.g. "tags")

# Feeds
feed_type = "atom"                   # atom (.xml) | rss (.rdf)
feed_num_articles = 10

# HTML processing
abstract_length = 500                # Characters in abstracts; 0 = whole body
short_header_id = false              # true: hashed header ids; false: slugs

# Build
# max_processes = 4                  # Parallel workers (omit for auto = CPU cores)
"##
}
