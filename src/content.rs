//! Content units and their per-variant behavior.
//!
//! A [`Content`] wraps the [`ContentSource`] a loader produced and adds the
//! behavior selected by its `type` metadata. The five variants form a
//! closed set ([`ContentKind`]); everything that differs between them is
//! answered by a `match` on the kind:
//!
//! | Kind | Output | Extension | Filename template |
//! |------|--------|-----------|-------------------|
//! | `binary` | source bytes copied | own | `filename_templ` |
//! | `article` | rendered page | `.html` | `filename_templ` |
//! | `snippet` | none (embedded in other pages) | `.html` | `filename_templ` |
//! | `index` | one page per pagination/group | `.html` | `indexpage_*` |
//! | `feed` | Atom or RSS document | `.xml` / `.rdf` | `filename_templ` |
//!
//! Content holds no render state; caches and dependency sets live in
//! [`BuildContext`](crate::context::BuildContext) so the same content can be
//! rendered for several pages concurrently.

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use std::fmt;

use crate::config::{Config, ConfigError};
use crate::metadata;
use crate::naming;
use crate::types::{ContentPath, ContentSource, PageArgs};

/// The closed set of content variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Binary,
    Article,
    Snippet,
    Index,
    Feed,
}

/// How a content variant produces its output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStrategy {
    /// Copy the source bytes verbatim.
    Copy,
    /// Render through a page template.
    Page,
    /// Write a syndication document.
    Feed,
    /// Produce no file of its own.
    None,
}

impl ContentKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "binary" => Some(Self::Binary),
            "article" => Some(Self::Article),
            "snippet" => Some(Self::Snippet),
            "index" => Some(Self::Index),
            "feed" => Some(Self::Feed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Article => "article",
            Self::Snippet => "snippet",
            Self::Index => "index",
            Self::Feed => "feed",
        }
    }

    /// Article and snippet bodies are HTML rendered as templates.
    pub fn has_html_body(self) -> bool {
        matches!(self, Self::Article | Self::Snippet)
    }

    pub fn output(self) -> OutputStrategy {
        match self {
            Self::Binary => OutputStrategy::Copy,
            Self::Article | Self::Index => OutputStrategy::Page,
            Self::Feed => OutputStrategy::Feed,
            Self::Snippet => OutputStrategy::None,
        }
    }

    /// Config keys naming the filename template for `args`, in fallback
    /// order. The branch depends on page arguments because index page 2+
    /// and grouped pages use different template text.
    pub fn filename_template_keys(self, args: &PageArgs) -> &'static [&'static str] {
        match self {
            Self::Index => match (&args.group_value, args.cur_page > 1) {
                (None, false) => &["indexpage_filename_templ"],
                (None, true) => &["indexpage_filename_templ2", "indexpage_filename_templ"],
                (Some(_), false) => &["indexpage_group_filename_templ"],
                (Some(_), true) => &[
                    "indexpage_group_filename_templ2",
                    "indexpage_group_filename_templ",
                ],
            },
            _ => &["filename_templ"],
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical content unit of the site.
#[derive(Debug, Clone)]
pub struct Content {
    source: ContentSource,
    kind: ContentKind,
}

impl Content {
    /// Wrap a source, resolving its `type` through metadata then config.
    pub fn new(source: ContentSource, config: &Config) -> Result<Self, ConfigError> {
        let type_value = match source.metadata.get("type") {
            Some(v) => v.clone(),
            None => config.get(&source.contentpath.dir, "type")?,
        };
        let type_name = metadata::value_to_string(&type_value);
        let kind = ContentKind::parse(&type_name)
            .ok_or_else(|| ConfigError::invalid("type", &type_value, "unknown content type"))?;
        Ok(Self { source, kind })
    }

    pub fn path(&self) -> &ContentPath {
        &self.source.contentpath
    }

    pub fn dir(&self) -> &[String] {
        &self.source.contentpath.dir
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    pub fn body(&self) -> Option<&str> {
        self.source.body.as_deref()
    }

    /// `stem` metadata, or the name without its extension.
    pub fn stem(&self) -> String {
        match self.source.metadata.get("stem") {
            Some(v) => metadata::value_to_string(v),
            None => naming::split_name(&self.source.contentpath.name).0.to_string(),
        }
    }

    /// Output extension: `ext` metadata, or derived from the variant.
    ///
    /// Feeds map `feed_type` to `.xml` (atom) or `.rdf` (rss); any other
    /// feed type is an invalid value.
    pub fn ext(&self, config: &Config) -> Result<String, ConfigError> {
        if let Some(v) = self.source.metadata.get("ext") {
            return Ok(metadata::value_to_string(v));
        }
        match self.kind {
            ContentKind::Binary => {
                Ok(naming::split_name(&self.source.contentpath.name).1.to_string())
            }
            ContentKind::Article | ContentKind::Snippet | ContentKind::Index => {
                Ok(".html".to_string())
            }
            ContentKind::Feed => {
                let feed_type = self.get_metadata(config, "feed_type")?;
                match metadata::value_to_string(&feed_type).as_str() {
                    "atom" => Ok(".xml".to_string()),
                    "rss" => Ok(".rdf".to_string()),
                    _ => Err(ConfigError::invalid("feed_type", &feed_type, "expected atom or rss")),
                }
            }
        }
    }

    /// Localized `date` from own metadata or config layers.
    pub fn date(&self, config: &Config) -> Result<Option<DateTime<FixedOffset>>, ConfigError> {
        match self.get_opt(config, "date")? {
            Some(Value::String(s)) => Ok(DateTime::parse_from_rfc3339(&s).ok()),
            _ => Ok(None),
        }
    }

    /// Seconds since the epoch of `date`, `0` when undated.
    pub fn timestamp(&self, config: &Config) -> Result<i64, ConfigError> {
        Ok(self.date(config)?.map(|d| d.timestamp()).unwrap_or(0))
    }

    /// Title for ordering: `title` metadata, else the file name.
    pub fn sort_title(&self) -> String {
        match self.source.metadata.get("title") {
            Some(v) => metadata::value_to_string(v),
            None => self.source.contentpath.name.clone(),
        }
    }

    /// Typed metadata accessor.
    ///
    /// Resolution order: computed keys (`stem`, `ext`, `name`, `type`),
    /// then the content's own metadata, then config layers at the
    /// content's directory. Values are formatted by key name either way.
    pub fn get_metadata(&self, config: &Config, key: &str) -> Result<Value, ConfigError> {
        self.get_opt(config, key)?.ok_or_else(|| ConfigError::NotFound {
            key: key.to_string(),
            dir: self.path().to_string(),
        })
    }

    /// Like [`get_metadata`](Self::get_metadata) with a default for missing keys.
    pub fn get_or(&self, config: &Config, key: &str, default: Value) -> Result<Value, ConfigError> {
        Ok(self.get_opt(config, key)?.unwrap_or(default))
    }

    pub fn get_opt(&self, config: &Config, key: &str) -> Result<Option<Value>, ConfigError> {
        match key {
            "stem" => return Ok(Some(Value::String(self.stem()))),
            "ext" => return self.ext(config).map(|e| Some(Value::String(e))),
            "name" => return Ok(Some(Value::String(self.source.contentpath.name.clone()))),
            "type" => return Ok(Some(Value::String(self.kind.as_str().to_string()))),
            _ => {}
        }
        match self.source.metadata.get(key) {
            Some(raw) => config.format_value(self.dir(), key, raw).map(Some),
            None => config.get_opt(self.dir(), key),
        }
    }

    pub fn get_str(&self, config: &Config, key: &str) -> Result<String, ConfigError> {
        Ok(metadata::value_to_string(&self.get_metadata(config, key)?))
    }

    pub fn get_bool(&self, config: &Config, key: &str) -> Result<bool, ConfigError> {
        let value = self.get_metadata(config, key)?;
        value
            .as_bool()
            .ok_or_else(|| ConfigError::invalid(key, &value, "expected a boolean"))
    }

    pub fn get_int(&self, config: &Config, key: &str) -> Result<i64, ConfigError> {
        let value = self.get_metadata(config, key)?;
        value
            .as_i64()
            .ok_or_else(|| ConfigError::invalid(key, &value, "expected an integer"))
    }

    /// List-valued metadata as strings; missing keys are empty.
    pub fn get_list(&self, config: &Config, key: &str) -> Result<Vec<String>, ConfigError> {
        Ok(match self.get_opt(config, key)? {
            Some(Value::Array(items)) => items.iter().map(metadata::value_to_string).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![metadata::value_to_string(&other)],
        })
    }

    /// Own metadata formatted by key name, for template proxies.
    pub fn formatted_metadata(&self, config: &Config) -> Result<serde_json::Map<String, Value>, ConfigError> {
        let mut map = serde_json::Map::new();
        for (key, raw) in &self.source.metadata {
            map.insert(key.clone(), config.format_value(self.dir(), key, raw)?);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{article, content_with};
    use serde_json::json;

    #[test]
    fn kind_from_metadata() {
        let config = Config::new();
        let c = content_with(&config, &[], "feed.yml", &[("type", json!("feed"))], None);
        assert_eq!(c.kind(), ContentKind::Feed);
    }

    #[test]
    fn kind_defaults_from_config() {
        let mut config = Config::new();
        let mut layer = crate::metadata::Metadata::new();
        layer.insert("type".into(), json!("snippet"));
        config.add(&["parts".to_string()], layer);
        let c = content_with(&config, &["parts"], "nav.html", &[], Some("<nav/>"));
        assert_eq!(c.kind(), ContentKind::Snippet);
    }

    #[test]
    fn unknown_type_is_invalid_value() {
        let config = Config::new();
        let src = ContentSource::inline(
            ContentPath::new(&[], "x.md"),
            [("type".to_string(), json!("poem"))].into_iter().collect(),
            None,
        );
        assert!(matches!(
            Content::new(src, &config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn stem_and_ext_derive_from_name() {
        let config = Config::new();
        let c = article(&config, &["blog"], "hello.md", &[]);
        assert_eq!(c.stem(), "hello");
        assert_eq!(c.ext(&config).unwrap(), ".html");
        let bin = content_with(&config, &[], "logo.png", &[("type", json!("binary"))], None);
        assert_eq!(bin.ext(&config).unwrap(), ".png");
    }

    #[test]
    fn stem_override_wins() {
        let config = Config::new();
        let c = article(&config, &[], "hello.md", &[("stem", json!("greeting"))]);
        assert_eq!(c.get_str(&config, "stem").unwrap(), "greeting");
    }

    #[test]
    fn feed_extension_by_type() {
        let config = Config::new();
        let atom = content_with(&config, &[], "feed.yml", &[("type", json!("feed"))], None);
        assert_eq!(atom.ext(&config).unwrap(), ".xml");
        let rss = content_with(
            &config,
            &[],
            "feed.yml",
            &[("type", json!("feed")), ("feed_type", json!("rss"))],
            None,
        );
        assert_eq!(rss.ext(&config).unwrap(), ".rdf");
        let bad = content_with(
            &config,
            &[],
            "feed.yml",
            &[("type", json!("feed")), ("feed_type", json!("json"))],
            None,
        );
        assert!(matches!(bad.ext(&config), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn metadata_falls_through_to_config() {
        let mut config = Config::new();
        let mut layer = crate::metadata::Metadata::new();
        layer.insert("author".into(), json!("dir author"));
        config.add(&["blog".to_string()], layer);

        let own = article(&config, &["blog"], "a.md", &[("author", json!("me"))]);
        let inherited = article(&config, &["blog"], "b.md", &[]);
        assert_eq!(own.get_str(&config, "author").unwrap(), "me");
        assert_eq!(inherited.get_str(&config, "author").unwrap(), "dir author");
        assert!(matches!(
            inherited.get_metadata(&config, "nothing"),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn own_metadata_is_formatted() {
        let config = Config::new();
        let c = article(
            &config,
            &[],
            "a.md",
            &[("draft", json!("yes")), ("tags", json!("x, y"))],
        );
        assert!(c.get_bool(&config, "draft").unwrap());
        assert_eq!(c.get_list(&config, "tags").unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn date_and_timestamp() {
        let config = Config::new();
        let dated = article(&config, &[], "a.md", &[("date", json!("2024-01-01"))]);
        let undated = article(&config, &[], "b.md", &[]);
        assert_eq!(dated.timestamp(&config).unwrap(), 1_704_067_200);
        assert_eq!(undated.timestamp(&config).unwrap(), 0);
    }

    #[test]
    fn index_template_keys_depend_on_page_args() {
        let mut args = PageArgs::default();
        assert_eq!(
            ContentKind::Index.filename_template_keys(&args),
            &["indexpage_filename_templ"]
        );
        args.cur_page = 2;
        assert_eq!(
            ContentKind::Index.filename_template_keys(&args)[0],
            "indexpage_filename_templ2"
        );
        args.group_value = Some("rust".into());
        assert_eq!(
            ContentKind::Index.filename_template_keys(&args)[0],
            "indexpage_group_filename_templ2"
        );
        assert_eq!(
            ContentKind::Article.filename_template_keys(&args),
            &["filename_templ"]
        );
    }

    #[test]
    fn output_strategy_per_kind() {
        assert_eq!(ContentKind::Binary.output(), OutputStrategy::Copy);
        assert_eq!(ContentKind::Snippet.output(), OutputStrategy::None);
        assert_eq!(ContentKind::Feed.output(), OutputStrategy::Feed);
        assert_eq!(ContentKind::Index.output(), OutputStrategy::Page);
    }
}
