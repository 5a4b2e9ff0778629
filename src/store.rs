//! The content store: every content unit of a site keyed by [`ContentPath`].
//!
//! Besides exact lookup, the store answers the listing queries index pages,
//! feeds and templates need:
//!
//! - **filters / excludes**: `key → allowed values`. A sequence-valued
//!   metadata (e.g. `tags`) matches when any element is allowed. Unless the
//!   caller overrides them, `draft = [false]` and `type = ["article"]` apply.
//! - **subdirs**: keep content whose directory starts with one of the given
//!   directories (or equals one, when `recurse` is false).
//! - **ordering**: newest first, undated last, ties by title.
//! - **grouping**: partition by one key, one group per distinct element of
//!   sequence values; falsy values belong to no group.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::content::Content;
use crate::metadata;
use crate::types::ContentPath;

/// A content reference could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("content not found: {reference}{}", .base.as_ref().map(|b| format!(" (referenced from {b})")).unwrap_or_default())]
pub struct ContentNotFound {
    pub reference: String,
    pub base: Option<ContentPath>,
}

/// Listing query for [`ContentStore::get_many`] and [`ContentStore::group_by`].
#[derive(Debug, Clone)]
pub struct Query {
    pub filters: BTreeMap<String, Vec<Value>>,
    pub excludes: BTreeMap<String, Vec<Value>>,
    pub subdirs: Option<Vec<Vec<String>>>,
    pub recurse: bool,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            filters: BTreeMap::new(),
            excludes: BTreeMap::new(),
            subdirs: None,
            recurse: true,
        }
    }
}

impl Query {
    pub fn filter(mut self, key: &str, values: Vec<Value>) -> Self {
        self.filters.insert(key.to_string(), values);
        self
    }

    pub fn exclude(mut self, key: &str, values: Vec<Value>) -> Self {
        self.excludes.insert(key.to_string(), values);
        self
    }

    pub fn subdirs(mut self, dirs: Vec<Vec<String>>, recurse: bool) -> Self {
        self.subdirs = Some(dirs);
        self.recurse = recurse;
        self
    }

    /// Query from loosely typed arguments, as written in templates and in
    /// index/feed metadata.
    ///
    /// `filters` and `excludes` are mappings of key to a value or a list of
    /// values. `subdirs` is a list (or comma string) of `a/b` paths.
    pub fn from_values(
        filters: Option<&Value>,
        excludes: Option<&Value>,
        subdirs: Option<&Value>,
        recurse: bool,
    ) -> Self {
        fn to_map(value: Option<&Value>) -> BTreeMap<String, Vec<Value>> {
            let Some(Value::Object(map)) = value else {
                return BTreeMap::new();
            };
            map.iter()
                .map(|(k, v)| {
                    let values = match v {
                        Value::Array(items) => items.clone(),
                        scalar => vec![scalar.clone()],
                    };
                    (k.clone(), values)
                })
                .collect()
        }

        let subdirs = match subdirs {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(items.iter().map(metadata::value_to_string).collect()),
            Some(other) => Some(
                metadata::value_to_string(other)
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>(),
            ),
        }
        .map(|dirs: Vec<String>| {
            dirs.iter()
                .map(|d| {
                    d.split('/')
                        .filter(|s| !s.is_empty() && *s != ".")
                        .map(str::to_string)
                        .collect()
                })
                .collect()
        });

        Self {
            filters: to_map(filters),
            excludes: to_map(excludes),
            subdirs,
            recurse,
        }
    }

    /// Caller filters layered over the default draft/type filters.
    fn effective_filters(&self) -> BTreeMap<String, Vec<Value>> {
        let mut filters = BTreeMap::new();
        filters.insert("draft".to_string(), vec![Value::Bool(false)]);
        filters.insert("type".to_string(), vec![Value::String("article".into())]);
        for (k, v) in &self.filters {
            filters.insert(k.clone(), v.clone());
        }
        filters
    }
}

/// Scalar equality that treats `1` and `"1"`, `false` and `"false"` alike,
/// since filter values often arrive as strings from templates.
fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => false,
        _ => metadata::value_to_string(a) == metadata::value_to_string(b),
    }
}

fn value_matches(value: &Value, allowed: &[Value]) -> bool {
    match value {
        Value::Array(items) => items
            .iter()
            .any(|item| allowed.iter().any(|a| values_equal(item, a))),
        scalar => allowed.iter().any(|a| values_equal(scalar, a)),
    }
}

/// All content of one site.
#[derive(Debug, Default)]
pub struct ContentStore {
    contents: BTreeMap<ContentPath, Content>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a content, returning the one it replaced.
    pub fn add(&mut self, content: Content) -> Option<Content> {
        self.contents.insert(content.path().clone(), content)
    }

    pub fn contains(&self, path: &ContentPath) -> bool {
        self.contents.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Every content, ordered by path.
    pub fn iter(&self) -> impl Iterator<Item = &Content> {
        self.contents.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &ContentPath> {
        self.contents.keys()
    }

    pub fn get_path(&self, path: &ContentPath) -> Result<&Content, ContentNotFound> {
        self.contents.get(path).ok_or_else(|| ContentNotFound {
            reference: path.to_reference(),
            base: None,
        })
    }

    /// Resolve a reference, relative to `base`'s directory unless it starts
    /// with `/`.
    pub fn get(&self, reference: &str, base: Option<&ContentPath>) -> Result<&Content, ContentNotFound> {
        let root = ContentPath::new(&[], "");
        let resolved = base.unwrap_or(&root).resolve(reference);
        resolved
            .and_then(|path| self.contents.get(&path))
            .ok_or_else(|| ContentNotFound {
                reference: reference.to_string(),
                base: base.cloned(),
            })
    }

    /// Contents matching `query`, newest first.
    pub fn get_many(&self, config: &Config, query: &Query) -> Result<Vec<&Content>, ConfigError> {
        let filters = query.effective_filters();
        let mut selected = Vec::new();
        'contents: for content in self.contents.values() {
            if let Some(subdirs) = &query.subdirs
                && !subdirs
                    .iter()
                    .any(|d| content.path().in_dir(d, query.recurse))
            {
                continue;
            }
            for (key, allowed) in &filters {
                match content.get_opt(config, key)? {
                    Some(value) if value_matches(&value, allowed) => {}
                    _ => continue 'contents,
                }
            }
            for (key, rejected) in &query.excludes {
                if let Some(value) = content.get_opt(config, key)?
                    && value_matches(&value, rejected)
                {
                    continue 'contents;
                }
            }
            selected.push(content);
        }
        sort_contents(config, selected)
    }

    /// Matching contents partitioned by `key`, groups ordered by value.
    pub fn group_by(
        &self,
        config: &Config,
        key: &str,
        query: &Query,
    ) -> Result<Vec<(String, Vec<&Content>)>, ConfigError> {
        let mut groups: BTreeMap<String, Vec<&Content>> = BTreeMap::new();
        for content in self.get_many(config, query)? {
            let Some(value) = content.get_opt(config, key)? else {
                continue;
            };
            let members: Vec<Value> = match value {
                Value::Array(items) => items,
                scalar => vec![scalar],
            };
            let mut seen = Vec::new();
            for member in members.iter().filter(|v| metadata::is_truthy(v)) {
                let group = metadata::value_to_string(member);
                if seen.contains(&group) {
                    continue;
                }
                seen.push(group.clone());
                groups.entry(group).or_default().push(content);
            }
        }
        Ok(groups.into_iter().collect())
    }
}

/// Stable sort by `(-timestamp, title)`: newest first, undated last.
pub fn sort_contents<'a>(config: &Config, contents: Vec<&'a Content>) -> Result<Vec<&'a Content>, ConfigError> {
    let mut keyed = contents
        .into_iter()
        .map(|c| Ok((c.timestamp(config)?, c.sort_title(), c)))
        .collect::<Result<Vec<_>, ConfigError>>()?;
    keyed.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    Ok(keyed.into_iter().map(|(_, _, c)| c).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{article, content_with, names};
    use serde_json::json;

    fn sample_store(config: &Config) -> ContentStore {
        let mut store = ContentStore::new();
        store.add(article(config, &["blog"], "old.md", &[
            ("date", json!("2023-01-01")),
            ("title", json!("Old")),
            ("tags", json!(["rust", "cli"])),
        ]));
        store.add(article(config, &["blog"], "new.md", &[
            ("date", json!("2024-06-01")),
            ("title", json!("New")),
            ("tags", json!("rust")),
        ]));
        store.add(article(config, &["blog", "deep"], "mid.md", &[
            ("date", json!("2024-01-01")),
            ("title", json!("Mid")),
            ("tags", json!(["web"])),
        ]));
        store.add(article(config, &["notes"], "undated-b.md", &[("title", json!("B"))]));
        store.add(article(config, &["notes"], "undated-a.md", &[("title", json!("A"))]));
        store.add(article(config, &["blog"], "draft.md", &[("draft", json!(true))]));
        store.add(content_with(config, &[], "index.yml", &[("type", json!("index"))], None));
        store
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    #[test]
    fn relative_and_absolute_lookup() {
        let config = Config::new();
        let store = sample_store(&config);
        let base = ContentPath::new(&["blog", "deep"], "mid.md");
        assert_eq!(store.get("../new.md", Some(&base)).unwrap().path().name, "new.md");
        assert_eq!(store.get("/notes/undated-a.md", Some(&base)).unwrap().path().name, "undated-a.md");
        assert_eq!(store.get("index.yml", None).unwrap().path().name, "index.yml");
    }

    #[test]
    fn missing_reference_carries_base() {
        let config = Config::new();
        let store = sample_store(&config);
        let base = ContentPath::new(&["blog"], "new.md");
        let err = store.get("nope.md", Some(&base)).unwrap_err();
        assert_eq!(err.reference, "nope.md");
        assert_eq!(err.base, Some(base));
        assert!(store.get("../../../x.md", None).is_err());
    }

    // =========================================================================
    // Filtering and ordering
    // =========================================================================

    #[test]
    fn default_filters_skip_drafts_and_non_articles() {
        let config = Config::new();
        let store = sample_store(&config);
        let all = store.get_many(&config, &Query::default()).unwrap();
        assert_eq!(
            names(&all),
            vec!["new.md", "mid.md", "old.md", "undated-a.md", "undated-b.md"]
        );
    }

    #[test]
    fn caller_filter_overrides_default() {
        let config = Config::new();
        let store = sample_store(&config);
        let q = Query::default().filter("draft", vec![json!(true)]);
        assert_eq!(names(&store.get_many(&config, &q).unwrap()), vec!["draft.md"]);
        let q = Query::default().filter("type", vec![json!("index")]);
        assert_eq!(names(&store.get_many(&config, &q).unwrap()), vec!["index.yml"]);
    }

    #[test]
    fn sequence_values_match_on_intersection() {
        let config = Config::new();
        let store = sample_store(&config);
        let q = Query::default().filter("tags", vec![json!("cli"), json!("web")]);
        assert_eq!(names(&store.get_many(&config, &q).unwrap()), vec!["mid.md", "old.md"]);
    }

    #[test]
    fn excludes_are_negated_filters() {
        let config = Config::new();
        let store = sample_store(&config);
        let q = Query::default().exclude("tags", vec![json!("rust")]);
        assert_eq!(
            names(&store.get_many(&config, &q).unwrap()),
            vec!["mid.md", "undated-a.md", "undated-b.md"]
        );
    }

    #[test]
    fn subdirs_prefix_and_exact() {
        let config = Config::new();
        let store = sample_store(&config);
        let blog = vec![vec!["blog".to_string()]];
        let q = Query::default().subdirs(blog.clone(), true);
        assert_eq!(names(&store.get_many(&config, &q).unwrap()), vec!["new.md", "mid.md", "old.md"]);
        let q = Query::default().subdirs(blog, false);
        assert_eq!(names(&store.get_many(&config, &q).unwrap()), vec!["new.md", "old.md"]);
    }

    #[test]
    fn same_date_ties_break_by_title() {
        let config = Config::new();
        let mut store = ContentStore::new();
        for (name, title) in [("1.md", "zeta"), ("2.md", "alpha"), ("3.md", "mu")] {
            store.add(article(&config, &[], name, &[
                ("date", json!("2024-01-01")),
                ("title", json!(title)),
            ]));
        }
        let sorted = store.get_many(&config, &Query::default()).unwrap();
        assert_eq!(names(&sorted), vec!["2.md", "3.md", "1.md"]);
    }

    // =========================================================================
    // Grouping
    // =========================================================================

    #[test]
    fn group_by_expands_sequences() {
        let config = Config::new();
        let store = sample_store(&config);
        let groups = store.group_by(&config, "tags", &Query::default()).unwrap();
        let shape: Vec<(String, Vec<&str>)> = groups
            .iter()
            .map(|(k, members)| (k.clone(), names(members)))
            .collect();
        assert_eq!(
            shape,
            vec![
                ("cli".to_string(), vec!["old.md"]),
                ("rust".to_string(), vec!["new.md", "old.md"]),
                ("web".to_string(), vec!["mid.md"]),
            ]
        );
    }

    #[test]
    fn falsy_values_join_no_group() {
        let config = Config::new();
        let mut store = ContentStore::new();
        store.add(article(&config, &[], "a.md", &[("series", json!(""))]));
        store.add(article(&config, &[], "b.md", &[("series", json!(null))]));
        store.add(article(&config, &[], "c.md", &[("series", json!("s1"))]));
        store.add(article(&config, &[], "d.md", &[]));
        let groups = store.group_by(&config, "series", &Query::default()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "s1");
        assert_eq!(names(&groups[0].1), vec!["c.md"]);
    }

    #[test]
    fn query_from_template_values() {
        let config = Config::new();
        let store = sample_store(&config);
        let filters = json!({"tags": "rust"});
        let subdirs = json!("blog, notes");
        let q = Query::from_values(Some(&filters), None, Some(&subdirs), true);
        assert_eq!(q.subdirs.as_ref().unwrap().len(), 2);
        assert_eq!(names(&store.get_many(&config, &q).unwrap()), vec!["new.md", "old.md"]);

        let excludes = json!({"tags": ["rust", "web"]});
        let q = Query::from_values(None, Some(&excludes), Some(&json!(["notes"])), false);
        assert_eq!(
            names(&store.get_many(&config, &q).unwrap()),
            vec!["undated-a.md", "undated-b.md"]
        );
    }
}
