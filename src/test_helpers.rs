//! Shared test utilities.
//!
//! Builds contents and whole in-memory sites without touching a project
//! directory:
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let site = site_with(tmp.path(), Config::new(), vec![
//!     source(&["blog"], "post.md", &[("title", json!("Hello"))], Some("<p>hi</p>")),
//! ]);
//! let post = site.store.get("/blog/post.md", None).unwrap();
//! ```

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::content::Content;
use crate::metadata::Metadata;
use crate::site::{Site, SitePaths};
use crate::store::ContentStore;
use crate::template::TemplateEngine;
use crate::types::{ContentPath, ContentSource};

// =========================================================================
// Contents
// =========================================================================

pub fn layer(pairs: &[(&str, Value)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Inline source at `dir/name`.
pub fn source(dir: &[&str], name: &str, meta: &[(&str, Value)], body: Option<&str>) -> ContentSource {
    ContentSource::inline(
        ContentPath::new(dir, name),
        layer(meta),
        body.map(str::to_string),
    )
}

/// Content with an explicit body (or none).
pub fn content_with(
    config: &Config,
    dir: &[&str],
    name: &str,
    meta: &[(&str, Value)],
    body: Option<&str>,
) -> Content {
    Content::new(source(dir, name, meta, body), config).unwrap()
}

/// Article-style content with an empty body.
pub fn article(config: &Config, dir: &[&str], name: &str, meta: &[(&str, Value)]) -> Content {
    content_with(config, dir, name, meta, Some(""))
}

/// Names of `contents`, in order.
pub fn names<'a>(contents: &[&'a Content]) -> Vec<&'a str> {
    contents.iter().map(|c| c.path().name.as_str()).collect()
}

// =========================================================================
// Sites
// =========================================================================

/// In-memory site writing to `root/outputs` with the built-in templates.
pub fn site_with(root: &Path, config: Config, sources: Vec<ContentSource>) -> Arc<Site> {
    site_with_templates(root, config, sources, &[])
}

/// Like [`site_with`], adding raw templates on top of the built-ins.
pub fn site_with_templates(
    root: &Path,
    config: Config,
    sources: Vec<ContentSource>,
    templates: &[(&str, &str)],
) -> Arc<Site> {
    let mut store = ContentStore::new();
    for src in sources {
        store.add(Content::new(src, &config).unwrap());
    }
    let mut engine = TemplateEngine::new();
    for (name, text) in templates {
        engine.add_raw(name, text).unwrap();
    }
    let paths = SitePaths::new(root, &root.join("outputs"));
    Arc::new(Site::from_parts(paths, config, store, engine))
}
