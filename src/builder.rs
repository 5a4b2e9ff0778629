//! Build units: one per output file.
//!
//! Most contents produce exactly one unit. An index produces one unit per
//! page of each group of its matching articles; snippets and drafts produce
//! none.
//!
//! ## Pagination
//!
//! `N` articles are split into pages of `indexpage_max_articles`. A last
//! page holding no more than `indexpage_orphan` articles is merged into the
//! one before it, then `indexpage_max_num_pages` (0 = no cap) drops any
//! pages past the cap:
//!
//! ```text
//! 21 articles, 10 per page, orphan 1  →  [10, 11]
//! 25 articles, 10 per page, orphan 1  →  [10, 10, 5]
//! ```

use serde::Serialize;
use std::collections::BTreeSet;
use std::error::Error as _;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::ConfigError;
use crate::content::{Content, ContentKind};
use crate::context::{BuildContext, RenderError};
use crate::site::Site;
use crate::store::Query;
use crate::types::{ContentPath, PageArgs};

/// Article index ranges of each page. Always at least one page.
pub fn paginate(total: usize, per_page: usize, orphan: usize, max_pages: usize) -> Vec<Range<usize>> {
    if total == 0 || per_page == 0 {
        return vec![0..total];
    }
    let mut pages: Vec<Range<usize>> = (0..total)
        .step_by(per_page)
        .map(|start| start..(start + per_page).min(total))
        .collect();
    let remainder = total % per_page;
    if pages.len() > 1 && remainder != 0 && remainder <= orphan {
        pages.pop();
        if let Some(last) = pages.last_mut() {
            last.end = total;
        }
    }
    if max_pages > 0 {
        pages.truncate(max_pages);
    }
    pages
}

/// One output to render: a content and its page arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUnit {
    pub content: ContentPath,
    pub args: PageArgs,
}

/// Units for `content`, in page order.
pub fn create_units(site: &Site, content: &Content) -> Result<Vec<BuildUnit>, ConfigError> {
    let config = &site.config;
    if content.kind() == ContentKind::Snippet || content.get_bool(config, "draft")? {
        return Ok(Vec::new());
    }
    if content.kind() != ContentKind::Index {
        return Ok(vec![BuildUnit {
            content: content.path().clone(),
            args: PageArgs::default(),
        }]);
    }

    let query = Query::from_values(
        content.get_opt(config, "filters")?.as_ref(),
        content.get_opt(config, "excludes")?.as_ref(),
        content.get_opt(config, "directories")?.as_ref(),
        true,
    );
    let groupby = content.get_str(config, "groupby")?;
    let groups: Vec<(Option<String>, Vec<ContentPath>)> = if groupby.is_empty() {
        let members = site.store.get_many(config, &query)?;
        vec![(None, members.iter().map(|c| c.path().clone()).collect())]
    } else {
        site.store
            .group_by(config, &groupby, &query)?
            .into_iter()
            .map(|(value, members)| (Some(value), members.iter().map(|c| c.path().clone()).collect()))
            .collect()
    };

    let per_page = content.get_int(config, "indexpage_max_articles")?.max(0) as usize;
    let orphan = content.get_int(config, "indexpage_orphan")?.max(0) as usize;
    let max_pages = content.get_int(config, "indexpage_max_num_pages")?.max(0) as usize;

    let mut units = Vec::new();
    for (group_value, members) in groups {
        let pages = paginate(members.len(), per_page, orphan, max_pages);
        let num_pages = pages.len();
        for (i, range) in pages.into_iter().enumerate() {
            units.push(BuildUnit {
                content: content.path().clone(),
                args: PageArgs {
                    cur_page: i + 1,
                    num_pages,
                    group_value: group_value.clone(),
                    articles: members[range].to_vec(),
                },
            });
        }
    }
    Ok(units)
}

/// Result of a successfully rendered unit.
#[derive(Debug, Clone, Default)]
pub struct UnitOutput {
    pub written: Vec<PathBuf>,
    pub always_rebuild: bool,
}

/// A failed unit, ready for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub content: ContentPath,
    /// Error class, see [`RenderError::kind`].
    pub kind: String,
    pub message: String,
    /// Source excerpt around a template failure, offending line marked.
    pub context: Vec<String>,
    /// Cause chain, shown in verbose output.
    pub detail: Vec<String>,
}

impl ErrorRecord {
    pub fn new(content: &ContentPath, err: &RenderError) -> Self {
        let context = match err {
            RenderError::Template(t) => t.excerpt(),
            _ => Vec::new(),
        };
        let mut detail = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            detail.push(cause.to_string());
            source = cause.source();
        }
        Self {
            content: content.clone(),
            kind: err.kind().to_string(),
            message: err.to_string(),
            context,
            detail,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub unit: BuildUnit,
    /// Contents the render read, up to the failure point for a failed unit.
    pub depends: BTreeSet<ContentPath>,
    pub result: Result<UnitOutput, ErrorRecord>,
}

/// Render one unit in a fresh context. Feeds get absolute links.
pub fn run_unit(site: Arc<Site>, unit: BuildUnit) -> UnitOutcome {
    let is_feed = site
        .store
        .get_path(&unit.content)
        .is_ok_and(|c| c.kind() == ContentKind::Feed);
    let ctx = BuildContext::new(site, unit.content.clone(), unit.args.clone());
    let ctx = if is_feed { ctx.with_absolute_links() } else { ctx };

    let result = match ctx.build() {
        Ok(written) => {
            debug!(content = %unit.content, page = unit.args.cur_page, files = written.len(), "built");
            Ok(UnitOutput {
                written,
                always_rebuild: ctx.is_always_rebuild(),
            })
        }
        Err(err) => {
            error!(content = %unit.content, kind = err.kind(), "{}", err);
            Err(ErrorRecord::new(&unit.content, &err))
        }
    };
    UnitOutcome {
        unit,
        depends: ctx.depends(),
        result,
    }
}
