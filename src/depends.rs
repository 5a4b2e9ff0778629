//! Persisted dependency graph for incremental builds.
//!
//! Every render records which contents it read ([`BuildContext::depends`]).
//! After a build those forward edges are inverted into a reverse index
//! (`B → {contents that read B}`) and saved next to the output, together
//! with a snapshot of every content's metadata and the set of known paths.
//!
//! [`BuildContext::depends`]: crate::context::BuildContext::depends
//!
//! ## Deciding what to build
//!
//! [`DependencyTracker::check_rebuild`] returns a full rebuild when any of
//! these hold:
//!
//! - no readable state, or a different format version
//! - a `config.toml` changed since the last save, or the set of config files changed
//! - a file under `templates/` or `modules/` changed since the last save
//! - a content was added or removed
//! - a content's metadata differs from its snapshot
//!
//! Otherwise the updated set is every content whose source is newer than
//! the last save, every content whose last render was marked always-rebuild
//! or failed, and, breadth first, everything that depends on those.
//!
//! A failed render still contributes the edges it recorded before the
//! error, so fixing the content it tripped over rebuilds it.
//!
//! ## Storage
//!
//! Pretty JSON at `<output>/.quire-depends.json`. `saved_at` is the time
//! the saved build *started*, so a source edited during a build is picked
//! up by the next one. Saving is best effort: the caller logs a failure
//! and the next run rebuilds everything.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

use crate::builder::UnitOutcome;
use crate::metadata::Metadata;
use crate::site::Site;
use crate::types::{ContentPath, system_time_millis};

/// Version of the persisted format. Bump to invalidate saved state.
pub const DEPENDS_VERSION: &str = "quire-depends-1";

/// Why a full rebuild is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    NoState,
    VersionMismatch,
    ConfigModified(PathBuf),
    TemplatesModified(PathBuf),
    ContentSetChanged,
    MetadataChanged(ContentPath),
    Forced,
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoState => write!(f, "no saved dependency state"),
            Self::VersionMismatch => write!(f, "dependency state version changed"),
            Self::ConfigModified(p) => write!(f, "config modified: {}", p.display()),
            Self::TemplatesModified(p) => write!(f, "template modified: {}", p.display()),
            Self::ContentSetChanged => write!(f, "contents added or removed"),
            Self::MetadataChanged(p) => write!(f, "metadata changed: {}", p),
            Self::Forced => write!(f, "rebuild requested"),
        }
    }
}

/// Outcome of [`DependencyTracker::check_rebuild`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildPlan {
    pub full: bool,
    pub reason: Option<RebuildReason>,
    /// Contents to build. On a full rebuild, every content.
    pub updated: BTreeSet<ContentPath>,
}

impl RebuildPlan {
    pub fn full(reason: RebuildReason, site: &Site) -> Self {
        Self {
            full: true,
            reason: Some(reason),
            updated: site.store.paths().cloned().collect(),
        }
    }

    pub fn needs_build(&self, path: &ContentPath) -> bool {
        self.full || self.updated.contains(path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyTracker {
    pub version: String,
    /// Start of the saved build, milliseconds since the epoch.
    pub saved_at: i64,
    pub paths: BTreeSet<ContentPath>,
    /// Content → contents whose render read it.
    pub reverse: BTreeMap<ContentPath, BTreeSet<ContentPath>>,
    pub metadata: BTreeMap<ContentPath, Metadata>,
    pub always_rebuild: BTreeSet<ContentPath>,
    /// Contents with a failed unit in the saved build; retried until they build.
    #[serde(default)]
    pub failed: BTreeSet<ContentPath>,
    pub config_files: BTreeSet<PathBuf>,
    #[serde(skip)]
    invalid: Option<RebuildReason>,
}

impl DependencyTracker {
    fn empty(reason: RebuildReason) -> Self {
        Self {
            version: DEPENDS_VERSION.to_string(),
            saved_at: 0,
            paths: BTreeSet::new(),
            reverse: BTreeMap::new(),
            metadata: BTreeMap::new(),
            always_rebuild: BTreeSet::new(),
            failed: BTreeSet::new(),
            config_files: BTreeSet::new(),
            invalid: Some(reason),
        }
    }

    /// Load saved state. Missing, unreadable or foreign state yields an
    /// empty tracker that asks for a full rebuild.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => return Self::empty(RebuildReason::NoState),
        };
        let value: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => return Self::empty(RebuildReason::NoState),
        };
        if value.get("version").and_then(|v| v.as_str()) != Some(DEPENDS_VERSION) {
            return Self::empty(RebuildReason::VersionMismatch);
        }
        match serde_json::from_value(value) {
            Ok(tracker) => tracker,
            Err(_) => Self::empty(RebuildReason::NoState),
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    fn modified_since_save(&self, path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .map(|t| system_time_millis(t) > self.saved_at)
            .unwrap_or(true)
    }

    fn full_rebuild_reason(&self, site: &Site) -> Option<RebuildReason> {
        if let Some(reason) = &self.invalid {
            return Some(reason.clone());
        }

        let config_files: BTreeSet<PathBuf> = site.paths.config_files.iter().cloned().collect();
        if let Some(changed) = config_files.symmetric_difference(&self.config_files).next() {
            return Some(RebuildReason::ConfigModified(changed.clone()));
        }
        if let Some(modified) = config_files.iter().find(|p| self.modified_since_save(p)) {
            return Some(RebuildReason::ConfigModified(modified.clone()));
        }

        for dir in site.paths.template_dirs.iter().filter(|d| d.is_dir()) {
            for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
                if entry.file_type().is_file() && self.modified_since_save(entry.path()) {
                    return Some(RebuildReason::TemplatesModified(entry.path().to_path_buf()));
                }
            }
        }

        if !site.store.paths().eq(self.paths.iter()) {
            return Some(RebuildReason::ContentSetChanged);
        }
        for content in site.store.iter() {
            if self.metadata.get(content.path()) != Some(&content.source().metadata) {
                return Some(RebuildReason::MetadataChanged(content.path().clone()));
            }
        }
        None
    }

    /// Decide between a full rebuild and the set of contents to rebuild.
    pub fn check_rebuild(&self, site: &Site) -> RebuildPlan {
        if let Some(reason) = self.full_rebuild_reason(site) {
            debug!(%reason, "full rebuild");
            return RebuildPlan::full(reason, site);
        }

        let mut updated = BTreeSet::new();
        let mut queue = VecDeque::new();
        for content in site.store.iter() {
            let path = content.path();
            let stale = content
                .source()
                .mtime_millis()
                .is_none_or(|mtime| mtime > self.saved_at);
            let retry = self.always_rebuild.contains(path) || self.failed.contains(path);
            if (stale || retry) && updated.insert(path.clone()) {
                queue.push_back(path.clone());
            }
        }
        while let Some(path) = queue.pop_front() {
            for dependent in self.reverse.get(&path).into_iter().flatten() {
                if updated.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }
        debug!(updated = updated.len(), "partial rebuild");
        RebuildPlan {
            full: false,
            reason: None,
            updated,
        }
    }

    /// Fold one build's outcomes into the graph and snapshot the site.
    ///
    /// A full rebuild replaces the graph. A partial one replaces the edges
    /// of contents whose units all built; a content with a failed unit keeps
    /// its old edges and gains the ones recorded before the failure.
    pub fn record(&mut self, site: &Site, plan: &RebuildPlan, outcomes: &[UnitOutcome], started: SystemTime) {
        let failed: BTreeSet<&ContentPath> = outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| &o.unit.content)
            .collect();
        let built: BTreeSet<&ContentPath> = outcomes
            .iter()
            .map(|o| &o.unit.content)
            .filter(|c| !failed.contains(c))
            .collect();

        if plan.full {
            self.reverse.clear();
            self.always_rebuild.clear();
            self.failed.clear();
        } else {
            for dependents in self.reverse.values_mut() {
                dependents.retain(|d| !built.contains(d));
            }
            self.reverse.retain(|_, dependents| !dependents.is_empty());
            self.always_rebuild.retain(|p| !built.contains(p));
            self.failed.retain(|p| !built.contains(p));
        }

        for outcome in outcomes {
            let content = &outcome.unit.content;
            for dep in outcome.depends.iter().filter(|d| *d != content) {
                self.reverse
                    .entry(dep.clone())
                    .or_default()
                    .insert(content.clone());
            }
            if matches!(&outcome.result, Ok(output) if output.always_rebuild) {
                self.always_rebuild.insert(content.clone());
            }
        }
        if !failed.is_empty() {
            debug!(failed = failed.len(), "failed contents will be retried");
        }
        self.failed.extend(failed.into_iter().cloned());

        let known: BTreeSet<ContentPath> = site.store.paths().cloned().collect();
        self.reverse.retain(|path, _| known.contains(path));
        for dependents in self.reverse.values_mut() {
            dependents.retain(|d| known.contains(d));
        }
        self.always_rebuild.retain(|p| known.contains(p));
        self.failed.retain(|p| known.contains(p));

        self.version = DEPENDS_VERSION.to_string();
        self.saved_at = system_time_millis(started);
        self.metadata = site
            .store
            .iter()
            .map(|c| (c.path().clone(), c.source().metadata.clone()))
            .collect();
        self.paths = known;
        self.config_files = site.paths.config_files.iter().cloned().collect();
        self.invalid = None;
    }
}
