//! The loaded site: configuration, contents, templates and hooks.
//!
//! A [`Site`] is built once per invocation and shared read-only (behind an
//! `Arc`) by every build unit. Nothing in it changes during rendering;
//! per-render state lives in [`BuildContext`](crate::context::BuildContext).

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::hooks::HookRegistry;
use crate::loader::LoaderRegistry;
use crate::scan::{self, ScanError, Source};
use crate::store::ContentStore;
use crate::template::{TemplateEngine, TemplateError};

/// Name of the persisted dependency graph inside the output directory.
pub const DEPENDS_FILENAME: &str = ".quire-depends.json";

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

/// Filesystem locations the build reads and writes.
#[derive(Debug, Clone, Default)]
pub struct SitePaths {
    pub root: PathBuf,
    pub output: PathBuf,
    pub depends_file: PathBuf,
    /// Every `config.toml` that contributed a layer.
    pub config_files: Vec<PathBuf>,
    /// Template and module directories in increasing priority.
    pub template_dirs: Vec<PathBuf>,
}

impl SitePaths {
    pub fn new(root: &Path, output: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            output: output.to_path_buf(),
            depends_file: output.join(DEPENDS_FILENAME),
            config_files: Vec::new(),
            template_dirs: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct Site {
    pub paths: SitePaths,
    pub config: Config,
    pub store: ContentStore,
    pub templates: TemplateEngine,
    pub hooks: HookRegistry,
    pub sources: Vec<Source>,
}

impl Site {
    /// Scan `root` and load its templates. A relative `output` is taken
    /// relative to `root`.
    pub fn load(
        root: &Path,
        output: &Path,
        loaders: &LoaderRegistry,
        hooks: HookRegistry,
    ) -> Result<Self, SiteError> {
        let output = if output.is_absolute() {
            output.to_path_buf()
        } else {
            root.join(output)
        };
        let scanned = scan::scan(root, loaders, &hooks)?;
        let mut templates = TemplateEngine::new();
        templates.load(&scanned.template_dirs)?;

        let mut paths = SitePaths::new(root, &output);
        paths.config_files = scanned.config_files;
        paths.template_dirs = scanned.template_dirs;

        info!(
            root = %root.display(),
            contents = scanned.store.len(),
            themes = scanned.sources.len() - 1,
            "site loaded"
        );
        Ok(Self {
            paths,
            config: scanned.config,
            store: scanned.store,
            templates,
            hooks,
            sources: scanned.sources,
        })
    }

    /// Site assembled from in-memory parts, used for tests and embedding.
    pub fn from_parts(paths: SitePaths, config: Config, store: ContentStore, templates: TemplateEngine) -> Self {
        Self {
            paths,
            config,
            store,
            templates,
            hooks: HookRegistry::new(),
            sources: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn relative_output_resolves_under_root() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("contents")).unwrap();
        fs::write(tmp.path().join("contents/a.md"), "hello").unwrap();
        let site = Site::load(
            tmp.path(),
            Path::new("outputs"),
            &LoaderRegistry::default(),
            HookRegistry::new(),
        )
        .unwrap();
        assert_eq!(site.paths.output, tmp.path().join("outputs"));
        assert_eq!(
            site.paths.depends_file,
            tmp.path().join("outputs").join(DEPENDS_FILENAME)
        );
        assert_eq!(site.store.len(), 1);
    }

    #[test]
    fn template_parse_errors_surface() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("templates")).unwrap();
        fs::write(tmp.path().join("templates/bad.html"), "{% if %}").unwrap();
        let err = Site::load(
            tmp.path(),
            Path::new("out"),
            &LoaderRegistry::default(),
            HookRegistry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SiteError::Template(ref t) if t.name == "bad.html"));
    }
}
