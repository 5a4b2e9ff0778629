//! Project discovery: configs, themes and content trees.
//!
//! Stage 1 of the build. Walks a project root and produces the layered
//! [`Config`] and the [`ContentStore`] every later stage reads.
//!
//! ## Project Layout
//!
//! ```text
//! project/
//! ├── config.toml              # Project (root) config layer
//! ├── contents/                # Content tree; one file → one or more contents
//! │   ├── index.yml
//! │   └── blog/
//! │       ├── config.toml      # Directory layer for ("blog",)
//! │       └── first-post.md
//! ├── files/                   # Copied verbatim, always loaded as binary
//! ├── templates/               # Page templates
//! ├── modules/                 # Macro modules for `imports`
//! └── themes/basic/            # Any directory listed in `themes`
//!     ├── config.toml          # Theme layer
//!     ├── contents/ files/ templates/ modules/
//! ```
//!
//! ## Precedence
//!
//! - A project content shadows a theme content with the same path; an
//!   earlier theme shadows a later one.
//! - Project directory configs are added with [`Config::add`]; theme
//!   directory configs with [`Config::add_fallback`], so every project
//!   layer, the project `config.toml` included, wins over them.
//! - Hidden files and directories (leading `.`) are ignored everywhere.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::{self, Config, ConfigError};
use crate::content::Content;
use crate::hooks::HookRegistry;
use crate::loader::{LoadError, LoaderRegistry};
use crate::store::ContentStore;
use crate::types::ContentPath;

pub const CONTENTS_DIR: &str = "contents";
pub const FILES_DIR: &str = "files";
pub const TEMPLATES_DIR: &str = "templates";
pub const MODULES_DIR: &str = "modules";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Load error: {0}")]
    Load(#[from] LoadError),
    #[error("Theme directory not found: {0}")]
    ThemeNotFound(PathBuf),
}

/// One directory tree contributing to the site: the project or a theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub root: PathBuf,
    /// Theme name, `None` for the project itself.
    pub package: Option<String>,
}

/// Everything discovered under a project root.
#[derive(Debug)]
pub struct Scanned {
    pub config: Config,
    pub store: ContentStore,
    /// Every `config.toml` that contributed a layer.
    pub config_files: Vec<PathBuf>,
    /// `templates/` and `modules/` directories in increasing priority.
    pub template_dirs: Vec<PathBuf>,
    /// Project first, then themes in registration order.
    pub sources: Vec<Source>,
}

pub fn scan(root: &Path, loaders: &LoaderRegistry, hooks: &HookRegistry) -> Result<Scanned, ScanError> {
    let mut config = Config::new();
    let mut config_files = Vec::new();

    if let Some(layer) = config::load_raw_config(root)? {
        config.add_root_layer(layer);
        config_files.push(root.join(CONFIG_FILE));
    }

    let mut sources = vec![Source {
        root: root.to_path_buf(),
        package: None,
    }];
    for theme in config.get_list(&[], "themes")? {
        let theme_root = root.join(&theme);
        if !theme_root.is_dir() {
            return Err(ScanError::ThemeNotFound(theme_root));
        }
        if let Some(layer) = config::load_raw_config(&theme_root)? {
            config.add_theme_layer(layer);
            config_files.push(theme_root.join(CONFIG_FILE));
        }
        let package = theme_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(theme);
        sources.push(Source {
            root: theme_root,
            package: Some(package),
        });
    }

    // Directory layers must be in place before any content resolves its type.
    for source in &sources {
        load_dir_configs(source, &mut config, &mut config_files)?;
    }

    let mut store = ContentStore::new();
    for source in &sources {
        load_tree(source, CONTENTS_DIR, loaders, hooks, &config, &mut store)?;
        load_tree(source, FILES_DIR, loaders, hooks, &config, &mut store)?;
    }

    let mut template_dirs = Vec::new();
    for source in sources.iter().rev() {
        template_dirs.push(source.root.join(TEMPLATES_DIR));
        template_dirs.push(source.root.join(MODULES_DIR));
    }

    Ok(Scanned {
        config,
        store,
        config_files,
        template_dirs,
        sources,
    })
}

fn is_hidden(rel: &Path) -> bool {
    rel.components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

/// Directory tuple of `rel`'s parent.
fn dir_tuple(rel: &Path) -> Vec<String> {
    rel.parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

fn load_dir_configs(
    source: &Source,
    config: &mut Config,
    config_files: &mut Vec<PathBuf>,
) -> Result<(), ScanError> {
    let base = source.root.join(CONTENTS_DIR);
    if !base.is_dir() {
        return Ok(());
    }
    for entry in WalkDir::new(&base).sort_by_file_name() {
        let entry = entry?;
        let rel = entry.path().strip_prefix(&base).unwrap_or(entry.path());
        if !entry.file_type().is_file() || is_hidden(rel) || entry.file_name() != CONFIG_FILE {
            continue;
        }
        let layer = config::load_layer_file(entry.path())?;
        let dir = dir_tuple(rel);
        debug!(dir = %dir.join("/"), package = ?source.package, "directory config");
        match source.package {
            None => config.add(&dir, layer),
            Some(_) => config.add_fallback(&dir, layer),
        }
        config_files.push(entry.path().to_path_buf());
    }
    Ok(())
}

fn load_tree(
    source: &Source,
    subdir: &str,
    loaders: &LoaderRegistry,
    hooks: &HookRegistry,
    config: &Config,
    store: &mut ContentStore,
) -> Result<(), ScanError> {
    let base = source.root.join(subdir);
    if !base.is_dir() {
        return Ok(());
    }
    let binary_only = subdir == FILES_DIR;
    for entry in WalkDir::new(&base).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(&base).unwrap_or(path);
        if is_hidden(rel) || (!binary_only && entry.file_name() == CONFIG_FILE) {
            continue;
        }
        let contentpath = ContentPath {
            dir: dir_tuple(rel),
            name: entry.file_name().to_string_lossy().into_owned(),
        };

        hooks.pre_load(path);
        let loaded = if binary_only {
            loaders.load_binary(path, contentpath)?
        } else {
            loaders.load(path, contentpath)?
        };
        for mut src in loaded {
            src.package = source.package.clone();
            hooks.post_load(&mut src);
            if store.contains(&src.contentpath) {
                debug!(content = %src.contentpath, package = ?source.package, "shadowed");
                continue;
            }
            store.add(Content::new(src, config)?);
        }
    }
    Ok(())
}
