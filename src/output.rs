//! CLI output formatting.
//!
//! Each command has a `format_*` function returning lines (pure, tested
//! directly) and a `print_*` wrapper writing them to stdout. Diagnostics go
//! through `tracing`; these functions produce the user-facing summary only.
//!
//! # Output Format
//!
//! ## Check
//!
//! ```text
//! Contents
//! 001 blog/first-post.md (article)
//!     Source: contents/blog/first-post.md
//! 002 credits.md (article)
//!     Source: themes/basic/contents/credits.md
//!     Theme: basic
//!
//! Templates
//!     page_article.html
//!     page_index.html
//!
//! Config
//!     config.toml
//!     contents/blog/config.toml
//! ```
//!
//! ## Build
//!
//! ```text
//! Full rebuild: no saved dependency state
//! blog/first-post.md → blog/first-post.html
//! index.yml → index.html, index_2.html
//!
//! Error [ContentNotFound] blog/broken.md
//!     content not found: gone.md (from blog/broken.md)
//!
//! Built 4 units, wrote 5 files, skipped 0 contents, 1 error
//! ```
//!
//! Template errors add their source excerpt under the message; the cause
//! chain is shown only in verbose mode.

use std::collections::BTreeMap;
use std::path::Path;

use crate::builder::ErrorRecord;
use crate::generate::BuildReport;
use crate::site::Site;
use crate::types::ContentPath;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

/// `path` relative to `base` with `/` separators, or as given when outside it.
fn display_relative(path: &Path, base: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// Check
// ============================================================================

pub fn format_check_output(site: &Site) -> Vec<String> {
    let root = &site.paths.root;
    let mut lines = vec!["Contents".to_string()];
    for (i, content) in site.store.iter().enumerate() {
        lines.push(format!(
            "{} {} ({})",
            format_index(i + 1),
            content.path(),
            content.kind()
        ));
        let source = &content.source().source_path;
        if !source.as_os_str().is_empty() {
            lines.push(format!("{}Source: {}", indent(1), display_relative(source, root)));
        }
        if let Some(package) = &content.source().package {
            lines.push(format!("{}Theme: {}", indent(1), package));
        }
    }

    lines.push(String::new());
    lines.push("Templates".to_string());
    for name in site.templates.names() {
        lines.push(format!("{}{}", indent(1), name));
    }

    if !site.paths.config_files.is_empty() {
        lines.push(String::new());
        lines.push("Config".to_string());
        for file in &site.paths.config_files {
            lines.push(format!("{}{}", indent(1), display_relative(file, root)));
        }
    }
    lines
}

pub fn print_check_output(site: &Site) {
    for line in format_check_output(site) {
        println!("{}", line);
    }
}

// ============================================================================
// Build
// ============================================================================

fn format_error(record: &ErrorRecord, verbose: bool) -> Vec<String> {
    let mut lines = vec![format!("Error [{}] {}", record.kind, record.content)];
    lines.push(format!("{}{}", indent(1), record.message));
    for line in &record.context {
        lines.push(format!("{}{}", indent(1), line));
    }
    if verbose {
        for cause in &record.detail {
            lines.push(format!("{}Caused by: {}", indent(1), cause));
        }
    }
    lines
}

/// Summary of a build. Output files are shown relative to `output`.
pub fn format_build_report(report: &BuildReport, output: &Path, verbose: bool) -> Vec<String> {
    let mut lines = Vec::new();
    match &report.plan.reason {
        Some(reason) => lines.push(format!("Full rebuild: {}", reason)),
        None => lines.push(format!(
            "Incremental build: {} updated",
            plural(report.plan.updated.len(), "content")
        )),
    }

    let mut by_content: BTreeMap<&ContentPath, Vec<String>> = BTreeMap::new();
    let mut unattributed = Vec::new();
    for path in &report.written {
        let rel = display_relative(path, output);
        match report.plan.updated.iter().find(|cp| rel_matches(cp, &rel)) {
            Some(cp) => by_content.entry(cp).or_default().push(rel),
            None => unattributed.push(rel),
        }
    }
    for (content, files) in &by_content {
        lines.push(format!("{} → {}", content, files.join(", ")));
    }
    for file in unattributed {
        lines.push(format!("→ {}", file));
    }

    for record in &report.errors {
        lines.push(String::new());
        lines.extend(format_error(record, verbose));
    }

    lines.push(String::new());
    lines.push(format!(
        "Built {}, wrote {}, skipped {}, {}",
        plural(report.units, "unit"),
        plural(report.written.len(), "file"),
        plural(report.skipped, "content"),
        plural(report.errors.len(), "error"),
    ));
    if !report.depends_saved {
        lines.push("Dependency state not saved; next build will be a full rebuild".to_string());
    }
    lines
}

/// Whether output file `rel` sits in `cp`'s directory and starts with its stem.
fn rel_matches(cp: &ContentPath, rel: &str) -> bool {
    let (dir, file) = match rel.rsplit_once('/') {
        Some((d, f)) => (d, f),
        None => ("", rel),
    };
    let stem = crate::naming::split_name(&cp.name).0;
    dir == cp.dir.join("/") && file.starts_with(stem)
}

pub fn print_build_report(report: &BuildReport, output: &Path, verbose: bool) {
    for line in format_build_report(report, output, verbose) {
        println!("{}", line);
    }
}
