//! End-to-end incremental builds against an on-disk project.

use quire::depends::RebuildReason;
use quire::generate::{self, BuildOptions, BuildReport};
use quire::hooks::HookRegistry;
use quire::loader::LoaderRegistry;
use quire::site::Site;
use quire::types::ContentPath;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

/// Push a file's mtime into the future so it is newer than any saved build.
fn touch(root: &Path, rel: &str) {
    let file = File::options().write(true).open(root.join(rel)).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();
}

fn project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "config.toml", "site_title = \"Notebook\"\n");
    write(root, "contents/a.md", "---\ntitle: A\n---\nSee {{ link_to(target=\"b.md\") }}.\n");
    write(root, "contents/b.md", "---\ntitle: B\n---\nHello from b.\n");
    write(root, "contents/c.md", "---\ntitle: C\n---\nOn its own.\n");
    tmp
}

fn build(root: &Path, options: &BuildOptions) -> BuildReport {
    let site = Site::load(root, Path::new("outputs"), &LoaderRegistry::default(), HookRegistry::new()).unwrap();
    generate::build(Arc::new(site), options).unwrap()
}

fn cps(names: &[&str]) -> BTreeSet<ContentPath> {
    names.iter().map(|n| ContentPath::new(&[], *n)).collect()
}

#[test]
fn first_build_is_full() {
    let tmp = project();
    let report = build(tmp.path(), &BuildOptions::default());
    assert!(report.is_success());
    assert!(report.plan.full);
    assert_eq!(report.plan.reason, Some(RebuildReason::NoState));
    assert_eq!(report.written.len(), 3);

    let a = fs::read_to_string(tmp.path().join("outputs/a.html")).unwrap();
    assert!(a.contains("href=\"b.html\""));
    assert!(tmp.path().join("outputs/.quire-depends.json").is_file());
}

#[test]
fn unchanged_project_builds_nothing() {
    let tmp = project();
    build(tmp.path(), &BuildOptions::default());
    let report = build(tmp.path(), &BuildOptions::default());
    assert!(!report.plan.full);
    assert!(report.plan.updated.is_empty());
    assert!(report.written.is_empty());
    assert_eq!(report.skipped, 3);
}

#[test]
fn touched_content_rebuilds_its_dependents() {
    let tmp = project();
    build(tmp.path(), &BuildOptions::default());
    touch(tmp.path(), "contents/b.md");

    let report = build(tmp.path(), &BuildOptions::default());
    assert!(!report.plan.full);
    assert_eq!(report.plan.updated, cps(&["a.md", "b.md"]));
    let mut written: Vec<String> = report
        .written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    written.sort();
    assert_eq!(written, vec!["a.html", "b.html"]);
}

#[test]
fn config_change_forces_full_rebuild() {
    let tmp = project();
    build(tmp.path(), &BuildOptions::default());
    touch(tmp.path(), "config.toml");

    let report = build(tmp.path(), &BuildOptions::default());
    assert!(report.plan.full);
    assert!(matches!(report.plan.reason, Some(RebuildReason::ConfigModified(_))));
}

#[test]
fn added_content_forces_full_rebuild() {
    let tmp = project();
    build(tmp.path(), &BuildOptions::default());
    write(tmp.path(), "contents/d.md", "new");

    let report = build(tmp.path(), &BuildOptions::default());
    assert_eq!(report.plan.reason, Some(RebuildReason::ContentSetChanged));
    assert_eq!(report.written.len(), 4);
}

#[test]
fn always_rebuild_contents_join_every_partial_build() {
    let tmp = project();
    write(tmp.path(), "contents/clock.html", "Built at {{ now() }}");
    build(tmp.path(), &BuildOptions::default());

    let report = build(tmp.path(), &BuildOptions::default());
    assert!(!report.plan.full);
    assert_eq!(report.plan.updated, cps(&["clock.html"]));
    assert_eq!(report.written.len(), 1);
}

#[test]
fn failed_contents_rebuild_once_their_dependency_is_fixed() {
    let tmp = project();
    write(tmp.path(), "contents/a.md", "---\ntitle: A\n---\n{{ html_of(target=\"b.md\") }}\n");
    write(tmp.path(), "contents/b.md", "---\ntitle: B\n---\n{{ link_to(target=\"gone.md\") }}\n");
    let first = build(tmp.path(), &BuildOptions::default());
    let failed: BTreeSet<ContentPath> = first.errors.iter().map(|e| e.content.clone()).collect();
    assert_eq!(failed, cps(&["a.md", "b.md"]));
    assert!(!tmp.path().join("outputs/a.html").exists());

    write(tmp.path(), "contents/b.md", "---\ntitle: B\n---\nHello from b.\n");
    touch(tmp.path(), "contents/b.md");
    let second = build(tmp.path(), &BuildOptions::default());
    assert!(!second.plan.full);
    assert!(second.is_success());
    assert_eq!(second.plan.updated, cps(&["a.md", "b.md"]));
    let a = fs::read_to_string(tmp.path().join("outputs/a.html")).unwrap();
    assert!(a.contains("Hello from b."));
}
