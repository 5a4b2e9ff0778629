//! Build orchestration.
//!
//! Stage 2 of the build, after [`Site::load`](crate::site::Site::load):
//!
//! 1. Load the saved dependency graph and decide what to rebuild
//!    ([`DependencyTracker::check_rebuild`]), or rebuild everything when asked.
//! 2. Expand every content that needs building into [`BuildUnit`]s.
//! 3. Render units on a local rayon pool. Units are dealt round-robin into
//!    a few batches so a large site is not dispatched one unit at a time;
//!    each worker sends its [`UnitOutcome`]s back over a channel.
//! 4. Fold the outcomes into the graph and save it once, after every unit
//!    has finished.
//!
//! A failing unit becomes an [`ErrorRecord`] and never stops its siblings.
//! Debug mode runs every unit on the calling thread, in order.

use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{info, warn};

use crate::builder::{self, BuildUnit, ErrorRecord, UnitOutcome};
use crate::config::{self, ConfigError};
use crate::context::RenderError;
use crate::depends::{DependencyTracker, RebuildPlan, RebuildReason};
use crate::site::Site;

/// Smallest batch worth dispatching on its own.
const MIN_BATCH: usize = 8;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Ignore saved state and build everything.
    pub rebuild: bool,
    /// Run units sequentially on the calling thread.
    pub debug: bool,
    /// Worker count; falls back to `max_processes`, then to all cores.
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub written: Vec<PathBuf>,
    pub units: usize,
    /// Contents left alone because nothing they depend on changed.
    pub skipped: usize,
    pub plan: RebuildPlan,
    pub errors: Vec<ErrorRecord>,
    pub depends_saved: bool,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Deal `units` round-robin into at most `workers * 2` batches of at least
/// [`MIN_BATCH`] units each (the last batches may be shorter).
pub fn make_batches(units: Vec<BuildUnit>, workers: usize) -> Vec<Vec<BuildUnit>> {
    let count = (workers.max(1) * 2)
        .min(units.len().div_ceil(MIN_BATCH))
        .max(1);
    let mut batches: Vec<Vec<BuildUnit>> = (0..count).map(|_| Vec::new()).collect();
    for (i, unit) in units.into_iter().enumerate() {
        batches[i % count].push(unit);
    }
    batches
}

fn worker_count(site: &Site, options: &BuildOptions) -> Result<usize, ConfigError> {
    let configured = match options.jobs {
        Some(jobs) => Some(jobs),
        None => match site.config.get_opt(&[], "max_processes")? {
            Some(value) => Some(
                value
                    .as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| ConfigError::invalid("max_processes", &value, "expected a non-negative integer"))?,
            ),
            None => None,
        },
    };
    Ok(config::effective_threads(configured))
}

fn run_parallel(site: &Arc<Site>, units: Vec<BuildUnit>, workers: usize) -> Result<Vec<UnitOutcome>, GenerateError> {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
    let batches = make_batches(units, workers);
    let (tx, rx) = mpsc::channel();
    pool.install(|| {
        batches.into_par_iter().for_each_with(tx, |tx, batch| {
            for unit in batch {
                // The receiver outlives the pool; a send cannot fail here.
                let _ = tx.send(builder::run_unit(site.clone(), unit));
            }
        });
    });
    Ok(rx.into_iter().collect())
}

/// Build `site` into its output directory.
pub fn build(site: Arc<Site>, options: &BuildOptions) -> Result<BuildReport, GenerateError> {
    let started = SystemTime::now();
    let depends_file = &site.paths.depends_file;
    let mut tracker = DependencyTracker::load(depends_file);
    let plan = if options.rebuild {
        RebuildPlan::full(RebuildReason::Forced, &site)
    } else {
        tracker.check_rebuild(&site)
    };
    match &plan.reason {
        Some(reason) => info!(%reason, "full rebuild"),
        None => info!(updated = plan.updated.len(), "incremental build"),
    }

    let mut units = Vec::new();
    let mut errors = Vec::new();
    let mut skipped = 0;
    for content in site.store.iter() {
        if !plan.needs_build(content.path()) {
            skipped += 1;
            continue;
        }
        match builder::create_units(&site, content) {
            Ok(found) => units.extend(found),
            Err(err) => errors.push(ErrorRecord::new(content.path(), &RenderError::from(err))),
        }
    }
    let unit_count = units.len();

    let workers = worker_count(&site, options)?;
    let mut outcomes = if options.debug {
        units
            .into_iter()
            .map(|unit| builder::run_unit(site.clone(), unit))
            .collect()
    } else {
        info!(units = unit_count, workers, "rendering");
        run_parallel(&site, units, workers)?
    };
    outcomes.sort_by(|a, b| {
        (&a.unit.content, &a.unit.args.group_value, a.unit.args.cur_page).cmp(&(
            &b.unit.content,
            &b.unit.args.group_value,
            b.unit.args.cur_page,
        ))
    });

    let mut written = Vec::new();
    for outcome in &outcomes {
        match &outcome.result {
            Ok(output) => written.extend(output.written.iter().cloned()),
            Err(record) => errors.push(record.clone()),
        }
    }

    tracker.record(&site, &plan, &outcomes, started);
    let depends_saved = match tracker.save(depends_file) {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %depends_file.display(), error = %err, "could not save dependency state");
            false
        }
    };

    info!(
        written = written.len(),
        skipped,
        errors = errors.len(),
        "build finished"
    );
    Ok(BuildReport {
        written,
        units: unit_count,
        skipped,
        plan,
        errors,
        depends_saved,
    })
}
