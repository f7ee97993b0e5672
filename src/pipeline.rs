//! End-to-end annotation run
//!
//! load batch -> resolve target -> check models -> search -> partition ->
//! per-category scheduling. Every stage boundary is timed into the work
//! directory's runtime CSV.

use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;

use crate::alignments::{partition_queries, read_search_report};
use crate::config::PipelineConfig;
use crate::elapsed_time::{StageTimer, RUNTIME_FILE};
use crate::predictor::{PredictionPath, PredictorFactory};
use crate::query_batch::load_query_batch;
use crate::scheduler::{CategoryScheduler, ScheduleContext, UnitOutcome, UnitState};
use crate::search::SearchTool;
use crate::target_db::resolve_target;

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub query_file: Option<PathBuf>,
    pub processed: usize,
    pub excluded: Vec<String>,
    pub aligned: usize,
    pub unaligned: usize,
    pub units: Vec<UnitOutcome>,
}

impl RunSummary {
    /// Units that ran a predictor in this invocation
    pub fn executed(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.units
            .iter()
            .filter(|u| matches!(u.state, UnitState::Done { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.units.iter().filter(|u| u.state == UnitState::Skipped)
    }
}

pub fn run_pipeline<S, F>(config: &PipelineConfig, search: &S, factory: &F) -> Result<RunSummary>
where
    S: SearchTool + ?Sized,
    F: PredictorFactory + ?Sized,
{
    config.validate()?;

    let loaded = load_query_batch(config).context("loading query batch")?;
    let batch = loaded.batch;
    let mut summary = RunSummary {
        query_file: Some(batch.source().to_path_buf()),
        processed: batch.len(),
        excluded: loaded.excluded,
        ..Default::default()
    };
    if batch.is_empty() {
        info!("No queries left to annotate");
        return Ok(summary);
    }

    let target = resolve_target(&config.data_root, &config.target_db_name)
        .context("resolving target collection")?;

    for &category in &config.categories {
        for path in [PredictionPath::Structure, PredictionPath::Sequence] {
            factory
                .check(category, path)
                .context("checking model configuration")?;
        }
    }

    info!("Annotating {} sequences from {}", batch.len(), batch.source().display());
    let mut timer = StageTimer::new(config.work_dir.join(RUNTIME_FILE));

    let report = search
        .search(batch.source(), &target, &config.work_dir)
        .context("running sequence search")?;
    timer.log("search");

    let hits = read_search_report(&report).context("reading search report")?;
    let partition = partition_queries(&batch, hits, config.min_identity);
    timer.log("alignments");

    summary.aligned = partition.aligned.len();
    summary.unaligned = partition.unaligned.len();
    info!(
        "{} queries aligned to a structural homolog, {} sequence-only",
        summary.aligned, summary.unaligned
    );

    let scheduler = CategoryScheduler::new(
        ScheduleContext {
            config,
            batch: &batch,
            partition: &partition,
            target: &target,
        },
        factory,
    );
    summary.units = scheduler.run(&mut timer)?;

    timer.log_total();
    Ok(summary)
}
