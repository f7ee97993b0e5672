//! Per-category scheduling of the two prediction paths
//!
//! For each configured category, in order, the structural path runs over
//! the aligned queries and then the sequence path over the unaligned ones.
//! A unit whose result file already exists is skipped without building a
//! predictor or touching the timer. A unit with no queries is not scheduled.
//! Any failure aborts the remaining schedule; finished units keep their
//! result files and are skipped on the next run.

use anyhow::{Context, Result};
use log::{error, info};
use std::path::{Path, PathBuf};

use crate::alignments::QueryPartition;
use crate::config::{FunctionCategory, PipelineConfig};
use crate::contact_map::load_aligned_contact_map;
use crate::elapsed_time::StageTimer;
use crate::error::AnnotateError;
use crate::predictor::{PredictionInput, PredictionPath, Predictor, PredictorFactory};
use crate::query_batch::QueryBatch;
use crate::target_db::TargetHandle;

/// Result file of one (category, path) unit
pub fn result_file_name(category: FunctionCategory, path: PredictionPath) -> String {
    format!("results_{}_{}.csv", path.tag(), category.code())
}

/// Timer label of one (category, path) unit
pub fn unit_label(category: FunctionCategory, path: PredictionPath) -> String {
    format!("{}_{}", path.tag(), category.code())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Result file was already present
    Skipped,
    /// Executed and persisted
    Done { predictions: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub category: FunctionCategory,
    pub path: PredictionPath,
    pub output: PathBuf,
    pub state: UnitState,
}

/// Everything a unit run reads; borrowed for the whole schedule
pub struct ScheduleContext<'a> {
    pub config: &'a PipelineConfig,
    pub batch: &'a QueryBatch,
    pub partition: &'a QueryPartition,
    pub target: &'a TargetHandle,
}

pub struct CategoryScheduler<'a, F: PredictorFactory + ?Sized> {
    ctx: ScheduleContext<'a>,
    factory: &'a F,
}

impl<'a, F: PredictorFactory + ?Sized> CategoryScheduler<'a, F> {
    pub fn new(ctx: ScheduleContext<'a>, factory: &'a F) -> Self {
        CategoryScheduler { ctx, factory }
    }

    /// Paths with at least one query, structural first
    pub fn scheduled_paths(&self) -> Vec<PredictionPath> {
        let mut paths = Vec::with_capacity(2);
        if !self.ctx.partition.aligned.is_empty() {
            paths.push(PredictionPath::Structure);
        }
        if !self.ctx.partition.unaligned.is_empty() {
            paths.push(PredictionPath::Sequence);
        }
        paths
    }

    pub fn run(&self, timer: &mut StageTimer) -> Result<Vec<UnitOutcome>> {
        let mut outcomes = Vec::new();
        let paths = self.scheduled_paths();

        for &category in &self.ctx.config.categories {
            timer.reset();
            info!("Processing category {category} ({})", category.description());

            for &path in &paths {
                let output = self
                    .ctx
                    .config
                    .work_dir
                    .join(result_file_name(category, path));

                if output.exists() {
                    info!("{} already exists, skipping", output.display());
                    outcomes.push(UnitOutcome {
                        category,
                        path,
                        output,
                        state: UnitState::Skipped,
                    });
                    continue;
                }

                let label = unit_label(category, path);
                let predictions = self.run_unit(category, path, &output).map_err(|e| {
                    error!("{label} failed: {e:#}");
                    e
                })?;
                timer.log(&label);

                outcomes.push(UnitOutcome {
                    category,
                    path,
                    output,
                    state: UnitState::Done { predictions },
                });
            }
        }

        Ok(outcomes)
    }

    /// Build the unit's predictor, feed it every query of its subset and
    /// persist the table. The predictor is dropped on every exit path.
    fn run_unit(&self, category: FunctionCategory, path: PredictionPath, output: &Path) -> Result<usize> {
        let label = unit_label(category, path);
        let mut predictor = self
            .factory
            .build(category, path)
            .with_context(|| format!("building predictor for {label}"))?;

        let count = match path {
            PredictionPath::Structure => self.predict_aligned(&label, &mut *predictor)?,
            PredictionPath::Sequence => self.predict_unaligned(&label, &mut *predictor)?,
        };

        persist_export(&*predictor, output)
            .with_context(|| format!("writing results for {label}"))?;
        info!("{label}: {count} queries written to {}", output.display());
        Ok(count)
    }

    fn predict_aligned(&self, label: &str, predictor: &mut dyn Predictor) -> Result<usize> {
        let ctx = &self.ctx;
        info!("Using {label} for {} aligned queries", ctx.partition.aligned.len());

        for (query_id, alignment) in &ctx.partition.aligned {
            let sequence = self.sequence(label, query_id)?;
            let contact_map = load_aligned_contact_map(
                ctx.target,
                &alignment.target_id,
                &alignment.aligned,
                sequence.len(),
                ctx.config.contact_threshold,
                ctx.config.contact_mode,
            )
            .with_context(|| format!("{label}: contact map for query '{query_id}'"))?;

            predictor
                .predict(
                    query_id,
                    PredictionInput::Structure {
                        sequence,
                        contact_map: &contact_map,
                    },
                )
                .with_context(|| format!("{label}: query '{query_id}'"))?;
        }
        Ok(ctx.partition.aligned.len())
    }

    fn predict_unaligned(&self, label: &str, predictor: &mut dyn Predictor) -> Result<usize> {
        let ctx = &self.ctx;
        info!("Using {label} for {} unaligned queries", ctx.partition.unaligned.len());

        for query_id in &ctx.partition.unaligned {
            let sequence = self.sequence(label, query_id)?;
            predictor
                .predict(query_id, PredictionInput::Sequence { sequence })
                .with_context(|| format!("{label}: query '{query_id}'"))?;
        }
        Ok(ctx.partition.unaligned.len())
    }

    fn sequence(&self, label: &str, query_id: &str) -> Result<&'a str> {
        self.ctx.batch.get(query_id).ok_or_else(|| {
            AnnotateError::predictor(label, Some(query_id), "query is not part of the batch").into()
        })
    }
}

/// Export into a temp file beside `output` and rename it into place, so a
/// result file is either complete or absent
pub fn persist_export(predictor: &dyn Predictor, output: &Path) -> Result<()> {
    let dir = output.parent().unwrap_or_else(|| Path::new("."));
    let staged = tempfile::Builder::new()
        .prefix(".partial_")
        .suffix(".csv")
        .tempfile_in(dir)?;
    predictor.export(staged.path())?;
    staged.persist(output).map_err(|e| e.error)?;
    Ok(())
}
