//! Sequence search against a target collection
//!
//! The pipeline only needs a tabular hit report; how it is produced is up to
//! the `SearchTool` implementation. `MmseqsSearch` shells out to
//! `mmseqs easy-search` and reuses an existing report from a previous run.

use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::AnnotateError;
use crate::target_db::TargetHandle;

pub const SEARCH_REPORT_FILE: &str = "mmseqs2_search_results.m8";

/// Columns requested from mmseqs, in the order `alignments` parses them
pub const SEARCH_FORMAT_OUTPUT: &str = "query,target,fident,qaln,taln,bits,qstart,qend,tstart";

pub trait SearchTool {
    /// Search `query_file` against `target` and return the hit report path
    fn search(&self, query_file: &Path, target: &TargetHandle, work_dir: &Path) -> Result<PathBuf>;
}

/// Runs `mmseqs easy-search`
pub struct MmseqsSearch {
    binary: PathBuf,
    threads: usize,
}

impl MmseqsSearch {
    pub fn new(binary: PathBuf, threads: usize) -> Self {
        MmseqsSearch { binary, threads }
    }

    /// Use an explicit binary if given, otherwise look `mmseqs` up on PATH
    pub fn locate(binary: Option<PathBuf>, threads: usize) -> Result<Self> {
        let binary = match binary {
            Some(path) => {
                if !path.exists() {
                    return Err(AnnotateError::config(format!(
                        "mmseqs binary not found at {}",
                        path.display()
                    ))
                    .into());
                }
                path
            }
            None => find_on_path("mmseqs").ok_or_else(|| {
                AnnotateError::config(
                    "mmseqs binary not found on PATH. Install MMseqs2 or pass --mmseqs",
                )
            })?,
        };
        Ok(MmseqsSearch::new(binary, threads))
    }
}

fn find_on_path(binary_name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(binary_name))
        .find(|candidate| candidate.is_file())
}

impl SearchTool for MmseqsSearch {
    fn search(&self, query_file: &Path, target: &TargetHandle, work_dir: &Path) -> Result<PathBuf> {
        let report = work_dir.join(SEARCH_REPORT_FILE);
        if report.exists() {
            info!("{} already exists, reusing search results", SEARCH_REPORT_FILE);
            return Ok(report);
        }

        // mmseqs writes the report incrementally, so search into a staging
        // name and only rename once it exits cleanly
        let staging = work_dir.join(format!("{SEARCH_REPORT_FILE}.partial"));
        let tmp_dir = tempfile::Builder::new()
            .prefix("mmseqs_tmp")
            .tempdir_in(work_dir)
            .context("Failed to create mmseqs temp directory")?;

        info!(
            "Running mmseqs easy-search: {} vs {}",
            query_file.display(),
            target.search_db().display()
        );

        let output = Command::new(&self.binary)
            .arg("easy-search")
            .arg(query_file)
            .arg(target.search_db())
            .arg(&staging)
            .arg(tmp_dir.path())
            .args(["--format-output", SEARCH_FORMAT_OUTPUT])
            .args(["--threads", &self.threads.to_string()])
            .output()
            .map_err(|e| {
                AnnotateError::search(format!(
                    "failed to launch {}: {e}",
                    self.binary.display()
                ))
            })?;

        if !output.status.success() {
            let _ = std::fs::remove_file(&staging);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnnotateError::search(format!(
                "mmseqs easy-search exited with {}: {}",
                output.status,
                stderr.trim()
            ))
            .into());
        }

        if !staging.exists() {
            warn!("mmseqs produced no report, treating as zero hits");
            std::fs::write(&staging, b"")?;
        }
        std::fs::rename(&staging, &report)
            .with_context(|| format!("Failed to move search report to {}", report.display()))?;

        Ok(report)
    }
}
