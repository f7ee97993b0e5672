//! Query batch loading
//!
//! A work directory holds exactly one protein batch (`*.faa` or `*.faa.gz`).
//! The batch is parsed, over-length queries are removed and their ids are
//! written to a side artifact, and the remainder becomes the immutable
//! `QueryBatch` for the run.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use indexmap::IndexMap;
use log::{info, warn};
use noodles::fasta;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::error::AnnotateError;

pub const EXCLUDED_IDS_FILE: &str = "metadata_skipped_ids_due_to_max_length.json";

const QUERY_EXTENSIONS: [&str; 2] = [".faa", ".faa.gz"];

/// Query id -> residue string, in file order
#[derive(Debug, Clone, Default)]
pub struct QueryBatch {
    source: PathBuf,
    sequences: IndexMap<String, String>,
}

impl QueryBatch {
    pub fn new(source: impl Into<PathBuf>, sequences: IndexMap<String, String>) -> Self {
        QueryBatch {
            source: source.into(),
            sequences,
        }
    }

    /// The batch file the queries came from
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn get(&self, query_id: &str) -> Option<&str> {
        self.sequences.get(query_id).map(|s| s.as_str())
    }

    pub fn contains(&self, query_id: &str) -> bool {
        self.sequences.contains_key(query_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sequences.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sequences.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Result of loading the work directory's batch
#[derive(Debug)]
pub struct LoadedBatch {
    pub batch: QueryBatch,
    /// Ids dropped for exceeding the maximum length, in file order
    pub excluded: Vec<String>,
    /// Extra batch files that were ignored
    pub discarded_files: Vec<PathBuf>,
}

/// Collect candidate batch files under `work_dir`, sorted by path
pub fn find_query_files(work_dir: &Path) -> Result<Vec<PathBuf>> {
    if !work_dir.is_dir() {
        return Err(AnnotateError::input(format!(
            "Work directory {} does not exist",
            work_dir.display()
        ))
        .into());
    }

    // symlinks are not followed, so a link cycle cannot multiply the batch
    let mut found = Vec::new();
    for entry in WalkDir::new(work_dir).follow_links(false) {
        let entry = entry
            .with_context(|| format!("Failed to list directory {}", work_dir.display()))?;
        if entry.file_type().is_file() && is_query_file(entry.path()) {
            found.push(entry.into_path());
        }
    }

    found.sort();
    Ok(found)
}

fn is_query_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| QUERY_EXTENSIONS.iter().any(|ext| name.ends_with(ext)))
}

fn open_query_input(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open query batch {}", path.display()))?;

    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Parse every record of a protein FASTA batch
pub fn read_query_file(path: &Path) -> Result<IndexMap<String, String>> {
    let mut reader = fasta::io::Reader::new(open_query_input(path)?);
    let mut sequences = IndexMap::new();

    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(|e| {
            AnnotateError::input(format!(
                "{}: record {} could not be parsed: {e}",
                path.display(),
                i + 1
            ))
        })?;

        let id = String::from_utf8_lossy(record.name()).into_owned();
        let residues = String::from_utf8_lossy(record.sequence().as_ref()).into_owned();

        if sequences.insert(id.clone(), residues).is_some() {
            return Err(AnnotateError::input(format!(
                "{}: query id '{id}' appears more than once",
                path.display()
            ))
            .into());
        }
    }

    Ok(sequences)
}

/// Split sequences into those within `max_length` and the ids of those over it
pub fn split_by_length(
    sequences: IndexMap<String, String>,
    max_length: usize,
) -> (IndexMap<String, String>, Vec<String>) {
    let mut kept = IndexMap::with_capacity(sequences.len());
    let mut excluded = Vec::new();

    for (id, seq) in sequences {
        if seq.len() > max_length {
            excluded.push(id);
        } else {
            kept.insert(id, seq);
        }
    }

    (kept, excluded)
}

/// Write the over-length id list as a sorted JSON array
pub fn write_excluded_ids(path: &Path, excluded: &[String]) -> Result<()> {
    let mut sorted = excluded.to_vec();
    sorted.sort();
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, &sorted)?;
    Ok(())
}

/// Locate, parse and length-filter the work directory's query batch
pub fn load_query_batch(config: &PipelineConfig) -> Result<LoadedBatch> {
    let mut files = find_query_files(&config.work_dir)?.into_iter();
    let query_file = files.next().ok_or_else(|| {
        AnnotateError::input(format!(
            "No query .faa files found in {}",
            config.work_dir.display()
        ))
    })?;
    let discarded_files: Vec<PathBuf> = files.collect();

    if !discarded_files.is_empty() {
        warn!(
            "{} contains more than one query batch. Only {} will be processed, {:?} will be discarded",
            config.work_dir.display(),
            query_file.display(),
            discarded_files
        );
    }

    let sequences = read_query_file(&query_file)?;
    if sequences.is_empty() {
        return Err(AnnotateError::input(format!(
            "{} does not contain any parsable protein sequences",
            query_file.display()
        ))
        .into());
    }

    let (kept, excluded) = split_by_length(sequences, config.max_query_length);

    if !excluded.is_empty() {
        warn!(
            "Skipping {} queries longer than {} residues: {:?}. Ids saved in {}",
            excluded.len(),
            config.max_query_length,
            excluded,
            EXCLUDED_IDS_FILE
        );
        write_excluded_ids(&config.work_dir.join(EXCLUDED_IDS_FILE), &excluded)?;
        if kept.is_empty() {
            info!(
                "All sequences in {} were too long, nothing to process",
                query_file.display()
            );
        }
    }

    Ok(LoadedBatch {
        batch: QueryBatch::new(query_file, kept),
        excluded,
        discarded_files,
    })
}
