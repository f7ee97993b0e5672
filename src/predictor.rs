//! Predictor abstraction shared by the structural and sequence-only paths
//!
//! A predictor is built for one (category, path) unit, fed every query of
//! that unit one at a time, exported once, then dropped. Which path a call
//! belongs to is carried by `PredictionInput`, not by the predictor's type.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::config::FunctionCategory;
use crate::contact_map::ContactMap;
use crate::error::AnnotateError;

/// The two inference strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionPath {
    /// Graph model over the aligned contact map
    Structure,
    /// Sequence-only model
    Sequence,
}

impl PredictionPath {
    /// Model family tag used in file names and the model configuration
    pub fn tag(&self) -> &'static str {
        match self {
            PredictionPath::Structure => "gcn",
            PredictionPath::Sequence => "cnn",
        }
    }
}

impl fmt::Display for PredictionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// What a single prediction call receives
#[derive(Debug, Clone, Copy)]
pub enum PredictionInput<'a> {
    Structure {
        sequence: &'a str,
        contact_map: &'a ContactMap,
    },
    Sequence {
        sequence: &'a str,
    },
}

impl PredictionInput<'_> {
    pub fn path(&self) -> PredictionPath {
        match self {
            PredictionInput::Structure { .. } => PredictionPath::Structure,
            PredictionInput::Sequence { .. } => PredictionPath::Sequence,
        }
    }

    pub fn sequence(&self) -> &str {
        match self {
            PredictionInput::Structure { sequence, .. } | PredictionInput::Sequence { sequence } => {
                *sequence
            }
        }
    }
}

pub trait Predictor {
    /// Predict one query and keep the result for `export`
    fn predict(&mut self, query_id: &str, input: PredictionInput<'_>) -> Result<()>;

    /// Write everything predicted so far as one result table
    fn export(&self, destination: &Path) -> Result<()>;
}

/// Builds one predictor per (category, path) unit
pub trait PredictorFactory {
    /// Fail early if the unit could not be built; called for every unit
    /// before any search work starts
    fn check(&self, category: FunctionCategory, path: PredictionPath) -> Result<()>;

    fn build(&self, category: FunctionCategory, path: PredictionPath) -> Result<Box<dyn Predictor>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermScore {
    /// GO term or EC number
    pub term: String,
    pub score: f32,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize)]
struct ResultRow<'a> {
    query_id: &'a str,
    term: &'a str,
    score: f32,
    name: &'a str,
}

/// Query id -> scored terms, in prediction order
#[derive(Debug, Clone, Default)]
pub struct PredictionTable {
    rows: IndexMap<String, Vec<TermScore>>,
}

impl PredictionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, query_id: &str, mut scores: Vec<TermScore>) {
        scores.sort_by_key(|s| std::cmp::Reverse(OrderedFloat(s.score)));
        self.rows.insert(query_id.to_string(), scores);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, query_id: &str) -> Option<&[TermScore]> {
        self.rows.get(query_id).map(|v| v.as_slice())
    }

    /// CSV with header `query_id,term,score,name`, best score first per query.
    /// A query without any term above threshold contributes no rows.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(["query_id", "term", "score", "name"])?;
        for (query_id, scores) in &self.rows {
            for s in scores {
                writer.serialize(ResultRow {
                    query_id,
                    term: &s.term,
                    score: s.score,
                    name: &s.name,
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

/// Per-category model entry in `model_config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub model_path: PathBuf,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

fn default_min_score() -> f32 {
    0.1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelFamily {
    pub models: HashMap<String, ModelParams>,
}

/// Model configuration, one family per prediction path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub gcn: ModelFamily,
    #[serde(default)]
    pub cnn: ModelFamily,
}

impl ModelConfig {
    /// Read the configuration; relative model paths are resolved against
    /// the configuration file's directory
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            AnnotateError::config(format!(
                "Cannot read model configuration {}: {e}",
                path.display()
            ))
        })?;
        let mut config: ModelConfig = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| {
                AnnotateError::config(format!(
                    "Malformed model configuration {}: {e}",
                    path.display()
                ))
            })?;

        if let Some(base) = path.parent() {
            for family in [&mut config.gcn, &mut config.cnn] {
                for params in family.models.values_mut() {
                    if params.model_path.is_relative() {
                        params.model_path = base.join(&params.model_path);
                    }
                }
            }
        }
        Ok(config)
    }

    pub fn params(&self, category: FunctionCategory, path: PredictionPath) -> Result<&ModelParams> {
        let family = match path {
            PredictionPath::Structure => &self.gcn,
            PredictionPath::Sequence => &self.cnn,
        };
        family.models.get(category.code()).ok_or_else(|| {
            AnnotateError::config(format!(
                "No {path} model configured for category '{category}'"
            ))
            .into()
        })
    }
}
