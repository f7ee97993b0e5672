//! Run-wide configuration
//!
//! Everything a run needs is carried explicitly in `PipelineConfig` and
//! passed to each stage; nothing is read from ambient state.

use anyhow::Result;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AnnotateError;

pub const DEFAULT_MAX_QUERY_LENGTH: usize = 1000;
pub const DEFAULT_CONTACT_THRESHOLD: f32 = 6.0;
pub const DEFAULT_GENERATED_NEIGHBOURS: usize = 2;

/// Independent functional output dimension predicted per query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionCategory {
    MolecularFunction,
    BiologicalProcess,
    CellularComponent,
    EnzymeCommission,
}

impl FunctionCategory {
    pub const ALL: [FunctionCategory; 4] = [
        FunctionCategory::MolecularFunction,
        FunctionCategory::BiologicalProcess,
        FunctionCategory::CellularComponent,
        FunctionCategory::EnzymeCommission,
    ];

    /// Short code used in file names and model configuration keys
    pub fn code(&self) -> &'static str {
        match self {
            FunctionCategory::MolecularFunction => "mf",
            FunctionCategory::BiologicalProcess => "bp",
            FunctionCategory::CellularComponent => "cc",
            FunctionCategory::EnzymeCommission => "ec",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FunctionCategory::MolecularFunction => "molecular function",
            FunctionCategory::BiologicalProcess => "biological process",
            FunctionCategory::CellularComponent => "cellular component",
            FunctionCategory::EnzymeCommission => "enzyme commission",
        }
    }
}

impl fmt::Display for FunctionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for FunctionCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mf" | "molecular_function" => Ok(FunctionCategory::MolecularFunction),
            "bp" | "biological_process" => Ok(FunctionCategory::BiologicalProcess),
            "cc" | "cellular_component" => Ok(FunctionCategory::CellularComponent),
            "ec" | "enzyme_commission" => Ok(FunctionCategory::EnzymeCommission),
            _ => Err(AnnotateError::config(format!(
                "Unknown function category '{s}'. Valid categories: mf, bp, cc, ec"
            ))
            .into()),
        }
    }
}

/// How contacts are synthesized for the structural path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactMode {
    /// Only distances projected from the target structure
    Precomputed,
    /// Projected distances plus sequence-adjacency contacts for query
    /// residues aligned against a target gap
    Generated { neighbours: usize },
}

impl ContactMode {
    /// 0 selects `Precomputed`, anything else `Generated`
    pub fn from_neighbours(neighbours: usize) -> Self {
        if neighbours == 0 {
            ContactMode::Precomputed
        } else {
            ContactMode::Generated { neighbours }
        }
    }
}

impl Default for ContactMode {
    fn default() -> Self {
        ContactMode::Generated {
            neighbours: DEFAULT_GENERATED_NEIGHBOURS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
    pub data_root: PathBuf,
    pub target_db_name: String,
    pub max_query_length: usize,
    /// Processed in this order
    pub categories: Vec<FunctionCategory>,
    /// Distance cutoff in Angstrom
    pub contact_threshold: f32,
    pub contact_mode: ContactMode,
    /// Hits below this identity are discarded before best-hit selection
    pub min_identity: f32,
}

impl PipelineConfig {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        data_root: impl Into<PathBuf>,
        target_db_name: impl Into<String>,
    ) -> Self {
        PipelineConfig {
            work_dir: work_dir.into(),
            data_root: data_root.into(),
            target_db_name: target_db_name.into(),
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            categories: FunctionCategory::ALL.to_vec(),
            contact_threshold: DEFAULT_CONTACT_THRESHOLD,
            contact_mode: ContactMode::default(),
            min_identity: 0.0,
        }
    }

    pub fn with_categories(mut self, categories: Vec<FunctionCategory>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_max_query_length(mut self, max_query_length: usize) -> Self {
        self.max_query_length = max_query_length;
        self
    }

    pub fn with_contact_threshold(mut self, threshold: f32) -> Self {
        self.contact_threshold = threshold;
        self
    }

    pub fn with_contact_mode(mut self, mode: ContactMode) -> Self {
        self.contact_mode = mode;
        self
    }

    pub fn with_min_identity(mut self, min_identity: f32) -> Self {
        self.min_identity = min_identity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(AnnotateError::config("No function categories configured").into());
        }
        for (i, category) in self.categories.iter().enumerate() {
            if self.categories[..i].contains(category) {
                return Err(AnnotateError::config(format!(
                    "Function category '{category}' listed more than once"
                ))
                .into());
            }
        }
        if self.max_query_length == 0 {
            return Err(AnnotateError::config("Maximum query length must be positive").into());
        }
        if !(self.contact_threshold > 0.0 && self.contact_threshold.is_finite()) {
            return Err(AnnotateError::config(format!(
                "Contact threshold must be a positive distance, got {}",
                self.contact_threshold
            ))
            .into());
        }
        if !(0.0..=1.0).contains(&self.min_identity) {
            return Err(AnnotateError::config(format!(
                "Minimum identity must be within [0, 1], got {}",
                self.min_identity
            ))
            .into());
        }
        if self.target_db_name.is_empty() {
            return Err(AnnotateError::config("Target collection name is empty").into());
        }
        Ok(())
    }
}

/// Parse a comma separated category list like "mf,bp,cc"
pub fn parse_categories(list: &str) -> Result<Vec<FunctionCategory>> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(FunctionCategory::from_str)
        .collect()
}
