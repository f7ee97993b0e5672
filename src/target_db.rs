//! Target collection resolution and data-root layout
//!
//! A target collection is addressed by name. Its mmseqs search database and
//! its per-target structural files live at fixed places under the data root:
//!
//! ```text
//! <data_root>/mmseqs_db/<name>/target_db[.dbtype]
//! <data_root>/seq_atoms_dataset/<name>/atoms/<target_id>.bin
//! <data_root>/trained_models/model_config.json
//! ```

use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

use crate::error::AnnotateError;

pub const MMSEQS_DATABASES_DIR: &str = "mmseqs_db";
pub const SEQ_ATOMS_DATASET_DIR: &str = "seq_atoms_dataset";
pub const ATOMS_DIR: &str = "atoms";
pub const TARGET_DB_PREFIX: &str = "target_db";
pub const TRAINED_MODELS_DIR: &str = "trained_models";
pub const MODEL_CONFIG_FILE: &str = "model_config.json";

/// Directories created by `init_data_root`, relative to the data root
pub const DATA_ROOT_LAYOUT: [&str; 8] = [
    MMSEQS_DATABASES_DIR,
    SEQ_ATOMS_DATASET_DIR,
    TRAINED_MODELS_DIR,
    "structure_files",
    "query",
    "query/default",
    "work",
    "finished",
];

/// Resolved target collection, read-only for the rest of the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetHandle {
    name: String,
    search_db: PathBuf,
    atoms_dir: PathBuf,
}

impl TargetHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Database prefix handed to the search tool
    pub fn search_db(&self) -> &Path {
        &self.search_db
    }

    pub fn atoms_dir(&self) -> &Path {
        &self.atoms_dir
    }

    /// Location of a target's precomputed structural file
    pub fn structure_path(&self, target_id: &str) -> PathBuf {
        self.atoms_dir.join(format!("{target_id}.bin"))
    }
}

/// Names of collections that have a search database under `data_root`
pub fn available_collections(data_root: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(data_root.join(MMSEQS_DATABASES_DIR))
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Resolve `name` to its search database and structural data directory
pub fn resolve_target(data_root: &Path, name: &str) -> Result<TargetHandle> {
    let db_dir = data_root.join(MMSEQS_DATABASES_DIR).join(name);
    if !db_dir.is_dir() {
        return Err(AnnotateError::config(format!(
            "Unknown target collection '{name}'. Available collections: {:?}",
            available_collections(data_root)
        ))
        .into());
    }

    let search_db = db_dir.join(TARGET_DB_PREFIX);
    let dbtype = db_dir.join(format!("{TARGET_DB_PREFIX}.dbtype"));
    if !search_db.exists() && !dbtype.exists() {
        return Err(AnnotateError::config(format!(
            "Target collection '{name}' has no search database at {}",
            search_db.display()
        ))
        .into());
    }

    let atoms_dir = data_root
        .join(SEQ_ATOMS_DATASET_DIR)
        .join(name)
        .join(ATOMS_DIR);
    if !atoms_dir.is_dir() {
        return Err(AnnotateError::config(format!(
            "Target collection '{name}' has no structural dataset at {}",
            atoms_dir.display()
        ))
        .into());
    }

    info!("Target database: {}", search_db.display());

    Ok(TargetHandle {
        name: name.to_string(),
        search_db,
        atoms_dir,
    })
}

pub fn model_config_path(data_root: &Path) -> PathBuf {
    data_root.join(TRAINED_MODELS_DIR).join(MODEL_CONFIG_FILE)
}

/// Create the data-root folder layout. Returns whether the model
/// configuration is already in place.
pub fn init_data_root(data_root: &Path) -> Result<bool> {
    for dir in DATA_ROOT_LAYOUT {
        let path = data_root.join(dir);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
    }
    Ok(model_config_path(data_root).exists())
}
