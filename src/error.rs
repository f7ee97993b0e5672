//! Error taxonomy for the annotation pipeline
//!
//! Library functions return `anyhow::Result`, but every fatal condition the
//! pipeline raises itself starts out as one of these variants so callers can
//! `downcast_ref::<AnnotateError>()` through any attached context.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnnotateError {
    /// Missing, empty or unparseable query batch
    #[error("input error: {0}")]
    Input(String),

    /// Unknown target collection, missing resources or model configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Search tool failed or produced a report we cannot read
    #[error("search error: {0}")]
    Search(String),

    #[error("structural data error for target '{target_id}' ({}): {reason}", path.display())]
    StructuralData {
        target_id: String,
        path: PathBuf,
        reason: String,
    },

    #[error("predictor error in {stage}{}: {reason}", query_id.as_deref().map(|q| format!(" for query '{q}'")).unwrap_or_default())]
    Predictor {
        stage: String,
        query_id: Option<String>,
        reason: String,
    },
}

impl AnnotateError {
    pub fn input(msg: impl Into<String>) -> Self {
        AnnotateError::Input(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        AnnotateError::Config(msg.into())
    }

    pub fn search(msg: impl Into<String>) -> Self {
        AnnotateError::Search(msg.into())
    }

    pub fn structural(target_id: &str, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        AnnotateError::StructuralData {
            target_id: target_id.to_string(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn predictor(stage: &str, query_id: Option<&str>, reason: impl Into<String>) -> Self {
        AnnotateError::Predictor {
            stage: stage.to_string(),
            query_id: query_id.map(str::to_string),
            reason: reason.into(),
        }
    }
}
