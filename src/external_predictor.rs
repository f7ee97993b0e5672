//! Predictor backed by an external model-runner process
//!
//! One runner process is spawned per (category, path) unit:
//!
//! ```text
//! <command> --model <model_path> --kind <gcn|cnn> --min-score <s>
//! ```
//!
//! Each prediction is one JSON request line on the runner's stdin answered
//! by one JSON response line on its stdout. Dropping the predictor closes
//! stdin and reaps the process.

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::config::FunctionCategory;
use crate::error::AnnotateError;
use crate::predictor::{
    ModelConfig, PredictionInput, PredictionPath, PredictionTable, Predictor, PredictorFactory,
    TermScore,
};

#[derive(Debug, Serialize)]
pub struct PredictRequest<'a> {
    pub query_id: &'a str,
    pub sequence: &'a str,
    /// Upper-triangle contacts, absent for the sequence path
    pub contacts: Option<Vec<(usize, usize)>>,
}

impl<'a> PredictRequest<'a> {
    pub fn new(query_id: &'a str, input: &PredictionInput<'a>) -> Self {
        let (sequence, contacts) = match *input {
            PredictionInput::Structure {
                sequence,
                contact_map,
            } => (sequence, Some(contact_map.contacts().collect())),
            PredictionInput::Sequence { sequence } => (sequence, None),
        };
        PredictRequest {
            query_id,
            sequence,
            contacts,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictResponse {
    pub query_id: String,
    #[serde(default)]
    pub predictions: Vec<TermScore>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Check a response against the query it answers and extract its scores
pub fn accept_response(stage: &str, query_id: &str, line: &str) -> Result<Vec<TermScore>> {
    let response: PredictResponse = serde_json::from_str(line.trim()).map_err(|e| {
        AnnotateError::predictor(stage, Some(query_id), format!("malformed runner response: {e}"))
    })?;

    if response.query_id != query_id {
        return Err(AnnotateError::predictor(
            stage,
            Some(query_id),
            format!("runner answered for '{}' instead", response.query_id),
        )
        .into());
    }
    if let Some(error) = response.error {
        return Err(AnnotateError::predictor(stage, Some(query_id), error).into());
    }
    Ok(response.predictions)
}

pub struct ExternalPredictor {
    stage: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    table: PredictionTable,
}

impl ExternalPredictor {
    pub fn spawn(
        stage: String,
        command: &Path,
        model_path: &Path,
        path: PredictionPath,
        min_score: f32,
    ) -> Result<Self> {
        let mut child = Command::new(command)
            .arg("--model")
            .arg(model_path)
            .args(["--kind", path.tag()])
            .args(["--min-score", &min_score.to_string()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                AnnotateError::predictor(
                    &stage,
                    None,
                    format!("failed to start {}: {e}", command.display()),
                )
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            AnnotateError::predictor(&stage, None, "runner stdout was not captured")
        })?;

        debug!("Started model runner for {stage} (pid {})", child.id());

        Ok(ExternalPredictor {
            stage,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            table: PredictionTable::new(),
        })
    }
}

impl Predictor for ExternalPredictor {
    fn predict(&mut self, query_id: &str, input: PredictionInput<'_>) -> Result<()> {
        let stage = self.stage.as_str();
        let request = serde_json::to_string(&PredictRequest::new(query_id, &input))?;

        let stdin = self.stdin.as_mut().ok_or_else(|| {
            AnnotateError::predictor(stage, Some(query_id), "runner input is closed")
        })?;
        writeln!(stdin, "{request}")
            .and_then(|_| stdin.flush())
            .map_err(|e| {
                AnnotateError::predictor(stage, Some(query_id), format!("runner went away: {e}"))
            })?;

        let mut line = String::new();
        let read = self.stdout.read_line(&mut line).map_err(|e| {
            AnnotateError::predictor(stage, Some(query_id), format!("reading runner output: {e}"))
        })?;
        if read == 0 {
            return Err(AnnotateError::predictor(
                stage,
                Some(query_id),
                "runner exited before answering",
            )
            .into());
        }

        let scores = accept_response(stage, query_id, &line)?;
        self.table.insert(query_id, scores);
        Ok(())
    }

    fn export(&self, destination: &Path) -> Result<()> {
        self.table.write_csv(destination)
    }
}

impl Drop for ExternalPredictor {
    fn drop(&mut self) {
        // closing stdin is the runner's signal to exit
        drop(self.stdin.take());
        let _ = self.child.wait();
    }
}

/// Builds `ExternalPredictor`s from the model configuration
pub struct ExternalPredictorFactory {
    models: ModelConfig,
    command: PathBuf,
}

impl ExternalPredictorFactory {
    pub fn new(models: ModelConfig, command: PathBuf) -> Self {
        ExternalPredictorFactory { models, command }
    }
}

impl PredictorFactory for ExternalPredictorFactory {
    fn check(&self, category: FunctionCategory, path: PredictionPath) -> Result<()> {
        let params = self.models.params(category, path)?;
        if !params.model_path.exists() {
            return Err(AnnotateError::config(format!(
                "{path} model for category '{category}' not found at {}",
                params.model_path.display()
            ))
            .into());
        }
        Ok(())
    }

    fn build(&self, category: FunctionCategory, path: PredictionPath) -> Result<Box<dyn Predictor>> {
        let params = self.models.params(category, path)?;
        let predictor = ExternalPredictor::spawn(
            format!("{}_{}", path.tag(), category.code()),
            &self.command,
            &params.model_path,
            path,
            params.min_score,
        )?;
        Ok(Box::new(predictor))
    }
}
