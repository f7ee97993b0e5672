
use anyhow::Result;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::fs;

use metafri::config::FunctionCategory::{BiologicalProcess, MolecularFunction};
use metafri::elapsed_time::RUNTIME_FILE;
use metafri::error::AnnotateError;
use metafri::pipeline::run_pipeline;
use metafri::query_batch::EXCLUDED_IDS_FILE;
use metafri::scheduler::UnitState;
use test_utils::*;

fn runtime_tasks(ws: &Workspace) -> Vec<String> {
    ws.read(RUNTIME_FILE)
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap_or_default().to_string())
        .collect()
}

fn result_files(ws: &Workspace) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(&ws.work_dir)
        .unwrap()
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.starts_with("results_")
                .then(|| (name, fs::read(e.path()).unwrap()))
        })
        .collect()
}

/// Two queries, q1 with a structural hit against t1, q2 without
fn aligned_and_unaligned(ws: &Workspace) -> ScriptedSearch {
    let q1 = protein(50);
    let q2 = protein(40);
    ws.write_batch("batch.faa", &[("q1", q1.clone()), ("q2", q2)]);
    ws.write_structure("t1", 20);
    ScriptedSearch::new(hit_line("q1", "t1", 0.9, &q1, 10))
}

#[test]
fn test_over_length_queries_are_excluded() -> Result<()> {
    let ws = Workspace::new();
    ws.write_batch(
        "batch.faa",
        &[("q1", protein(50)), ("q2", protein(50)), ("q3", protein(5000))],
    );
    let search = ScriptedSearch::new("");
    let factory = RecordingFactory::new();

    let config = ws.config(&[MolecularFunction]).with_max_query_length(1000);
    let summary = run_pipeline(&config, &search, &factory)?;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.excluded, vec!["q3".to_string()]);

    let excluded: Vec<String> = serde_json::from_str(&ws.read(EXCLUDED_IDS_FILE))?;
    assert_eq!(excluded, vec!["q3".to_string()]);

    let predicted: Vec<String> = factory
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Predicted { query_id, .. } => Some(query_id),
            _ => None,
        })
        .collect();
    assert_eq!(predicted, vec!["q1".to_string(), "q2".to_string()]);
    Ok(())
}

#[test]
fn test_aligned_and_unaligned_paths() -> Result<()> {
    let ws = Workspace::new();
    let search = aligned_and_unaligned(&ws);
    let factory = RecordingFactory::new();

    let summary = run_pipeline(&ws.config(&[MolecularFunction]), &search, &factory)?;
    assert_eq!(summary.aligned, 1);
    assert_eq!(summary.unaligned, 1);
    // nothing was over length, so no side artifact
    assert!(summary.excluded.is_empty());
    assert!(!ws.output(EXCLUDED_IDS_FILE).exists());

    assert_eq!(
        ws.read("results_gcn_mf.csv"),
        "query_id,term,score,name\nq1,GO:0000050,0.5,gcn\n"
    );
    assert_eq!(
        ws.read("results_cnn_mf.csv"),
        "query_id,term,score,name\nq2,GO:0000040,0.5,cnn\n"
    );

    // 10 aligned residues on a 3.8 A chain at 6 A: 10 self + 9 neighbour contacts
    assert!(factory.events().contains(&Event::Predicted {
        unit: "gcn_mf".to_string(),
        query_id: "q1".to_string(),
        contacts: Some(19),
    }));

    assert_eq!(
        runtime_tasks(&ws),
        vec!["search", "alignments", "gcn_mf", "cnn_mf", "total"]
    );
    Ok(())
}

#[test]
fn test_predictor_disposed_before_next_is_built() -> Result<()> {
    let ws = Workspace::new();
    let search = aligned_and_unaligned(&ws);
    let factory = RecordingFactory::new();

    run_pipeline(&ws.config(&[MolecularFunction, BiologicalProcess]), &search, &factory)?;

    let mut alive = 0i32;
    for event in factory.events() {
        match event {
            Event::Built(_) => {
                alive += 1;
                assert_eq!(alive, 1, "two predictors alive at once");
            }
            Event::Dropped(_) => alive -= 1,
            Event::Predicted { .. } => assert_eq!(alive, 1),
        }
    }
    assert_eq!(alive, 0);
    assert_eq!(factory.built(), vec!["gcn_mf", "cnn_mf", "gcn_bp", "cnn_bp"]);
    Ok(())
}

#[test]
fn test_existing_outputs_skip_category() -> Result<()> {
    let ws = Workspace::new();
    let search = aligned_and_unaligned(&ws);
    fs::write(ws.output("results_gcn_bp.csv"), "existing\n")?;
    fs::write(ws.output("results_cnn_bp.csv"), "existing\n")?;
    let factory = RecordingFactory::new();

    let summary = run_pipeline(&ws.config(&[MolecularFunction, BiologicalProcess]), &search, &factory)?;

    assert_eq!(factory.built(), vec!["gcn_mf", "cnn_mf"]);
    assert_eq!(summary.skipped().count(), 2);
    assert!(summary
        .skipped()
        .all(|u| u.category == BiologicalProcess));

    let tasks = runtime_tasks(&ws);
    assert!(!tasks.iter().any(|t| t.ends_with("_bp")), "{tasks:?}");
    assert_eq!(ws.read("results_gcn_bp.csv"), "existing\n");
    Ok(())
}

#[test]
fn test_second_run_is_idempotent() -> Result<()> {
    let ws = Workspace::new();
    let search = aligned_and_unaligned(&ws);
    let config = ws.config(&[MolecularFunction, BiologicalProcess]);

    let first = RecordingFactory::new();
    let summary = run_pipeline(&config, &search, &first)?;
    assert_eq!(summary.executed().count(), 4);
    let after_first = result_files(&ws);
    assert_eq!(after_first.len(), 4);

    let second = RecordingFactory::new();
    let summary = run_pipeline(&config, &search, &second)?;
    assert_eq!(summary.executed().count(), 0);
    assert!(second.built().is_empty());
    assert_eq!(second.predictions(), 0);
    assert_eq!(result_files(&ws), after_first);
    Ok(())
}

#[test]
fn test_rerun_executes_only_missing_path() -> Result<()> {
    let ws = Workspace::new();
    let search = aligned_and_unaligned(&ws);
    let config = ws.config(&[MolecularFunction]);

    run_pipeline(&config, &search, &RecordingFactory::new())?;
    fs::remove_file(ws.output("results_cnn_mf.csv"))?;

    let factory = RecordingFactory::new();
    let summary = run_pipeline(&config, &search, &factory)?;

    assert_eq!(factory.built(), vec!["cnn_mf"]);
    let states: Vec<UnitState> = summary.units.iter().map(|u| u.state).collect();
    assert_eq!(
        states,
        vec![UnitState::Skipped, UnitState::Done { predictions: 1 }]
    );
    Ok(())
}

#[test]
fn test_predictor_failure_aborts_and_resumes() -> Result<()> {
    let ws = Workspace::new();
    let search = aligned_and_unaligned(&ws);
    let config = ws.config(&[MolecularFunction, BiologicalProcess]);

    let failing = RecordingFactory::failing_on("q2");
    let err = run_pipeline(&config, &search, &failing).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<AnnotateError>(),
        Some(AnnotateError::Predictor { query_id: Some(q), .. }) if q == "q2"
    ));
    let message = format!("{err:#}");
    assert!(message.contains("cnn_mf") && message.contains("q2"), "{message}");

    // the failed predictor was still disposed
    assert_eq!(
        failing.events().last(),
        Some(&Event::Dropped("cnn_mf".to_string()))
    );
    assert!(ws.output("results_gcn_mf.csv").exists());
    assert!(!ws.output("results_cnn_mf.csv").exists());
    assert!(!ws.output("results_gcn_bp.csv").exists());
    assert_eq!(runtime_tasks(&ws), vec!["search", "alignments", "gcn_mf"]);

    let retry = RecordingFactory::new();
    run_pipeline(&config, &search, &retry)?;
    assert_eq!(retry.built(), vec!["cnn_mf", "gcn_bp", "cnn_bp"]);
    Ok(())
}

#[test]
fn test_single_path_categories() -> Result<()> {
    let ws = Workspace::new();
    ws.write_batch("batch.faa", &[("q1", protein(30))]);
    let search = ScriptedSearch::new("");
    let factory = RecordingFactory::new();

    let summary = run_pipeline(&ws.config(&[MolecularFunction, BiologicalProcess]), &search, &factory)?;

    // no aligned queries: the structural path is never scheduled, not even as skipped
    assert_eq!(factory.built(), vec!["cnn_mf", "cnn_bp"]);
    assert_eq!(summary.units.len(), 2);
    assert!(!ws.output("results_gcn_mf.csv").exists());
    Ok(())
}

#[test]
fn test_search_report_reused_across_runs() -> Result<()> {
    let ws = Workspace::new();
    let search = aligned_and_unaligned(&ws);
    let config = ws.config(&[MolecularFunction]);

    run_pipeline(&config, &search, &RecordingFactory::new())?;
    run_pipeline(&config, &search, &RecordingFactory::new())?;
    assert_eq!(search.calls.get(), 2);
    Ok(())
}
