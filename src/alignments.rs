//! Best-hit selection and aligned/unaligned partitioning
//!
//! The search report lists hits per query in the search tool's own ranking.
//! The first hit that passes the identity filter is kept; queries without a
//! surviving hit go to the sequence-only path.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::AnnotateError;
use crate::query_batch::QueryBatch;

/// query target fident qaln taln bits qstart qend tstart
const REPORT_COLUMNS: usize = 9;

/// Gapped query/target strings of one alignment, plus where they start
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPair {
    /// Query residues with `-` for target insertions
    pub query: String,
    /// Target residues with `-` for query insertions
    pub target: String,
    pub score: f64,
    /// 0-based offset of the first aligned query residue
    pub query_start: usize,
    /// 0-based exclusive end in the query
    pub query_end: usize,
    /// 0-based offset of the first aligned target residue
    pub target_start: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub target_id: String,
    /// Fraction of identical aligned columns, in [0, 1]
    pub identity: f32,
    pub aligned: AlignedPair,
}

/// One line of the search report
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub query_id: String,
    pub alignment: Alignment,
}

/// Parse one tab-separated report line
/// (`query target fident qaln taln bits qstart qend tstart`)
pub fn parse_hit_line(line: &str) -> Result<SearchHit> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    if fields.len() != REPORT_COLUMNS {
        anyhow::bail!(
            "expected {REPORT_COLUMNS} tab-separated fields, found {}",
            fields.len()
        );
    }

    let identity: f32 = fields[2]
        .parse()
        .with_context(|| format!("invalid identity '{}'", fields[2]))?;
    if !(0.0..=1.0).contains(&identity) {
        anyhow::bail!("identity {identity} outside [0, 1]");
    }

    let query = fields[3].to_string();
    let target = fields[4].to_string();
    if query.len() != target.len() {
        anyhow::bail!(
            "aligned strings differ in length ({} vs {})",
            query.len(),
            target.len()
        );
    }

    let score: f64 = fields[5]
        .parse()
        .with_context(|| format!("invalid score '{}'", fields[5]))?;
    let qstart: usize = fields[6]
        .parse()
        .with_context(|| format!("invalid qstart '{}'", fields[6]))?;
    let qend: usize = fields[7]
        .parse()
        .with_context(|| format!("invalid qend '{}'", fields[7]))?;
    let tstart: usize = fields[8]
        .parse()
        .with_context(|| format!("invalid tstart '{}'", fields[8]))?;

    // report coordinates are 1-based inclusive
    if qstart == 0 || tstart == 0 || qend < qstart {
        anyhow::bail!("invalid coordinates qstart={qstart} qend={qend} tstart={tstart}");
    }

    Ok(SearchHit {
        query_id: fields[0].to_string(),
        alignment: Alignment {
            target_id: fields[1].to_string(),
            identity,
            aligned: AlignedPair {
                query,
                target,
                score,
                query_start: qstart - 1,
                query_end: qend,
                target_start: tstart - 1,
            },
        },
    })
}

/// Read every hit of a report, keeping report order
pub fn read_search_report(path: &Path) -> Result<Vec<SearchHit>> {
    let file = File::open(path).map_err(|e| {
        AnnotateError::search(format!("cannot open report {}: {e}", path.display()))
    })?;

    let mut hits = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let hit = parse_hit_line(&line).map_err(|e| {
            AnnotateError::search(format!("{} line {}: {e:#}", path.display(), i + 1))
        })?;
        hits.push(hit);
    }
    Ok(hits)
}

/// Query ids split by whether a usable homolog was found
#[derive(Debug, Clone, Default)]
pub struct QueryPartition {
    /// Best alignment per aligned query, in batch order
    pub aligned: IndexMap<String, Alignment>,
    /// Queries with no usable hit, in batch order
    pub unaligned: Vec<String>,
}

impl QueryPartition {
    pub fn is_aligned(&self, query_id: &str) -> bool {
        self.aligned.contains_key(query_id)
    }
}

/// Keep the first hit per batch query at or above `min_identity` and
/// derive the unaligned remainder
pub fn partition_queries(
    batch: &QueryBatch,
    hits: impl IntoIterator<Item = SearchHit>,
    min_identity: f32,
) -> QueryPartition {
    let mut best: IndexMap<String, Alignment> = IndexMap::new();

    for hit in hits {
        if !batch.contains(&hit.query_id) {
            debug!("Ignoring hit for query '{}' not in batch", hit.query_id);
            continue;
        }
        if hit.alignment.identity < min_identity {
            continue;
        }
        best.entry(hit.query_id).or_insert(hit.alignment);
    }

    let mut aligned = IndexMap::with_capacity(best.len());
    let mut unaligned = Vec::new();
    for id in batch.ids() {
        match best.swap_remove(id) {
            Some(alignment) => {
                aligned.insert(id.to_string(), alignment);
            }
            None => unaligned.push(id.to_string()),
        }
    }

    QueryPartition { aligned, unaligned }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn batch(ids: &[&str]) -> QueryBatch {
        let seqs = ids
            .iter()
            .map(|id| (id.to_string(), "MKVLAAGIV".to_string()))
            .collect();
        QueryBatch::new("batch.faa", seqs)
    }

    fn hit(query: &str, target: &str, identity: f32) -> SearchHit {
        parse_hit_line(&format!(
            "{query}\t{target}\t{identity}\tMKV-L\tMKVAL\t42.5\t1\t4\t3"
        ))
        .unwrap()
    }

    #[test]
    fn test_parse_hit_line_converts_coordinates() {
        let h = hit("q1", "1abc_A", 0.9);
        assert_eq!(h.query_id, "q1");
        assert_eq!(h.alignment.target_id, "1abc_A");
        assert_eq!(h.alignment.aligned.query_start, 0);
        assert_eq!(h.alignment.aligned.query_end, 4);
        assert_eq!(h.alignment.aligned.target_start, 2);
        assert_eq!(h.alignment.aligned.score, 42.5);
    }

    #[test]
    fn test_parse_hit_line_rejects_malformed() {
        assert!(parse_hit_line("q1\tt1\t0.9").is_err());
        assert!(parse_hit_line("q1\tt1\tabc\tMK\tMK\t1\t1\t2\t1").is_err());
        assert!(parse_hit_line("q1\tt1\t0.9\tMKV\tMK\t1\t1\t3\t1").is_err());
        assert!(parse_hit_line("q1\tt1\t0.9\tMK\tMK\t1\t0\t2\t1").is_err());
    }

    #[test]
    fn test_extra_columns_rejected() {
        // a report written with a wider --format-output must not be read by position
        let err = parse_hit_line("q1\tt1\t0.9\tMK\tMK\t10\t1\t2\t1\tEXTRA").unwrap_err();
        assert!(err.to_string().contains("found 10"), "{err}");
        assert!(parse_hit_line("q1\tt1\t0.9\tMK\tMK\t10\t1\t2\t1\tEXTRA\tMORE").is_err());
        assert!(parse_hit_line("q1\tt1\t0.9\tMK\tMK\t10\t1\t2\t1\r\n").is_ok());
    }

    #[test]
    fn test_first_hit_wins() {
        let b = batch(&["q1"]);
        let hits = vec![hit("q1", "first", 0.5), hit("q1", "second", 0.99)];
        let p = partition_queries(&b, hits, 0.0);
        assert_eq!(p.aligned["q1"].target_id, "first");
    }

    #[test]
    fn test_identity_filter_applies_before_selection() {
        let b = batch(&["q1", "q2"]);
        let hits = vec![
            hit("q1", "weak", 0.2),
            hit("q1", "strong", 0.8),
            hit("q2", "weak", 0.2),
        ];
        let p = partition_queries(&b, hits, 0.5);
        assert_eq!(p.aligned["q1"].target_id, "strong");
        assert_eq!(p.unaligned, vec!["q2".to_string()]);
    }

    #[test]
    fn test_partition_is_complete_and_disjoint() {
        let b = batch(&["q1", "q2", "q3"]);
        let hits = vec![hit("q3", "t", 0.9), hit("stranger", "t", 0.9)];
        let p = partition_queries(&b, hits, 0.0);

        assert_eq!(p.aligned.keys().collect::<Vec<_>>(), vec!["q3"]);
        assert_eq!(p.unaligned, vec!["q1".to_string(), "q2".to_string()]);
        for id in b.ids() {
            assert!(p.is_aligned(id) != p.unaligned.iter().any(|u| u == id));
        }
    }

    #[test]
    fn test_read_report_names_bad_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hits.m8");
        std::fs::write(&path, "q1\tt1\t0.9\tMK\tMK\t1\t1\t2\t1\n\nbroken line\n").unwrap();
        let err = read_search_report(&path).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
        assert!(matches!(
            err.downcast_ref::<AnnotateError>(),
            Some(AnnotateError::Search(_))
        ));
    }
}
