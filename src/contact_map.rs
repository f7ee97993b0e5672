//! Aligned contact map construction
//!
//! Projects a target's residue distances onto the query through the
//! column-by-column correspondence of an alignment. Query positions outside
//! the aligned span never carry contacts.

use anyhow::Result;

use crate::alignments::AlignedPair;
use crate::atoms::{load_residue_atoms, ResidueAtoms};
use crate::config::ContactMode;
use crate::error::AnnotateError;
use crate::target_db::TargetHandle;

const GAP: u8 = b'-';

/// Symmetric boolean contact matrix over query positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMap {
    len: usize,
    cells: Vec<bool>,
}

impl ContactMap {
    pub fn new(len: usize) -> Self {
        ContactMap {
            len,
            cells: vec![false; len * len],
        }
    }

    /// Number of query positions (rows/columns)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, i: usize, j: usize) {
        self.cells[i * self.len + j] = true;
        self.cells[j * self.len + i] = true;
    }

    pub fn is_contact(&self, i: usize, j: usize) -> bool {
        i < self.len && j < self.len && self.cells[i * self.len + j]
    }

    /// Contacts as `(i, j)` with `i <= j`
    pub fn contacts(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.len).flat_map(move |i| {
            (i..self.len).filter_map(move |j| self.cells[i * self.len + j].then_some((i, j)))
        })
    }

    pub fn contact_count(&self) -> usize {
        self.contacts().count()
    }

    /// Whether position `i` takes part in any contact
    pub fn has_contacts_at(&self, i: usize) -> bool {
        i < self.len && self.cells[i * self.len..(i + 1) * self.len].iter().any(|&c| c)
    }
}

/// Column walk of an alignment
struct Correspondence {
    /// (query position, target position) for residue-residue columns
    mapped: Vec<(usize, usize)>,
    /// Query positions aligned against a target gap
    unmatched: Vec<usize>,
    span: std::ops::Range<usize>,
}

fn walk_alignment(aligned: &AlignedPair, query_len: usize) -> Result<Correspondence> {
    let mut q = aligned.query_start;
    let mut t = aligned.target_start;
    let mut mapped = Vec::new();
    let mut unmatched = Vec::new();

    for (&qc, &tc) in aligned.query.as_bytes().iter().zip(aligned.target.as_bytes()) {
        match (qc == GAP, tc == GAP) {
            (false, false) => {
                mapped.push((q, t));
                q += 1;
                t += 1;
            }
            (false, true) => {
                unmatched.push(q);
                q += 1;
            }
            (true, false) => t += 1,
            (true, true) => {}
        }
    }

    if q > query_len {
        return Err(AnnotateError::search(format!(
            "alignment covers query positions up to {q}, but the query has {query_len} residues"
        ))
        .into());
    }

    Ok(Correspondence {
        mapped,
        unmatched,
        span: aligned.query_start..q,
    })
}

/// Project `atoms` onto a query of `query_len` residues
pub fn project_contacts(
    atoms: &ResidueAtoms,
    target_id: &str,
    target: &TargetHandle,
    aligned: &AlignedPair,
    query_len: usize,
    threshold: f32,
    mode: ContactMode,
) -> Result<ContactMap> {
    let walk = walk_alignment(aligned, query_len)?;

    if let Some(&(_, t)) = walk.mapped.iter().max_by_key(|(_, t)| *t) {
        if t >= atoms.residue_count() {
            return Err(AnnotateError::structural(
                target_id,
                target.structure_path(target_id),
                format!(
                    "alignment reaches target residue {} but the structure has {}",
                    t + 1,
                    atoms.residue_count()
                ),
            )
            .into());
        }
    }

    let mut map = ContactMap::new(query_len);
    for (a, &(qa, ta)) in walk.mapped.iter().enumerate() {
        for &(qb, tb) in &walk.mapped[a..] {
            if atoms.distance(ta, tb) <= threshold {
                map.set(qa, qb);
            }
        }
    }

    if let ContactMode::Generated { neighbours } = mode {
        for &g in &walk.unmatched {
            let lo = g.saturating_sub(neighbours).max(walk.span.start);
            let hi = (g + neighbours + 1).min(walk.span.end);
            for p in lo..hi {
                map.set(g, p);
            }
        }
    }

    Ok(map)
}

/// Load the target's structure and build the query's aligned contact map
pub fn load_aligned_contact_map(
    target: &TargetHandle,
    target_id: &str,
    aligned: &AlignedPair,
    query_len: usize,
    threshold: f32,
    mode: ContactMode,
) -> Result<ContactMap> {
    let atoms = load_residue_atoms(target_id, &target.structure_path(target_id))?;
    project_contacts(&atoms, target_id, target, aligned, query_len, threshold, mode)
}
