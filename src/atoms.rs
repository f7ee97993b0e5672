//! Per-target structural files
//!
//! Binary layout (little-endian):
//!
//! ```text
//! u32 residue_count
//! u32 atom_count
//! u32 atoms_per_residue[residue_count]   (sums to atom_count)
//! f32 xyz[atom_count][3]
//! ```
//!
//! Residue-residue distance is the minimum distance between any atom of one
//! residue and any atom of the other.

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::error::AnnotateError;

/// Why a structural file could not be decoded
#[derive(Debug, Error)]
pub enum AtomsFileError {
    #[error("file is truncated")]
    Truncated,
    #[error("per-residue atom counts sum to {total}, header says {atom_count}")]
    CountMismatch { total: usize, atom_count: usize },
    #[error("unexpected trailing bytes")]
    TrailingBytes,
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for AtomsFileError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            AtomsFileError::Truncated
        } else {
            AtomsFileError::Io(e)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResidueAtoms {
    /// Atom index range of each residue
    offsets: Vec<usize>,
    coords: Vec<[f32; 3]>,
}

impl ResidueAtoms {
    /// Build from per-residue atom lists
    pub fn from_residues(residues: &[Vec<[f32; 3]>]) -> Self {
        let mut offsets = Vec::with_capacity(residues.len() + 1);
        let mut coords = Vec::new();
        offsets.push(0);
        for atoms in residues {
            coords.extend_from_slice(atoms);
            offsets.push(coords.len());
        }
        ResidueAtoms { offsets, coords }
    }

    pub fn residue_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    fn atoms(&self, residue: usize) -> &[[f32; 3]] {
        &self.coords[self.offsets[residue]..self.offsets[residue + 1]]
    }

    /// Minimum inter-atom distance between two residues; infinite if either
    /// residue has no atoms
    pub fn distance(&self, a: usize, b: usize) -> f32 {
        let mut best = f32::INFINITY;
        for pa in self.atoms(a) {
            for pb in self.atoms(b) {
                let dx = pa[0] - pb[0];
                let dy = pa[1] - pb[1];
                let dz = pa[2] - pb[2];
                let d2 = dx * dx + dy * dy + dz * dz;
                if d2 < best {
                    best = d2;
                }
            }
        }
        best.sqrt()
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, AtomsFileError> {
        let residue_count = reader.read_u32::<LittleEndian>()? as usize;
        let atom_count = reader.read_u32::<LittleEndian>()? as usize;

        // header counts are untrusted until the body has been read
        let mut offsets = Vec::with_capacity(residue_count.min(1 << 16) + 1);
        offsets.push(0usize);
        let mut total = 0usize;
        for _ in 0..residue_count {
            total += reader.read_u32::<LittleEndian>()? as usize;
            offsets.push(total);
        }
        if total != atom_count {
            return Err(AtomsFileError::CountMismatch { total, atom_count });
        }

        let mut coords = Vec::with_capacity(atom_count.min(1 << 20));
        for _ in 0..atom_count {
            let x = reader.read_f32::<LittleEndian>()?;
            let y = reader.read_f32::<LittleEndian>()?;
            let z = reader.read_f32::<LittleEndian>()?;
            coords.push([x, y, z]);
        }

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(AtomsFileError::TrailingBytes);
        }

        Ok(ResidueAtoms { offsets, coords })
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.residue_count() as u32)?;
        writer.write_u32::<LittleEndian>(self.coords.len() as u32)?;
        for w in self.offsets.windows(2) {
            writer.write_u32::<LittleEndian>((w[1] - w[0]) as u32)?;
        }
        for [x, y, z] in &self.coords {
            writer.write_f32::<LittleEndian>(*x)?;
            writer.write_f32::<LittleEndian>(*y)?;
            writer.write_f32::<LittleEndian>(*z)?;
        }
        writer.flush()
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        self.write_to(BufWriter::new(File::create(path)?))?;
        Ok(())
    }
}

/// Load a target's structural file; every failure is a `StructuralData`
/// error naming the target
pub fn load_residue_atoms(target_id: &str, path: &Path) -> Result<ResidueAtoms> {
    let file = File::open(path)
        .map_err(|e| AnnotateError::structural(target_id, path, format!("cannot open: {e}")))?;

    ResidueAtoms::read_from(BufReader::new(file))
        .map_err(|e| AnnotateError::structural(target_id, path, e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> ResidueAtoms {
        ResidueAtoms::from_residues(&[
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            vec![[4.0, 0.0, 0.0]],
            vec![],
        ])
    }

    #[test]
    fn test_min_atom_distance() {
        let atoms = sample();
        assert_eq!(atoms.residue_count(), 3);
        assert_eq!(atoms.distance(0, 1), 3.0);
        assert_eq!(atoms.distance(0, 0), 0.0);
        assert!(atoms.distance(0, 2).is_infinite());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.bin");
        sample().write_file(&path).unwrap();
        assert_eq!(load_residue_atoms("t", &path).unwrap(), sample());
    }

    #[test]
    fn test_truncated_and_missing_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.bin");
        sample().write_file(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let err = load_residue_atoms("t", &path).unwrap_err();
        assert!(err.to_string().contains("truncated"));

        let err = load_residue_atoms("gone", &dir.path().join("gone.bin")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnnotateError>(),
            Some(AnnotateError::StructuralData { target_id, .. }) if target_id == "gone"
        ));
    }

    #[test]
    fn test_inconsistent_counts() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(1).unwrap();
        bytes.write_u32::<LittleEndian>(5).unwrap();
        bytes.write_u32::<LittleEndian>(2).unwrap();
        let err = ResidueAtoms::read_from(&bytes[..]).unwrap_err();
        assert!(matches!(
            err,
            AtomsFileError::CountMismatch { total: 2, atom_count: 5 }
        ));
        assert!(err.to_string().contains("header says 5"));

        let mut padded = Vec::new();
        sample().write_to(&mut padded).unwrap();
        padded.push(0);
        assert!(matches!(
            ResidueAtoms::read_from(&padded[..]),
            Err(AtomsFileError::TrailingBytes)
        ));
    }
}
