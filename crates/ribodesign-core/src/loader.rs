//! Conformer loading: one PDB file or a directory of PDB files describing
//! the same molecule, turned into the raw multi-conformer data the
//! featurizer consumes.

use crate::error::{DesignError, Result};
use crate::secondary::detect_dot_bracket;
use crate::structure::RnaStructure;
use candle_core::{Device, Tensor};
use std::path::Path;
use tracing::debug;

/// Raw per-conformer input to the design pipeline. Coordinates are
/// full-atom `(L, A, 3)` tensors with matching `(L, A)` validity masks;
/// `A` is the canonical atom count for loaded files, but backbone-only
/// (`A == 3`) tensors are accepted when callers build this directly.
#[derive(Debug, Clone)]
pub struct RawMoleculeData {
    pub sequence: String,
    pub coords_list: Vec<Tensor>,
    pub atom_mask_list: Vec<Tensor>,
    pub sec_struct_list: Vec<String>,
}

impl RawMoleculeData {
    /// Residue count L.
    pub fn len(&self) -> usize {
        self.sequence.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn num_conformers(&self) -> usize {
        self.coords_list.len()
    }
}

fn open_structure(path: &Path) -> Result<RnaStructure> {
    let path_str = path.to_string_lossy();
    let (pdb, _warnings) = pdbtbx::open(path_str.as_ref()).map_err(|errors| {
        DesignError::StructureParse {
            path: path_str.to_string(),
            reason: errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        }
    })?;
    Ok(RnaStructure::from(&pdb))
}

/// Load a single structure file as a one-conformer [`RawMoleculeData`].
pub fn load_pdb_file(path: impl AsRef<Path>, device: &Device) -> Result<RawMoleculeData> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(DesignError::InvalidInput(format!(
            "{} is not a file",
            path.display()
        )));
    }
    let structure = open_structure(path)?;
    if structure.len() == 0 {
        return Err(DesignError::InvalidInput(format!(
            "{} contains no nucleotide residues",
            path.display()
        )));
    }
    let (coords, mask) = structure.to_numeric_atoms(device)?;
    let sec_struct = detect_dot_bracket(&structure)?;
    debug!(
        path = %path.display(),
        residues = structure.len(),
        "loaded conformer"
    );
    Ok(RawMoleculeData {
        sequence: structure.sequence(),
        coords_list: vec![coords],
        atom_mask_list: vec![mask],
        sec_struct_list: vec![sec_struct],
    })
}

/// Load every `.pdb` file in a directory as conformers of one molecule.
///
/// Entries are sorted by file name before loading so conformer order is
/// stable across platforms. All files must agree on sequence; a mismatch
/// is an input error rather than a silent merge.
pub fn load_pdb_directory(dir: impl AsRef<Path>, device: &Device) -> Result<RawMoleculeData> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(DesignError::InvalidInput(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("pdb"))
        })
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(DesignError::InvalidInput(format!(
            "no .pdb files found in {}",
            dir.display()
        )));
    }

    let mut merged = load_pdb_file(&paths[0], device)?;
    for path in &paths[1..] {
        let conformer = load_pdb_file(path, device)?;
        if conformer.sequence != merged.sequence {
            return Err(DesignError::InvalidInput(format!(
                "{} does not match the molecule loaded so far (sequence {} vs {})",
                path.display(),
                conformer.sequence,
                merged.sequence
            )));
        }
        merged.coords_list.extend(conformer.coords_list);
        merged.atom_mask_list.extend(conformer.atom_mask_list);
        merged.sec_struct_list.extend(conformer.sec_struct_list);
    }
    Ok(merged)
}
