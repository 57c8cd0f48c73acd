//! Column-oriented storage for the nucleotide residues of a parsed
//! structure, plus conversion to full-atom coordinate tensors.

use crate::constants::{Nucleotide, RnaAtom, FILL_VALUE, RNA_ATOM_COUNT};
use crate::error::Result;
use candle_core::{Device, Tensor};
use itertools::Itertools;
use pdbtbx::PDB;
use std::str::FromStr;

/// Atom-level data for the RNA portion of one structure file, stored as
/// parallel columns in file order. Residue boundaries are recovered from
/// runs of equal `(chain_id, res_id)`.
#[derive(Debug, Clone)]
pub struct RnaStructure {
    coords: Vec<[f32; 3]>,
    res_ids: Vec<i32>,
    res_names: Vec<String>,
    atom_names: Vec<String>,
    chain_ids: Vec<String>,
}

impl From<&PDB> for RnaStructure {
    fn from(pdb: &PDB) -> Self {
        let (coords, res_ids, res_names, atom_names, chain_ids) = pdb
            .chains()
            .flat_map(|chain| {
                let chain_id = chain.id().to_string();
                chain.residues().flat_map(move |residue| {
                    let res_id = residue.serial_number() as i32;
                    let res_name = residue.name().unwrap_or_default().to_string();
                    let chain_id = chain_id.clone();
                    let keep = is_nucleotide(residue);
                    residue.atoms().filter_map(move |atom| {
                        if !keep || atom.hetero() {
                            return None;
                        }
                        Some((
                            [atom.x() as f32, atom.y() as f32, atom.z() as f32],
                            res_id,
                            res_name.clone(),
                            atom.name().to_string(),
                            chain_id.clone(),
                        ))
                    })
                })
            })
            .multiunzip();

        Self {
            coords,
            res_ids,
            res_names,
            atom_names,
            chain_ids,
        }
    }
}

/// A residue is treated as a nucleotide when its name maps to one of the
/// four letters, or when it carries a ribose C4' atom (covers modified
/// residues with nonstandard names).
fn is_nucleotide(residue: &pdbtbx::Residue) -> bool {
    let named = residue
        .name()
        .and_then(|n| n.trim().chars().exactly_one().ok())
        .and_then(Nucleotide::from_char)
        .is_some();
    named || residue.atoms().any(|a| a.name() == "C4'")
}

impl RnaStructure {
    /// Number of nucleotide residues.
    pub fn len(&self) -> usize {
        self.residue_runs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// One-letter sequence; residues with unrecognized names become `N`.
    pub fn sequence(&self) -> String {
        self.residue_runs()
            .iter()
            .map(|&(start, _)| {
                self.res_names[start]
                    .trim()
                    .chars()
                    .exactly_one()
                    .ok()
                    .and_then(Nucleotide::from_char)
                    .map_or('N', Nucleotide::to_char)
            })
            .collect()
    }

    /// `(start, end)` atom index ranges, one per residue, in file order.
    fn residue_runs(&self) -> Vec<(usize, usize)> {
        let mut runs = Vec::new();
        let mut start = 0;
        for i in 1..=self.res_ids.len() {
            let boundary = i == self.res_ids.len()
                || self.res_ids[i] != self.res_ids[start]
                || self.chain_ids[i] != self.chain_ids[start];
            if boundary {
                runs.push((start, i));
                start = i;
            }
        }
        runs
    }

    /// Position of a named atom within a residue run, if present.
    pub fn atom_position(&self, run: (usize, usize), atom: RnaAtom) -> Option<[f32; 3]> {
        let name = atom.to_string();
        (run.0..run.1)
            .find(|&i| self.atom_names[i] == name)
            .map(|i| self.coords[i])
    }

    /// Per-residue anchor used for geometric base-pair detection: the C1'
    /// atom when present, the glycosidic nitrogen otherwise.
    pub fn pair_anchors(&self) -> Vec<Option<[f32; 3]>> {
        self.residue_runs()
            .iter()
            .map(|&run| {
                self.atom_position(run, RnaAtom::C1p)
                    .or_else(|| self.atom_position(run, RnaAtom::N9))
                    .or_else(|| self.atom_position(run, RnaAtom::N1))
            })
            .collect()
    }

    /// Full-atom coordinates `(L, RNA_ATOM_COUNT, 3)` and validity mask
    /// `(L, RNA_ATOM_COUNT)`. Absent atoms hold [`FILL_VALUE`] and a zero
    /// mask entry; atom names outside the canonical table are skipped.
    pub fn to_numeric_atoms(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let runs = self.residue_runs();
        let l = runs.len();
        let mut coords = vec![FILL_VALUE; l * RNA_ATOM_COUNT * 3];
        let mut mask = vec![0u8; l * RNA_ATOM_COUNT];

        for (res_idx, &(start, end)) in runs.iter().enumerate() {
            for i in start..end {
                let Ok(atom) = RnaAtom::from_str(&self.atom_names[i]) else {
                    continue;
                };
                let slot = atom.index();
                let base = (res_idx * RNA_ATOM_COUNT + slot) * 3;
                coords[base..base + 3].copy_from_slice(&self.coords[i]);
                mask[res_idx * RNA_ATOM_COUNT + slot] = 1;
            }
        }

        let coords = Tensor::from_vec(coords, (l, RNA_ATOM_COUNT, 3), device)?;
        let mask = Tensor::from_vec(mask, (l, RNA_ATOM_COUNT), device)?;
        Ok((coords, mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;
    use ribodesign_test_data::TestFile;

    #[test]
    fn test_structure_from_pdb() {
        let (path, _handle) = TestFile::rna_hairpin_01().create_temp().unwrap();
        let (pdb, _) = pdbtbx::open(&path).unwrap();
        let structure = RnaStructure::from(&pdb);

        assert_eq!(structure.len(), 12);
        assert_eq!(structure.sequence(), TestFile::sequence());
    }

    #[test]
    fn test_numeric_atoms() {
        let (path, _handle) = TestFile::rna_hairpin_01().create_temp().unwrap();
        let (pdb, _) = pdbtbx::open(&path).unwrap();
        let structure = RnaStructure::from(&pdb);
        let device = Device::Cpu;

        let (coords, mask) = structure.to_numeric_atoms(&device).unwrap();
        assert_eq!(coords.dims(), &[12, RNA_ATOM_COUNT, 3]);
        assert_eq!(mask.dims(), &[12, RNA_ATOM_COUNT]);

        // fixture carries P, C4', C1' and one base nitrogen per residue
        let total = mask.to_dtype(candle_core::DType::F32).unwrap();
        let total = total.sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(total, 48.0);

        // an absent slot keeps the fill sentinel
        let op1 = coords
            .i((0, RnaAtom::OP1.index(), 0))
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(op1, FILL_VALUE);
        let p_mask = mask
            .i((0, RnaAtom::P.index()))
            .unwrap()
            .to_scalar::<u8>()
            .unwrap();
        assert_eq!(p_mask, 1);
    }

    #[test]
    fn test_pair_anchors_present() {
        let (path, _handle) = TestFile::rna_hairpin_01().create_temp().unwrap();
        let (pdb, _) = pdbtbx::open(&path).unwrap();
        let structure = RnaStructure::from(&pdb);
        let anchors = structure.pair_anchors();
        assert_eq!(anchors.len(), 12);
        assert!(anchors.iter().all(Option::is_some));
    }
}
