//! Backbone selection and conformer filtering: turns raw full-atom (or
//! already backbone-only) conformers into the fixed 3-atom representation
//! the featurizer works on.

use crate::constants::{
    encode_sequence, Nucleotide, RnaAtom, FILL_VALUE, NUM_BACKBONE_ATOMS, RNA_ATOM_COUNT,
};
use crate::error::{DesignError, Result};
use crate::loader::RawMoleculeData;
use candle_core::Tensor;
use tracing::warn;

/// Normalized multi-conformer backbone data. `coords_list` tensors are
/// `(L, 3, 3)` in atom order P, C4', glycosidic N; `residue_masks` marks
/// residues whose three backbone atoms are all present in that conformer.
#[derive(Debug, Clone)]
pub struct BackboneSet {
    pub sequence: String,
    pub labels: Vec<u32>,
    pub coords_list: Vec<Tensor>,
    pub residue_masks: Vec<Vec<bool>>,
    pub sec_struct_list: Vec<String>,
}

impl BackboneSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_conformers(&self) -> usize {
        self.coords_list.len()
    }

    /// Residues valid in every conformer; the node mask of the graph.
    pub fn node_mask(&self) -> Vec<bool> {
        let l = self.len();
        (0..l).map(|i| self.residue_masks.iter().all(|m| m[i])).collect()
    }
}

/// Backbone atom slots in the full canonical table for one residue.
/// Unknown residue identities use the pyrimidine nitrogen.
fn backbone_slots(nt: Option<Nucleotide>) -> [usize; NUM_BACKBONE_ATOMS] {
    let n = nt.map_or(RnaAtom::N1, Nucleotide::base_nitrogen);
    [RnaAtom::P.index(), RnaAtom::C4p.index(), n.index()]
}

/// Select backbone atoms and drop conformers without a single complete
/// residue.
///
/// Accepts per-residue atom dimension 3 (already backbone-only, kept
/// as-is) or the full canonical count (reduced via the per-nucleotide
/// lookup); anything else is an [`DesignError::InvalidAtomCount`]. A
/// conformer in which every residue misses at least one backbone atom is
/// discarded with a warning; when nothing survives the result is
/// [`DesignError::EmptyConformerSet`].
pub fn select_backbone(raw: &RawMoleculeData) -> Result<BackboneSet> {
    let l = raw.len();
    let labels = encode_sequence(&raw.sequence);
    let device = raw
        .coords_list
        .first()
        .map(|t| t.device().clone())
        .ok_or(DesignError::EmptyConformerSet)?;

    let mut coords_list = Vec::new();
    let mut residue_masks = Vec::new();
    let mut sec_struct_list = Vec::new();

    for (conf_idx, (coords, atom_mask)) in raw
        .coords_list
        .iter()
        .zip(raw.atom_mask_list.iter())
        .enumerate()
    {
        let (rows, atoms, _xyz) = coords.dims3()?;
        if rows != l {
            return Err(DesignError::InvalidInput(format!(
                "conformer {conf_idx} has {rows} residues, sequence has {l}"
            )));
        }

        let (backbone, mask) = match atoms {
            NUM_BACKBONE_ATOMS => {
                let mask_rows = atom_mask.to_vec2::<u8>()?;
                let mask: Vec<bool> = mask_rows
                    .iter()
                    .map(|row| row.iter().all(|&m| m == 1))
                    .collect();
                (coords.clone(), mask)
            }
            RNA_ATOM_COUNT => {
                let all = coords.to_vec3::<f32>()?;
                let mask_rows = atom_mask.to_vec2::<u8>()?;
                let mut flat = Vec::with_capacity(l * NUM_BACKBONE_ATOMS * 3);
                let mut mask = Vec::with_capacity(l);
                for (res, (res_coords, res_mask)) in all.iter().zip(mask_rows.iter()).enumerate() {
                    let slots = backbone_slots(Nucleotide::from_label(labels[res]));
                    let mut valid = true;
                    for &slot in &slots {
                        if res_mask[slot] == 1 {
                            flat.extend_from_slice(&res_coords[slot]);
                        } else {
                            flat.extend_from_slice(&[FILL_VALUE; 3]);
                            valid = false;
                        }
                    }
                    mask.push(valid);
                }
                let backbone =
                    Tensor::from_vec(flat, (l, NUM_BACKBONE_ATOMS, 3), &device)?;
                (backbone, mask)
            }
            got => {
                return Err(DesignError::InvalidAtomCount {
                    got,
                    expected_backbone: NUM_BACKBONE_ATOMS,
                    expected_full: RNA_ATOM_COUNT,
                })
            }
        };

        if mask.iter().any(|&m| m) {
            coords_list.push(backbone);
            residue_masks.push(mask);
            sec_struct_list.push(raw.sec_struct_list[conf_idx].clone());
        } else {
            warn!(conformer = conf_idx, "dropping conformer: no residue with complete backbone");
        }
    }

    if coords_list.is_empty() {
        return Err(DesignError::EmptyConformerSet);
    }
    Ok(BackboneSet {
        sequence: raw.sequence.clone(),
        labels,
        coords_list,
        residue_masks,
        sec_struct_list,
    })
}
