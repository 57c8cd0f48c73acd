//! Graph featurization: turns a normalized [`BackboneSet`] into the dense
//! node/edge feature tensors the network consumes.
//!
//! Geometry is computed per conformer channel on the flattened P→C4'→N
//! backbone chain. Connectivity (k-NN by default, radius optionally) is
//! shared across channels and built on channel-averaged C4' positions, with
//! invalid residues pushed out of neighbor selection.

use crate::geometry::{
    cross_product, gather_node_features, masked_neighbors, normalize_vectors,
    pairwise_distances, positional_encodings, rbf_expand, DIST_EPS,
};
use crate::rng::RngContext;
use candle_core::{DType, Device, IndexOp, Tensor, D};
use ribodesign_core::{
    load_pdb_directory, load_pdb_file, select_backbone, BackboneSet, DesignError,
    RawMoleculeData, Result,
};
use std::path::Path;
use tracing::{debug, warn};

/// Default number of nearest neighbors per residue.
pub const TOP_K: usize = 32;
/// Default number of radial basis centers per atom-pair distance.
pub const NUM_RBF: usize = 32;
/// Default dimensionality of the sequence-offset encoding.
pub const NUM_POSENC: usize = 32;
/// Default standard deviation of training-mode coordinate noise, Angstrom.
pub const NOISE_SCALE: f32 = 0.1;

/// Scalar feature width per node and conformer channel: cos and sin of the
/// three chain dihedrals and three bond angles, plus three log bond lengths.
pub const NODE_SCALAR_DIM: usize = 15;
/// Vector feature count per node and conformer channel.
pub const NODE_VECTOR_DIM: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeaturizeMode {
    /// Adds seeded Gaussian coordinate noise before feature computation.
    Train,
    /// Noise-free; two calls on the same input produce identical tensors.
    Test,
}

/// Featurizer configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct FeaturizeConfig {
    pub mode: FeaturizeMode,
    /// Neighborhood radius in Angstrom; k-NN connectivity when `<= 0`.
    pub radius: f32,
    pub top_k: usize,
    pub num_rbf: usize,
    pub num_posenc: usize,
    /// Conformer-channel width of the target checkpoint.
    pub max_num_conformers: usize,
    pub noise_scale: f32,
}

impl Default for FeaturizeConfig {
    fn default() -> Self {
        Self {
            mode: FeaturizeMode::Test,
            radius: 0.0,
            top_k: TOP_K,
            num_rbf: NUM_RBF,
            num_posenc: NUM_POSENC,
            max_num_conformers: 1,
            noise_scale: NOISE_SCALE,
        }
    }
}

/// Dense featurized graph for one molecule. `L` residues, `K` neighbor
/// slots, `C` conformer channels. Built once per design call and immutable
/// afterward.
#[derive(Debug, Clone)]
pub struct FeaturizedGraph {
    /// `(L, C, 15)` internal-coordinate scalars.
    pub node_s: Tensor,
    /// `(L, C, 4, 3)` orientation and offset unit vectors.
    pub node_v: Tensor,
    /// `(L, K, C, 131)` RBF + position encoding + log distance scalars.
    pub edge_s: Tensor,
    /// `(L, K, C, 3, 3)` unit displacements per backbone atom.
    pub edge_v: Tensor,
    /// `(L, K)` neighbor indices, u32.
    pub neighbor_idx: Tensor,
    /// `(L, K)` edge validity, f32 in {0, 1}.
    pub edge_mask: Tensor,
    /// `(L,)` node validity, f32 in {0, 1}.
    pub node_mask: Tensor,
    /// `(L,)` ground-truth labels, u32 (mask sentinel for unknown letters).
    pub labels: Tensor,
    pub sequence: String,
    /// Input dot-brackets of the conformers actually used.
    pub sec_struct_list: Vec<String>,
    /// Per-used-conformer residue validity, for scoring.
    pub conf_masks: Vec<Vec<bool>>,
}

impl FeaturizedGraph {
    pub fn len(&self) -> usize {
        self.sequence.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn num_neighbors(&self) -> usize {
        self.neighbor_idx.dims()[1]
    }

    pub fn num_conformer_channels(&self) -> usize {
        self.node_s.dims()[1]
    }
}

pub struct RnaFeaturizer {
    config: FeaturizeConfig,
    device: Device,
}

impl RnaFeaturizer {
    pub fn new(config: FeaturizeConfig, device: &Device) -> Self {
        Self {
            config,
            device: device.clone(),
        }
    }

    pub fn config(&self) -> &FeaturizeConfig {
        &self.config
    }

    /// Load one structure file and featurize it.
    pub fn featurize_from_single(
        &self,
        path: impl AsRef<Path>,
        rng: &mut RngContext,
    ) -> Result<(RawMoleculeData, FeaturizedGraph)> {
        let raw = load_pdb_file(path, &self.device)?;
        let graph = self.featurize(&select_backbone(&raw)?, rng)?;
        Ok((raw, graph))
    }

    /// Load a directory of conformers of one molecule and featurize it.
    pub fn featurize_from_multiple(
        &self,
        dir: impl AsRef<Path>,
        rng: &mut RngContext,
    ) -> Result<(RawMoleculeData, FeaturizedGraph)> {
        let raw = load_pdb_directory(dir, &self.device)?;
        let graph = self.featurize(&select_backbone(&raw)?, rng)?;
        Ok((raw, graph))
    }

    /// Build the dense graph tensors for a normalized backbone set.
    pub fn featurize(&self, set: &BackboneSet, rng: &mut RngContext) -> Result<FeaturizedGraph> {
        let l = set.len();
        if l < 2 {
            return Err(DesignError::InvalidInput(format!(
                "need at least two residues to build a graph, got {l}"
            )));
        }

        let supplied = set.num_conformers();
        let channels = self.config.max_num_conformers.max(1);
        let used = supplied.min(channels);
        if supplied > used {
            warn!(
                supplied,
                used, "ignoring conformers beyond the model's channel width"
            );
        }

        // Per-channel coordinates; fewer conformers than channels broadcast
        // cyclically. Noise is drawn per channel so channels stay distinct
        // in training mode.
        let mut channel_coords = Vec::with_capacity(channels);
        for c in 0..channels {
            let mut coords = set.coords_list[c % used].to_device(&self.device)?;
            if self.config.mode == FeaturizeMode::Train {
                let noise = rng.gaussian(l * 9, self.config.noise_scale);
                let noise = Tensor::from_vec(noise, (l, 3, 3), &self.device)?;
                coords = (coords + noise)?;
            }
            channel_coords.push(coords);
        }

        // Connectivity from channel-averaged C4' positions.
        let c4_list: Vec<Tensor> = channel_coords
            .iter()
            .map(|coords| coords.i((.., 1, ..)))
            .collect::<candle_core::Result<_>>()?;
        let c4_avg = Tensor::stack(&c4_list, 0)?.mean(0)?;
        let node_mask_vec: Vec<f32> = set
            .node_mask()
            .iter()
            .map(|&m| if m { 1.0 } else { 0.0 })
            .collect();
        let node_mask = Tensor::from_vec(node_mask_vec, l, &self.device)?;

        let distances = pairwise_distances(&c4_avg)?;
        let radius_mode = self.config.radius > 0.0;
        let k = if radius_mode {
            l - 1
        } else {
            self.config.top_k.min(l - 1)
        };
        let (neighbor_idx, mut edge_mask) = masked_neighbors(&distances, &node_mask, k)?;
        if radius_mode {
            let d_nbr = distances.gather(&neighbor_idx, D::Minus1)?;
            let within = d_nbr
                .le(self.config.radius as f64)?
                .to_dtype(DType::F32)?;
            edge_mask = edge_mask.mul(&within)?;
        }

        let posenc = positional_encodings(&neighbor_idx, self.config.num_posenc, &self.device)?;

        let mut node_s_list = Vec::with_capacity(channels);
        let mut node_v_list = Vec::with_capacity(channels);
        let mut edge_s_list = Vec::with_capacity(channels);
        let mut edge_v_list = Vec::with_capacity(channels);
        for coords in &channel_coords {
            let (node_s, node_v) = self.node_features(coords, l)?;
            let (edge_s, edge_v) = self.edge_features(coords, &neighbor_idx, &posenc)?;
            node_s_list.push(node_s);
            node_v_list.push(node_v);
            edge_s_list.push(edge_s);
            edge_v_list.push(edge_v);
        }

        let graph = FeaturizedGraph {
            node_s: Tensor::stack(&node_s_list, 1)?,
            node_v: Tensor::stack(&node_v_list, 1)?,
            edge_s: Tensor::stack(&edge_s_list, 2)?,
            edge_v: Tensor::stack(&edge_v_list, 2)?,
            neighbor_idx,
            edge_mask,
            node_mask,
            labels: Tensor::from_vec(set.labels.clone(), l, &self.device)?,
            sequence: set.sequence.clone(),
            sec_struct_list: set.sec_struct_list[..used].to_vec(),
            conf_masks: set.residue_masks[..used].to_vec(),
        };
        debug!(
            residues = l,
            neighbors = graph.num_neighbors(),
            channels = graph.num_conformer_channels(),
            "featurized molecule"
        );
        Ok(graph)
    }

    /// Internal coordinates and orientation vectors of one conformer:
    /// scalars `(L, 15)` and vectors `(L, 4, 3)`.
    fn node_features(&self, coords: &Tensor, l: usize) -> Result<(Tensor, Tensor)> {
        let chain = coords.reshape((3 * l, 3))?;
        let m = 3 * l - 1;
        let dx = (chain.narrow(0, 1, m)? - chain.narrow(0, 0, m)?)?;
        let lengths = (dx.sqr()?.sum(D::Minus1)? + DIST_EPS)?.sqrt()?;
        let u = normalize_vectors(&dx)?;

        // bond angles at the 3L-2 interior chain atoms
        let u_in = u.narrow(0, 0, m - 1)?;
        let u_out = u.narrow(0, 1, m - 1)?;
        let cos_a = u_in.mul(&u_out)?.sum(D::Minus1)?.neg()?;
        let sin_a = cross_product(&u_in, &u_out)?
            .sqr()?
            .sum(D::Minus1)?
            .sqrt()?;

        // dihedrals over the 3L-3 consecutive bond triples; the sign comes
        // from the triple product, no arc-cosine involved
        let u_2 = u.narrow(0, 0, m - 2)?;
        let u_1 = u.narrow(0, 1, m - 2)?;
        let u_0 = u.narrow(0, 2, m - 2)?;
        let n_2 = normalize_vectors(&cross_product(&u_2, &u_1)?)?;
        let n_1 = normalize_vectors(&cross_product(&u_1, &u_0)?)?;
        let cos_d = n_2.mul(&n_1)?.sum(D::Minus1)?;
        let sin_d = cross_product(&n_2, &n_1)?.mul(&u_1)?.sum(D::Minus1)?;

        // pad every series to 3 entries per residue; absent angles read as
        // cos 1 / sin 0
        let one = Tensor::ones(1, DType::F32, coords.device())?;
        let zero = Tensor::zeros(1, DType::F32, coords.device())?;
        let cos_a = Tensor::cat(&[&one, &cos_a, &one], 0)?.reshape((l, 3))?;
        let sin_a = Tensor::cat(&[&zero, &sin_a, &zero], 0)?.reshape((l, 3))?;
        let cos_d = Tensor::cat(&[&one, &cos_d, &one, &one], 0)?.reshape((l, 3))?;
        let sin_d = Tensor::cat(&[&zero, &sin_d, &zero, &zero], 0)?.reshape((l, 3))?;
        let log_len = lengths.log()?.pad_with_zeros(0, 0, 1)?.reshape((l, 3))?;
        let node_s = Tensor::cat(&[&cos_d, &sin_d, &cos_a, &sin_a, &log_len], 1)?;

        let p = coords.i((.., 0, ..))?;
        let c4 = coords.i((.., 1, ..))?;
        let n = coords.i((.., 2, ..))?;
        let fwd = normalize_vectors(&(c4.narrow(0, 1, l - 1)? - c4.narrow(0, 0, l - 1)?)?)?
            .pad_with_zeros(0, 0, 1)?;
        let bwd = normalize_vectors(&(c4.narrow(0, 0, l - 1)? - c4.narrow(0, 1, l - 1)?)?)?
            .pad_with_zeros(0, 1, 0)?;
        let p_off = normalize_vectors(&(p - &c4)?)?;
        let n_off = normalize_vectors(&(n - &c4)?)?;
        let node_v = Tensor::stack(&[&fwd, &bwd, &p_off, &n_off], 1)?;

        Ok((node_s, node_v))
    }

    /// Edge scalars `(L, K, 131)` and vectors `(L, K, 3, 3)` for one
    /// conformer, given the shared neighbor index.
    fn edge_features(
        &self,
        coords: &Tensor,
        neighbor_idx: &Tensor,
        posenc: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let mut rbfs = Vec::with_capacity(3);
        let mut log_dists = Vec::with_capacity(3);
        let mut units = Vec::with_capacity(3);
        for atom in 0..3 {
            let xyz = coords.i((.., atom, ..))?;
            let nbr = gather_node_features(&xyz, neighbor_idx)?;
            let diff = nbr.broadcast_sub(&xyz.unsqueeze(1)?)?;
            let dist = (diff.sqr()?.sum(D::Minus1)? + DIST_EPS)?.sqrt()?;
            rbfs.push(rbf_expand(&dist, self.config.num_rbf, coords.device())?);
            log_dists.push(dist.log()?.unsqueeze(D::Minus1)?);
            units.push(normalize_vectors(&diff)?);
        }

        let edge_s = Tensor::cat(
            &[
                &rbfs[0],
                &rbfs[1],
                &rbfs[2],
                posenc,
                &log_dists[0],
                &log_dists[1],
                &log_dists[2],
            ],
            D::Minus1,
        )?;
        let edge_v = Tensor::stack(&[&units[0], &units[1], &units[2]], 2)?;
        Ok((edge_s, edge_v))
    }
}
