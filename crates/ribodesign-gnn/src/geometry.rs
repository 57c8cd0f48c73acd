//! Tensor helpers shared by the featurizer and the network: vector algebra,
//! radial basis expansion, sinusoidal position encodings and masked
//! nearest-neighbor selection on dense `(L, ...)` graphs.

use candle_core::{DType, Device, Result, Tensor, D};

pub const DIST_EPS: f64 = 1e-6;

/// Unit vectors along the last dimension; zero vectors stay (near) zero.
pub fn normalize_vectors(v: &Tensor) -> Result<Tensor> {
    let norm = (v.sqr()?.sum_keepdim(D::Minus1)? + DIST_EPS)?.sqrt()?;
    v.broadcast_div(&norm)
}

/// Cross product along the last dimension (size 3), any leading shape.
pub fn cross_product(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let last = a.dims().len() - 1;

    let a0 = a.narrow(last, 0, 1)?;
    let a1 = a.narrow(last, 1, 1)?;
    let a2 = a.narrow(last, 2, 1)?;

    let b0 = b.narrow(last, 0, 1)?;
    let b1 = b.narrow(last, 1, 1)?;
    let b2 = b.narrow(last, 2, 1)?;

    let c0 = ((&a1 * &b2)? - (&a2 * &b1)?)?;
    let c1 = ((&a2 * &b0)? - (&a0 * &b2)?)?;
    let c2 = ((&a0 * &b1)? - (&a1 * &b0)?)?;

    Tensor::cat(&[&c0, &c1, &c2], last)
}

pub fn linspace(start: f64, stop: f64, steps: usize, device: &Device) -> Result<Tensor> {
    if steps == 0 {
        Tensor::from_vec(Vec::<f32>::new(), steps, device)
    } else if steps == 1 {
        Tensor::from_vec(vec![start as f32], steps, device)
    } else {
        let delta = (stop - start) / (steps - 1) as f64;
        let vs = (0..steps)
            .map(|step| (start + step as f64 * delta) as f32)
            .collect::<Vec<_>>();
        Tensor::from_vec(vs, steps, device)
    }
}

/// Gaussian radial basis expansion of distances, centers evenly spaced on
/// [2, 22] Angstrom. Appends a trailing dimension of size `num_rbf`.
pub fn rbf_expand(d: &Tensor, num_rbf: usize, device: &Device) -> Result<Tensor> {
    const D_MIN: f64 = 2.0;
    const D_MAX: f64 = 22.0;
    let mu = linspace(D_MIN, D_MAX, num_rbf, device)?;
    let sigma = (D_MAX - D_MIN) / num_rbf as f64;
    let diff = (d.unsqueeze(D::Minus1)?.broadcast_sub(&mu)? / sigma)?;
    diff.sqr()?.neg()?.exp()
}

/// Sinusoidal encoding of the signed sequence offset `j - i` for every
/// neighbor slot: `(L, K)` indices => `(L, K, num_posenc)`.
pub fn positional_encodings(
    neighbor_idx: &Tensor,
    num_posenc: usize,
    device: &Device,
) -> Result<Tensor> {
    let (l, _k) = neighbor_idx.dims2()?;
    let centers = Tensor::arange(0u32, l as u32, device)?
        .to_dtype(DType::F32)?
        .unsqueeze(1)?;
    let offset = neighbor_idx.to_dtype(DType::F32)?.broadcast_sub(&centers)?;
    let half = num_posenc / 2;
    let freq: Vec<f32> = (0..half)
        .map(|i| (-((2 * i) as f32) * 10_000f32.ln() / num_posenc as f32).exp())
        .collect();
    let freq = Tensor::from_vec(freq, half, device)?;
    let angles = offset.unsqueeze(D::Minus1)?.broadcast_mul(&freq)?;
    Tensor::cat(&[angles.cos()?, angles.sin()?], D::Minus1)
}

/// Features `(L, C)` at neighbor indices `(L, K)` => `(L, K, C)`.
pub fn gather_node_features(nodes: &Tensor, neighbor_idx: &Tensor) -> Result<Tensor> {
    let (l, c) = nodes.dims2()?;
    let (_, k) = neighbor_idx.dims2()?;
    let flat = neighbor_idx
        .reshape(l * k)?
        .unsqueeze(1)?
        .expand((l * k, c))?
        .contiguous()?;
    nodes.contiguous()?.gather(&flat, 0)?.reshape((l, k, c))
}

/// Edge features concatenated with the gathered neighbor-node features:
/// `(L, C_n)` nodes and `(L, K, C_e)` edges => `(L, K, C_e + C_n)`.
pub fn neighbor_context(
    h_nodes: &Tensor,
    h_edges: &Tensor,
    neighbor_idx: &Tensor,
) -> Result<Tensor> {
    let gathered = gather_node_features(h_nodes, neighbor_idx)?;
    Tensor::cat(&[h_edges, &gathered], D::Minus1)
}

/// Euclidean distances between all point pairs: `(L, 3)` => `(L, L)`.
pub fn pairwise_distances(points: &Tensor) -> Result<Tensor> {
    let a = points.unsqueeze(1)?;
    let b = points.unsqueeze(0)?;
    (a.broadcast_sub(&b)?.sqr()?.sum(D::Minus1)? + DIST_EPS)?.sqrt()
}

/// Ascending nearest-neighbor selection that never keeps an invalid residue
/// or the center itself while a valid candidate remains: excluded entries
/// have their distance pushed past the per-row maximum before sorting.
/// Returns the neighbor index `(L, K)` and the edge validity mask `(L, K)`.
pub fn masked_neighbors(
    distances: &Tensor,
    node_mask: &Tensor,
    k: usize,
) -> Result<(Tensor, Tensor)> {
    let (l, _) = distances.dims2()?;
    let device = distances.device();

    let mask_2d = node_mask
        .unsqueeze(1)?
        .broadcast_mul(&node_mask.unsqueeze(0)?)?;
    let eye = Tensor::eye(l, DType::F32, device)?;
    let exclude = ((mask_2d.neg()? + 1.0)? + &eye)?;
    let masked = distances.mul(&mask_2d)?;
    let push = (masked.max_keepdim(D::Minus1)? + 1.0)?;
    let adjusted = (masked + exclude.broadcast_mul(&push)?)?;

    let order = adjusted.arg_sort_last_dim(true)?;
    let neighbor_idx = order.narrow(D::Minus1, 0, k)?.contiguous()?;

    let nbr_valid = node_mask
        .unsqueeze(0)?
        .broadcast_as((l, l))?
        .contiguous()?
        .gather(&neighbor_idx, D::Minus1)?;
    let centers = Tensor::arange(0u32, l as u32, device)?
        .unsqueeze(1)?
        .broadcast_as((l, k))?
        .contiguous()?;
    let not_self = neighbor_idx.ne(&centers)?.to_dtype(DType::F32)?;
    let edge_mask = node_mask
        .unsqueeze(1)?
        .broadcast_mul(&nbr_valid.mul(&not_self)?)?;

    Ok((neighbor_idx, edge_mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;

    fn line_points(device: &Device) -> Tensor {
        Tensor::from_vec(
            vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 2.0, 0.0, 0.0, 3.0, 0.0, 0.0],
            (4, 3),
            device,
        )
        .unwrap()
    }

    #[test]
    fn test_knn_on_a_line() {
        let device = Device::Cpu;
        let points = line_points(&device);
        let d = pairwise_distances(&points).unwrap();
        let mask = Tensor::ones(4, DType::F32, &device).unwrap();
        let (idx, edge_mask) = masked_neighbors(&d, &mask, 2).unwrap();

        assert_eq!(idx.dims(), &[4, 2]);
        let row0: Vec<u32> = idx.i(0).unwrap().to_vec1().unwrap();
        assert_eq!(row0, vec![1, 2]);
        let mut row1: Vec<u32> = idx.i(1).unwrap().to_vec1().unwrap();
        row1.sort_unstable();
        assert_eq!(row1, vec![0, 2]);
        let mask_sum: f32 = edge_mask.sum_all().unwrap().to_vec0().unwrap();
        assert_eq!(mask_sum, 8.0);
    }

    #[test]
    fn test_knn_skips_masked_residue() {
        let device = Device::Cpu;
        let points = line_points(&device);
        let d = pairwise_distances(&points).unwrap();
        let mask = Tensor::from_vec(vec![1.0f32, 0.0, 1.0, 1.0], 4, &device).unwrap();
        let (idx, edge_mask) = masked_neighbors(&d, &mask, 2).unwrap();

        let row0: Vec<u32> = idx.i(0).unwrap().to_vec1().unwrap();
        assert!(!row0.contains(&1), "masked residue selected: {row0:?}");
        assert_eq!(row0, vec![2, 3]);
        // every edge of a fully valid center is valid
        let row0_mask: Vec<f32> = edge_mask.i(0).unwrap().to_vec1().unwrap();
        assert_eq!(row0_mask, vec![1.0, 1.0]);
        // the masked center keeps shape but has no valid edges
        let row1_mask: Vec<f32> = edge_mask.i(1).unwrap().to_vec1().unwrap();
        assert_eq!(row1_mask, vec![0.0, 0.0]);
    }

    #[test]
    fn test_rbf_peak_at_center() {
        let device = Device::Cpu;
        let d = Tensor::from_vec(vec![2.0f32], 1, &device).unwrap();
        let rbf = rbf_expand(&d, 32, &device).unwrap();
        assert_eq!(rbf.dims(), &[1, 32]);
        let values: Vec<f32> = rbf.i(0).unwrap().to_vec1().unwrap();
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!(values[31] < 1e-4);
    }

    #[test]
    fn test_positional_encoding_values() {
        let device = Device::Cpu;
        let idx = Tensor::from_vec(vec![1u32], (1, 1), &device).unwrap();
        let enc = positional_encodings(&idx, 32, &device).unwrap();
        assert_eq!(enc.dims(), &[1, 1, 32]);
        let values: Vec<f32> = enc.i((0, 0)).unwrap().to_vec1().unwrap();
        // offset 1, lowest frequency 1.0: cos(1) then sin(1) at the halfway slot
        assert!((values[0] - 1f32.cos()).abs() < 1e-5);
        assert!((values[16] - 1f32.sin()).abs() < 1e-5);
    }

    #[test]
    fn test_cross_product_basis() {
        let device = Device::Cpu;
        let x = Tensor::from_vec(vec![1.0f32, 0.0, 0.0], (1, 3), &device).unwrap();
        let y = Tensor::from_vec(vec![0.0f32, 1.0, 0.0], (1, 3), &device).unwrap();
        let z: Vec<f32> = cross_product(&x, &y).unwrap().i(0).unwrap().to_vec1().unwrap();
        assert_eq!(z, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_normalize_unit_length() {
        let device = Device::Cpu;
        let v = Tensor::from_vec(vec![3.0f32, 4.0, 0.0], (1, 3), &device).unwrap();
        let u: Vec<f32> = normalize_vectors(&v).unwrap().i(0).unwrap().to_vec1().unwrap();
        assert!((u[0] - 0.6).abs() < 1e-4);
        assert!((u[1] - 0.8).abs() < 1e-4);
    }
}
