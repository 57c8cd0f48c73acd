//! Scoring of sampled sequences: perplexity along the realized decoding
//! path, native-sequence recovery, and structural self-consistency against
//! the input conformers.

use candle_core::{DType, Tensor, D};
use candle_nn::ops::log_softmax;
use ribodesign_core::constants::decode_labels;
use ribodesign_core::secondary::{base_pair_f1, pairs_from_dot_bracket};
use ribodesign_core::{Result, SecondaryStructureOracle};
use tracing::warn;

/// Per-sample perplexity `exp(mean_t CE(logits[s, t, :], samples[s, t]))`
/// from raw `(n, L, classes)` logits and `(n, L)` sampled classes.
pub fn perplexity_per_sample(logits: &Tensor, samples: &Tensor) -> Result<Vec<f32>> {
    let log_probs = log_softmax(logits, D::Minus1)?;
    let picked = log_probs
        .gather(&samples.unsqueeze(D::Minus1)?.contiguous()?, D::Minus1)?
        .squeeze(D::Minus1)?;
    let perplexity = picked.mean(D::Minus1)?.neg()?.exp()?;
    Ok(perplexity.to_vec1::<f32>()?)
}

/// Fraction of positions where each sample matches the ground-truth labels.
pub fn recovery_per_sample(samples: &Tensor, labels: &Tensor) -> Result<Vec<f32>> {
    let eq = samples
        .broadcast_eq(&labels.unsqueeze(0)?)?
        .to_dtype(DType::F32)?;
    Ok(eq.mean(D::Minus1)?.to_vec1::<f32>()?)
}

/// Structural self-consistency of each sample: fold the sampled sequence
/// with `oracle`, then take base-pair F1 against every comparable input
/// conformer structure (restricted to that conformer's valid residues) and
/// average. Samples the oracle cannot fold, and inputs without a single
/// parseable structure, score NaN rather than failing the design call.
pub fn self_consistency_scores(
    samples: &Tensor,
    oracle: &dyn SecondaryStructureOracle,
    sec_struct_list: &[String],
    conf_masks: &[Vec<bool>],
) -> Result<Vec<f32>> {
    let mut references = Vec::new();
    for (idx, (db, mask)) in sec_struct_list.iter().zip(conf_masks.iter()).enumerate() {
        match pairs_from_dot_bracket(db) {
            Ok(pairs) => references.push((pairs, mask)),
            Err(err) => warn!(conformer = idx, %err, "skipping unparseable input structure"),
        }
    }

    let mut scores = Vec::new();
    for row in samples.to_vec2::<u32>()? {
        if references.is_empty() {
            scores.push(f32::NAN);
            continue;
        }
        let sequence = decode_labels(&row);
        let predicted = oracle
            .fold(&sequence)
            .and_then(|db| pairs_from_dot_bracket(&db));
        match predicted {
            Ok(pairs) => {
                let total: f32 = references
                    .iter()
                    .map(|(reference, mask)| base_pair_f1(&pairs, reference, mask))
                    .sum();
                scores.push(total / references.len() as f32);
            }
            Err(err) => {
                warn!(%err, "secondary structure prediction failed for a sample");
                scores.push(f32::NAN);
            }
        }
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use ribodesign_core::NussinovFold;

    struct FixedFold(&'static str);

    impl SecondaryStructureOracle for FixedFold {
        fn fold(&self, _sequence: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_perplexity_uniform_logits() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((2, 5, 4), DType::F32, &device).unwrap();
        let samples = Tensor::from_vec(vec![0u32, 1, 2, 3, 0, 3, 3, 3, 3, 3], (2, 5), &device).unwrap();
        let ppl = perplexity_per_sample(&logits, &samples).unwrap();
        for p in ppl {
            assert!((p - 4.0).abs() < 1e-4, "uniform logits should give 4, got {p}");
        }
    }

    #[test]
    fn test_perplexity_confident_logits() {
        let device = Device::Cpu;
        let samples = Tensor::from_vec(vec![2u32, 0, 1], (1, 3), &device).unwrap();
        let mut flat = vec![0f32; 12];
        for (t, &c) in [2usize, 0, 1].iter().enumerate() {
            flat[t * 4 + c] = 50.0;
        }
        let logits = Tensor::from_vec(flat, (1, 3, 4), &device).unwrap();
        let ppl = perplexity_per_sample(&logits, &samples).unwrap();
        assert!(ppl[0] >= 1.0);
        assert!((ppl[0] - 1.0).abs() < 1e-4, "confident logits should give ~1, got {}", ppl[0]);
    }

    #[test]
    fn test_recovery_bounds() {
        let device = Device::Cpu;
        let labels = Tensor::from_vec(vec![0u32, 1, 2, 3], 4, &device).unwrap();
        let samples = Tensor::from_vec(
            vec![0u32, 1, 2, 3, 3, 2, 1, 0, 0, 1, 1, 0],
            (3, 4),
            &device,
        )
        .unwrap();
        let rec = recovery_per_sample(&samples, &labels).unwrap();
        assert_eq!(rec, vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_self_consistency_exact_match() {
        let device = Device::Cpu;
        // GGCGUUCGCGCC as labels
        let labels = vec![2u32, 2, 1, 2, 3, 3, 1, 2, 1, 2, 1, 1];
        let samples = Tensor::from_vec(labels, (1, 12), &device).unwrap();
        let reference = "((((....))))".to_string();
        let masks = vec![vec![true; 12]];

        let oracle = FixedFold("((((....))))");
        let scores =
            self_consistency_scores(&samples, &oracle, &[reference.clone()], &masks).unwrap();
        assert_eq!(scores, vec![1.0]);

        // disjoint prediction scores zero
        let oracle = FixedFold("..((....))..");
        let scores = self_consistency_scores(&samples, &oracle, &[reference], &masks).unwrap();
        assert_eq!(scores, vec![0.0]);
    }

    #[test]
    fn test_self_consistency_multi_conformer_mean() {
        let device = Device::Cpu;
        let samples = Tensor::from_vec(vec![0u32; 10], (1, 10), &device).unwrap();
        let structures = vec!["((......))".to_string(), "..........".to_string()];
        let masks = vec![vec![true; 10], vec![true; 10]];
        let oracle = FixedFold("((......))");
        let scores = self_consistency_scores(&samples, &oracle, &structures, &masks).unwrap();
        // matches the first conformer (1.0), misses the second (0.0)
        assert_eq!(scores, vec![0.5]);
    }

    #[test]
    fn test_self_consistency_nan_when_no_reference_parses() {
        let device = Device::Cpu;
        let samples = Tensor::from_vec(vec![0u32, 1, 2, 3], (1, 4), &device).unwrap();
        let structures = vec!["(((".to_string()];
        let masks = vec![vec![true; 4]];
        let scores =
            self_consistency_scores(&samples, &NussinovFold, &structures, &masks).unwrap();
        assert!(scores[0].is_nan());
    }

    #[test]
    fn test_self_consistency_respects_conformer_mask() {
        let device = Device::Cpu;
        let samples = Tensor::from_vec(vec![0u32; 10], (1, 10), &device).unwrap();
        let structures = vec!["((......))".to_string()];
        // outer pair endpoints invalid in this conformer
        let mut mask = vec![true; 10];
        mask[0] = false;
        let masks = vec![mask];
        let oracle = FixedFold(".(......).");
        let scores = self_consistency_scores(&samples, &oracle, &structures, &masks).unwrap();
        assert_eq!(scores, vec![1.0]);
    }
}
