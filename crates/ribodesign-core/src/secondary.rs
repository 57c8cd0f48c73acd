//! Secondary structure utilities: dot-bracket parsing and rendering,
//! geometric base-pair detection from coordinates, and a Nussinov-style
//! folding oracle used by self-consistency scoring.

use crate::constants::Nucleotide;
use crate::error::{DesignError, Result};
use crate::structure::RnaStructure;

const OPEN: [char; 4] = ['(', '[', '{', '<'];
const CLOSE: [char; 4] = [')', ']', '}', '>'];

/// C1'-C1' distance window for a paired nucleotide, in Angstrom. The ideal
/// value sits at the canonical Watson-Crick C1' separation.
const PAIR_DIST_MIN: f32 = 8.5;
const PAIR_DIST_MAX: f32 = 11.5;
const PAIR_DIST_IDEAL: f32 = 10.4;

/// Minimum number of unpaired residues enclosed by a hairpin.
const MIN_HAIRPIN: usize = 3;

/// Parse dot-bracket notation into a partner table (`partner[i] == Some(j)`
/// iff i and j are paired). Four bracket families are accepted.
pub fn parse_dot_bracket(db: &str) -> Result<Vec<Option<usize>>> {
    let mut partner = vec![None; db.chars().count()];
    let mut stacks: [Vec<usize>; 4] = Default::default();

    for (i, c) in db.chars().enumerate() {
        if c == '.' || c == '-' {
            continue;
        }
        if let Some(level) = OPEN.iter().position(|&o| o == c) {
            stacks[level].push(i);
        } else if let Some(level) = CLOSE.iter().position(|&cl| cl == c) {
            let j = stacks[level].pop().ok_or_else(|| {
                DesignError::SecondaryStructure(format!("unmatched '{c}' at position {i}"))
            })?;
            partner[i] = Some(j);
            partner[j] = Some(i);
        } else {
            return Err(DesignError::SecondaryStructure(format!(
                "unexpected character '{c}' at position {i}"
            )));
        }
    }
    for (level, stack) in stacks.iter().enumerate() {
        if let Some(&i) = stack.last() {
            return Err(DesignError::SecondaryStructure(format!(
                "unclosed '{}' at position {i}",
                OPEN[level]
            )));
        }
    }
    Ok(partner)
}

/// Base pairs `(i, j)` with `i < j` from a dot-bracket string.
pub fn pairs_from_dot_bracket(db: &str) -> Result<Vec<(usize, usize)>> {
    let partner = parse_dot_bracket(db)?;
    Ok(partner
        .iter()
        .enumerate()
        .filter_map(|(i, &p)| p.filter(|&j| i < j).map(|j| (i, j)))
        .collect())
}

/// Render a pair list as dot-bracket notation. Crossing pairs are pushed to
/// deeper bracket families; more than four mutually crossing layers fail.
pub fn to_dot_bracket(pairs: &[(usize, usize)], len: usize) -> Result<String> {
    let mut out = vec!['.'; len];
    let mut levels: [Vec<(usize, usize)>; 4] = Default::default();

    let mut sorted = pairs.to_vec();
    sorted.sort_unstable();
    'pairs: for &(i, j) in &sorted {
        if i >= j || j >= len {
            return Err(DesignError::SecondaryStructure(format!(
                "pair ({i}, {j}) out of range for length {len}"
            )));
        }
        for (level, placed) in levels.iter_mut().enumerate() {
            let crossing = placed
                .iter()
                .any(|&(a, b)| (a < i && i < b && b < j) || (i < a && a < j && j < b));
            if !crossing {
                placed.push((i, j));
                out[i] = OPEN[level];
                out[j] = CLOSE[level];
                continue 'pairs;
            }
        }
        return Err(DesignError::SecondaryStructure(
            "pair nesting deeper than four bracket families".to_string(),
        ));
    }
    Ok(out.into_iter().collect())
}

/// Detect base pairs geometrically from a structure's own coordinates.
///
/// Candidate pairs are residue anchors (C1', falling back to the glycosidic
/// nitrogen) within the Watson-Crick distance window and separated by at
/// least [`MIN_HAIRPIN`] residues. Candidates closest to the ideal
/// separation are accepted first; each residue pairs at most once and
/// crossing pairs are rejected so the result always renders as plain
/// nested dot-bracket.
pub fn detect_dot_bracket(structure: &RnaStructure) -> Result<String> {
    let anchors = structure.pair_anchors();
    let n = anchors.len();

    let mut candidates = Vec::new();
    for i in 0..n {
        let Some(a) = anchors[i] else { continue };
        for j in (i + MIN_HAIRPIN + 1)..n {
            let Some(b) = anchors[j] else { continue };
            let d = dist(a, b);
            if (PAIR_DIST_MIN..=PAIR_DIST_MAX).contains(&d) {
                candidates.push(((d - PAIR_DIST_IDEAL).abs(), i, j));
            }
        }
    }
    candidates.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

    let mut used = vec![false; n];
    let mut accepted: Vec<(usize, usize)> = Vec::new();
    for &(_, i, j) in &candidates {
        if used[i] || used[j] {
            continue;
        }
        let crossing = accepted
            .iter()
            .any(|&(a, b)| (a < i && i < b && b < j) || (i < a && a < j && j < b));
        if crossing {
            continue;
        }
        accepted.push((i, j));
        used[i] = true;
        used[j] = true;
    }
    to_dot_bracket(&accepted, n)
}

fn dist(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Sequence-to-structure oracle consumed by self-consistency scoring.
/// Implementations predict a dot-bracket string of the same length as the
/// input sequence.
pub trait SecondaryStructureOracle: Send + Sync {
    fn fold(&self, sequence: &str) -> Result<String>;
}

/// Maximum-pairing dynamic program (Nussinov) over the canonical and
/// wobble pair set, with a hairpin size floor. Deterministic, so repeated
/// scoring of the same sample is stable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NussinovFold;

fn can_pair(a: Option<Nucleotide>, b: Option<Nucleotide>) -> bool {
    use Nucleotide::*;
    matches!(
        (a, b),
        (Some(A), Some(U))
            | (Some(U), Some(A))
            | (Some(G), Some(C))
            | (Some(C), Some(G))
            | (Some(G), Some(U))
            | (Some(U), Some(G))
    )
}

impl SecondaryStructureOracle for NussinovFold {
    fn fold(&self, sequence: &str) -> Result<String> {
        let seq: Vec<Option<Nucleotide>> =
            sequence.chars().map(Nucleotide::from_char).collect();
        let n = seq.len();
        if n == 0 {
            return Ok(String::new());
        }

        // dp[i][j]: max pairs in seq[i..=j]
        let mut dp = vec![vec![0u32; n]; n];
        for span in (MIN_HAIRPIN + 1)..n {
            for i in 0..(n - span) {
                let j = i + span;
                let mut best = dp[i][j - 1];
                for k in i..=(j.saturating_sub(MIN_HAIRPIN + 1)) {
                    if can_pair(seq[k], seq[j]) {
                        let left = if k > i { dp[i][k - 1] } else { 0 };
                        best = best.max(left + dp[k + 1][j - 1] + 1);
                    }
                }
                dp[i][j] = best;
            }
        }

        let mut pairs = Vec::new();
        let mut stack = vec![(0usize, n - 1)];
        while let Some((i, j)) = stack.pop() {
            if i >= j || j - i <= MIN_HAIRPIN {
                continue;
            }
            if dp[i][j] == dp[i][j - 1] {
                stack.push((i, j - 1));
                continue;
            }
            for k in i..=(j - MIN_HAIRPIN - 1) {
                if can_pair(seq[k], seq[j]) {
                    let left = if k > i { dp[i][k - 1] } else { 0 };
                    if dp[i][j] == left + dp[k + 1][j - 1] + 1 {
                        pairs.push((k, j));
                        if k > i {
                            stack.push((i, k - 1));
                        }
                        stack.push((k + 1, j - 1));
                        break;
                    }
                }
            }
        }
        to_dot_bracket(&pairs, n)
    }
}

/// F1 agreement between two base-pair sets, restricted to pairs whose
/// endpoints are both valid under `mask`. Two empty (post-restriction)
/// sets agree perfectly.
pub fn base_pair_f1(
    predicted: &[(usize, usize)],
    reference: &[(usize, usize)],
    mask: &[bool],
) -> f32 {
    let keep = |&(i, j): &(usize, usize)| i < mask.len() && j < mask.len() && mask[i] && mask[j];
    let pred: Vec<(usize, usize)> = predicted.iter().copied().filter(keep).collect();
    let refp: Vec<(usize, usize)> = reference.iter().copied().filter(keep).collect();
    if pred.is_empty() && refp.is_empty() {
        return 1.0;
    }
    let tp = pred.iter().filter(|p| refp.contains(p)).count();
    2.0 * tp as f32 / (pred.len() + refp.len()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render_roundtrip() {
        let db = "((((....))))";
        let pairs = pairs_from_dot_bracket(db).unwrap();
        assert_eq!(pairs, vec![(0, 11), (1, 10), (2, 9), (3, 8)]);
        assert_eq!(to_dot_bracket(&pairs, 12).unwrap(), db);
    }

    #[test]
    fn test_parse_rejects_unbalanced() {
        assert!(parse_dot_bracket("(((..").is_err());
        assert!(parse_dot_bracket("..))").is_err());
        assert!(parse_dot_bracket(".(x).").is_err());
    }

    #[test]
    fn test_pseudoknot_uses_second_family() {
        // pairs (0,4) and (2,6) cross
        let db = to_dot_bracket(&[(0, 4), (2, 6)], 8).unwrap();
        assert_eq!(db, "(.[.).].");
        let pairs = pairs_from_dot_bracket(&db).unwrap();
        assert_eq!(pairs, vec![(0, 4), (2, 6)]);
    }

    #[test]
    fn test_nussinov_valid_structure() {
        let db = NussinovFold.fold("GGCGUUCGCGCC").unwrap();
        assert_eq!(db.chars().count(), 12);
        let pairs = pairs_from_dot_bracket(&db).unwrap();
        let seq: Vec<_> = "GGCGUUCGCGCC".chars().map(Nucleotide::from_char).collect();
        for &(i, j) in &pairs {
            assert!(j - i > MIN_HAIRPIN, "hairpin floor violated at ({i},{j})");
            assert!(can_pair(seq[i], seq[j]), "non-canonical pair at ({i},{j})");
        }
        // a hairpin this complementary must pair its stem
        assert!(pairs.len() >= 4);
    }

    #[test]
    fn test_nussinov_unpairable() {
        assert_eq!(NussinovFold.fold("AAAA").unwrap(), "....");
        assert_eq!(NussinovFold.fold("AAAAAAAA").unwrap(), "........");
        assert_eq!(NussinovFold.fold("").unwrap(), "");
    }

    #[test]
    fn test_base_pair_f1() {
        let mask = vec![true; 12];
        let truth = vec![(0, 11), (1, 10), (2, 9), (3, 8)];
        assert_eq!(base_pair_f1(&truth, &truth, &mask), 1.0);
        assert_eq!(base_pair_f1(&[], &[], &mask), 1.0);
        assert_eq!(base_pair_f1(&[], &truth, &mask), 0.0);

        let half = vec![(0, 11), (1, 10)];
        let f1 = base_pair_f1(&half, &truth, &mask);
        assert!((f1 - 2.0 / 3.0).abs() < 1e-6);

        // masking an endpoint removes its pair from both sides
        let mut masked = vec![true; 12];
        masked[0] = false;
        let f1 = base_pair_f1(&truth, &truth, &masked);
        assert_eq!(f1, 1.0);
        let f1 = base_pair_f1(&half, &truth, &masked);
        assert!((f1 - 0.5).abs() < 1e-6);
    }
}
