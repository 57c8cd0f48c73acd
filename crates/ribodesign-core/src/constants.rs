//! Nucleotide alphabet, integer label encoding and the canonical RNA atom
//! table shared by the loader, the featurizer and the model.

use strum::{Display, EnumIter, EnumString};

/// Sentinel written into coordinate tensors for absent atoms. Validity is
/// tracked by the explicit atom masks; the fill value only keeps the
/// tensors finite.
pub const FILL_VALUE: f32 = 1e-5;

/// Number of atoms in the coarse backbone representation (P, C4', base N).
pub const NUM_BACKBONE_ATOMS: usize = 3;

/// Number of designable nucleotide classes.
pub const NUM_CLASSES: usize = 4;

/// Label used for residues whose identity is unknown. Never produced by
/// sampling; samples are always in `0..NUM_CLASSES`.
pub const MASK_LABEL: u32 = NUM_CLASSES as u32;

/// The four ribonucleotides, in label order (`A`=0 .. `U`=3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum Nucleotide {
    A = 0,
    C = 1,
    G = 2,
    U = 3,
}

impl Nucleotide {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(Self::A),
            'C' => Some(Self::C),
            'G' => Some(Self::G),
            'U' => Some(Self::U),
            // thymine shows up in mixed files; treat as uracil
            'T' => Some(Self::U),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            Self::A => 'A',
            Self::C => 'C',
            Self::G => 'G',
            Self::U => 'U',
        }
    }

    pub fn label(self) -> u32 {
        self as u32
    }

    pub fn from_label(label: u32) -> Option<Self> {
        match label {
            0 => Some(Self::A),
            1 => Some(Self::C),
            2 => Some(Self::G),
            3 => Some(Self::U),
            _ => None,
        }
    }

    pub fn is_purine(self) -> bool {
        matches!(self, Self::A | Self::G)
    }

    /// The glycosidic nitrogen linking base to ribose: N9 for purines,
    /// N1 for pyrimidines.
    pub fn base_nitrogen(self) -> RnaAtom {
        if self.is_purine() {
            RnaAtom::N9
        } else {
            RnaAtom::N1
        }
    }
}

/// Canonical RNA atom names, the slot order of full-atom coordinate
/// tensors `(L, RNA_ATOM_COUNT, 3)`. Primed ribose names carry their PDB
/// spelling through strum.
#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum RnaAtom {
    P = 0,
    OP1 = 1,
    OP2 = 2,
    #[strum(serialize = "O5'")] O5p = 3,
    #[strum(serialize = "C5'")] C5p = 4,
    #[strum(serialize = "C4'")] C4p = 5,
    #[strum(serialize = "O4'")] O4p = 6,
    #[strum(serialize = "C3'")] C3p = 7,
    #[strum(serialize = "O3'")] O3p = 8,
    #[strum(serialize = "C2'")] C2p = 9,
    #[strum(serialize = "O2'")] O2p = 10,
    #[strum(serialize = "C1'")] C1p = 11,
    N1 = 12,
    C2 = 13,
    O2 = 14,
    N3 = 15,
    C4 = 16,
    O4 = 17,
    N4 = 18,
    C5 = 19,
    C6 = 20,
    N6 = 21,
    N7 = 22,
    C8 = 23,
    N9 = 24,
    O6 = 25,
    N2 = 26,
}

/// Size of the canonical atom table.
pub const RNA_ATOM_COUNT: usize = 27;

impl RnaAtom {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Map a sequence string onto integer labels; unrecognized letters become
/// [`MASK_LABEL`].
pub fn encode_sequence(seq: &str) -> Vec<u32> {
    seq.chars()
        .map(|c| Nucleotide::from_char(c).map_or(MASK_LABEL, Nucleotide::label))
        .collect()
}

/// Render integer labels back into letters; [`MASK_LABEL`] renders as `N`.
pub fn decode_labels(labels: &[u32]) -> String {
    labels
        .iter()
        .map(|&l| Nucleotide::from_label(l).map_or('N', Nucleotide::to_char))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_label_roundtrip() {
        for nt in Nucleotide::iter() {
            assert_eq!(Nucleotide::from_label(nt.label()), Some(nt));
        }
        assert_eq!(Nucleotide::from_label(MASK_LABEL), None);
    }

    #[test]
    fn test_atom_table() {
        assert_eq!(RnaAtom::iter().count(), RNA_ATOM_COUNT);
        assert_eq!(RnaAtom::from_str("C4'").unwrap(), RnaAtom::C4p);
        assert_eq!(RnaAtom::from_str("P").unwrap(), RnaAtom::P);
        assert_eq!(RnaAtom::C4p.to_string(), "C4'");
        assert!(RnaAtom::from_str("CA").is_err());
        // slot order matches declaration order
        for (i, atom) in RnaAtom::iter().enumerate() {
            assert_eq!(atom.index(), i);
        }
    }

    #[test]
    fn test_encode_decode() {
        let labels = encode_sequence("GGCGUUCGCGCC");
        assert_eq!(labels.len(), 12);
        assert_eq!(decode_labels(&labels), "GGCGUUCGCGCC");
        assert_eq!(encode_sequence("AXU"), vec![0, MASK_LABEL, 3]);
        assert_eq!(decode_labels(&[0, 4, 3]), "ANU");
    }

    #[test]
    fn test_base_nitrogen() {
        assert_eq!(Nucleotide::A.base_nitrogen(), RnaAtom::N9);
        assert_eq!(Nucleotide::G.base_nitrogen(), RnaAtom::N9);
        assert_eq!(Nucleotide::C.base_nitrogen(), RnaAtom::N1);
        assert_eq!(Nucleotide::U.base_nitrogen(), RnaAtom::N1);
    }
}
