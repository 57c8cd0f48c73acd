//! ribodesign-core: structure handling for RNA inverse design.
//!
//! This crate owns everything upstream of the model:
//!
//! - nucleotide alphabet and the canonical RNA atom table ([`constants`])
//! - [`RnaStructure`], a column-oriented atom collection built from
//!   `pdbtbx` structures, with conversion to full-atom coordinate tensors
//!   and explicit per-atom validity masks
//! - conformer loading from a PDB file or a directory of PDB files
//!   ([`loader`])
//! - backbone selection and conformer filtering ([`backbone`])
//! - dot-bracket secondary structure utilities, geometric base-pair
//!   detection and a Nussinov folding oracle ([`secondary`])
//! - FASTA record I/O ([`fasta`])
//! - the shared error taxonomy ([`error`])

pub mod backbone;
pub mod constants;
pub mod error;
pub mod fasta;
pub mod loader;
pub mod secondary;
pub mod structure;

pub use backbone::{select_backbone, BackboneSet};
pub use constants::{Nucleotide, RnaAtom, FILL_VALUE, MASK_LABEL, NUM_BACKBONE_ATOMS, NUM_CLASSES};
pub use error::{DesignError, Result};
pub use fasta::{read_fasta, write_fasta, SequenceRecord};
pub use loader::{load_pdb_directory, load_pdb_file, RawMoleculeData};
pub use secondary::{NussinovFold, SecondaryStructureOracle};
pub use structure::RnaStructure;
