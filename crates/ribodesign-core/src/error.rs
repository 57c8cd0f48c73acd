//! Error taxonomy shared across the workspace.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DesignError {
    /// Neither/both of the single-file and directory inputs were given, or
    /// the input matched no usable structure files.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Per-residue atom dimension is neither backbone-only nor the full
    /// canonical atom table.
    #[error(
        "coordinate tensor has {got} atoms per residue, expected {expected_backbone} (backbone) or {expected_full} (full atom set)"
    )]
    InvalidAtomCount {
        got: usize,
        expected_backbone: usize,
        expected_full: usize,
    },

    /// Every conformer was dropped because no residue had a complete
    /// backbone.
    #[error("all conformers were dropped: no residue with complete backbone coordinates")]
    EmptyConformerSet,

    /// A configuration has no matching checkpoint or model support.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Malformed dot-bracket string or inconsistent pair list.
    #[error("secondary structure error: {0}")]
    SecondaryStructure(String),

    /// Structure file could not be parsed.
    #[error("structure parsing failed for {path}: {reason}")]
    StructureParse { path: String, reason: String },

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DesignError>;
