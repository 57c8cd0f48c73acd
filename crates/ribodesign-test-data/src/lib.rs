//! Small RNA structure files embedded in the binary for tests.
//!
//! Each fixture is a 12-nucleotide UUCG-style hairpin (`GGCGUUCGCGCC`,
//! stem pairs 1-12/2-11/3-10/4-9) with idealized backbone coordinates.
//! `create_temp` materializes the bytes as a named temp file and returns
//! the path together with the guard keeping the file alive.

use std::fs;
use tempfile::{Builder, NamedTempFile};

#[derive(Debug)]
pub struct TestFile {
    filebinary: &'static [u8],
    suffix: &'static str,
}

impl TestFile {
    /// Reference conformer of the hairpin, atoms P / C4' / C1' / N1 / N9.
    pub fn rna_hairpin_01() -> Self {
        Self {
            filebinary: include_bytes!("../data/rna_hairpin_1.pdb"),
            suffix: "pdb",
        }
    }

    /// Same hairpin under a rigid-body transform, a second conformer.
    pub fn rna_hairpin_02() -> Self {
        Self {
            filebinary: include_bytes!("../data/rna_hairpin_2.pdb"),
            suffix: "pdb",
        }
    }

    /// Same residues but only C1' atoms, so no residue has a usable backbone.
    pub fn rna_backbone_missing() -> Self {
        Self {
            filebinary: include_bytes!("../data/rna_backbone_missing.pdb"),
            suffix: "pdb",
        }
    }

    pub fn sequence() -> &'static str {
        "GGCGUUCGCGCC"
    }

    pub fn dot_bracket() -> &'static str {
        "((((....))))"
    }

    pub fn create_temp(&self) -> std::io::Result<(String, NamedTempFile)> {
        let temp = Builder::new()
            .suffix(&format!(".{}", self.suffix))
            .tempfile()?;

        fs::write(&temp, self.filebinary)?;
        let path = temp.path().to_string_lossy().into_owned();

        Ok((path, temp))
    }
}
