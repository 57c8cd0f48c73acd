//! De-novo-design FASTA records: one header line carrying an id plus a
//! free-form description, then the sequence.

use crate::error::{DesignError, Result};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// One FASTA record. The header renders as `>{id} {description}`; on
/// parse, the id is the first whitespace-delimited token and the rest of
/// the line is the description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub id: String,
    pub description: String,
    pub sequence: String,
}

impl SequenceRecord {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        sequence: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            sequence: sequence.into(),
        }
    }
}

impl std::fmt::Display for SequenceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.description.is_empty() {
            writeln!(f, ">{}", self.id)?;
        } else {
            writeln!(f, ">{} {}", self.id, self.description)?;
        }
        writeln!(f, "{}", self.sequence)
    }
}

/// Write records to any sink, one sequence line per record.
pub fn write_fasta_to(writer: &mut impl Write, records: &[SequenceRecord]) -> Result<()> {
    for record in records {
        write!(writer, "{record}")?;
    }
    Ok(())
}

pub fn write_fasta(path: impl AsRef<Path>, records: &[SequenceRecord]) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    write_fasta_to(&mut file, records)
}

/// Read a FASTA file; wrapped sequence lines are concatenated.
pub fn read_fasta(path: impl AsRef<Path>) -> Result<Vec<SequenceRecord>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records: Vec<SequenceRecord> = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(header) = trimmed.strip_prefix('>') {
            let (id, description) = match header.split_once(char::is_whitespace) {
                Some((id, rest)) => (id.to_string(), rest.trim().to_string()),
                None => (header.to_string(), String::new()),
            };
            records.push(SequenceRecord::new(id, description, String::new()));
        } else {
            let record = records.last_mut().ok_or_else(|| {
                DesignError::InvalidInput("FASTA sequence data before any header".to_string())
            })?;
            record.sequence.push_str(trimmed);
        }
    }
    Ok(records)
}
