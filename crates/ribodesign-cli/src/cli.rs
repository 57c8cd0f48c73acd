use crate::logging;
use anyhow::Context;
use clap::{ArgGroup, Parser};
use ribodesign_gnn::{
    CheckpointStore, DesignOptions, DesignerConfig, RnaDesigner, CLI_DEFAULT_TEMPERATURE,
    DEFAULT_N_SAMPLES, DEFAULT_SEED,
};
use std::path::PathBuf;
use tracing::debug;

/// Flag spellings follow the original tool, underscores included.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("input")
        .required(true)
        .args(["pdb_filepath", "directory_filepath"]),
))]
pub struct Cli {
    /// Single structure file to design against.
    #[arg(long = "pdb_filepath")]
    pdb_filepath: Option<PathBuf>,

    /// Directory of structure files treated as conformers of one molecule.
    #[arg(long = "directory_filepath")]
    directory_filepath: Option<PathBuf>,

    /// Write the designed records here as FASTA instead of stdout.
    #[arg(long = "output_filepath")]
    output_filepath: Option<PathBuf>,

    /// Conformer channels; clamped to the nearest supported checkpoint.
    #[arg(long = "max_num_conformers", default_value_t = 1)]
    max_num_conformers: usize,

    /// Designed sequences per call.
    #[arg(long = "n_samples", default_value_t = DEFAULT_N_SAMPLES)]
    n_samples: usize,

    /// Sampling temperature; lower is closer to greedy decoding.
    #[arg(long, default_value_t = CLI_DEFAULT_TEMPERATURE)]
    temperature: f64,

    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// CUDA device ordinal; falls back to CPU when no accelerator exists.
    #[arg(long = "gpu_id", default_value_t = 0)]
    gpu_id: usize,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Errors only.
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    pub fn execute(self) -> anyhow::Result<()> {
        logging::setup_logging(self.verbose, self.quiet);
        debug!("parsed arguments: {:?}", &self);

        let designer = RnaDesigner::new(DesignerConfig {
            max_num_conformers: self.max_num_conformers,
            gpu_id: self.gpu_id,
            store: CheckpointStore::from_env(),
        })
        .context("failed to initialize the designer")?;

        let opts = DesignOptions {
            n_samples: self.n_samples,
            temperature: self.temperature,
            seed: self.seed,
            output_path: self.output_filepath.clone(),
        };

        let result = match (&self.pdb_filepath, &self.directory_filepath) {
            (Some(path), None) => designer
                .design_from_pdb_file(path, &opts)
                .with_context(|| format!("design failed for {}", path.display()))?,
            (None, Some(dir)) => designer
                .design_from_directory(dir, &opts)
                .with_context(|| format!("design failed for directory {}", dir.display()))?,
            // the clap group rules out the remaining combinations
            _ => anyhow::bail!("exactly one of --pdb_filepath or --directory_filepath is required"),
        };

        if self.output_filepath.is_none() {
            for record in &result.records {
                print!("{record}");
            }
        }
        Ok(())
    }
}
