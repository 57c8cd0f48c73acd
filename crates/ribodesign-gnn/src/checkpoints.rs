//! Checkpoint resolution and loading. Weights live as safetensors files
//! named by conformer-channel width, next to a JSON hyperparameter sidecar;
//! they are looked up under a local root first and optionally fetched from
//! a Hugging Face Hub repository.

use crate::model::{GnnConfig, RiboMpnn};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::api::sync::Api;
use ribodesign_core::{DesignError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::{debug, info};

/// Conformer-channel widths with shipped checkpoints.
pub const SUPPORTED_NUM_STATES: [usize; 4] = [1, 2, 3, 5];

/// Environment override for the local checkpoint root.
pub const CHECKPOINT_DIR_ENV: &str = "RIBODESIGN_CHECKPOINT_DIR";

const DEFAULT_CHECKPOINT_DIR: &str = "checkpoints";

/// Largest supported channel width not exceeding `requested`; requests
/// below the minimum come up to it.
pub fn clamp_num_states(requested: usize) -> usize {
    SUPPORTED_NUM_STATES
        .iter()
        .rev()
        .find(|&&n| n <= requested)
        .copied()
        .unwrap_or(SUPPORTED_NUM_STATES[0])
}

/// Resolved checkpoint file pair.
#[derive(Debug, Clone)]
pub struct CheckpointFiles {
    pub weights: PathBuf,
    pub sidecar: PathBuf,
}

/// A checkpoint loaded onto a device.
pub struct LoadedCheckpoint {
    pub model: RiboMpnn,
    pub config: GnnConfig,
    pub weights_path: PathBuf,
}

/// Maps supported conformer counts to checkpoint files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    hf_repo: Option<String>,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hf_repo: None,
        }
    }

    /// Root from `RIBODESIGN_CHECKPOINT_DIR`, falling back to
    /// `./checkpoints`.
    pub fn from_env() -> Self {
        let root = std::env::var(CHECKPOINT_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CHECKPOINT_DIR));
        Self::new(root)
    }

    /// Also look on the Hub when a checkpoint is missing locally.
    pub fn with_hf_repo(mut self, repo: impl Into<String>) -> Self {
        self.hf_repo = Some(repo.into());
        self
    }

    pub fn weight_stem(num_states: usize) -> String {
        format!("ribodesign_ar_v1_{num_states}state")
    }

    /// Locate the weight/sidecar pair for a channel width. Local files win;
    /// the Hub is only consulted when configured and needed.
    pub fn fetch(&self, num_states: usize) -> Result<CheckpointFiles> {
        if !SUPPORTED_NUM_STATES.contains(&num_states) {
            return Err(DesignError::UnsupportedConfiguration(format!(
                "no checkpoint for max_num_conformers={num_states}, supported: {SUPPORTED_NUM_STATES:?}"
            )));
        }
        let stem = Self::weight_stem(num_states);
        let weights = self.root.join(format!("{stem}.safetensors"));
        let sidecar = self.root.join(format!("{stem}.json"));
        if weights.is_file() && sidecar.is_file() {
            debug!(weights = %weights.display(), "using local checkpoint");
            return Ok(CheckpointFiles { weights, sidecar });
        }

        if let Some(repo) = &self.hf_repo {
            info!(%repo, %stem, "checkpoint not found locally, fetching from hub");
            let api = Api::new().map_err(hub_error)?;
            let repo = api.model(repo.clone());
            let weights = repo.get(&format!("{stem}.safetensors")).map_err(hub_error)?;
            let sidecar = repo.get(&format!("{stem}.json")).map_err(hub_error)?;
            return Ok(CheckpointFiles { weights, sidecar });
        }

        Err(DesignError::UnsupportedConfiguration(format!(
            "checkpoint {stem} not found under {} and no hub repository configured",
            self.root.display()
        )))
    }

    /// Fetch, parse the sidecar, and memory-map the weights onto `device`.
    pub fn load(&self, num_states: usize, device: &Device) -> Result<LoadedCheckpoint> {
        let files = self.fetch(num_states)?;
        let reader = BufReader::new(File::open(&files.sidecar)?);
        let config: GnnConfig = serde_json::from_reader(reader).map_err(|err| {
            DesignError::UnsupportedConfiguration(format!(
                "invalid hyperparameter sidecar {}: {err}",
                files.sidecar.display()
            ))
        })?;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, device)?
        };
        let model = RiboMpnn::load(vb, &config)?;
        info!(
            checkpoint = %files.weights.display(),
            model = %config.name,
            "loaded model weights"
        );
        Ok(LoadedCheckpoint {
            model,
            config,
            weights_path: files.weights,
        })
    }
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::from_env()
    }
}

fn hub_error(err: hf_hub::api::sync::ApiError) -> DesignError {
    DesignError::UnsupportedConfiguration(format!("checkpoint fetch from hub failed: {err}"))
}
