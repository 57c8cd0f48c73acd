//! Tensor side of ribodesign: turns normalized RNA backbones into geometric
//! graphs, runs the autoregressive message-passing network over them, and
//! scores the sampled sequences.
//!
//! - `featurize`: backbone conformers -> [`FeaturizedGraph`] (internal
//!   coordinates, RBF edge features, k-NN or radius connectivity).
//! - `model`: the [`SequenceSampler`] contract and the shipped candle
//!   encoder/decoder network behind it.
//! - `scoring`: perplexity, native-sequence recovery and structural
//!   self-consistency.
//! - `checkpoints`: pretrained-weight lookup (local dir or Hugging Face Hub).
//! - `designer`: the orchestrator gluing all of the above into one
//!   `design()` call.

pub mod checkpoints;
pub mod designer;
pub mod featurize;
mod geometry;
pub mod model;
pub mod rng;
pub mod scoring;

pub use checkpoints::{clamp_num_states, CheckpointStore, SUPPORTED_NUM_STATES};
pub use designer::{
    DesignOptions, DesignResult, DesignerConfig, RnaDesigner, CLI_DEFAULT_TEMPERATURE,
    DEFAULT_N_SAMPLES, DEFAULT_SEED, DEFAULT_TEMPERATURE,
};
pub use featurize::{FeaturizeConfig, FeaturizeMode, FeaturizedGraph, RnaFeaturizer};
pub use model::{GnnConfig, RiboMpnn, SampleOutput, SequenceSampler};
pub use rng::RngContext;
