//! The design orchestrator: loads a checkpoint once, then turns raw
//! conformer data into scored candidate sequences and FASTA records.

use crate::checkpoints::{clamp_num_states, CheckpointStore};
use crate::featurize::{FeaturizeConfig, FeaturizedGraph, RnaFeaturizer};
use crate::model::SequenceSampler;
use crate::rng::RngContext;
use crate::scoring::{perplexity_per_sample, recovery_per_sample, self_consistency_scores};
use candle_core::{Device, Tensor};
use ribodesign_core::constants::decode_labels;
use ribodesign_core::{
    load_pdb_directory, load_pdb_file, select_backbone, write_fasta, NussinovFold,
    RawMoleculeData, Result, SecondaryStructureOracle, SequenceRecord,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Library default sampling temperature.
pub const DEFAULT_TEMPERATURE: f64 = 0.1;
/// Default sampling temperature of the command-line surface. Kept distinct
/// from the library default on purpose.
pub const CLI_DEFAULT_TEMPERATURE: f64 = 0.2;
pub const DEFAULT_N_SAMPLES: usize = 16;
pub const DEFAULT_SEED: u64 = 0;

/// Designer construction parameters.
#[derive(Debug, Clone)]
pub struct DesignerConfig {
    /// Requested conformer-channel width; clamped to the nearest supported
    /// checkpoint.
    pub max_num_conformers: usize,
    /// CUDA ordinal to try first; falls back to Metal, then CPU.
    pub gpu_id: usize,
    pub store: CheckpointStore,
}

impl Default for DesignerConfig {
    fn default() -> Self {
        Self {
            max_num_conformers: 1,
            gpu_id: 0,
            store: CheckpointStore::from_env(),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct DesignOptions {
    pub n_samples: usize,
    pub temperature: f64,
    pub seed: u64,
    /// When set, the designed records are also written here as FASTA.
    pub output_path: Option<PathBuf>,
}

impl Default for DesignOptions {
    fn default() -> Self {
        Self {
            n_samples: DEFAULT_N_SAMPLES,
            temperature: DEFAULT_TEMPERATURE,
            seed: DEFAULT_SEED,
            output_path: None,
        }
    }
}

/// The outcome of one design call: the input record followed by one record
/// per sample, plus the raw sample matrix and per-sample metrics.
#[derive(Debug, Clone)]
pub struct DesignResult {
    pub records: Vec<SequenceRecord>,
    /// `(n_samples, L)` sampled classes, u32.
    pub samples: Tensor,
    pub perplexity: Vec<f32>,
    pub recovery: Vec<f32>,
    pub sc_score: Vec<f32>,
}

pub struct RnaDesigner {
    sampler: Box<dyn SequenceSampler>,
    featurizer: RnaFeaturizer,
    oracle: Box<dyn SecondaryStructureOracle>,
    device: Device,
    model_name: String,
    checkpoint_label: String,
    max_num_conformers: usize,
}

fn select_device(gpu_id: usize) -> Device {
    match Device::new_cuda(gpu_id) {
        Ok(device) => device,
        Err(_) => match Device::new_metal(0) {
            Ok(device) => {
                info!("CUDA unavailable, using Metal");
                device
            }
            Err(_) => {
                info!("no GPU backend available, using CPU");
                Device::Cpu
            }
        },
    }
}

impl RnaDesigner {
    /// Pick a device, load the matching checkpoint and build the test-mode
    /// featurizer. The checkpoint is loaded once; every subsequent design
    /// call reuses it.
    pub fn new(config: DesignerConfig) -> Result<Self> {
        let clamped = clamp_num_states(config.max_num_conformers);
        if clamped != config.max_num_conformers {
            warn!(
                requested = config.max_num_conformers,
                clamped, "clamping max_num_conformers to the nearest supported checkpoint"
            );
        }
        let device = select_device(config.gpu_id);
        let loaded = config.store.load(clamped, &device)?;
        let featurizer = RnaFeaturizer::new(
            FeaturizeConfig {
                max_num_conformers: clamped,
                ..FeaturizeConfig::default()
            },
            &device,
        );
        let checkpoint_label = loaded.weights_path.display().to_string();
        Ok(Self {
            sampler: Box::new(loaded.model),
            featurizer,
            oracle: Box::new(NussinovFold),
            device,
            model_name: loaded.config.name,
            checkpoint_label,
            max_num_conformers: clamped,
        })
    }

    /// Build a designer around an existing sampler, bypassing the
    /// checkpoint store. Weights constructed in memory go through here.
    pub fn with_sampler(
        sampler: Box<dyn SequenceSampler>,
        model_name: impl Into<String>,
        max_num_conformers: usize,
        device: &Device,
    ) -> Self {
        let clamped = clamp_num_states(max_num_conformers);
        if clamped != max_num_conformers {
            warn!(
                requested = max_num_conformers,
                clamped, "clamping max_num_conformers to the nearest supported width"
            );
        }
        let featurizer = RnaFeaturizer::new(
            FeaturizeConfig {
                max_num_conformers: clamped,
                ..FeaturizeConfig::default()
            },
            device,
        );
        Self {
            sampler,
            featurizer,
            oracle: Box::new(NussinovFold),
            device: device.clone(),
            model_name: model_name.into(),
            checkpoint_label: "in_memory".to_string(),
            max_num_conformers: clamped,
        }
    }

    /// Swap the folding oracle used for self-consistency scoring.
    pub fn with_oracle(mut self, oracle: Box<dyn SecondaryStructureOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Design sequences for a single structure file.
    pub fn design_from_pdb_file(
        &self,
        path: impl AsRef<Path>,
        opts: &DesignOptions,
    ) -> Result<DesignResult> {
        let raw = load_pdb_file(path, &self.device)?;
        self.design(&raw, opts)
    }

    /// Design sequences for a directory of conformers of one molecule.
    pub fn design_from_directory(
        &self,
        dir: impl AsRef<Path>,
        opts: &DesignOptions,
    ) -> Result<DesignResult> {
        let raw = load_pdb_directory(dir, &self.device)?;
        self.design(&raw, opts)
    }

    /// Normalize, featurize, sample and score raw conformer data.
    pub fn design(&self, raw: &RawMoleculeData, opts: &DesignOptions) -> Result<DesignResult> {
        let set = select_backbone(raw)?;
        let mut rng = RngContext::seed(opts.seed);
        let graph = self.featurizer.featurize(&set, &mut rng)?;
        self.design_featurized(&graph, opts)
    }

    /// Sample and score an already-featurized graph.
    pub fn design_featurized(
        &self,
        graph: &FeaturizedGraph,
        opts: &DesignOptions,
    ) -> Result<DesignResult> {
        let rng = RngContext::seed(opts.seed);
        info!(
            residues = graph.len(),
            n_samples = opts.n_samples,
            temperature = opts.temperature,
            seed = opts.seed,
            "sampling sequences"
        );
        let output = self
            .sampler
            .sample(graph, opts.n_samples, opts.temperature, &rng)?;

        let perplexity = perplexity_per_sample(&output.logits, &output.samples)?;
        let recovery = recovery_per_sample(&output.samples, &graph.labels)?;
        let sc_score = self_consistency_scores(
            &output.samples,
            self.oracle.as_ref(),
            &graph.sec_struct_list,
            &graph.conf_masks,
        )?;
        debug!(
            mean_recovery = recovery.iter().sum::<f32>() / recovery.len().max(1) as f32,
            "scored samples"
        );

        let mut records = Vec::with_capacity(opts.n_samples + 1);
        records.push(SequenceRecord::new(
            "input_sequence,",
            format!(
                "ribodesign_version={}, model={}, max_num_conformers={}, checkpoint={}, seed={}",
                env!("CARGO_PKG_VERSION"),
                self.model_name,
                self.max_num_conformers,
                self.checkpoint_label,
                opts.seed
            ),
            graph.sequence.clone(),
        ));
        for (idx, row) in output.samples.to_vec2::<u32>()?.iter().enumerate() {
            records.push(SequenceRecord::new(
                format!("sample={idx},"),
                format!(
                    "temperature={}, perplexity={:.4}, recovery={:.4}, sc_score={:.4}",
                    opts.temperature, perplexity[idx], recovery[idx], sc_score[idx]
                ),
                decode_labels(row),
            ));
        }

        if let Some(path) = &opts.output_path {
            write_fasta(path, &records)?;
            info!(path = %path.display(), records = records.len(), "wrote designed sequences");
        }

        Ok(DesignResult {
            records,
            samples: output.samples,
            perplexity,
            recovery,
            sc_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SampleOutput;
    use candle_core::DType;
    use ribodesign_core::read_fasta;

    /// Sampler that returns `n` copies of a fixed class row with zero
    /// logits, making every metric analytic.
    struct EchoSampler {
        classes: Vec<u32>,
    }

    impl SequenceSampler for EchoSampler {
        fn sample(
            &self,
            _graph: &FeaturizedGraph,
            n_samples: usize,
            _temperature: f64,
            _rng: &RngContext,
        ) -> Result<SampleOutput> {
            let l = self.classes.len();
            let mut flat = Vec::with_capacity(n_samples * l);
            for _ in 0..n_samples {
                flat.extend_from_slice(&self.classes);
            }
            Ok(SampleOutput {
                samples: Tensor::from_vec(flat, (n_samples, l), &Device::Cpu)?,
                logits: Tensor::zeros((n_samples, l, 4), DType::F32, &Device::Cpu)?,
            })
        }
    }

    fn toy_graph(l: usize) -> FeaturizedGraph {
        let device = Device::Cpu;
        let mut flat = Vec::with_capacity(l * 9);
        for i in 0..l {
            let theta = 0.6 * i as f32;
            let (px, py, pz) = (9.0 * theta.cos(), 9.0 * theta.sin(), 2.8 * i as f32);
            flat.extend_from_slice(&[px, py, pz]);
            flat.extend_from_slice(&[px + 1.2, py + 0.8, pz + 0.4]);
            flat.extend_from_slice(&[px + 2.3, py - 0.1, pz + 0.7]);
        }
        let raw = RawMoleculeData {
            sequence: "ACGU".chars().cycle().take(l).collect(),
            coords_list: vec![Tensor::from_vec(flat, (l, 3, 3), &device).unwrap()],
            atom_mask_list: vec![Tensor::ones((l, 3), DType::U8, &device).unwrap()],
            sec_struct_list: vec![".".repeat(l)],
        };
        let set = select_backbone(&raw).unwrap();
        RnaFeaturizer::new(FeaturizeConfig::default(), &device)
            .featurize(&set, &mut RngContext::seed(0))
            .unwrap()
    }

    fn echo_designer(l: usize) -> RnaDesigner {
        RnaDesigner::with_sampler(
            Box::new(EchoSampler {
                classes: vec![0; l],
            }),
            "stub",
            1,
            &Device::Cpu,
        )
    }

    #[test]
    fn test_record_assembly() {
        let graph = toy_graph(10);
        let designer = echo_designer(10);
        let opts = DesignOptions {
            n_samples: 2,
            temperature: 0.2,
            ..DesignOptions::default()
        };
        let result = designer.design_featurized(&graph, &opts).unwrap();

        assert_eq!(result.records.len(), 3);
        let input = &result.records[0];
        assert_eq!(input.id, "input_sequence,");
        assert_eq!(input.sequence, graph.sequence);
        assert!(input.description.contains("model=stub,"));
        assert!(input.description.contains("max_num_conformers=1,"));
        assert!(input.description.contains("seed=0"));

        let sample = &result.records[1];
        assert_eq!(sample.id, "sample=0,");
        assert_eq!(sample.sequence, "AAAAAAAAAA");
        // zero logits give exactly perplexity 4; all-A recovers the three
        // A positions of ACGUACGUAC; both folds are pairless so F1 is 1
        assert!(sample.description.contains("temperature=0.2,"));
        assert!(sample.description.contains("perplexity=4.0000,"));
        assert!(sample.description.contains("recovery=0.3000,"));
        assert!(sample.description.contains("sc_score=1.0000"));

        assert_eq!(result.samples.dims(), &[2, 10]);
        assert_eq!(result.perplexity.len(), 2);
        assert_eq!(result.recovery, vec![0.3, 0.3]);
        assert_eq!(result.sc_score, vec![1.0, 1.0]);
    }

    #[test]
    fn test_fasta_output() {
        let graph = toy_graph(8);
        let designer = echo_designer(8);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("designs.fasta");
        let opts = DesignOptions {
            n_samples: 3,
            output_path: Some(path.clone()),
            ..DesignOptions::default()
        };
        let result = designer.design_featurized(&graph, &opts).unwrap();

        let records = read_fasta(&path).unwrap();
        assert_eq!(records.len(), 4);
        for (written, roundtrip) in result.records.iter().zip(records.iter()) {
            assert_eq!(written.sequence, roundtrip.sequence);
            assert_eq!(written.id, roundtrip.id);
        }
    }

    #[test]
    fn test_clamp_in_with_sampler() {
        let designer = RnaDesigner::with_sampler(
            Box::new(EchoSampler { classes: vec![0; 4] }),
            "stub",
            4,
            &Device::Cpu,
        );
        assert_eq!(designer.max_num_conformers, 3);
        let designer = RnaDesigner::with_sampler(
            Box::new(EchoSampler { classes: vec![0; 4] }),
            "stub",
            7,
            &Device::Cpu,
        );
        assert_eq!(designer.max_num_conformers, 5);
    }
}
