//! Autoregressive message-passing network for sequence design, plus the
//! sampler contract the design orchestrator programs against.
//!
//! The network embeds conformer-pooled node and edge features, runs a stack
//! of neighborhood message-passing encoder layers, then decodes nucleotide
//! classes 5'→3', each position conditioning on the structural encoding and
//! the embeddings of already-decoded neighbors.

use crate::featurize::FeaturizedGraph;
use crate::geometry::neighbor_context;
use crate::rng::RngContext;
use candle_core::{DType, Device, IndexOp, Module, Result, Tensor, D};
use candle_nn::{embedding, layer_norm, linear, Dropout, Embedding, LayerNorm, Linear, VarBuilder};
use candle_transformers::generation::LogitsProcessor;
use ribodesign_core::DesignError;
use serde::{Deserialize, Serialize};

const LN_EPS: f64 = 1e-5;

/// Model hyperparameters; stored as the JSON sidecar of every checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GnnConfig {
    pub name: String,
    /// (scalar, vector) feature widths per node and conformer channel.
    pub node_in_dim: (usize, usize),
    /// (scalar, vector) feature widths per edge and conformer channel.
    pub edge_in_dim: (usize, usize),
    pub hidden_dim: usize,
    pub edge_hidden_dim: usize,
    pub num_layers: usize,
    /// Kept for checkpoint compatibility; inference never drops.
    pub drop_rate: f32,
    pub out_dim: usize,
    /// Conformer-channel width this checkpoint was trained with.
    pub max_num_conformers: usize,
    /// Divisor applied to summed neighborhood messages.
    pub scale_factor: f64,
}

impl GnnConfig {
    /// The shipped autoregressive architecture at a given channel width.
    pub fn ar_v1(max_num_conformers: usize) -> Self {
        Self {
            name: format!("ribodesign_ar_v1_{max_num_conformers}state"),
            node_in_dim: (15, 4),
            edge_in_dim: (131, 3),
            hidden_dim: 128,
            edge_hidden_dim: 64,
            num_layers: 4,
            drop_rate: 0.5,
            out_dim: 4,
            max_num_conformers,
            scale_factor: 30.0,
        }
    }

    /// Node embedding input width after flattening vector features.
    pub fn node_in_flat(&self) -> usize {
        self.node_in_dim.0 + 3 * self.node_in_dim.1
    }

    /// Edge embedding input width after flattening vector features.
    pub fn edge_in_flat(&self) -> usize {
        self.edge_in_dim.0 + 3 * self.edge_in_dim.1
    }
}

/// Sampled sequences plus the raw (pre-temperature) logits realized along
/// each sample's decoding path.
#[derive(Debug, Clone)]
pub struct SampleOutput {
    /// `(n_samples, L)` class indices, u32 in `0..out_dim`.
    pub samples: Tensor,
    /// `(n_samples, L, out_dim)` logits.
    pub logits: Tensor,
}

/// The opaque sampling contract: featurized structure in, candidate
/// sequences out. Implementations must be deterministic for a fixed
/// [`RngContext`] seed.
pub trait SequenceSampler: Send + Sync {
    fn sample(
        &self,
        graph: &FeaturizedGraph,
        n_samples: usize,
        temperature: f64,
        rng: &RngContext,
    ) -> ribodesign_core::Result<SampleOutput>;
}

#[derive(Clone, Debug)]
struct PositionWiseFeedForward {
    w_in: Linear,
    w_out: Linear,
}

impl PositionWiseFeedForward {
    fn load(vb: VarBuilder, dim_input: usize, dim_feedforward: usize) -> Result<Self> {
        let w_in = linear(dim_input, dim_feedforward, vb.pp("W_in"))?;
        let w_out = linear(dim_feedforward, dim_input, vb.pp("W_out"))?;
        Ok(Self { w_in, w_out })
    }
}

impl Module for PositionWiseFeedForward {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.w_out.forward(&self.w_in.forward(x)?.gelu()?)
    }
}

/// Encoder layer: masked neighborhood message passing over node states,
/// a position-wise feed-forward, and an edge-state update.
#[derive(Clone, Debug)]
struct EncLayer {
    scale: f64,
    dropout1: Dropout,
    dropout2: Dropout,
    dropout3: Dropout,
    norm1: LayerNorm,
    norm2: LayerNorm,
    norm3: LayerNorm,
    w1: Linear,
    w2: Linear,
    w3: Linear,
    w11: Linear,
    w12: Linear,
    w13: Linear,
    dense: PositionWiseFeedForward,
}

impl EncLayer {
    fn load(vb: VarBuilder, config: &GnnConfig, layer: usize) -> Result<Self> {
        let vb = vb.pp(layer);
        let hidden = config.hidden_dim;
        let edge = config.edge_hidden_dim;
        // center node state + edge state + neighbor node state
        let msg_in = 2 * hidden + edge;

        let norm1 = layer_norm(hidden, LN_EPS, vb.pp("norm1"))?;
        let norm2 = layer_norm(hidden, LN_EPS, vb.pp("norm2"))?;
        let norm3 = layer_norm(edge, LN_EPS, vb.pp("norm3"))?;

        let w1 = linear(msg_in, hidden, vb.pp("W1"))?;
        let w2 = linear(hidden, hidden, vb.pp("W2"))?;
        let w3 = linear(hidden, hidden, vb.pp("W3"))?;
        let w11 = linear(msg_in, edge, vb.pp("W11"))?;
        let w12 = linear(edge, edge, vb.pp("W12"))?;
        let w13 = linear(edge, edge, vb.pp("W13"))?;

        let dropout1 = Dropout::new(config.drop_rate);
        let dropout2 = Dropout::new(config.drop_rate);
        let dropout3 = Dropout::new(config.drop_rate);
        let dense = PositionWiseFeedForward::load(vb.pp("dense"), hidden, hidden * 4)?;

        Ok(Self {
            scale: config.scale_factor,
            dropout1,
            dropout2,
            dropout3,
            norm1,
            norm2,
            norm3,
            w1,
            w2,
            w3,
            w11,
            w12,
            w13,
            dense,
        })
    }

    fn forward(
        &self,
        h_v: &Tensor,
        h_e: &Tensor,
        neighbor_idx: &Tensor,
        node_mask: &Tensor,
        edge_mask: &Tensor,
        training: bool,
    ) -> Result<(Tensor, Tensor)> {
        let h_nbr = neighbor_context(h_v, h_e, neighbor_idx)?;
        let (l, k, _) = h_nbr.dims3()?;
        let hidden = h_v.dim(D::Minus1)?;
        let h_v_expand = h_v.unsqueeze(1)?.expand((l, k, hidden))?;
        let h_ev = Tensor::cat(&[&h_v_expand, &h_nbr], D::Minus1)?;

        let h_message = self
            .w1
            .forward(&h_ev)?
            .gelu()?
            .apply(&self.w2)?
            .gelu()?
            .apply(&self.w3)?;
        let h_message = edge_mask.unsqueeze(D::Minus1)?.broadcast_mul(&h_message)?;
        let dh = (h_message.sum(1)? / self.scale)?;
        let h_v = self
            .norm1
            .forward(&(h_v + self.dropout1.forward(&dh, training)?)?)?;

        let dh = self.dense.forward(&h_v)?;
        let h_v = self
            .norm2
            .forward(&(&h_v + self.dropout2.forward(&dh, training)?)?)?;
        let h_v = node_mask.unsqueeze(D::Minus1)?.broadcast_mul(&h_v)?;

        let h_nbr = neighbor_context(&h_v, h_e, neighbor_idx)?;
        let h_v_expand = h_v.unsqueeze(1)?.expand((l, k, hidden))?;
        let h_ev = Tensor::cat(&[&h_v_expand, &h_nbr], D::Minus1)?;
        let h_message = self
            .w11
            .forward(&h_ev)?
            .gelu()?
            .apply(&self.w12)?
            .gelu()?
            .apply(&self.w13)?;
        let h_e = self
            .norm3
            .forward(&(h_e + self.dropout3.forward(&h_message, training)?)?)?;

        Ok((h_v, h_e))
    }
}

/// Decoder layer: one step of masked message passing over a precomputed
/// neighborhood context, followed by the feed-forward update.
#[derive(Clone, Debug)]
struct DecLayer {
    scale: f64,
    dropout1: Dropout,
    dropout2: Dropout,
    norm1: LayerNorm,
    norm2: LayerNorm,
    w1: Linear,
    w2: Linear,
    w3: Linear,
    dense: PositionWiseFeedForward,
}

impl DecLayer {
    fn load(vb: VarBuilder, config: &GnnConfig, layer: usize) -> Result<Self> {
        let vb = vb.pp(layer);
        let hidden = config.hidden_dim;
        // context per neighbor: edge state + decoded embedding + node state
        let ctx = config.edge_hidden_dim + 2 * hidden;

        let norm1 = layer_norm(hidden, LN_EPS, vb.pp("norm1"))?;
        let norm2 = layer_norm(hidden, LN_EPS, vb.pp("norm2"))?;
        let w1 = linear(hidden + ctx, hidden, vb.pp("W1"))?;
        let w2 = linear(hidden, hidden, vb.pp("W2"))?;
        let w3 = linear(hidden, hidden, vb.pp("W3"))?;
        let dropout1 = Dropout::new(config.drop_rate);
        let dropout2 = Dropout::new(config.drop_rate);
        let dense = PositionWiseFeedForward::load(vb.pp("dense"), hidden, hidden * 4)?;

        Ok(Self {
            scale: config.scale_factor,
            dropout1,
            dropout2,
            norm1,
            norm2,
            w1,
            w2,
            w3,
            dense,
        })
    }

    /// `h_v` is `(n, H)`, `h_ctx` is `(n, K, ctx)`; masks broadcast over
    /// leading dimensions.
    fn forward(
        &self,
        h_v: &Tensor,
        h_ctx: &Tensor,
        node_mask: Option<&Tensor>,
        edge_mask: Option<&Tensor>,
        training: bool,
    ) -> Result<Tensor> {
        let (n, k, _) = h_ctx.dims3()?;
        let hidden = h_v.dim(D::Minus1)?;
        let h_v_expand = h_v.unsqueeze(1)?.expand((n, k, hidden))?;
        let h_ev = Tensor::cat(&[&h_v_expand, h_ctx], D::Minus1)?;

        let h_message = self
            .w1
            .forward(&h_ev)?
            .gelu()?
            .apply(&self.w2)?
            .gelu()?
            .apply(&self.w3)?;
        let h_message = match edge_mask {
            Some(mask) => mask.unsqueeze(D::Minus1)?.broadcast_mul(&h_message)?,
            None => h_message,
        };
        let dh = (h_message.sum(1)? / self.scale)?;
        let h_v = self
            .norm1
            .forward(&(h_v + self.dropout1.forward(&dh, training)?)?)?;

        let dh = self.dense.forward(&h_v)?;
        let h_v = self
            .norm2
            .forward(&(&h_v + self.dropout2.forward(&dh, training)?)?)?;
        match node_mask {
            Some(mask) => mask.unsqueeze(D::Minus1)?.broadcast_mul(&h_v),
            None => Ok(h_v),
        }
    }
}

/// The shipped autoregressive GNN.
pub struct RiboMpnn {
    config: GnnConfig,
    w_v: Linear,
    w_e: Linear,
    norm_nodes: LayerNorm,
    norm_edges: LayerNorm,
    w_s: Embedding,
    encoder_layers: Vec<EncLayer>,
    decoder_layers: Vec<DecLayer>,
    w_out: Linear,
    device: Device,
}

impl RiboMpnn {
    pub fn load(vb: VarBuilder, config: &GnnConfig) -> Result<Self> {
        let w_v = linear(config.node_in_flat(), config.hidden_dim, vb.pp("W_v"))?;
        let w_e = linear(config.edge_in_flat(), config.edge_hidden_dim, vb.pp("W_e"))?;
        let norm_nodes = layer_norm(config.hidden_dim, LN_EPS, vb.pp("norm_nodes"))?;
        let norm_edges = layer_norm(config.edge_hidden_dim, LN_EPS, vb.pp("norm_edges"))?;
        let w_s = embedding(config.out_dim, config.hidden_dim, vb.pp("W_s"))?;

        let mut encoder_layers = Vec::with_capacity(config.num_layers);
        let mut decoder_layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            encoder_layers.push(EncLayer::load(vb.pp("encoder_layers"), config, i)?);
            decoder_layers.push(DecLayer::load(vb.pp("decoder_layers"), config, i)?);
        }
        let w_out = linear(config.hidden_dim, config.out_dim, vb.pp("W_out"))?;

        Ok(Self {
            config: config.clone(),
            w_v,
            w_e,
            norm_nodes,
            norm_edges,
            w_s,
            encoder_layers,
            decoder_layers,
            w_out,
            device: vb.device().clone(),
        })
    }

    pub fn config(&self) -> &GnnConfig {
        &self.config
    }

    /// Pool conformer channels, embed, and run the encoder stack.
    /// Returns node states `(L, H)` and edge states `(L, K, E)`.
    fn encode(&self, graph: &FeaturizedGraph) -> Result<(Tensor, Tensor)> {
        let l = graph.len();
        let k = graph.num_neighbors();

        let node_s = graph.node_s.mean(1)?;
        let node_v = graph.node_v.mean(1)?.reshape((l, 3 * self.config.node_in_dim.1))?;
        let h_v = self
            .norm_nodes
            .forward(&self.w_v.forward(&Tensor::cat(&[&node_s, &node_v], D::Minus1)?)?)?;

        let edge_s = graph.edge_s.mean(2)?;
        let edge_v = graph
            .edge_v
            .mean(2)?
            .reshape((l, k, 3 * self.config.edge_in_dim.1))?;
        let h_e = self
            .norm_edges
            .forward(&self.w_e.forward(&Tensor::cat(&[&edge_s, &edge_v], D::Minus1)?)?)?;

        let mut h_v = h_v;
        let mut h_e = h_e;
        for layer in &self.encoder_layers {
            (h_v, h_e) = layer.forward(
                &h_v,
                &h_e,
                &graph.neighbor_idx,
                &graph.node_mask,
                &graph.edge_mask,
                false,
            )?;
        }
        Ok((h_v, h_e))
    }
}

/// Stack per-position `(n, H)` states into `(n, K, H)` for one neighbor row.
fn stack_columns(columns: &[Tensor], idx_row: &[u32]) -> Result<Tensor> {
    let picked: Vec<&Tensor> = idx_row.iter().map(|&j| &columns[j as usize]).collect();
    Tensor::stack(&picked, 1)
}

impl SequenceSampler for RiboMpnn {
    /// Decode `n_samples` sequences in parallel, 5'→3'. Neighbors already
    /// decoded contribute their sampled embedding and decoder state; the
    /// rest contribute their encoder state with a zeroed embedding.
    fn sample(
        &self,
        graph: &FeaturizedGraph,
        n_samples: usize,
        temperature: f64,
        rng: &RngContext,
    ) -> ribodesign_core::Result<SampleOutput> {
        if n_samples == 0 {
            return Err(DesignError::InvalidInput(
                "n_samples must be positive".to_string(),
            ));
        }
        let l = graph.len();
        let hidden = self.config.hidden_dim;
        let num_layers = self.decoder_layers.len();

        let (h_enc_nodes, h_enc_edges) = self.encode(graph)?;
        let idx_rows = graph.neighbor_idx.to_vec2::<u32>()?;
        let edge_mask_rows = graph.edge_mask.to_vec2::<f32>()?;
        let node_mask_vals = graph.node_mask.to_vec1::<f32>()?;

        // decoder state per layer and position, (n, H) each; layer 0 reads
        // the encoder states
        let zero_cell = Tensor::zeros((n_samples, hidden), DType::F32, &self.device)?;
        let mut stacks: Vec<Vec<Tensor>> = Vec::with_capacity(num_layers + 1);
        let mut enc_cells = Vec::with_capacity(l);
        for i in 0..l {
            enc_cells.push(h_enc_nodes.i(i)?.unsqueeze(0)?.broadcast_as((n_samples, hidden))?);
        }
        stacks.push(enc_cells);
        for _ in 0..num_layers {
            stacks.push(vec![zero_cell.clone(); l]);
        }
        // sampled-class embeddings per position, zero until decoded
        let mut s_cells = vec![zero_cell.clone(); l];

        let mut processor = LogitsProcessor::new(rng.sampler_seed(), Some(temperature), None);
        let mut sample_cols: Vec<Vec<u32>> = Vec::with_capacity(l);
        let mut logit_cols: Vec<Tensor> = Vec::with_capacity(l);

        for t in 0..l {
            let idx_row = &idx_rows[t];
            let k = idx_row.len();
            let dec: Vec<f32> = idx_row
                .iter()
                .zip(edge_mask_rows[t].iter())
                .map(|(&j, &m)| if (j as usize) < t { m } else { 0.0 })
                .collect();
            let enc: Vec<f32> = idx_row
                .iter()
                .zip(edge_mask_rows[t].iter())
                .map(|(&j, &m)| if (j as usize) < t { 0.0 } else { m })
                .collect();
            let dec_mask = Tensor::from_vec(dec, (1, k, 1), &self.device)?;
            let enc_mask = Tensor::from_vec(enc, (1, k, 1), &self.device)?;
            let edge_mask = Tensor::from_vec(edge_mask_rows[t].clone(), (1, k), &self.device)?;
            let node_mask = Tensor::from_vec(vec![node_mask_vals[t]], 1, &self.device)?;

            let e_part = h_enc_edges
                .i(t)?
                .unsqueeze(0)?
                .broadcast_mul(&edge_mask.unsqueeze(D::Minus1)?)?
                .broadcast_as((n_samples, k, self.config.edge_hidden_dim))?;
            let s_part = stack_columns(&s_cells, idx_row)?.broadcast_mul(&dec_mask)?;
            let h_enc_part = stack_columns(&stacks[0], idx_row)?.broadcast_mul(&enc_mask)?;

            for layer_idx in 0..num_layers {
                let h_dec_part =
                    stack_columns(&stacks[layer_idx], idx_row)?.broadcast_mul(&dec_mask)?;
                let h_part = (&h_dec_part + &h_enc_part)?;
                let ctx = Tensor::cat(&[&e_part, &s_part, &h_part], D::Minus1)?;
                let new_h = self.decoder_layers[layer_idx].forward(
                    &stacks[layer_idx][t],
                    &ctx,
                    Some(&node_mask),
                    Some(&edge_mask),
                    false,
                )?;
                stacks[layer_idx + 1][t] = new_h;
            }

            let logits = self.w_out.forward(&stacks[num_layers][t])?;
            let mut classes = Vec::with_capacity(n_samples);
            for s in 0..n_samples {
                classes.push(processor.sample(&logits.i(s)?)?);
            }
            let s_t = Tensor::from_vec(classes.clone(), n_samples, &self.device)?;
            s_cells[t] = self.w_s.forward(&s_t)?;
            sample_cols.push(classes);
            logit_cols.push(logits);
        }

        let mut flat = Vec::with_capacity(n_samples * l);
        for s in 0..n_samples {
            for col in &sample_cols {
                flat.push(col[s]);
            }
        }
        Ok(SampleOutput {
            samples: Tensor::from_vec(flat, (n_samples, l), &self.device)?,
            logits: Tensor::stack(&logit_cols, 1)?,
        })
    }
}
