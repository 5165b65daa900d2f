//! An implementation of the [SeamlessM4T](https://github.com/facebookresearch/seamless_communication)
//! UnitY checkpoint layout for the `fairseq2` ecosystem.
//!
//! Only the text decoder is materialized; the speech encoder, the text encoder and the
//! text-to-unit model are described by the [Hyperparameters] but have no tensors.
#![deny(missing_docs)]

use fairseq2_base::{
    ggml::{self, format::tensor_size, Context, Tensor},
    util::to_usize,
    ElementType, LoadError, ModelLoader, TensorTable,
};

mod hyperparameters;

pub use hyperparameters::{Hyperparameters, NllbConfig, T2uConfig, W2v2EncoderConfig};

/// Every UnitY tensor is stored as `f32`.
pub const ELEMENT_TYPE: ElementType = ElementType::F32;

/// The UnitY speech and text translation model. Ref: [SeamlessM4T](https://ai.meta.com/research/publications/seamlessm4t-massively-multilingual-multimodal-machine-translation/)
///
/// Implements [ModelLoader]; pass it to [fairseq2_base::load] to load a checkpoint.
pub struct Unity;

impl ModelLoader for Unity {
    type Hyperparameters = Hyperparameters;
    type Arch = UnityArch;

    fn compute_context_size(hyperparameters: &Hyperparameters) -> usize {
        // Validation rejects hyperparameters whose size overflows, so this only saturates
        // for hyperparameters that were never validated.
        context_size(hyperparameters).unwrap_or(usize::MAX)
    }

    fn tensors_alloc(
        hyperparameters: &Hyperparameters,
        context: &Context,
        tensors: &mut TensorTable,
    ) -> Result<UnityArch, LoadError> {
        let nllb = &hyperparameters.nllb_config;
        let model_dim = to_usize("nllb_config.model_dim", nllb.model_dim)?;
        let vocab_size = to_usize("nllb_config.vocabulary_size", nllb.vocabulary_size)?;
        let num_heads = to_usize(
            "nllb_config.num_decoder_attn_heads",
            nllb.num_decoder_attn_heads,
        )?;
        let n_layers = to_usize("nllb_config.num_decoder_layers", nllb.num_decoder_layers)?;

        let mut alloc = Allocator { context, tensors };

        let frontend = alloc.embedding("text_decoder_frontend", model_dim, vocab_size)?;
        let layers = (0..n_layers)
            .map(|i| {
                let prefix = format!("text_decoder.layers.{i}");
                Ok(TransformerDecoderLayer {
                    self_attn: alloc.multihead_attention(
                        &format!("{prefix}.self_attn"),
                        model_dim,
                        num_heads,
                    )?,
                    self_attn_norm: alloc
                        .layer_norm(&format!("{prefix}.self_attn_norm"), model_dim)?,
                })
            })
            .collect::<Result<Vec<_>, LoadError>>()?;
        let layer_norm = alloc.affine_layer_norm("text_decoder.layer_norm", model_dim)?;

        tracing::trace!("Allocated text decoder with {} layers", layers.len());

        Ok(UnityArch {
            text_decoder: TransformerDecoder {
                frontend,
                layers,
                layer_norm,
            },
        })
    }
}

/// The exact number of context bytes the text decoder needs, or `None` if it overflows `usize`.
pub(crate) fn context_size(hyperparameters: &Hyperparameters) -> Option<usize> {
    let nllb = &hyperparameters.nllb_config;
    let model_dim = usize::try_from(nllb.model_dim).ok()?;
    let vocab_size = usize::try_from(nllb.vocabulary_size).ok()?;
    let num_heads = usize::try_from(nllb.num_decoder_attn_heads).ok()?;
    let n_layers = usize::try_from(nllb.num_decoder_layers).ok()?;
    let head_dim = model_dim.checked_div(num_heads)?;

    let sized = |n_elements: usize| -> Option<usize> {
        // Bounded so that the size computations below cannot overflow either.
        n_elements
            .checked_mul(ggml::type_size(ELEMENT_TYPE))
            .filter(|&n_bytes| n_bytes <= isize::MAX as usize)?;
        Some(tensor_size(ELEMENT_TYPE, n_elements))
    };

    let embed = sized(vocab_size.checked_mul(model_dim)?)?;
    let self_attn = sized(
        model_dim
            .checked_mul(head_dim)?
            .checked_mul(num_heads)?
            .checked_mul(4)?,
    )?;
    let norm = sized(model_dim.checked_mul(2)?)?;
    let final_norm = sized(model_dim)?.checked_mul(2)?;

    let per_layer = self_attn.checked_add(norm)?;
    per_layer
        .checked_mul(n_layers)?
        .checked_add(embed)?
        .checked_add(final_norm)
}

/// Allocates the tensors of each kind of structural unit.
struct Allocator<'a> {
    context: &'a Context,
    tensors: &'a mut TensorTable,
}
impl Allocator<'_> {
    fn embedding(
        &mut self,
        prefix: &str,
        model_dim: usize,
        vocab_size: usize,
    ) -> Result<Embedding, LoadError> {
        let weight = self.tensors.alloc(
            self.context,
            format!("{prefix}.embed.weight"),
            ELEMENT_TYPE,
            &[vocab_size, model_dim],
        )?;
        Ok(Embedding { weight })
    }

    fn multihead_attention(
        &mut self,
        name: &str,
        model_dim: usize,
        num_heads: usize,
    ) -> Result<MultiheadAttention, LoadError> {
        let head_dim = model_dim / num_heads;
        let weights = self.tensors.alloc(
            self.context,
            name,
            ELEMENT_TYPE,
            &[model_dim, head_dim, num_heads, 4],
        )?;
        Ok(MultiheadAttention {
            weights,
            num_heads,
            head_dim,
        })
    }

    fn layer_norm(&mut self, name: &str, model_dim: usize) -> Result<LayerNorm, LoadError> {
        let weights = self
            .tensors
            .alloc(self.context, name, ELEMENT_TYPE, &[model_dim, 2])?;
        Ok(LayerNorm { weights })
    }

    fn affine_layer_norm(
        &mut self,
        prefix: &str,
        model_dim: usize,
    ) -> Result<AffineLayerNorm, LoadError> {
        let weight = self.tensors.alloc(
            self.context,
            format!("{prefix}.weight"),
            ELEMENT_TYPE,
            &[model_dim],
        )?;
        let bias = self.tensors.alloc(
            self.context,
            format!("{prefix}.bias"),
            ELEMENT_TYPE,
            &[model_dim],
        )?;
        Ok(AffineLayerNorm { weight, bias })
    }
}

/// The tensors of a UnitY model.
#[derive(Debug)]
pub struct UnityArch {
    /// The NLLB text decoder.
    pub text_decoder: TransformerDecoder,
}

/// A token embedding table.
#[derive(Debug)]
pub struct Embedding {
    /// `[vocabulary_size, model_dim]`
    pub weight: Tensor,
}

/// Multi-head attention with fused projections.
#[derive(Debug)]
pub struct MultiheadAttention {
    /// `[model_dim, head_dim, num_heads, 4]`: the query, key, value and output projections.
    pub weights: Tensor,
    /// The number of attention heads.
    pub num_heads: usize,
    /// The dimensionality of each head.
    pub head_dim: usize,
}

/// Layer normalization.
#[derive(Debug)]
pub struct LayerNorm {
    /// `[model_dim, 2]`: the gain row followed by the bias row.
    pub weights: Tensor,
}

/// Layer normalization with its gain and bias stored as separate tensors.
#[derive(Debug)]
pub struct AffineLayerNorm {
    /// `[model_dim]`
    pub weight: Tensor,
    /// `[model_dim]`
    pub bias: Tensor,
}

/// A decoder layer: self attention and its normalization.
#[derive(Debug)]
pub struct TransformerDecoderLayer {
    /// Self attention over the decoded sequence.
    pub self_attn: MultiheadAttention,
    /// Normalization of the self attention input.
    pub self_attn_norm: LayerNorm,
}

/// A transformer decoder.
#[derive(Debug)]
pub struct TransformerDecoder {
    /// The token embedding.
    pub frontend: Embedding,
    /// The decoder layers, in order.
    pub layers: Vec<TransformerDecoderLayer>,
    /// The normalization applied to the output of the last layer.
    pub layer_norm: AffineLayerNorm,
}
