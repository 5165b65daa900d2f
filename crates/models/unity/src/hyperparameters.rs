use std::io::{BufRead, Write};

use fairseq2_base::{
    util::{self, ensure_non_negative, ensure_positive, ensure_probability},
    LoadError,
};

/// Configuration of the wav2vec 2.0 speech encoder.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct W2v2EncoderConfig {
    /// Dimensionality of the encoder.
    pub model_dim: i64,
    /// Maximum length of an input sequence.
    pub max_seq_len: i64,
    /// Dimensionality of the extracted features.
    pub feature_dim: i64,
    /// Whether the encoder consumes filter-bank features instead of raw waveforms.
    pub use_fbank: bool,
    /// Dropout applied to the features before the first encoder layer.
    pub first_pass_dropout_p: f32,
    /// Whether the extracted features are layer-normalized.
    pub layer_norm_features: bool,
    /// Whether the convolutions of the feature extractor have a bias.
    pub feature_extractor_bias: bool,
    /// Whether the convolutions of the feature extractor are layer-normalized.
    pub feature_extractor_layer_norm_convs: bool,
    /// Scale applied to the gradients of the feature extractor.
    pub feature_grad_scale: f32,
    /// Number of filter-bank channels.
    pub num_fbank_channels: i64,
    /// Stride of the filter-bank frames.
    pub fbank_stride: i64,
    /// Only every k-th filter-bank frame is used.
    pub sample_fbank_every_k: i64,
    /// Number of convolutional positional encoder layers.
    pub pos_encoder_depth: i64,
    /// Kernel size of the convolutional positional encoder.
    pub pos_conv_kernel_size: i64,
    /// Number of groups of the convolutional positional encoder.
    pub num_pos_conv_groups: i64,
    /// Whether the encoder layers are Conformer blocks.
    pub use_conformer: bool,
    /// Number of encoder layers.
    pub num_encoder_layers: i64,
    /// Number of attention heads in each encoder layer.
    pub num_encoder_attn_heads: i64,
    /// Inner dimensionality of the feed-forward networks.
    pub ffn_inner_dim: i64,
    /// Dropout probability.
    pub dropout_p: f32,
    /// Dropout probability on the attention weights.
    pub attn_dropout_p: f32,
    /// Probability of dropping a whole layer.
    pub layer_drop_p: f32,
    /// Where layer normalization is applied (0: post, 1: pre, 2: pre with NormFormer).
    pub norm_order: i32,
    /// Kernel size of the Conformer depthwise convolutions.
    pub depthwise_conv_kernel_size: i64,
}
impl W2v2EncoderConfig {
    fn read(reader: &mut dyn BufRead) -> Result<Self, LoadError> {
        Ok(Self {
            model_dim: util::read_i64(reader)?,
            max_seq_len: util::read_i64(reader)?,
            feature_dim: util::read_i64(reader)?,
            use_fbank: util::read_bool(reader)?,
            first_pass_dropout_p: util::read_f32(reader)?,
            layer_norm_features: util::read_bool(reader)?,
            feature_extractor_bias: util::read_bool(reader)?,
            feature_extractor_layer_norm_convs: util::read_bool(reader)?,
            feature_grad_scale: util::read_f32(reader)?,
            num_fbank_channels: util::read_i64(reader)?,
            fbank_stride: util::read_i64(reader)?,
            sample_fbank_every_k: util::read_i64(reader)?,
            pos_encoder_depth: util::read_i64(reader)?,
            pos_conv_kernel_size: util::read_i64(reader)?,
            num_pos_conv_groups: util::read_i64(reader)?,
            use_conformer: util::read_bool(reader)?,
            num_encoder_layers: util::read_i64(reader)?,
            num_encoder_attn_heads: util::read_i64(reader)?,
            ffn_inner_dim: util::read_i64(reader)?,
            dropout_p: util::read_f32(reader)?,
            attn_dropout_p: util::read_f32(reader)?,
            layer_drop_p: util::read_f32(reader)?,
            norm_order: util::read_i32(reader)?,
            depthwise_conv_kernel_size: util::read_i64(reader)?,
        })
    }

    fn write(&self, writer: &mut dyn Write) -> Result<(), std::io::Error> {
        util::write_i64(writer, self.model_dim)?;
        util::write_i64(writer, self.max_seq_len)?;
        util::write_i64(writer, self.feature_dim)?;
        util::write_bool(writer, self.use_fbank)?;
        util::write_f32(writer, self.first_pass_dropout_p)?;
        util::write_bool(writer, self.layer_norm_features)?;
        util::write_bool(writer, self.feature_extractor_bias)?;
        util::write_bool(writer, self.feature_extractor_layer_norm_convs)?;
        util::write_f32(writer, self.feature_grad_scale)?;
        util::write_i64(writer, self.num_fbank_channels)?;
        util::write_i64(writer, self.fbank_stride)?;
        util::write_i64(writer, self.sample_fbank_every_k)?;
        util::write_i64(writer, self.pos_encoder_depth)?;
        util::write_i64(writer, self.pos_conv_kernel_size)?;
        util::write_i64(writer, self.num_pos_conv_groups)?;
        util::write_bool(writer, self.use_conformer)?;
        util::write_i64(writer, self.num_encoder_layers)?;
        util::write_i64(writer, self.num_encoder_attn_heads)?;
        util::write_i64(writer, self.ffn_inner_dim)?;
        util::write_f32(writer, self.dropout_p)?;
        util::write_f32(writer, self.attn_dropout_p)?;
        util::write_f32(writer, self.layer_drop_p)?;
        util::write_i32(writer, self.norm_order)?;
        util::write_i64(writer, self.depthwise_conv_kernel_size)
    }

    fn validate(&self) -> Result<(), LoadError> {
        ensure_positive("w2v2_encoder_config.model_dim", self.model_dim)?;
        ensure_non_negative("w2v2_encoder_config.max_seq_len", self.max_seq_len)?;
        ensure_non_negative("w2v2_encoder_config.feature_dim", self.feature_dim)?;
        ensure_probability(
            "w2v2_encoder_config.first_pass_dropout_p",
            self.first_pass_dropout_p,
        )?;
        ensure_non_negative(
            "w2v2_encoder_config.num_fbank_channels",
            self.num_fbank_channels,
        )?;
        ensure_non_negative("w2v2_encoder_config.fbank_stride", self.fbank_stride)?;
        ensure_non_negative(
            "w2v2_encoder_config.sample_fbank_every_k",
            self.sample_fbank_every_k,
        )?;
        ensure_non_negative(
            "w2v2_encoder_config.pos_encoder_depth",
            self.pos_encoder_depth,
        )?;
        ensure_non_negative(
            "w2v2_encoder_config.pos_conv_kernel_size",
            self.pos_conv_kernel_size,
        )?;
        ensure_non_negative(
            "w2v2_encoder_config.num_pos_conv_groups",
            self.num_pos_conv_groups,
        )?;
        ensure_non_negative(
            "w2v2_encoder_config.num_encoder_layers",
            self.num_encoder_layers,
        )?;
        ensure_positive(
            "w2v2_encoder_config.num_encoder_attn_heads",
            self.num_encoder_attn_heads,
        )?;
        ensure_positive("w2v2_encoder_config.ffn_inner_dim", self.ffn_inner_dim)?;
        ensure_probability("w2v2_encoder_config.dropout_p", self.dropout_p)?;
        ensure_probability("w2v2_encoder_config.attn_dropout_p", self.attn_dropout_p)?;
        ensure_probability("w2v2_encoder_config.layer_drop_p", self.layer_drop_p)?;
        if !(0..=2).contains(&self.norm_order) {
            return Err(LoadError::InvalidHyperparameter {
                field: "w2v2_encoder_config.norm_order",
                reason: format!("{} is not a known normalization order", self.norm_order),
            });
        }
        ensure_non_negative(
            "w2v2_encoder_config.depthwise_conv_kernel_size",
            self.depthwise_conv_kernel_size,
        )
    }
}

/// Configuration of the NLLB text encoder and decoder.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NllbConfig {
    /// Dimensionality of the model.
    pub model_dim: i64,
    /// Maximum length of a token sequence.
    pub max_seq_len: i64,
    /// Size of the text vocabulary.
    pub vocabulary_size: i64,
    /// Index of the padding token.
    pub pad_idx: i64,
    /// Number of encoder layers.
    pub num_encoder_layers: i64,
    /// Number of decoder layers.
    pub num_decoder_layers: i64,
    /// Number of attention heads in each encoder layer.
    pub num_encoder_attn_heads: i64,
    /// Number of attention heads in each decoder layer.
    pub num_decoder_attn_heads: i64,
    /// Inner dimensionality of the feed-forward networks.
    pub ffn_inner_dim: i64,
    /// Dropout probability.
    pub dropout_p: f32,
}
impl NllbConfig {
    fn read(reader: &mut dyn BufRead) -> Result<Self, LoadError> {
        Ok(Self {
            model_dim: util::read_i64(reader)?,
            max_seq_len: util::read_i64(reader)?,
            vocabulary_size: util::read_i64(reader)?,
            pad_idx: util::read_i64(reader)?,
            num_encoder_layers: util::read_i64(reader)?,
            num_decoder_layers: util::read_i64(reader)?,
            num_encoder_attn_heads: util::read_i64(reader)?,
            num_decoder_attn_heads: util::read_i64(reader)?,
            ffn_inner_dim: util::read_i64(reader)?,
            dropout_p: util::read_f32(reader)?,
        })
    }

    fn write(&self, writer: &mut dyn Write) -> Result<(), std::io::Error> {
        util::write_i64(writer, self.model_dim)?;
        util::write_i64(writer, self.max_seq_len)?;
        util::write_i64(writer, self.vocabulary_size)?;
        util::write_i64(writer, self.pad_idx)?;
        util::write_i64(writer, self.num_encoder_layers)?;
        util::write_i64(writer, self.num_decoder_layers)?;
        util::write_i64(writer, self.num_encoder_attn_heads)?;
        util::write_i64(writer, self.num_decoder_attn_heads)?;
        util::write_i64(writer, self.ffn_inner_dim)?;
        util::write_f32(writer, self.dropout_p)
    }

    fn validate(&self) -> Result<(), LoadError> {
        ensure_positive("nllb_config.model_dim", self.model_dim)?;
        ensure_non_negative("nllb_config.max_seq_len", self.max_seq_len)?;
        ensure_positive("nllb_config.vocabulary_size", self.vocabulary_size)?;
        ensure_non_negative("nllb_config.num_encoder_layers", self.num_encoder_layers)?;
        ensure_non_negative("nllb_config.num_decoder_layers", self.num_decoder_layers)?;
        ensure_positive(
            "nllb_config.num_encoder_attn_heads",
            self.num_encoder_attn_heads,
        )?;
        ensure_positive(
            "nllb_config.num_decoder_attn_heads",
            self.num_decoder_attn_heads,
        )?;
        if self.model_dim % self.num_decoder_attn_heads != 0 {
            return Err(LoadError::InvalidHyperparameter {
                field: "nllb_config.num_decoder_attn_heads",
                reason: format!(
                    "{} does not divide nllb_config.model_dim ({})",
                    self.num_decoder_attn_heads, self.model_dim
                ),
            });
        }
        ensure_positive("nllb_config.ffn_inner_dim", self.ffn_inner_dim)?;
        ensure_probability("nllb_config.dropout_p", self.dropout_p)
    }
}

/// Configuration of the text-to-unit model.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct T2uConfig {
    /// Dimensionality of the model.
    pub model_dim: i64,
    /// Maximum length of a unit sequence.
    pub unit_max_seq_len: i64,
    /// Size of the unit vocabulary.
    pub unit_vocabulary_size: i64,
    /// Index of the padding unit.
    pub unit_pad_idx: i64,
    /// Number of encoder layers.
    pub num_encoder_layers: i64,
    /// Number of decoder layers.
    pub num_decoder_layers: i64,
    /// Number of attention heads in each encoder layer.
    pub num_encoder_attn_heads: i64,
    /// Number of attention heads in each decoder layer.
    pub num_decoder_attn_heads: i64,
    /// Inner dimensionality of the feed-forward networks.
    pub ffn_inner_dim: i64,
    /// Dropout probability.
    pub dropout_p: f32,
}
impl T2uConfig {
    fn read(reader: &mut dyn BufRead) -> Result<Self, LoadError> {
        Ok(Self {
            model_dim: util::read_i64(reader)?,
            unit_max_seq_len: util::read_i64(reader)?,
            unit_vocabulary_size: util::read_i64(reader)?,
            unit_pad_idx: util::read_i64(reader)?,
            num_encoder_layers: util::read_i64(reader)?,
            num_decoder_layers: util::read_i64(reader)?,
            num_encoder_attn_heads: util::read_i64(reader)?,
            num_decoder_attn_heads: util::read_i64(reader)?,
            ffn_inner_dim: util::read_i64(reader)?,
            dropout_p: util::read_f32(reader)?,
        })
    }

    fn write(&self, writer: &mut dyn Write) -> Result<(), std::io::Error> {
        util::write_i64(writer, self.model_dim)?;
        util::write_i64(writer, self.unit_max_seq_len)?;
        util::write_i64(writer, self.unit_vocabulary_size)?;
        util::write_i64(writer, self.unit_pad_idx)?;
        util::write_i64(writer, self.num_encoder_layers)?;
        util::write_i64(writer, self.num_decoder_layers)?;
        util::write_i64(writer, self.num_encoder_attn_heads)?;
        util::write_i64(writer, self.num_decoder_attn_heads)?;
        util::write_i64(writer, self.ffn_inner_dim)?;
        util::write_f32(writer, self.dropout_p)
    }

    fn validate(&self) -> Result<(), LoadError> {
        ensure_positive("t2u_config.model_dim", self.model_dim)?;
        ensure_non_negative("t2u_config.unit_max_seq_len", self.unit_max_seq_len)?;
        ensure_positive("t2u_config.unit_vocabulary_size", self.unit_vocabulary_size)?;
        ensure_non_negative("t2u_config.num_encoder_layers", self.num_encoder_layers)?;
        ensure_non_negative("t2u_config.num_decoder_layers", self.num_decoder_layers)?;
        ensure_positive(
            "t2u_config.num_encoder_attn_heads",
            self.num_encoder_attn_heads,
        )?;
        ensure_positive(
            "t2u_config.num_decoder_attn_heads",
            self.num_decoder_attn_heads,
        )?;
        ensure_positive("t2u_config.ffn_inner_dim", self.ffn_inner_dim)?;
        ensure_probability("t2u_config.dropout_p", self.dropout_p)
    }
}

/// The hyperparameters of a UnitY checkpoint.
///
/// Each sub-configuration is stored inline, without tags or separators.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Hyperparameters {
    /// Dimensionality of the model.
    pub model_dim: i64,
    /// The speech encoder.
    pub w2v2_encoder_config: W2v2EncoderConfig,
    /// The text encoder and decoder.
    pub nllb_config: NllbConfig,
    /// The text-to-unit model.
    pub t2u_config: T2uConfig,
    /// Whether the model has a text encoder.
    pub use_text_encoder: bool,
    /// Whether the length adaptor is made of Conformer blocks.
    pub use_conformer_adaptor: bool,
    /// Number of length adaptor layers.
    pub num_adaptor_layers: i64,
    /// Kernel size of the length adaptor.
    pub adaptor_kernel_size: i64,
    /// Stride of the length adaptor.
    pub adaptor_stride: i64,
    /// Whether the length adaptor is layer-normalized.
    pub adaptor_layer_norm: bool,
    /// Dropout probability of the length adaptor.
    pub adaptor_dropout_p: f32,
}
impl fairseq2_base::Hyperparameters for Hyperparameters {
    fn read_ggml(reader: &mut dyn BufRead) -> Result<Self, LoadError> {
        let hyperparameters = Hyperparameters {
            model_dim: util::read_i64(reader)?,
            w2v2_encoder_config: W2v2EncoderConfig::read(reader)?,
            nllb_config: NllbConfig::read(reader)?,
            t2u_config: T2uConfig::read(reader)?,
            use_text_encoder: util::read_bool(reader)?,
            use_conformer_adaptor: util::read_bool(reader)?,
            num_adaptor_layers: util::read_i64(reader)?,
            adaptor_kernel_size: util::read_i64(reader)?,
            adaptor_stride: util::read_i64(reader)?,
            adaptor_layer_norm: util::read_bool(reader)?,
            adaptor_dropout_p: util::read_f32(reader)?,
        };

        Ok(hyperparameters)
    }

    fn write_ggml(&self, writer: &mut dyn Write) -> Result<(), std::io::Error> {
        util::write_i64(writer, self.model_dim)?;
        self.w2v2_encoder_config.write(writer)?;
        self.nllb_config.write(writer)?;
        self.t2u_config.write(writer)?;
        util::write_bool(writer, self.use_text_encoder)?;
        util::write_bool(writer, self.use_conformer_adaptor)?;
        util::write_i64(writer, self.num_adaptor_layers)?;
        util::write_i64(writer, self.adaptor_kernel_size)?;
        util::write_i64(writer, self.adaptor_stride)?;
        util::write_bool(writer, self.adaptor_layer_norm)?;
        util::write_f32(writer, self.adaptor_dropout_p)
    }

    fn validate(&self) -> Result<(), LoadError> {
        ensure_positive("model_dim", self.model_dim)?;
        self.w2v2_encoder_config.validate()?;
        self.nllb_config.validate()?;
        self.t2u_config.validate()?;
        ensure_non_negative("num_adaptor_layers", self.num_adaptor_layers)?;
        ensure_non_negative("adaptor_kernel_size", self.adaptor_kernel_size)?;
        ensure_non_negative("adaptor_stride", self.adaptor_stride)?;
        ensure_probability("adaptor_dropout_p", self.adaptor_dropout_p)?;

        if crate::context_size(self).is_none() {
            return Err(LoadError::InvalidHyperparameter {
                field: "nllb_config",
                reason: "the text decoder does not fit in memory".to_owned(),
            });
        }
        Ok(())
    }
}
