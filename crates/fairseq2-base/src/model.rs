//! The traits an architecture implements, and the model they produce.

use std::{
    fmt::Debug,
    io::{BufRead, Write},
};

use ggml::Context;

use crate::{LoadError, TensorTable};

/// The hyperparameters of an architecture, as stored at the front of a checkpoint.
pub trait Hyperparameters: Sized + Clone + Debug + PartialEq {
    /// Read the parameters in GGML format from a reader.
    ///
    /// NOTE: Field order matters! Data is laid out in the file exactly in this order.
    /// A table is only returned once every field has been read.
    fn read_ggml(reader: &mut dyn BufRead) -> Result<Self, LoadError>;

    /// Write the parameters in GGML format to a writer, in the same order they are read.
    fn write_ggml(&self, writer: &mut dyn Write) -> Result<(), std::io::Error>;

    /// Check that the parameters describe an architecture that can be allocated.
    fn validate(&self) -> Result<(), LoadError>;
}

/// Interfaces with a specific architecture of model: how its hyperparameters are
/// read, how much memory it needs, and which tensors it is made of.
///
/// The generic [load](crate::load) driver invokes these in order; an implementation
/// never drives the loading itself.
pub trait ModelLoader {
    /// Hyperparameters for the model.
    type Hyperparameters: Hyperparameters;
    /// Typed handles into the [TensorTable] for the model's structural units.
    type Arch;

    /// Reads the hyperparameters that follow the container header.
    fn load_hparams(reader: &mut dyn BufRead) -> Result<Self::Hyperparameters, LoadError> {
        Self::Hyperparameters::read_ggml(reader)
    }

    /// The number of bytes the [Context] must have to hold every tensor
    /// [ModelLoader::tensors_alloc] allocates.
    fn compute_context_size(hyperparameters: &Self::Hyperparameters) -> usize;

    /// Allocates every tensor of the model in `context`, registering each in `tensors`.
    fn tensors_alloc(
        hyperparameters: &Self::Hyperparameters,
        context: &Context,
        tensors: &mut TensorTable,
    ) -> Result<Self::Arch, LoadError>;
}

/// A fully loaded model.
///
/// Owns the memory of its tensors; dropping the model releases it.
pub struct Model<L: ModelLoader> {
    pub(crate) hyperparameters: L::Hyperparameters,
    pub(crate) arch: L::Arch,
    pub(crate) tensors: TensorTable,
    // Must be kept alive for the model
    pub(crate) context: Context,
}
impl<L: ModelLoader> Model<L> {
    /// The hyperparameters the model was loaded with.
    pub fn hyperparameters(&self) -> &L::Hyperparameters {
        &self.hyperparameters
    }

    /// The model's structural units.
    pub fn arch(&self) -> &L::Arch {
        &self.arch
    }

    /// Every tensor of the model, by name.
    pub fn tensors(&self) -> &TensorTable {
        &self.tensors
    }

    /// The context holding the model's tensors.
    pub fn context(&self) -> &Context {
        &self.context
    }
}
impl<L: ModelLoader> Debug for Model<L>
where
    L::Arch: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("hyperparameters", &self.hyperparameters)
            .field("arch", &self.arch)
            .field("context", &self.context)
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
/// Parameters for tuning model loading.
pub struct ModelParameters {
    /// Whether to read the checkpoint through a [mmap](https://en.wikipedia.org/wiki/Mmap)
    /// of the file. The tensors are still copied into the [Context]; setting this to `false`
    /// reads the file through a buffered reader instead, which may be preferred for files on
    /// network filesystems.
    pub prefer_mmap: bool,
}
impl Default for ModelParameters {
    fn default() -> Self {
        Self { prefer_mmap: true }
    }
}
