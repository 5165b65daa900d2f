//! This crate provides the generic machinery for loading fairseq2 checkpoints into a
//! [ggml::Context]. Each architecture implements [ModelLoader]; [load] drives it.
//!
//! It is not intended for direct use; use the `fairseq2` crate instead.
#![deny(missing_docs)]

mod loader;
mod model;
mod saver;
mod tensor_table;

pub mod util;

pub use ggml;
pub use ggml::Type as ElementType;

pub use loader::{
    load, load_from_reader, load_progress_callback_stdout, LoadError, LoadProgress,
};
pub use memmap2::Mmap;
pub use model::{Hyperparameters, Model, ModelLoader, ModelParameters};
pub use saver::{save, SaveError};
pub use tensor_table::TensorTable;
