//! Writing checkpoints that [load](crate::load) can read back.

use std::io::Write;

use ggml::format::saver::{
    save as save_checkpoint, SaveError as FormatSaveError, SaveHandler, TensorSaveInfo,
};
use thiserror::Error;

use crate::{Hyperparameters, TensorTable};

#[derive(Error, Debug)]
/// Errors encountered while writing a checkpoint.
pub enum SaveError {
    #[error("non-specific I/O error")]
    /// A non-specific IO error.
    Io(#[from] std::io::Error),
    #[error("invalid integer conversion")]
    /// One of the integers encountered could not be converted to a more appropriate type.
    InvalidIntegerConversion(#[from] std::num::TryFromIntError),
    #[error("unknown tensor `{tensor_name}`")]
    /// A tensor that is not part of the table was requested.
    UnknownTensorName {
        /// The name of the tensor.
        tensor_name: String,
    },
    #[error("invariant broken: {invariant}")]
    /// An invariant was broken.
    InvariantBroken {
        /// The invariant that was broken.
        invariant: String,
    },
}
impl From<FormatSaveError<SaveError>> for SaveError {
    fn from(value: FormatSaveError<SaveError>) -> Self {
        match value {
            FormatSaveError::Io(io) => SaveError::Io(io),
            FormatSaveError::InvalidIntegerConversion(e) => SaveError::InvalidIntegerConversion(e),
            FormatSaveError::ImplementationError(e) => e,
            FormatSaveError::InvariantBroken(invariant) => SaveError::InvariantBroken { invariant },
        }
    }
}

/// Writes `hyperparameters` and every tensor of `tensors`, in allocation order, as a checkpoint.
pub fn save<H: Hyperparameters>(
    writer: &mut dyn Write,
    hyperparameters: &H,
    tensors: &TensorTable,
) -> Result<(), SaveError> {
    let names = tensors.names().map(str::to_owned).collect::<Vec<_>>();
    let mut saver = CheckpointSaver {
        hyperparameters,
        tensors,
    };
    save_checkpoint(writer, &mut saver, &names)?;
    tracing::trace!("Saved {} tensors", names.len());
    Ok(())
}

struct CheckpointSaver<'a, H: Hyperparameters> {
    hyperparameters: &'a H,
    tensors: &'a TensorTable,
}
impl<H: Hyperparameters> SaveHandler<SaveError> for CheckpointSaver<'_, H> {
    fn write_hyperparameters(&mut self, writer: &mut dyn Write) -> Result<(), SaveError> {
        Ok(self.hyperparameters.write_ggml(writer)?)
    }

    fn tensor_data(&mut self, tensor_name: &str) -> Result<TensorSaveInfo, SaveError> {
        let tensor = self
            .tensors
            .get(tensor_name)
            .ok_or_else(|| SaveError::UnknownTensorName {
                tensor_name: tensor_name.to_owned(),
            })?;

        Ok(TensorSaveInfo {
            n_dims: tensor.n_dims(),
            dims: tensor.get_ne(),
            element_type: tensor.get_type(),
            data: tensor.to_vec(),
        })
    }
}
