//! The saver module implements a way to save a checkpoint.
//!
//! To implement a saver for your model, implement [SaveHandler] for your model
//! and provide data as appropriate, then call [save] with an instance of
//! your handler.

use std::{error::Error, io::Write};

use super::{data_size, write_container_header};
use crate::{util, ElementType, MAX_DIMS};

#[derive(Debug, thiserror::Error)]
/// Errors that can occur while writing a checkpoint.
pub enum SaveError<E: Error> {
    #[error("non-specific I/O error")]
    /// A non-specific IO error.
    Io(#[from] std::io::Error),
    #[error("invalid integer conversion")]
    /// One of the integers encountered could not be converted to a more appropriate type.
    InvalidIntegerConversion(#[from] std::num::TryFromIntError),
    #[error("implementation error")]
    /// An error `E` was returned by the implementation of the saver.
    ImplementationError(#[source] E),
    #[error("invariant broken: {0}")]
    /// An invariant was broken.
    InvariantBroken(String),
}

/// A handler for saving a checkpoint.
pub trait SaveHandler<E: Error> {
    /// Called when the hyperparameters must be written.
    fn write_hyperparameters(&mut self, writer: &mut dyn Write) -> Result<(), E>;

    /// Called when information for a tensor is to be written.
    fn tensor_data(&mut self, tensor_name: &str) -> Result<TensorSaveInfo, E>;
}

/// Information about a [tensor](https://en.wikipedia.org/wiki/Tensor_(machine_learning)) that is to be saved.
#[derive(Clone, PartialEq, Debug)]
pub struct TensorSaveInfo {
    /// The number of dimensions in the tensor.
    pub n_dims: usize,
    /// The dimensions of the tensor. Only the first `n_dims` are written.
    pub dims: [usize; MAX_DIMS],
    /// The type of the elements in the tensor.
    pub element_type: ElementType,
    /// The data to save to disk.
    pub data: Vec<u8>,
}

/// Saves a checkpoint to the given writer, writing the tensors in the order of `tensor_names`.
pub fn save<E: Error>(
    writer: &mut dyn Write,
    handler: &mut dyn SaveHandler<E>,
    tensor_names: &[String],
) -> Result<(), SaveError<E>> {
    // Write header and hyperparameters
    write_container_header(writer)?;
    handler
        .write_hyperparameters(writer)
        .map_err(SaveError::ImplementationError)?;

    // Write tensors
    for name in tensor_names {
        let TensorSaveInfo {
            n_dims,
            dims,
            element_type,
            data,
        } = handler
            .tensor_data(name)
            .map_err(SaveError::ImplementationError)?;

        if n_dims == 0 || n_dims > MAX_DIMS {
            return Err(SaveError::InvariantBroken(format!(
                "tensor {name} has {n_dims} dimensions, expected 1..={MAX_DIMS}"
            )));
        }
        let block_size = crate::blck_size(element_type);
        if dims[0] % block_size != 0 {
            return Err(SaveError::InvariantBroken(format!(
                "{dims:?}[0] % {block_size} == 0"
            )));
        }
        let expected = data_size(element_type, dims[..n_dims].iter().product());
        if data.len() != expected {
            return Err(SaveError::InvariantBroken(format!(
                "tensor {name} has {} bytes of data, expected {expected}",
                data.len()
            )));
        }

        // Write tensor header
        util::write_string(writer, name)?;
        util::write_u32(writer, n_dims.try_into()?)?;
        for &dim in &dims[0..n_dims] {
            util::write_i64(writer, dim.try_into()?)?;
        }
        util::write_u32(writer, element_type.into())?;

        // Write tensor data
        writer.write_all(&data)?;
    }

    Ok(())
}
