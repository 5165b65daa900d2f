//! The loader module contains the code for loading a checkpoint from a stream.
//!
//! To handle a specific model, implement [LoadHandler] for your model
//! and call [load] with an instance of your handler. It is up to you
//! to process the data from the handler and construct your model.
//!
//! Callers that need to act between the hyperparameters and the tensor records
//! (e.g. to size a [Context](crate::Context)) can drive the steps themselves with
//! [read_container_header](super::read_container_header) and [load_weights].

use std::{
    error::Error,
    io::{BufRead, Read},
};

use super::{data_size, read_container_header, LoadError};
use crate::{
    util::{has_data_left, read_bytes_with_len, read_i64, read_u32},
    ElementType, MAX_DIMS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Information about a [tensor](https://en.wikipedia.org/wiki/Tensor_(machine_learning)) that is being read.
pub struct TensorLoadInfo {
    /// The name of the tensor.
    pub name: String,
    /// The number of dimensions in the tensor.
    pub n_dims: usize,
    /// The dimensions of the tensor. Unused dimensions are 1.
    pub dims: [usize; MAX_DIMS],
    /// The number of elements in the tensor.
    pub n_elements: usize,
    /// The type of the elements in the tensor.
    pub element_type: ElementType,
}
impl TensorLoadInfo {
    /// Get the dimensions of the tensor.
    pub fn dims(&self) -> &[usize] {
        &self.dims[0..self.n_dims]
    }

    /// Calculate the size of the tensor's values in bytes.
    pub fn calc_size(&self) -> usize {
        data_size(self.element_type, self.n_elements)
    }
}

/// A handler for the tensor records of a checkpoint.
pub trait TensorHandler<E: Error> {
    /// Called for every tensor record. `reader` yields exactly the
    /// [TensorLoadInfo::calc_size] bytes of the payload, all of which must be consumed.
    fn tensor_buffer(&mut self, info: TensorLoadInfo, reader: &mut dyn BufRead) -> Result<(), E>;
}

/// A handler for loading a whole checkpoint.
pub trait LoadHandler<E: Error>: TensorHandler<E> {
    /// Called when the model's hyperparameters need to be read.
    fn read_hyperparameters(&mut self, reader: &mut dyn BufRead) -> Result<(), E>;
}

/// Load a checkpoint from a `reader` with the [LoadHandler], which will be called when certain events occur.
pub fn load<E: Error>(
    reader: &mut dyn BufRead,
    handler: &mut impl LoadHandler<E>,
) -> Result<(), LoadError<E>> {
    read_container_header(reader)?;

    handler
        .read_hyperparameters(reader)
        .map_err(LoadError::ImplementationError)?;

    load_weights(reader, handler)
}

/// Reads the header of a single tensor record, leaving the reader at the start of its payload.
pub fn read_tensor_info<E: Error>(
    reader: &mut dyn BufRead,
) -> Result<TensorLoadInfo, LoadError<E>> {
    let name_len = read_u32(reader)?.try_into()?;
    let name = String::from_utf8(read_bytes_with_len(reader, name_len)?)?;

    let n_dims: usize = read_u32(reader)?.try_into()?;
    if n_dims == 0 || n_dims > MAX_DIMS {
        return Err(LoadError::InvariantBroken(format!(
            "tensor {name} has {n_dims} dimensions, expected 1..={MAX_DIMS}"
        )));
    }

    let mut dims = [1usize; MAX_DIMS];
    for dim in dims.iter_mut().take(n_dims) {
        *dim = read_i64(reader)?.try_into()?;
    }
    let n_elements = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| LoadError::InvariantBroken(format!("{dims:?} overflows usize")))?;

    let ftype = read_u32(reader)?;
    let element_type =
        crate::Type::try_from(ftype).map_err(|_| LoadError::UnsupportedElementType {
            tensor_name: name.clone(),
            ftype,
        })?;

    // sanity check
    let block_size = crate::blck_size(element_type);
    if dims[0] % block_size != 0 {
        return Err(LoadError::InvariantBroken(format!(
            "{dims:?}[0] % {block_size} == 0"
        )));
    }
    if n_elements
        .checked_mul(crate::type_size(element_type))
        .is_none()
    {
        return Err(LoadError::InvariantBroken(format!(
            "payload of tensor {name} overflows usize"
        )));
    }

    Ok(TensorLoadInfo {
        name,
        n_dims,
        dims,
        n_elements,
        element_type,
    })
}

/// Reads tensor records until the end of the stream, handing each one to the handler.
pub fn load_weights<E: Error>(
    reader: &mut dyn BufRead,
    handler: &mut impl TensorHandler<E>,
) -> Result<(), LoadError<E>> {
    while has_data_left(reader)? {
        let tensor_info = read_tensor_info(reader)?;
        let name = tensor_info.name.clone();
        let n_bytes = u64::try_from(tensor_info.calc_size())?;

        let mut payload = Read::take(&mut *reader, n_bytes);
        handler
            .tensor_buffer(tensor_info, &mut payload)
            .map_err(LoadError::ImplementationError)?;

        if payload.limit() != 0 {
            return Err(LoadError::InvariantBroken(format!(
                "handler left {} of {n_bytes} bytes of tensor {name} unread",
                payload.limit()
            )));
        }
    }

    Ok(())
}
