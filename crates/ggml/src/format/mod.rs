//! Loading and saving of fairseq2 ggml checkpoint files.
//!
//! A checkpoint is laid out as:
//!
//! 1. the container header: [FILE_MAGIC_GGML](crate::FILE_MAGIC_GGML) followed by
//!    [FORMAT_VERSION](crate::FORMAT_VERSION), both `u32`;
//! 2. the hyperparameters, whose layout is owned by the model;
//! 3. tensor records until the end of the stream.
//!
//! Nothing is aligned or padded, so checkpoints can be streamed without seeking.

use std::{error::Error, fmt};

use crate::{align_up, util, ElementType};

pub mod loader;
pub mod saver;

/// Helper struct that wraps the magic number of a file format,
/// so that it can be printed in a human-readable format.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FormatMagic(pub u32);
impl fmt::Display for FormatMagic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:x} ({})",
            self.0,
            String::from_utf8_lossy(&self.0.to_le_bytes())
        )
    }
}
impl fmt::Debug for FormatMagic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
/// Errors that can occur while loading a checkpoint.
pub enum LoadError<E: Error> {
    #[error("invalid file magic number: {0}")]
    /// The file magic number is invalid.
    InvalidMagic(FormatMagic),
    #[error("invalid format version {0}, expected {}", crate::FORMAT_VERSION)]
    /// An unsupported format version was found.
    InvalidFormatVersion(u32),
    #[error("non-specific I/O error")]
    /// A non-specific IO error.
    Io(#[from] std::io::Error),
    #[error("could not convert bytes to a UTF-8 string")]
    /// One of the strings encountered was not valid UTF-8.
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("invalid integer conversion")]
    /// One of the integers encountered could not be converted to a more appropriate type.
    InvalidIntegerConversion(#[from] std::num::TryFromIntError),
    #[error("implementation error")]
    /// An error `E` was returned by the implementation of the loader.
    ImplementationError(#[source] E),
    #[error("unsupported tensor type {ftype} for tensor {tensor_name}")]
    /// One of the tensors encountered had an unsupported data type.
    UnsupportedElementType {
        /// The name of the tensor.
        tensor_name: String,
        /// The format type that was encountered.
        ftype: u32,
    },
    #[error("invariant broken: {0}")]
    /// An invariant was broken.
    InvariantBroken(String),
}

/// Reads and checks the container header.
pub fn read_container_header<E: Error>(
    reader: &mut dyn std::io::BufRead,
) -> Result<(), LoadError<E>> {
    let magic = util::read_u32(reader)?;
    if magic != crate::FILE_MAGIC_GGML {
        return Err(LoadError::InvalidMagic(FormatMagic(magic)));
    }

    let version = util::read_u32(reader)?;
    if version != crate::FORMAT_VERSION {
        return Err(LoadError::InvalidFormatVersion(version));
    }

    Ok(())
}

/// Writes the container header.
pub fn write_container_header(writer: &mut dyn std::io::Write) -> std::io::Result<()> {
    util::write_u32(writer, crate::FILE_MAGIC_GGML)?;
    util::write_u32(writer, crate::FORMAT_VERSION)
}

/// Returns the size occupied by a tensor's data in bytes given the element type and number of elements.
pub fn data_size(element_type: ElementType, n_elements: usize) -> usize {
    (crate::type_size(element_type) * n_elements) / crate::blck_size(element_type)
}

/// Returns the size of the ggml tensor header in bytes.
pub fn header_size() -> usize {
    crate::Tensor::C_TYPE_SIZE + crate::OBJECT_SIZE
}

/// Returns the number of bytes a tensor takes up in a [Context](crate::Context) given the
/// element type and number of elements. This includes the tensor's header and the padding
/// that keeps the next tensor aligned.
pub fn tensor_size(element_type: ElementType, n_elements: usize) -> usize {
    header_size() + align_up(data_size(element_type, n_elements))
}
