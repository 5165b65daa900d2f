//! `ggml` is a tensor arena that follows the allocation model of the `ggml` C library.
//!
//! Every [Tensor] is carved out of a single, pre-sized [Context]. Once the context has been
//! created it cannot grow: allocations that do not fit fail with [ContextError::OutOfMemory],
//! which means the size of the context must be computed up front (see [format::tensor_size]).
//!
//! Tensors are handles into the context. They never expose raw addresses; reads and writes
//! of tensor data are bounds-checked against the storage the tensor was given.
#![deny(missing_docs)]

mod context;
mod tensor;

pub mod format;
pub mod util;

pub use context::{Context, ContextError};
pub use tensor::Tensor;

#[cfg(test)]
mod tests;

/// The type of a tensor element.
pub type ElementType = Type;

/// Magic constant for `ggml` files.
pub const FILE_MAGIC_GGML: u32 = 0x67676d6c;

/// The container format version written and accepted by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// The size of the bookkeeping object that precedes every tensor in a [Context].
pub const OBJECT_SIZE: usize = 32;

/// The alignment, in bytes, of every tensor's data inside a [Context].
pub const MEM_ALIGN: usize = 16;

/// The maximum number of dimensions a tensor can have.
pub const MAX_DIMS: usize = 4;

/// The maximum length of a tensor name.
pub const MAX_NAME_LENGTH: usize = 64;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
/// The type of a value in `ggml`.
pub enum Type {
    /// Float 32-bit.
    #[default]
    F32,
    /// Float 16-bit.
    F16,
    /// Quantized 4-bit (type 0).
    Q4_0,
    /// Quantized 4-bit (type 1).
    Q4_1,
    /// Quantized 5-bit (type 0).
    Q5_0,
    /// Quantized 5-bit (type 1).
    Q5_1,
    /// Quantized 8-bit (type 0).
    Q8_0,
    /// Quantized 8-bit (type 1).
    Q8_1,
    /// Integer 8-bit.
    I8,
    /// Integer 16-bit.
    I16,
    /// Integer 32-bit.
    I32,
}
impl From<Type> for u32 {
    fn from(t: Type) -> Self {
        match t {
            Type::F32 => 0,
            Type::F16 => 1,
            Type::Q4_0 => 2,
            Type::Q4_1 => 3,
            Type::Q5_0 => 6,
            Type::Q5_1 => 7,
            Type::Q8_0 => 8,
            Type::Q8_1 => 9,
            Type::I8 => 16,
            Type::I16 => 17,
            Type::I32 => 18,
        }
    }
}
impl TryFrom<u32> for Type {
    type Error = ();
    fn try_from(t: u32) -> Result<Self, Self::Error> {
        match t {
            0 => Ok(Type::F32),
            1 => Ok(Type::F16),
            2 => Ok(Type::Q4_0),
            3 => Ok(Type::Q4_1),
            6 => Ok(Type::Q5_0),
            7 => Ok(Type::Q5_1),
            8 => Ok(Type::Q8_0),
            9 => Ok(Type::Q8_1),
            16 => Ok(Type::I8),
            17 => Ok(Type::I16),
            18 => Ok(Type::I32),
            _ => Err(()),
        }
    }
}
impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::F32 => write!(f, "f32"),
            Type::F16 => write!(f, "f16"),
            Type::Q4_0 => write!(f, "q4_0"),
            Type::Q4_1 => write!(f, "q4_1"),
            Type::Q5_0 => write!(f, "q5_0"),
            Type::Q5_1 => write!(f, "q5_1"),
            Type::Q8_0 => write!(f, "q8_0"),
            Type::Q8_1 => write!(f, "q8_1"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
        }
    }
}
impl Type {
    /// Returns whether this type is quantized.
    pub fn is_quantized(&self) -> bool {
        matches!(
            self,
            Type::Q4_0 | Type::Q4_1 | Type::Q5_0 | Type::Q5_1 | Type::Q8_0 | Type::Q8_1
        )
    }
}

/// The size of one block of `t` in bytes.
pub fn type_size(t: Type) -> usize {
    match t {
        Type::F32 => 4,
        Type::F16 => 2,
        // f16 delta + 16 bytes of nibbles
        Type::Q4_0 => 2 + 16,
        // f16 delta + f16 min + 16 bytes of nibbles
        Type::Q4_1 => 2 + 2 + 16,
        // f16 delta + 4 bytes of high bits + 16 bytes of nibbles
        Type::Q5_0 => 2 + 4 + 16,
        Type::Q5_1 => 2 + 2 + 4 + 16,
        Type::Q8_0 => 2 + 32,
        // f32 delta + f32 sum + 32 bytes
        Type::Q8_1 => 4 + 4 + 32,
        Type::I8 => 1,
        Type::I16 => 2,
        Type::I32 => 4,
    }
}

/// The size of a block for `t`. Only relevant for quantized types.
pub fn blck_size(t: Type) -> usize {
    if t.is_quantized() {
        32
    } else {
        1
    }
}

/// Rounds `n` up to the next multiple of [MEM_ALIGN].
pub(crate) fn align_up(n: usize) -> usize {
    (n + MEM_ALIGN - 1) & !(MEM_ALIGN - 1)
}
