use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::{align_up, blck_size, format, Tensor, Type, MAX_DIMS};

/// Owns the memory of every tensor allocated from it.
///
/// The memory is allocated once, when the context is created. Tensors are
/// handed out as [`Tensor`] handles that refer back to this context.
pub struct Context {
    /// An `Arc` is used to model the relation between the context and the
    /// allocated tensors. Tensors are owned by the object, so a [`Tensor`]
    /// contains a `Weak` reference underneath and doesn't let you do anything
    /// with it if the underlying context has been deallocated.
    inner: Arc<ContextInner>,
}

/// Contains state shared between a context and its tensors
pub(crate) struct ContextInner {
    pub mem_size: usize,
    pub state: RwLock<ContextState>,
}

pub(crate) struct ContextState {
    /// Backing storage for the data of every tensor.
    pub buffer: Vec<u8>,
    /// Bytes of `mem_size` that have been handed out, including object overhead.
    pub used: usize,
    pub objects: Vec<TensorObject>,
}

/// Bookkeeping for a single tensor within the context.
#[derive(Debug, Clone)]
pub(crate) struct TensorObject {
    pub name: String,
    pub element_type: Type,
    pub n_dims: usize,
    pub ne: [usize; MAX_DIMS],
    /// Offset of the tensor's data within the buffer.
    pub offset: usize,
    pub nbytes: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Errors that can occur when allocating from a [Context].
pub enum ContextError {
    /// The context does not have enough memory left for the tensor.
    #[error("not enough space in the context's memory pool (needed {requested} bytes, available {available} bytes)")]
    OutOfMemory {
        /// The number of bytes the allocation required, including overhead.
        requested: usize,
        /// The number of bytes left in the context.
        available: usize,
    },
    /// The tensor has an unsupported number of dimensions.
    #[error("tensors must have between 1 and {MAX_DIMS} dimensions, got {n_dims}")]
    InvalidDimensionCount {
        /// The number of dimensions that were requested.
        n_dims: usize,
    },
    /// The memory pool could not be allocated.
    #[error("could not allocate a memory pool of {mem_size} bytes")]
    AllocationFailed {
        /// The size of the pool that was requested.
        mem_size: usize,
    },
    /// The first dimension of a quantized tensor is not a multiple of the block size.
    #[error("first dimension {ne0} of a {element_type} tensor must be a multiple of {block_size}")]
    UnalignedRow {
        /// The element type of the tensor.
        element_type: Type,
        /// The first dimension.
        ne0: usize,
        /// The block size of the element type.
        block_size: usize,
    },
}

impl Context {
    /// Creates a new [Context] with the specified memory size.
    /// The whole pool is allocated (and zeroed) immediately.
    pub fn new_with_allocate(mem_size: usize) -> Self {
        Self::from_buffer(vec![0u8; mem_size])
    }

    /// Creates a new [Context] with the specified memory size, failing instead of
    /// aborting if the pool cannot be allocated.
    pub fn try_new_with_allocate(mem_size: usize) -> Result<Self, ContextError> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(mem_size)
            .map_err(|_| ContextError::AllocationFailed { mem_size })?;
        buffer.resize(mem_size, 0);

        Ok(Self::from_buffer(buffer))
    }

    fn from_buffer(buffer: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                mem_size: buffer.len(),
                state: RwLock::new(ContextState {
                    buffer,
                    used: 0,
                    objects: Vec::new(),
                }),
            }),
        }
    }

    /// The total size of the memory pool.
    pub fn mem_size(&self) -> usize {
        self.inner.mem_size
    }

    /// Retrieves the memory used by this [Context].
    pub fn used_mem(&self) -> usize {
        self.inner.state.read().unwrap().used
    }

    /// The number of tensors allocated from this [Context].
    pub fn n_objects(&self) -> usize {
        self.inner.state.read().unwrap().objects.len()
    }

    /// Creates a new 1D tensor.
    pub fn new_tensor_1d(&self, typ: Type, ne0: usize) -> Result<Tensor, ContextError> {
        self.new_tensor(typ, &[ne0])
    }

    /// Creates a new 2D tensor.
    pub fn new_tensor_2d(&self, typ: Type, ne0: usize, ne1: usize) -> Result<Tensor, ContextError> {
        self.new_tensor(typ, &[ne0, ne1])
    }

    /// Creates a new 3D tensor.
    pub fn new_tensor_3d(
        &self,
        typ: Type,
        ne0: usize,
        ne1: usize,
        ne2: usize,
    ) -> Result<Tensor, ContextError> {
        self.new_tensor(typ, &[ne0, ne1, ne2])
    }

    /// Creates a new 4D tensor.
    pub fn new_tensor_4d(
        &self,
        typ: Type,
        ne0: usize,
        ne1: usize,
        ne2: usize,
        ne3: usize,
    ) -> Result<Tensor, ContextError> {
        self.new_tensor(typ, &[ne0, ne1, ne2, ne3])
    }

    /// Creates a new tensor with the dimensions in `ne` (innermost first).
    pub fn new_tensor(&self, typ: Type, ne: &[usize]) -> Result<Tensor, ContextError> {
        let n_dims = ne.len();
        if n_dims == 0 || n_dims > MAX_DIMS {
            return Err(ContextError::InvalidDimensionCount { n_dims });
        }
        let block_size = blck_size(typ);
        if ne[0] % block_size != 0 {
            return Err(ContextError::UnalignedRow {
                element_type: typ,
                ne0: ne[0],
                block_size,
            });
        }

        let mut state = self.inner.state.write().unwrap();
        let available = self.inner.mem_size - state.used;

        // Dimensions that overflow can never fit, whatever the size of the pool.
        let Some(n_elements) = ne
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .filter(|n| {
                n.checked_mul(crate::type_size(typ))
                    .map_or(false, |b| b <= isize::MAX as usize)
            })
        else {
            return Err(ContextError::OutOfMemory {
                requested: usize::MAX,
                available,
            });
        };
        let nbytes = format::data_size(typ, n_elements);
        let requested = format::tensor_size(typ, n_elements);
        if requested > available {
            return Err(ContextError::OutOfMemory {
                requested,
                available,
            });
        }

        // The object header and the tensor header occupy the front of the allocation,
        // and the data follows at an aligned offset.
        let offset = align_up(state.used + format::header_size());
        debug_assert!(offset + nbytes <= self.inner.mem_size);

        let mut padded = [1usize; MAX_DIMS];
        padded[..n_dims].copy_from_slice(ne);

        let index = state.objects.len();
        state.objects.push(TensorObject {
            name: String::new(),
            element_type: typ,
            n_dims,
            ne: padded,
            offset,
            nbytes,
        });
        state.used += requested;

        Ok(Tensor {
            index,
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Returns handles to every tensor in this context, in allocation order.
    pub fn tensors(&self) -> Vec<Tensor> {
        let state = self.inner.state.read().unwrap();
        (0..state.objects.len())
            .map(|index| Tensor {
                index,
                inner: Arc::downgrade(&self.inner),
            })
            .collect()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("mem_size", &self.mem_size())
            .field("used_mem", &self.used_mem())
            .field("n_objects", &self.n_objects())
            .finish()
    }
}
