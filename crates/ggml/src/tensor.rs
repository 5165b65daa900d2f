use std::{
    io::{self, Read},
    sync::{Arc, Weak},
};

use crate::{context::ContextInner, Type, MAX_DIMS, MAX_NAME_LENGTH};

/// Tensors are owned by the context. A tensor is alive as long as the
/// underlying context it was created with is alive.
pub struct Tensor {
    pub(crate) index: usize,
    pub(crate) inner: Weak<ContextInner>,
}

impl Tensor {
    /// Size of the tensor header in bytes.
    ///
    /// Exposed for purposes of determining context size.
    pub const C_TYPE_SIZE: usize = 256;

    /// Sets the name of the tensor.
    ///
    /// The name must not be longer than [`MAX_NAME_LENGTH`] bytes.
    pub fn set_name(self, name: &str) -> Tensor {
        assert!(
            name.len() <= MAX_NAME_LENGTH,
            "Tensor name must be less than {} bytes",
            MAX_NAME_LENGTH
        );

        self.with_alive_ctx(|inner| {
            inner.state.write().unwrap().objects[self.index].name = name.to_owned();
        });
        self
    }

    /// Gets the name of the tensor
    pub fn name(&self) -> String {
        self.with_alive_ctx(|inner| inner.state.read().unwrap().objects[self.index].name.clone())
    }

    /// Creates a shared copy of this tensor pointer.
    pub fn share(&self) -> Self {
        Tensor {
            index: self.index,
            inner: Weak::clone(&self.inner),
        }
    }

    /// Number of bytes used by this tensor.
    pub fn nbytes(&self) -> usize {
        self.with_alive_ctx(|inner| inner.state.read().unwrap().objects[self.index].nbytes)
    }

    /// Number of elements in this tensor.
    pub fn nelements(&self) -> usize {
        self.get_ne().iter().product()
    }

    /// Number of dimensions of this tensor.
    pub fn n_dims(&self) -> usize {
        self.with_alive_ctx(|inner| inner.state.read().unwrap().objects[self.index].n_dims)
    }

    /// Number of elements in each dimension. Unused dimensions are 1.
    pub fn get_ne(&self) -> [usize; MAX_DIMS] {
        self.with_alive_ctx(|inner| inner.state.read().unwrap().objects[self.index].ne)
    }

    /// The dimensions of the tensor, without the unused trailing ones.
    pub fn dims(&self) -> Vec<usize> {
        let ne = self.get_ne();
        ne[..self.n_dims()].to_vec()
    }

    /// Stride of each dimension, in bytes.
    pub fn get_nb(&self) -> [usize; MAX_DIMS] {
        let ne = self.get_ne();
        let ty = self.get_type();
        let mut nb = [0; MAX_DIMS];
        nb[0] = crate::type_size(ty);
        nb[1] = nb[0] * (ne[0] / crate::blck_size(ty));
        for i in 2..MAX_DIMS {
            nb[i] = nb[i - 1] * ne[i - 1];
        }
        nb
    }

    /// The data type.
    pub fn get_type(&self) -> Type {
        self.with_alive_ctx(|inner| inner.state.read().unwrap().objects[self.index].element_type)
    }

    /// The size of the element type in bytes.
    pub fn element_size(&self) -> usize {
        crate::type_size(self.get_type())
    }

    /// Writes `src` to the start of this tensor.
    ///
    /// Panics if `src` is larger than the tensor.
    pub fn write_data(&mut self, src: &[u8]) {
        self.with_alive_ctx(|inner| {
            let mut state = inner.state.write().unwrap();
            let object = &state.objects[self.index];
            let (offset, nbytes) = (object.offset, object.nbytes);
            assert!(
                src.len() <= nbytes,
                "Cannot write {} bytes to a tensor of {} bytes",
                src.len(),
                nbytes
            );
            state.buffer[offset..offset + src.len()].copy_from_slice(src);
        })
    }

    /// Fills the whole tensor with exactly [`Tensor::nbytes`] bytes read from `reader`.
    pub fn read_exact_from(&mut self, reader: &mut dyn Read) -> io::Result<()> {
        self.with_alive_ctx(|inner| {
            let mut state = inner.state.write().unwrap();
            let object = &state.objects[self.index];
            let (offset, nbytes) = (object.offset, object.nbytes);
            reader.read_exact(&mut state.buffer[offset..offset + nbytes])
        })
    }

    /// Zeroes out this tensor.
    pub fn zero_data(&mut self) {
        self.with_alive_ctx(|inner| {
            let mut state = inner.state.write().unwrap();
            let object = &state.objects[self.index];
            let (offset, nbytes) = (object.offset, object.nbytes);
            state.buffer[offset..offset + nbytes].fill(0);
        })
    }

    /// Reads this tensor into `dst`, starting from `offset`. The size of `dst`
    /// will be used to determine how many bytes to read.
    ///
    /// Panics if the range extends past the end of the tensor.
    pub fn read_data(&self, offset: usize, dst: &mut [u8]) {
        self.with_alive_ctx(|inner| {
            let state = inner.state.read().unwrap();
            let object = &state.objects[self.index];
            assert!(
                offset + dst.len() <= object.nbytes,
                "Cannot read {} bytes at offset {} from a tensor of {} bytes",
                dst.len(),
                offset,
                object.nbytes
            );
            let start = object.offset + offset;
            dst.copy_from_slice(&state.buffer[start..start + dst.len()]);
        })
    }

    /// Copies the contents of this tensor into a new vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut data = vec![0; self.nbytes()];
        self.read_data(0, &mut data);
        data
    }
}
impl Tensor {
    fn with_alive_ctx<U>(&self, f: impl FnOnce(&Arc<ContextInner>) -> U) -> U {
        let ctx = self
            .inner
            .upgrade()
            .expect("Using a tensor after the context was dropped");
        f(&ctx)
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && Weak::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for Tensor {}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.inner.strong_count() == 0 {
            return f.debug_struct("Tensor").field("index", &self.index).finish();
        }
        f.debug_struct("Tensor")
            .field("name", &self.name())
            .field("type", &self.get_type())
            .field("dims", &self.dims())
            .finish()
    }
}
