use std::collections::HashMap;

use ggml::{Context, ElementType, Tensor};

use crate::LoadError;

struct Entry {
    name: String,
    tensor: Tensor,
    loaded: bool,
}

/// Maps tensor names to the tensors allocated for them, in allocation order.
///
/// Architectures register their tensors here while they are allocated; the weight
/// loader then fills each one in by name.
#[derive(Default)]
pub struct TensorTable {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}
impl TensorTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tensor` under `name`.
    ///
    /// Fails with [LoadError::DuplicateTensorName] if the name is already taken.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Result<(), LoadError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(LoadError::DuplicateTensorName { tensor_name: name });
        }

        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(Entry {
            name,
            tensor,
            loaded: false,
        });
        Ok(())
    }

    /// Allocates a tensor of shape `ne` in `context`, names it and registers it under `name`.
    pub fn alloc(
        &mut self,
        context: &Context,
        name: impl Into<String>,
        element_type: ElementType,
        ne: &[usize],
    ) -> Result<Tensor, LoadError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(LoadError::DuplicateTensorName { tensor_name: name });
        }
        if name.len() > ggml::MAX_NAME_LENGTH {
            return Err(LoadError::InvariantBroken {
                invariant: format!(
                    "tensor name {name} is longer than {} bytes",
                    ggml::MAX_NAME_LENGTH
                ),
            });
        }

        let tensor = context.new_tensor(element_type, ne)?.set_name(&name);
        tracing::trace!(name = name.as_str(), ?ne, %element_type, "allocated tensor");
        self.insert(name, tensor.share())?;
        Ok(tensor)
    }

    /// Returns the tensor registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.index.get(name).map(|&i| &self.entries[i].tensor)
    }

    /// Whether a tensor is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// The number of registered tensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no tensors have been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The registered names, in allocation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// The registered tensors with their names, in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|e| (e.name.as_str(), &e.tensor))
    }

    /// The number of tensors whose contents have been loaded.
    pub fn loaded_count(&self) -> usize {
        self.entries.iter().filter(|e| e.loaded).count()
    }

    /// Looks up the tensor registered under `name` to load its contents.
    ///
    /// Each tensor can only be loaded once.
    pub(crate) fn get_for_load(&mut self, name: &str) -> Result<&mut Tensor, LoadError> {
        let &i = self
            .index
            .get(name)
            .ok_or_else(|| LoadError::UnknownTensorName {
                tensor_name: name.to_owned(),
            })?;
        let entry = &mut self.entries[i];
        if entry.loaded {
            return Err(LoadError::DuplicateTensorRecord {
                tensor_name: name.to_owned(),
            });
        }
        Ok(&mut entry.tensor)
    }

    pub(crate) fn mark_loaded(&mut self, name: &str) {
        if let Some(&i) = self.index.get(name) {
            self.entries[i].loaded = true;
        }
    }

    /// The first tensor, in allocation order, that has not been loaded.
    pub(crate) fn first_missing(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| !e.loaded)
            .map(|e| e.name.as_str())
    }
}
impl std::fmt::Debug for TensorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (&e.name, &e.tensor)))
            .finish()
    }
}
