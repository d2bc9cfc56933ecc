//! Tensors already resident in memory, keyed by file tensor name.

use std::collections::HashMap;

use candle_core::Tensor;

use super::WeightSource;
use crate::core::{FormatError, Result, TensorSlot};

#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    tensors: HashMap<String, Tensor>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl FromIterator<(String, Tensor)> for InMemorySource {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

impl WeightSource for InMemorySource {
    fn load(&self, slot: &TensorSlot) -> Result<Tensor> {
        let name = slot.name();
        self.tensors
            .get(&name)
            .cloned()
            .ok_or(FormatError::MissingTensor(name))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
