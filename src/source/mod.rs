//! Where the writer gets its weights from.
//!
//! Sources return tensors in file orientation (see
//! [`TensorRole::shape`](crate::core::TensorRole::shape)) but with the
//! unpadded vocabulary; the writer pads vocabulary rows itself.

pub mod memory;
pub mod checkpoint;

pub use self::memory::InMemorySource;
pub use self::checkpoint::SafetensorsSource;

use candle_core::Tensor;

use crate::core::{Result, TensorSlot};

pub trait WeightSource {
    /// Loads the tensor that belongs in `slot`.
    fn load(&self, slot: &TensorSlot) -> Result<Tensor>;

    /// Source name for logging
    fn name(&self) -> &'static str;
}
