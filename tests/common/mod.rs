//! Synthetic weight fixtures for integration tests.

#![allow(dead_code)]

use candle_core::{DType, Device, Tensor};
use qorus_weights::{
    FileHeader, FormatSpec, InMemorySource, ModelConfig, Result, TensorSlot, WeightSource,
};

pub fn small_config() -> ModelConfig {
    ModelConfig {
        vocab_size: 100,
        dim: 64,
        hidden_dim: 96,
        n_layers: 2,
        n_heads: 2,
        n_kv_heads: 1,
        max_seq_len: 256,
        rope_freq_base: 10000.0,
        ..ModelConfig::default()
    }
}

/// Shape a source hands out for `slot`: file orientation, unpadded vocabulary.
pub fn source_shape(config: &ModelConfig, slot: &TensorSlot) -> Vec<usize> {
    let header = FileHeader::from_config(config, &FormatSpec::QOR1).unwrap();
    let mut shape = slot.role.shape(&header);
    if slot.role.is_vocab_indexed() {
        shape[0] = config.vocab_size;
    }
    shape
}

/// Gaussian weights for every slot of `config`.
pub fn random_source(config: &ModelConfig) -> InMemorySource {
    TensorSlot::all(config.n_layers)
        .map(|slot| {
            let shape = source_shape(config, &slot);
            let t = Tensor::randn(0f32, 1f32, shape, &Device::Cpu).unwrap();
            (slot.name(), t)
        })
        .collect()
}

/// Hands out zero tensors of the right shape without keeping them around.
pub struct ZeroSource {
    pub config: ModelConfig,
}

impl WeightSource for ZeroSource {
    fn load(&self, slot: &TensorSlot) -> Result<Tensor> {
        let shape = source_shape(&self.config, slot);
        Ok(Tensor::zeros(shape, DType::F32, &Device::Cpu)?)
    }

    fn name(&self) -> &'static str {
        "zeros"
    }
}

/// `Write` sink that only counts bytes.
#[derive(Default)]
pub struct CountingSink {
    pub bytes: u64,
}

impl std::io::Write for CountingSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
