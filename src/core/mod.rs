//! Container codec: header, layout plan, writer and loader.

pub mod error;
pub mod format;
pub mod header;
pub mod io;
pub mod layout;
pub mod reader;
pub mod validation;

pub use error::{FormatError, Result};
pub use format::{FormatSpec, ALIGNMENT};
pub use header::{
    padded_row_count, write_header, FileHeader, DEFAULT_RMS_NORM_EPS, HEADER_SIZE, MAGIC_QOR1,
    VERSION,
};
pub use io::{encode_model, write_model_file, EncodeSummary, ModelWriter};
pub use layout::{LayoutPlan, Storage, TensorRegion, TensorRole, TensorSlot};
pub use reader::{LoadedModel, MappedModel};
pub use validation::{matvec_mse, reconstruction_mse};

use crate::strategies::StrategyType;

/// Model hyper-parameters supplied by the converter.
///
/// `vocab_size` is the real vocabulary; the header stores it padded to a
/// multiple of 32 alongside the original value.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub dim: usize,
    pub hidden_dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub n_kv_heads: usize,
    pub max_seq_len: usize,
    pub rope_freq_base: f32,
    pub rms_norm_eps: f32,
    pub version: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: 32000,
            dim: 4096,
            hidden_dim: 11008,
            n_layers: 32,
            n_heads: 32,
            n_kv_heads: 8,
            max_seq_len: 8192,
            rope_freq_base: 500000.0,
            rms_norm_eps: DEFAULT_RMS_NORM_EPS,
            version: VERSION,
        }
    }
}

/// Writer behaviour that does not end up in the file.
#[derive(Debug, Clone)]
pub struct EncodeConfig {
    pub strategy_type: StrategyType,
    pub measure_error: bool,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            strategy_type: StrategyType::AbsMax,
            measure_error: false,
        }
    }
}
