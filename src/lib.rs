//! Zero-parse model weight container (QOR1) with Q4_0 block quantization.
//!
//! A model file is a 64-byte header followed by tensor regions in a fixed
//! order, each starting on a 64-byte boundary. No offsets or names are
//! stored: both directions derive them from the header through
//! [`LayoutPlan`].

pub mod core;
pub mod quant;
pub mod source;
pub mod strategies;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    encode_model, write_header, write_model_file, EncodeConfig, EncodeSummary, FileHeader,
    FormatError, FormatSpec, LayoutPlan, LoadedModel, MappedModel, ModelConfig, ModelWriter,
    Result, Storage, TensorRegion, TensorRole, TensorSlot, ALIGNMENT, HEADER_SIZE, MAGIC_QOR1,
    VERSION,
};

pub use crate::quant::{
    dequantize_block, q4_0_tensor_size, quantize_block, BlockQ4_0, Q4_0_BLOCK_BYTES, QK4_0,
};

pub use crate::source::{InMemorySource, SafetensorsSource, WeightSource};

pub use crate::strategies::{ScaleStrategy, StrategyType};

use std::path::Path;

/// Converts a Hugging Face Llama `.safetensors` checkpoint to a QOR1 file.
///
/// Shape-derived fields of `base` are replaced with what the checkpoint
/// contains; head counts and rotary settings are taken from `base`.
pub fn convert_safetensors(
    input_path: &Path,
    output_path: &Path,
    base: &ModelConfig,
    encode: &EncodeConfig,
) -> Result<EncodeSummary> {
    let source = SafetensorsSource::open(input_path)?;
    let config = source.infer_config(base)?;
    write_model_file(output_path, &config, &source, encode, &FormatSpec::QOR1)
}

/// Memory-maps and validates a QOR1 model file.
pub fn load_model(path: &Path) -> Result<MappedModel> {
    LoadedModel::open(path, &FormatSpec::QOR1)
}
