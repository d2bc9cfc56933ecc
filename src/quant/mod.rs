//! Block quantization codec.
//!
//! Independent of the container: converters can call it directly on weights
//! without touching file layout.

pub mod q4_0;

pub use q4_0::{
    dequantize_block, dequantize_rows, q4_0_tensor_size, quantize_block, quantize_rows,
    BlockQ4_0, Q4_0_BLOCK_BYTES, QK4_0,
};
