//! Tensor conversion helpers used on the write path.

pub mod padding;
pub mod tensor_ops;

pub use padding::pad_rows;
pub use tensor_ops::{le_bytes, normalize_f32_bytes, tensor_to_f32, with_row_major_f32, ByteOrder};
