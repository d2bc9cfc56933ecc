//! Q4_0: 32 weights as 4-bit codes plus one float32 scale, 20 bytes per block.
//!
//! Quantization law: `code = round(clamp(v / scale + 8, 0, 15))`, rounding
//! half to even. Dequantization: `v = (code - 8) * scale`.
//!
//! Division by a zero scale follows IEEE-754: `+inf` clamps to 15, `-inf`
//! clamps to 0, and the NaN from `0 / 0` (or a NaN weight) maps to the zero
//! point 8. A block whose scale is zero always dequantizes to `0.0`.

use bytemuck::Zeroable;

use crate::core::error::{FormatError, Result};
use crate::strategies::ScaleStrategy;

/// Values per block.
pub const QK4_0: usize = 32;
/// Encoded bytes per block: 16 bytes of nibbles + 4 bytes of scale.
pub const Q4_0_BLOCK_BYTES: usize = 20;

const CODE_BIAS: f32 = 8.0;
const CODE_MAX: f32 = 15.0;

/// One encoded block, byte-for-byte as stored in the file.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct BlockQ4_0 {
    /// Code `2i` in the low nibble of byte `i`, code `2i + 1` in the high nibble.
    pub qs: [u8; QK4_0 / 2],
    /// Little-endian float32 scale.
    pub scale: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<BlockQ4_0>() == Q4_0_BLOCK_BYTES);

#[inline]
fn encode(value: f32, scale: f32) -> u8 {
    let q = value / scale + CODE_BIAS;
    if q.is_nan() {
        return CODE_BIAS as u8;
    }
    q.clamp(0.0, CODE_MAX).round_ties_even() as u8
}

impl BlockQ4_0 {
    pub fn quantize(values: &[f32; QK4_0], scale: f32) -> Self {
        let mut qs = [0u8; QK4_0 / 2];
        for (byte, pair) in qs.iter_mut().zip(values.chunks_exact(2)) {
            *byte = encode(pair[0], scale) | (encode(pair[1], scale) << 4);
        }
        Self {
            qs,
            scale: scale.to_le_bytes(),
        }
    }

    pub fn scale(&self) -> f32 {
        f32::from_le_bytes(self.scale)
    }

    /// Unpacked 4-bit codes in value order.
    pub fn codes(&self) -> [u8; QK4_0] {
        let mut out = [0u8; QK4_0];
        for (i, &byte) in self.qs.iter().enumerate() {
            out[2 * i] = byte & 0x0F;
            out[2 * i + 1] = byte >> 4;
        }
        out
    }

    pub fn dequantize(&self) -> [f32; QK4_0] {
        let scale = self.scale();
        if scale == 0.0 {
            return [0.0; QK4_0];
        }
        let mut out = [0f32; QK4_0];
        for (dst, code) in out.iter_mut().zip(self.codes()) {
            *dst = (code as f32 - CODE_BIAS) * scale;
        }
        out
    }
}

/// Packs exactly 32 values with the given scale into 20 bytes.
pub fn quantize_block(values: &[f32], scale: f32) -> Result<[u8; Q4_0_BLOCK_BYTES]> {
    let values: &[f32; QK4_0] = values
        .try_into()
        .map_err(|_| FormatError::InvalidBlockSize {
            expected: QK4_0,
            actual: values.len(),
        })?;
    Ok(bytemuck::cast(BlockQ4_0::quantize(values, scale)))
}

/// Unpacks exactly 20 bytes into 32 values.
pub fn dequantize_block(bytes: &[u8]) -> Result<[f32; QK4_0]> {
    if bytes.len() != Q4_0_BLOCK_BYTES {
        return Err(FormatError::InvalidBlockSize {
            expected: Q4_0_BLOCK_BYTES,
            actual: bytes.len(),
        });
    }
    let block: BlockQ4_0 = bytemuck::pod_read_unaligned(bytes);
    Ok(block.dequantize())
}

/// Encoded size of a `[rows, cols]` matrix: `rows * (cols / 32) * 20`.
pub fn q4_0_tensor_size(rows: usize, cols: usize) -> Result<usize> {
    if cols % QK4_0 != 0 {
        return Err(FormatError::shape(format!(
            "Q4_0 needs cols % {QK4_0} == 0, got [{rows}, {cols}]"
        )));
    }
    rows.checked_mul(cols / QK4_0)
        .and_then(|blocks| blocks.checked_mul(Q4_0_BLOCK_BYTES))
        .ok_or_else(|| FormatError::shape(format!("[{rows}, {cols}] overflows")))
}

/// Quantizes a row-major `[rows, cols]` matrix, choosing each block's scale
/// with `strategy`.
pub fn quantize_rows(
    rows: usize,
    cols: usize,
    data: &[f32],
    strategy: &dyn ScaleStrategy,
) -> Result<Vec<u8>> {
    let size = q4_0_tensor_size(rows, cols)?;
    if data.len() != rows * cols {
        return Err(FormatError::shape(format!(
            "[{rows}, {cols}] needs {} values, got {}",
            rows * cols,
            data.len()
        )));
    }
    let mut blocks = vec![BlockQ4_0::zeroed(); size / Q4_0_BLOCK_BYTES];
    for (dst, chunk) in blocks.iter_mut().zip(data.chunks_exact(QK4_0)) {
        // chunks_exact(32) always yields 32-element slices
        let values: &[f32; QK4_0] = chunk.try_into().map_err(|_| {
            FormatError::InvalidBlockSize {
                expected: QK4_0,
                actual: chunk.len(),
            }
        })?;
        *dst = BlockQ4_0::quantize(values, strategy.block_scale(values));
    }
    Ok(bytemuck::cast_slice(&blocks).to_vec())
}

/// Dequantizes a run of whole blocks back to floats.
pub fn dequantize_rows(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % Q4_0_BLOCK_BYTES != 0 {
        return Err(FormatError::InvalidBlockSize {
            expected: Q4_0_BLOCK_BYTES,
            actual: bytes.len() % Q4_0_BLOCK_BYTES,
        });
    }
    let mut out = Vec::with_capacity(bytes.len() / Q4_0_BLOCK_BYTES * QK4_0);
    for chunk in bytes.chunks_exact(Q4_0_BLOCK_BYTES) {
        let block: BlockQ4_0 = bytemuck::pod_read_unaligned(chunk);
        out.extend_from_slice(&block.dequantize());
    }
    Ok(out)
}
