//! Tensor conversion operations.
//!
//! Everything written to a model file must be contiguous row-major
//! little-endian float32. These helpers borrow the caller's buffer when it
//! already is, and copy (with a `warn!`) when it is not.

use std::borrow::Cow;

use candle_core::{DType, Device, Storage, Tensor};
use half::{bf16, f16};
use safetensors::tensor::Dtype;

use crate::core::error::{FormatError, Result};

/// Byte order of a raw float buffer handed in by a foreign producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Decodes little-endian safetensors data to f32.
pub fn tensor_to_f32(bytes: &[u8], dtype: Dtype) -> Result<Vec<f32>> {
    Ok(match dtype {
        Dtype::F32 => bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
        Dtype::F16 => bytes
            .chunks_exact(2)
            .map(|chunk| f16::from_le_bytes([chunk[0], chunk[1]]).to_f32())
            .collect(),
        Dtype::BF16 => bytes
            .chunks_exact(2)
            .map(|chunk| bf16::from_le_bytes([chunk[0], chunk[1]]).to_f32())
            .collect(),
        other => return Err(FormatError::UnsupportedDtype(format!("{other:?}"))),
    })
}

/// Little-endian bytes of `values`. Borrowed on little-endian hosts.
pub fn le_bytes(values: &[f32]) -> Cow<'_, [u8]> {
    if cfg!(target_endian = "little") {
        Cow::Borrowed(bytemuck::cast_slice(values))
    } else {
        tracing::warn!(elements = values.len(), "big-endian host, byte-swapping f32 data");
        Cow::Owned(values.iter().flat_map(|v| v.to_le_bytes()).collect())
    }
}

/// Brings a raw float32 buffer into little-endian order.
pub fn normalize_f32_bytes<'a>(
    bytes: &'a [u8],
    order: ByteOrder,
    name: &str,
) -> Result<Cow<'a, [u8]>> {
    if bytes.len() % 4 != 0 {
        return Err(FormatError::shape(format!(
            "{name}: {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    match order {
        ByteOrder::Little => Ok(Cow::Borrowed(bytes)),
        ByteOrder::Big => {
            tracing::warn!(tensor = name, bytes = bytes.len(), "big-endian buffer, swapping to little-endian");
            let mut swapped = bytes.to_vec();
            for word in swapped.chunks_exact_mut(4) {
                word.reverse();
            }
            Ok(Cow::Owned(swapped))
        }
    }
}

/// Runs `f` over the tensor's elements as contiguous row-major f32.
///
/// A contiguous f32 CPU tensor is borrowed straight out of its storage.
/// Anything else (strided views, other dtypes, other devices) is copied first.
pub fn with_row_major_f32<R>(
    tensor: &Tensor,
    name: &str,
    f: impl FnOnce(&[f32]) -> Result<R>,
) -> Result<R> {
    if tensor.dtype() == DType::F32 && tensor.is_contiguous() {
        let (storage, layout) = tensor.storage_and_layout();
        if let (Storage::Cpu(cpu), Some((start, end))) = (&*storage, layout.contiguous_offsets()) {
            let data = cpu.as_slice::<f32>()?;
            return f(&data[start..end]);
        }
    }

    if !tensor.is_contiguous() {
        tracing::warn!(
            tensor = name,
            shape = ?tensor.dims(),
            "tensor is not contiguous, copying to row-major"
        );
    }
    if tensor.dtype() != DType::F32 {
        tracing::debug!(tensor = name, dtype = ?tensor.dtype(), "converting to f32");
    }
    let values = tensor
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F32)?
        .contiguous()?
        .flatten_all()?
        .to_vec1::<f32>()?;
    f(&values)
}
