//! Zero-row padding for vocabulary-indexed matrices.

use candle_core::Tensor;

use crate::core::error::{FormatError, Result};
use crate::core::header::padded_row_count;

/// Appends zero rows to a 2-D tensor until its row count is a multiple of
/// `multiple`. Returns the padded tensor and its row count.
pub fn pad_rows(tensor: &Tensor, multiple: usize) -> Result<(Tensor, usize)> {
    let (rows, cols) = tensor.dims2()?;
    let padded = padded_row_count(rows, multiple)
        .ok_or_else(|| FormatError::shape(format!("padding {rows} rows overflows")))?;
    if padded == rows {
        return Ok((tensor.clone(), rows));
    }
    tracing::info!(rows, padded, cols, "padding rows with zeros");
    Ok((tensor.pad_with_zeros(0, 0, padded - rows)?, padded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    #[test]
    fn appends_zero_rows_to_multiple() {
        let t = Tensor::ones((33, 4), candle_core::DType::F32, &Device::Cpu).unwrap();
        let (padded, rows) = pad_rows(&t, 32).unwrap();
        assert_eq!(rows, 64);
        assert_eq!(padded.dims(), &[64, 4]);

        let values = padded.to_vec2::<f32>().unwrap();
        assert!(values[..33].iter().all(|r| r.iter().all(|&v| v == 1.0)));
        assert!(values[33..].iter().all(|r| r.iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn aligned_rows_are_untouched() {
        let t = Tensor::ones((64, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        let (padded, rows) = pad_rows(&t, 32).unwrap();
        assert_eq!(rows, 64);
        assert_eq!(padded.dims(), &[64, 2]);
    }

    #[test]
    fn vectors_are_rejected() {
        let t = Tensor::ones(8, candle_core::DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(pad_rows(&t, 32), Err(FormatError::Tensor(_))));
    }
}
