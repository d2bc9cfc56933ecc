//! Quantization quality validation functions.

use super::error::{FormatError, Result};
use crate::quant::dequantize_rows;

fn dequantized_like(original: &[f32], blocks: &[u8]) -> Result<Vec<f32>> {
    let restored = dequantize_rows(blocks)?;
    if restored.len() != original.len() {
        return Err(FormatError::shape(format!(
            "{} quantized values for {} originals",
            restored.len(),
            original.len()
        )));
    }
    Ok(restored)
}

/// Element-wise mean squared error between weights and their Q4_0 encoding.
pub fn reconstruction_mse(original: &[f32], blocks: &[u8]) -> Result<f32> {
    let restored = dequantized_like(original, blocks)?;
    if original.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = original
        .iter()
        .zip(&restored)
        .map(|(&a, &b)| {
            let d = (a - b) as f64;
            d * d
        })
        .sum();
    Ok((sum / original.len() as f64) as f32)
}

/// MSE of `W · x` against `Ŵ · x` for a gradient probe `x[i] = (i + 1) / k`.
pub fn matvec_mse(original: &[f32], blocks: &[u8], k: usize) -> Result<f32> {
    if k == 0 || original.len() % k != 0 {
        return Err(FormatError::shape(format!(
            "{} values do not form rows of {k}",
            original.len()
        )));
    }
    let restored = dequantized_like(original, blocks)?;
    let rows = original.len() / k;
    if rows == 0 {
        return Ok(0.0);
    }
    let probe: Vec<f32> = (0..k).map(|i| (i as f32 + 1.0) / k as f32).collect();

    let dot = |row: &[f32]| -> f32 { row.iter().zip(&probe).map(|(a, b)| a * b).sum() };
    let mut mse = 0f32;
    for (expected, actual) in original.chunks_exact(k).zip(restored.chunks_exact(k)) {
        let diff = dot(expected) - dot(actual);
        mse += diff * diff;
    }
    Ok(mse / rows as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::quantize_rows;
    use crate::strategies::AbsMaxStrategy;

    #[test]
    fn exact_codes_have_zero_error() {
        let original: Vec<f32> = (0..64).map(|i| ((i % 15) as f32 - 7.0) * 0.5).collect();
        let blocks = quantize_rows(2, 32, &original, &AbsMaxStrategy).unwrap();
        assert_eq!(reconstruction_mse(&original, &blocks).unwrap(), 0.0);
        assert_eq!(matvec_mse(&original, &blocks, 32).unwrap(), 0.0);
    }

    #[test]
    fn lossy_encoding_has_positive_error() {
        let original: Vec<f32> = (0..32).map(|i| (i as f32 * 0.37).sin()).collect();
        let blocks = quantize_rows(1, 32, &original, &AbsMaxStrategy).unwrap();
        let mse = reconstruction_mse(&original, &blocks).unwrap();
        assert!(mse > 0.0);
        let step = 1.0f32 / 7.0;
        assert!(mse <= (step / 2.0).powi(2));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let blocks = quantize_rows(1, 32, &[0.0; 32], &AbsMaxStrategy).unwrap();
        assert!(reconstruction_mse(&[0.0; 64], &blocks).is_err());
        assert!(matvec_mse(&[0.0; 32], &blocks, 5).is_err());
    }
}
