//! Symmetric scale: the largest magnitude maps to code ±7.
//!
//! Non-finite weights are left out of the scale; they clamp to the end codes
//! (or the zero point for NaN) instead of poisoning the whole block.

use super::ScaleStrategy;
use crate::quant::QK4_0;

pub struct AbsMaxStrategy;

impl ScaleStrategy for AbsMaxStrategy {
    fn block_scale(&self, block: &[f32; QK4_0]) -> f32 {
        let amax = block
            .iter()
            .filter(|v| v.is_finite())
            .fold(0f32, |m, v| m.max(v.abs()));
        amax / 7.0
    }

    fn name(&self) -> &'static str {
        "abs_max"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn largest_magnitude_maps_to_seven_steps() {
        let mut block = [0.5f32; QK4_0];
        block[9] = -3.5;
        assert_eq!(AbsMaxStrategy.block_scale(&block), 0.5);
    }

    #[test]
    fn infinite_weight_does_not_poison_block() {
        let mut block = [0.0f32; QK4_0];
        block[0] = 7.0;
        block[1] = -1.0;
        block[2] = f32::INFINITY;
        block[3] = f32::NEG_INFINITY;
        block[4] = f32::NAN;
        let scale = AbsMaxStrategy.block_scale(&block);
        assert_eq!(scale, 1.0);

        let out = crate::quant::BlockQ4_0::quantize(&block, scale).dequantize();
        assert!(out.iter().all(|v| v.is_finite()));
        assert_eq!(&out[..5], &[7.0, -1.0, 7.0, -8.0, 0.0]);
    }
}
