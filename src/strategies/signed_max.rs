//! Uses the full code range on the side of the largest-magnitude value,
//! which lands exactly on code 0. Non-finite weights are left out of the scale.

use super::ScaleStrategy;
use crate::quant::QK4_0;

pub struct SignedMaxStrategy;

impl ScaleStrategy for SignedMaxStrategy {
    fn block_scale(&self, block: &[f32; QK4_0]) -> f32 {
        let max = block
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0f32, |m, v| if v.abs() > m.abs() { v } else { m });
        max / -8.0
    }

    fn name(&self) -> &'static str {
        "signed_max"
    }
}
