//! Per-block scale selection for Q4_0.

pub mod abs_max;
pub mod signed_max;

pub use abs_max::AbsMaxStrategy;
pub use signed_max::SignedMaxStrategy;

use crate::quant::QK4_0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyType {
    #[default]
    AbsMax,
    SignedMax,
}

impl std::str::FromStr for StrategyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abs_max" => Ok(StrategyType::AbsMax),
            "signed_max" => Ok(StrategyType::SignedMax),
            other => Err(format!("unknown scale strategy {other:?}")),
        }
    }
}

pub trait ScaleStrategy {
    /// Scale to store with this block. Zero for an all-zero block.
    fn block_scale(&self, block: &[f32; QK4_0]) -> f32;

    /// Strategy name for logging
    fn name(&self) -> &'static str;
}

pub fn create_strategy(strategy_type: StrategyType) -> Box<dyn ScaleStrategy> {
    match strategy_type {
        StrategyType::AbsMax => Box::new(AbsMaxStrategy),
        StrategyType::SignedMax => Box::new(SignedMaxStrategy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_create() {
        let t: StrategyType = "signed_max".parse().unwrap();
        assert_eq!(t, StrategyType::SignedMax);
        assert_eq!(create_strategy(t).name(), "signed_max");
        assert_eq!(create_strategy(StrategyType::default()).name(), "abs_max");
        assert!("l2".parse::<StrategyType>().is_err());
    }

    #[test]
    fn zero_block_gets_zero_scale() {
        let block = [0f32; QK4_0];
        assert_eq!(AbsMaxStrategy.block_scale(&block), 0.0);
        assert_eq!(SignedMaxStrategy.block_scale(&block), 0.0);
    }
}
