//! CLI for converting a safetensors Llama checkpoint to a QOR1 model file.

use anyhow::{Context, Result};
use qorus_weights::{convert_safetensors, EncodeConfig, ModelConfig, StrategyType};
use std::path::PathBuf;
use std::str::FromStr;

const USAGE: &str = "Usage: qor-convert <input.safetensors> <output.qor>";

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={v:?}: {e}")),
        Err(_) => Ok(default),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Parse arguments
    let mut args = std::env::args().skip(1);
    let in_file: PathBuf = args.next().context(USAGE)?.into();
    let out_file: PathBuf = args.next().context(USAGE)?.into();

    // Configuration from environment
    let defaults = ModelConfig::default();
    let base = ModelConfig {
        n_heads: env_or("QOR_N_HEADS", defaults.n_heads)?,
        n_kv_heads: env_or("QOR_N_KV_HEADS", defaults.n_kv_heads)?,
        max_seq_len: env_or("QOR_MAX_SEQ_LEN", defaults.max_seq_len)?,
        rope_freq_base: env_or("QOR_ROPE_FREQ_BASE", defaults.rope_freq_base)?,
        rms_norm_eps: env_or("QOR_RMS_NORM_EPS", defaults.rms_norm_eps)?,
        version: env_or("QOR_VERSION", defaults.version)?,
        ..defaults
    };
    let encode = EncodeConfig {
        strategy_type: env_or("QOR_STRATEGY", StrategyType::AbsMax)?,
        measure_error: env_or("QOR_MEASURE_ERROR", false)?,
    };

    println!("Input   : {}", in_file.display());
    println!("Output  : {}", out_file.display());
    println!("Strategy: {:?}", encode.strategy_type);

    let summary = convert_safetensors(&in_file, &out_file, &base, &encode)
        .with_context(|| format!("converting {}", in_file.display()))?;

    println!(
        "Done in {:.2}s. {} bytes, f32 tensors: {}, q4_0 tensors: {}",
        summary.total_time_seconds,
        summary.bytes_written,
        summary.full_precision_tensors,
        summary.quantized_tensors
    );
    if summary.vocab_size != summary.vocab_size_unpadded {
        println!(
            "Vocab padded {} -> {}",
            summary.vocab_size_unpadded, summary.vocab_size
        );
    }

    if !summary.mse_stats.is_empty() {
        println!("\nMSE Statistics:");
        for (name, direct, matvec) in &summary.mse_stats {
            println!("  {name}: direct={direct:.6e}, matvec={matvec:.6e}");
        }
    }

    Ok(())
}
