//! Prints the header and computed region table of a QOR1 model file.

use anyhow::{Context, Result};
use qorus_weights::load_model;
use std::path::PathBuf;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path: PathBuf = std::env::args()
        .nth(1)
        .context("Usage: qor-inspect <model.qor>")?
        .into();
    let model = load_model(&path).with_context(|| format!("loading {}", path.display()))?;
    let h = model.header();

    println!("File     : {} ({} bytes)", path.display(), model.data().len());
    println!("Version  : {}", h.version);
    println!("Vocab    : {} (unpadded {})", h.vocab_size, h.vocab_size_unpadded);
    println!("Dim      : {} (hidden {})", h.dim, h.hidden_dim);
    println!("Layers   : {}", h.n_layers);
    println!("Heads    : {} (kv {})", h.n_heads, h.n_kv_heads);
    println!("Seq len  : {}", h.max_seq_len);
    println!("RoPE base: {}", h.rope_freq_base);
    println!("RMS eps  : {:e}", h.rms_norm_eps);
    println!();

    for region in model.plan().regions() {
        println!(
            "{:<30} | {:<5} | {:<15} | {:08x} | {}",
            region.name(),
            region.storage.to_string(),
            format!("{:?}", region.shape),
            region.offset,
            region.len
        );
    }
    Ok(())
}
