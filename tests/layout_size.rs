mod common;

use common::{CountingSink, ZeroSource};
use qorus_weights::{encode_model, EncodeConfig, FormatSpec, ModelConfig};

/// Expected file size recomputed from the format rules, independent of the
/// writer and of `LayoutPlan`.
fn expected_file_size(c: &ModelConfig) -> u64 {
    let align = |n: u64| n.div_ceil(64) * 64;
    let q4 = |rows: u64, cols: u64| rows * (cols / 32) * 20;
    let vocab = (c.vocab_size as u64).div_ceil(32) * 32;
    let dim = c.dim as u64;
    let hidden = c.hidden_dim as u64;
    let kv = c.n_kv_heads as u64 * (dim / c.n_heads as u64);

    let globals = 2 * align(vocab * dim * 4) + align(dim * 4);
    let layer = 2 * align(dim * 4)
        + 2 * align(q4(dim, dim))
        + 2 * align(q4(dim, kv))
        + 2 * align(q4(dim, hidden))
        + align(q4(hidden, dim));
    64 + globals + c.n_layers as u64 * layer
}

#[test]
fn two_layer_dim_4096_file_size() {
    let config = ModelConfig {
        vocab_size: 4001,
        n_layers: 2,
        ..ModelConfig::default()
    };
    assert_eq!(config.dim, 4096);

    let source = ZeroSource {
        config: config.clone(),
    };
    let (sink, summary) = encode_model(
        CountingSink::default(),
        &config,
        &source,
        &EncodeConfig::default(),
        &FormatSpec::QOR1,
    )
    .unwrap();

    let expected = expected_file_size(&config);
    assert_eq!(sink.bytes, expected);
    assert_eq!(summary.bytes_written, expected);
    assert_eq!(summary.vocab_size, 4032);
}
