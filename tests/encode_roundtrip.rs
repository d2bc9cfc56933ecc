mod common;

use candle_core::Tensor;
use common::{random_source, small_config, source_shape};
use qorus_weights::quant::quantize_rows;
use qorus_weights::strategies::AbsMaxStrategy;
use qorus_weights::{
    encode_model, load_model, write_model_file, EncodeConfig, FormatError, FormatSpec,
    InMemorySource, LoadedModel, Storage, TensorRole, TensorSlot, WeightSource, HEADER_SIZE,
};

fn flat(t: &Tensor) -> Vec<f32> {
    t.flatten_all().unwrap().to_vec1::<f32>().unwrap()
}

#[test]
fn written_file_loads_back_exactly() {
    let config = small_config();
    let source = random_source(&config);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.qor");

    let summary = write_model_file(
        &path,
        &config,
        &source,
        &EncodeConfig::default(),
        &FormatSpec::QOR1,
    )
    .unwrap();
    assert_eq!(summary.full_precision_tensors, 3 + 2 * 2);
    assert_eq!(summary.quantized_tensors, 2 * 7);
    assert_eq!(summary.vocab_size, 128);
    assert_eq!(summary.vocab_size_unpadded, 100);

    let model = load_model(&path).unwrap();
    assert_eq!(model.data().len() as u64, summary.bytes_written);
    assert_eq!(model.data().len() as u64, model.plan().file_size());

    let h = model.header();
    assert_eq!(h.vocab_size, 128);
    assert_eq!(h.vocab_size_unpadded, 100);
    assert_eq!(h.dim, 64);
    assert_eq!(h.n_layers, 2);
    assert_eq!(h.rope_freq_base, 10000.0);
    assert!(model.is_padding_token(100));

    for region in model.plan().regions() {
        assert_eq!(region.offset % 64, 0);
        let original = flat(&source.load(&region.slot).unwrap());
        match region.storage {
            Storage::F32 => {
                let stored = model.read_f32(region).unwrap();
                assert_eq!(&stored[..original.len()], original.as_slice());
                assert!(stored[original.len()..].iter().all(|&v| v == 0.0));
            }
            Storage::Q4_0 => {
                let (rows, cols) = (region.shape[0], region.shape[1]);
                let expected = quantize_rows(rows, cols, &original, &AbsMaxStrategy).unwrap();
                assert_eq!(model.tensor_bytes(region).unwrap(), expected.as_slice());

                let restored = model.dequantize(region).unwrap();
                for (chunk, back) in original.chunks(32).zip(restored.chunks(32)) {
                    let scale = chunk.iter().fold(0f32, |m, v| m.max(v.abs())) / 7.0;
                    for (a, b) in chunk.iter().zip(back) {
                        assert!((a - b).abs() <= scale / 2.0 + 1e-5);
                    }
                }
            }
        }
    }
}

#[test]
fn padding_between_regions_is_zero() {
    let config = small_config();
    let source = random_source(&config);
    let (bytes, _) = encode_model(
        Vec::new(),
        &config,
        &source,
        &EncodeConfig::default(),
        &FormatSpec::QOR1,
    )
    .unwrap();
    let model = LoadedModel::from_bytes(bytes.as_slice(), &FormatSpec::QOR1).unwrap();

    let mut prev_end = HEADER_SIZE as u64;
    for region in model.plan().regions() {
        let gap = &bytes[prev_end as usize..region.offset as usize];
        assert!(gap.iter().all(|&b| b == 0), "{}", region.name());
        prev_end = region.end();
    }
    assert!(bytes[prev_end as usize..].iter().all(|&b| b == 0));
}

#[test]
fn strided_sources_encode_identically() {
    let config = small_config();
    let source = random_source(&config);
    let strided: InMemorySource = TensorSlot::all(config.n_layers)
        .map(|slot| {
            let t = source.load(&slot).unwrap();
            let t = if t.rank() == 2 {
                t.t().unwrap().contiguous().unwrap().t().unwrap()
            } else {
                t
            };
            (slot.name(), t)
        })
        .collect();
    assert!(!strided
        .load(&TensorSlot::layer(TensorRole::Wq, 0))
        .unwrap()
        .is_contiguous());

    let encode = EncodeConfig::default();
    let (a, _) = encode_model(Vec::new(), &config, &source, &encode, &FormatSpec::QOR1).unwrap();
    let (b, _) = encode_model(Vec::new(), &config, &strided, &encode, &FormatSpec::QOR1).unwrap();
    assert_eq!(a, b);
}

#[test]
fn measured_error_is_reported_per_quantized_tensor() {
    let config = small_config();
    let source = random_source(&config);
    let encode = EncodeConfig {
        measure_error: true,
        ..EncodeConfig::default()
    };
    let (_, summary) =
        encode_model(Vec::new(), &config, &source, &encode, &FormatSpec::QOR1).unwrap();
    assert_eq!(summary.mse_stats.len(), 14);
    assert_eq!(summary.mse_stats[0].0, "layers.0.wq.weight");
    assert!(summary.mse_stats.iter().all(|(_, d, m)| *d > 0.0 && *m >= 0.0));
}

#[test]
fn failed_encode_removes_partial_file() {
    let config = small_config();
    let mut source = random_source(&config);
    let slot = TensorSlot::layer(TensorRole::WDown, 1);
    let wrong = Tensor::zeros(
        vec![source_shape(&config, &slot)[0], 48],
        candle_core::DType::F32,
        &candle_core::Device::Cpu,
    )
    .unwrap();
    source.insert(slot.name(), wrong);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.qor");
    let err = write_model_file(
        &path,
        &config,
        &source,
        &EncodeConfig::default(),
        &FormatSpec::QOR1,
    )
    .unwrap_err();
    assert!(matches!(err, FormatError::InvalidShape { .. }));
    assert!(!path.exists());
}

#[test]
fn missing_tensor_aborts_encode() {
    let config = small_config();
    let full = random_source(&config);
    let partial: InMemorySource = TensorSlot::all(config.n_layers)
        .filter(|s| s.role != TensorRole::FfnNorm)
        .map(|s| (s.name(), full.load(&s).unwrap()))
        .collect();
    let err = encode_model(
        Vec::new(),
        &config,
        &partial,
        &EncodeConfig::default(),
        &FormatSpec::QOR1,
    )
    .unwrap_err();
    assert!(matches!(err, FormatError::MissingTensor(name) if name == "layers.0.ffn_norm.weight"));
}

#[test]
fn version_one_files_load_with_defaults() {
    let config = qorus_weights::ModelConfig {
        version: 1,
        ..small_config()
    };
    let source = random_source(&config);
    let (bytes, _) = encode_model(
        Vec::new(),
        &config,
        &source,
        &EncodeConfig::default(),
        &FormatSpec::QOR1,
    )
    .unwrap();
    assert!(bytes[40..64].iter().all(|&b| b == 0));
    let model = LoadedModel::from_bytes(bytes, &FormatSpec::QOR1).unwrap();
    assert_eq!(model.header().vocab_size_unpadded, 128);
    assert_eq!(model.header().rms_norm_eps, 1e-5);
}
