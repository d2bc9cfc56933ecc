//! Hugging Face Llama checkpoints stored as a single `.safetensors` file.

use std::fs::File;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use memmap2::Mmap;
use safetensors::SafeTensors;

use super::WeightSource;
use crate::core::{FormatError, ModelConfig, Result, Storage, TensorRole, TensorSlot};
use crate::utils::tensor_to_f32;

const EMBED: &str = "model.embed_tokens.weight";
const FINAL_NORM: &str = "model.norm.weight";
const LM_HEAD: &str = "lm_head.weight";

pub struct SafetensorsSource {
    path: PathBuf,
    mmap: Mmap,
}

impl SafetensorsSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and lives as long as `self`; the
        // checkpoint must not be modified while a conversion runs.
        let mmap = unsafe { Mmap::map(&file)? };
        SafeTensors::deserialize(&mmap)?;
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checkpoint tensor name for a file slot.
    pub fn checkpoint_name(slot: &TensorSlot) -> String {
        let layer = |suffix: &str| match slot.layer {
            Some(l) => format!("model.layers.{l}.{suffix}.weight"),
            None => format!("model.{suffix}.weight"),
        };
        match slot.role {
            TensorRole::TokenEmbedding => EMBED.to_string(),
            TensorRole::OutputNorm => FINAL_NORM.to_string(),
            TensorRole::Output => LM_HEAD.to_string(),
            TensorRole::AttnNorm => layer("input_layernorm"),
            TensorRole::Wq => layer("self_attn.q_proj"),
            TensorRole::Wk => layer("self_attn.k_proj"),
            TensorRole::Wv => layer("self_attn.v_proj"),
            TensorRole::Wo => layer("self_attn.o_proj"),
            TensorRole::FfnNorm => layer("post_attention_layernorm"),
            TensorRole::WGate => layer("mlp.gate_proj"),
            TensorRole::WUp => layer("mlp.up_proj"),
            TensorRole::WDown => layer("mlp.down_proj"),
        }
    }

    fn read(&self, st: &SafeTensors<'_>, name: &str) -> Result<Tensor> {
        let view = st
            .tensor(name)
            .map_err(|_| FormatError::MissingTensor(name.to_string()))?;
        let data = tensor_to_f32(view.data(), view.dtype())?;
        Ok(Tensor::from_vec(data, view.shape().to_vec(), &Device::Cpu)?)
    }

    /// Fills the shape-derived fields of `base` from the checkpoint: vocabulary,
    /// model and hidden dims, and layer count. Head counts and rotary settings
    /// are not recoverable from shapes and are kept from `base`.
    pub fn infer_config(&self, base: &ModelConfig) -> Result<ModelConfig> {
        let st = SafeTensors::deserialize(&self.mmap)?;
        let shape_of = |name: &str| -> Result<Vec<usize>> {
            st.tensor(name)
                .map(|v| v.shape().to_vec())
                .map_err(|_| FormatError::MissingTensor(name.to_string()))
        };

        let (vocab_size, dim) = match shape_of(EMBED)?[..] {
            [v, d] => (v, d),
            ref other => {
                return Err(FormatError::shape(format!("{EMBED} has shape {other:?}")));
            }
        };

        let n_layers = st
            .names()
            .iter()
            .filter_map(|name| name.strip_prefix("model.layers."))
            .filter_map(|rest| rest.split('.').next()?.parse::<usize>().ok())
            .max()
            .map_or(0, |l| l + 1);

        let gate = Self::checkpoint_name(&TensorSlot::layer(TensorRole::WGate, 0));
        let hidden_dim = match shape_of(&gate)?[..] {
            [h, _] => h,
            ref other => {
                return Err(FormatError::shape(format!("{gate} has shape {other:?}")));
            }
        };

        Ok(ModelConfig {
            vocab_size,
            dim,
            hidden_dim,
            n_layers,
            ..base.clone()
        })
    }
}

impl WeightSource for SafetensorsSource {
    fn load(&self, slot: &TensorSlot) -> Result<Tensor> {
        let st = SafeTensors::deserialize(&self.mmap)?;
        let name = Self::checkpoint_name(slot);
        let tensor = match self.read(&st, &name) {
            Err(FormatError::MissingTensor(_)) if slot.role == TensorRole::Output => {
                tracing::info!("{LM_HEAD} missing, using tied embeddings");
                self.read(&st, EMBED)?
            }
            other => other?,
        };
        // Checkpoint projections are [out, in]; the file stores [in, out].
        if slot.role.storage() == Storage::Q4_0 {
            Ok(tensor.t()?)
        } else {
            Ok(tensor)
        }
    }

    fn name(&self) -> &'static str {
        "safetensors"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetensors::tensor::{Dtype, TensorView};
    use std::collections::HashMap;
    use std::io::Write;

    fn write_checkpoint(tensors: &[(&str, Vec<usize>)]) -> tempfile::NamedTempFile {
        let data: Vec<(String, Vec<f32>, Vec<usize>)> = tensors
            .iter()
            .map(|(name, shape)| {
                let n: usize = shape.iter().product();
                let values = (0..n).map(|i| i as f32).collect();
                (name.to_string(), values, shape.clone())
            })
            .collect();
        let views: Vec<(&str, TensorView<'_>)> = data
            .iter()
            .map(|(name, values, shape)| {
                let view =
                    TensorView::new(Dtype::F32, shape.clone(), bytemuck::cast_slice(values))
                        .unwrap();
                (name.as_str(), view)
            })
            .collect();
        let bytes = safetensors::serialize(views, &None::<HashMap<String, String>>).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn maps_slots_to_checkpoint_names() {
        let slot = TensorSlot::layer(TensorRole::WDown, 3);
        assert_eq!(
            SafetensorsSource::checkpoint_name(&slot),
            "model.layers.3.mlp.down_proj.weight"
        );
        let slot = TensorSlot::layer(TensorRole::AttnNorm, 0);
        assert_eq!(
            SafetensorsSource::checkpoint_name(&slot),
            "model.layers.0.input_layernorm.weight"
        );
    }

    #[test]
    fn projections_are_transposed_and_lm_head_falls_back() {
        let file = write_checkpoint(&[
            (EMBED, vec![5, 32]),
            ("model.layers.0.self_attn.k_proj.weight", vec![64, 32]),
        ]);
        let source = SafetensorsSource::open(file.path()).unwrap();

        let wk = source.load(&TensorSlot::layer(TensorRole::Wk, 0)).unwrap();
        assert_eq!(wk.dims(), &[32, 64]);
        assert!(!wk.is_contiguous());
        let rows = wk.to_vec2::<f32>().unwrap();
        assert_eq!(rows[0][1], 32.0);

        let out = source.load(&TensorSlot::global(TensorRole::Output)).unwrap();
        assert_eq!(out.dims(), &[5, 32]);

        assert!(matches!(
            source.load(&TensorSlot::global(TensorRole::OutputNorm)),
            Err(FormatError::MissingTensor(_))
        ));
    }

    #[test]
    fn infers_shape_fields() {
        let file = write_checkpoint(&[
            (EMBED, vec![100, 64]),
            ("model.layers.0.mlp.gate_proj.weight", vec![96, 64]),
            ("model.layers.1.mlp.gate_proj.weight", vec![96, 64]),
        ]);
        let source = SafetensorsSource::open(file.path()).unwrap();
        let config = source.infer_config(&ModelConfig::default()).unwrap();
        assert_eq!(config.vocab_size, 100);
        assert_eq!(config.dim, 64);
        assert_eq!(config.hidden_dim, 96);
        assert_eq!(config.n_layers, 2);
        assert_eq!(config.n_heads, ModelConfig::default().n_heads);
    }
}
