//! The fixed tensor ordering and the offsets derived from it.
//!
//! [`GLOBAL_ORDER`] and [`LAYER_ORDER`] are the only description of which
//! tensor lives where. The writer walks a [`LayoutPlan`] to emit regions and
//! the loader walks the same plan to address them, so the two directions
//! cannot disagree about ordering.

use std::fmt;

use super::error::{FormatError, Result};
use super::format::FormatSpec;
use super::header::{FileHeader, HEADER_SIZE};
use crate::quant::q4_0_tensor_size;

/// Encoding of a tensor region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Storage {
    /// Raw little-endian float32.
    F32,
    /// Rows of 20-byte Q4_0 blocks, quantized along the last axis.
    Q4_0,
}

impl Storage {
    /// Bytes occupied by a tensor of `shape`, excluding alignment padding.
    pub fn byte_len(&self, shape: &[usize]) -> Result<u64> {
        let overflow = || FormatError::shape(format!("{shape:?} overflows"));
        match self {
            Storage::F32 => {
                let elems = shape
                    .iter()
                    .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                    .ok_or_else(overflow)?;
                let bytes = elems.checked_mul(4).ok_or_else(overflow)?;
                Ok(bytes as u64)
            }
            Storage::Q4_0 => match *shape {
                [rows, cols] => Ok(q4_0_tensor_size(rows, cols)? as u64),
                _ => Err(FormatError::shape(format!(
                    "Q4_0 tensors must be 2-D, got {shape:?}"
                ))),
            },
        }
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::F32 => f.write_str("f32"),
            Storage::Q4_0 => f.write_str("q4_0"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorRole {
    TokenEmbedding,
    OutputNorm,
    Output,
    AttnNorm,
    Wq,
    Wk,
    Wv,
    Wo,
    FfnNorm,
    WGate,
    WUp,
    WDown,
}

/// Tensors stored once, before the layers.
pub const GLOBAL_ORDER: [TensorRole; 3] = [
    TensorRole::TokenEmbedding,
    TensorRole::OutputNorm,
    TensorRole::Output,
];

/// Tensors stored for each layer, in file order.
pub const LAYER_ORDER: [TensorRole; 9] = [
    TensorRole::AttnNorm,
    TensorRole::Wq,
    TensorRole::Wk,
    TensorRole::Wv,
    TensorRole::Wo,
    TensorRole::FfnNorm,
    TensorRole::WGate,
    TensorRole::WUp,
    TensorRole::WDown,
];

impl TensorRole {
    pub fn key(&self) -> &'static str {
        match self {
            TensorRole::TokenEmbedding => "token_embd",
            TensorRole::OutputNorm => "output_norm",
            TensorRole::Output => "output",
            TensorRole::AttnNorm => "attn_norm",
            TensorRole::Wq => "wq",
            TensorRole::Wk => "wk",
            TensorRole::Wv => "wv",
            TensorRole::Wo => "wo",
            TensorRole::FfnNorm => "ffn_norm",
            TensorRole::WGate => "w_gate",
            TensorRole::WUp => "w_up",
            TensorRole::WDown => "w_down",
        }
    }

    pub fn storage(&self) -> Storage {
        match self {
            TensorRole::Wq
            | TensorRole::Wk
            | TensorRole::Wv
            | TensorRole::Wo
            | TensorRole::WGate
            | TensorRole::WUp
            | TensorRole::WDown => Storage::Q4_0,
            _ => Storage::F32,
        }
    }

    /// Whether the row count is the vocabulary size and gets zero-padded.
    pub fn is_vocab_indexed(&self) -> bool {
        matches!(self, TensorRole::TokenEmbedding | TensorRole::Output)
    }

    pub fn is_per_layer(&self) -> bool {
        !GLOBAL_ORDER.contains(self)
    }

    pub fn shape(&self, header: &FileHeader) -> Vec<usize> {
        let vocab = header.vocab_size as usize;
        let dim = header.dim as usize;
        let hidden = header.hidden_dim as usize;
        let kv_dim = header.kv_dim();
        match self {
            TensorRole::TokenEmbedding | TensorRole::Output => vec![vocab, dim],
            TensorRole::OutputNorm | TensorRole::AttnNorm | TensorRole::FfnNorm => vec![dim],
            TensorRole::Wq | TensorRole::Wo => vec![dim, dim],
            TensorRole::Wk | TensorRole::Wv => vec![dim, kv_dim],
            TensorRole::WGate | TensorRole::WUp => vec![dim, hidden],
            TensorRole::WDown => vec![hidden, dim],
        }
    }
}

/// A role bound to a layer index (`None` for global tensors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorSlot {
    pub role: TensorRole,
    pub layer: Option<usize>,
}

impl TensorSlot {
    pub fn global(role: TensorRole) -> Self {
        Self { role, layer: None }
    }

    pub fn layer(role: TensorRole, layer: usize) -> Self {
        Self {
            role,
            layer: Some(layer),
        }
    }

    pub fn name(&self) -> String {
        match self.layer {
            Some(l) => format!("layers.{l}.{}.weight", self.role.key()),
            None => format!("{}.weight", self.role.key()),
        }
    }

    /// Every slot of an `n_layers` model in file order.
    pub fn all(n_layers: usize) -> impl Iterator<Item = TensorSlot> {
        GLOBAL_ORDER
            .into_iter()
            .map(TensorSlot::global)
            .chain((0..n_layers).flat_map(|l| {
                LAYER_ORDER
                    .into_iter()
                    .map(move |role| TensorSlot::layer(role, l))
            }))
    }
}

impl fmt::Display for TensorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Computed view of one tensor in the file. Nothing here is stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorRegion {
    pub slot: TensorSlot,
    pub shape: Vec<usize>,
    pub storage: Storage,
    pub offset: u64,
    pub len: u64,
}

impl TensorRegion {
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn name(&self) -> String {
        self.slot.name()
    }
}

/// All regions of a model with their offsets, derived from the header alone.
#[derive(Debug, Clone)]
pub struct LayoutPlan {
    spec: FormatSpec,
    regions: Vec<TensorRegion>,
    file_size: u64,
}

impl LayoutPlan {
    pub fn new(header: &FileHeader, spec: &FormatSpec) -> Result<Self> {
        spec.validate()?;
        header.validate()?;

        let overflow = || FormatError::config("layout", "tensor offsets overflow u64");
        let n_layers = header.n_layers as usize;
        let mut regions = Vec::with_capacity(GLOBAL_ORDER.len() + n_layers * LAYER_ORDER.len());
        let mut cursor = HEADER_SIZE as u64;

        for slot in TensorSlot::all(n_layers) {
            let shape = slot.role.shape(header);
            let storage = slot.role.storage();
            let len = storage.byte_len(&shape)?;
            let offset = spec
                .checked_next_aligned_offset(cursor)
                .ok_or_else(overflow)?;
            cursor = offset.checked_add(len).ok_or_else(overflow)?;
            regions.push(TensorRegion {
                slot,
                shape,
                storage,
                offset,
                len,
            });
        }

        let file_size = spec
            .checked_next_aligned_offset(cursor)
            .ok_or_else(overflow)?;
        Ok(Self {
            spec: *spec,
            regions,
            file_size,
        })
    }

    pub fn spec(&self) -> &FormatSpec {
        &self.spec
    }

    pub fn regions(&self) -> &[TensorRegion] {
        &self.regions
    }

    /// Expected size of a complete file, tail padding included.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn n_layers(&self) -> usize {
        (self.regions.len() - GLOBAL_ORDER.len()) / LAYER_ORDER.len()
    }

    /// Looks up a region by position arithmetic, without scanning.
    pub fn region(&self, slot: TensorSlot) -> Option<&TensorRegion> {
        let index = match slot.layer {
            None => GLOBAL_ORDER.iter().position(|&r| r == slot.role)?,
            Some(layer) => {
                let within = LAYER_ORDER.iter().position(|&r| r == slot.role)?;
                layer
                    .checked_mul(LAYER_ORDER.len())?
                    .checked_add(GLOBAL_ORDER.len())?
                    .checked_add(within)?
            }
        };
        self.regions.get(index)
    }

    pub fn find(&self, name: &str) -> Option<&TensorRegion> {
        self.regions.iter().find(|r| r.slot.name() == name)
    }
}
