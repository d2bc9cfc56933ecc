//! QOR1 file header definitions.
//!
//! The header is the only metadata in a model file. Every tensor offset is
//! recomputed from these fields and the fixed ordering in [`super::layout`].

use super::error::{FormatError, Result};
use super::format::FormatSpec;
use super::ModelConfig;
use crate::quant::QK4_0;

pub const HEADER_SIZE: usize = 64;
pub const MAGIC_QOR1: u32 = 0x514F_5231; // "QOR1"
pub const VERSION: u32 = 2;
pub const MIN_VERSION: u32 = 1;
pub const DEFAULT_RMS_NORM_EPS: f32 = 1e-5;

/// On-disk layout. Every word is little-endian; floats are stored as bits.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
struct RawHeader {
    magic: u32,
    version: u32,
    vocab_size: u32,
    dim: u32,
    hidden_dim: u32,
    n_layers: u32,
    n_heads: u32,
    n_kv_heads: u32,
    max_seq_len: u32,
    rope_freq_base: u32,
    // v2: rms_norm_eps bits; v1: reserved
    ext_rms_norm_eps: u32,
    // v2: unpadded vocabulary size; v1: reserved
    ext_vocab_size_unpadded: u32,
    reserved: [u32; 4],
}

const _: () = assert!(std::mem::size_of::<RawHeader>() == HEADER_SIZE);

/// Decoded header.
///
/// `vocab_size` is the padded row count of the embedding and output
/// matrices. `vocab_size_unpadded` is the real vocabulary; token ids at or
/// above it address zero padding rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub vocab_size: u32,
    pub dim: u32,
    pub hidden_dim: u32,
    pub n_layers: u32,
    pub n_heads: u32,
    pub n_kv_heads: u32,
    pub max_seq_len: u32,
    pub rope_freq_base: f32,
    pub rms_norm_eps: f32,
    pub vocab_size_unpadded: u32,
}

/// Row count after appending zero rows up to the next multiple of `multiple`.
pub fn padded_row_count(rows: usize, multiple: usize) -> Option<usize> {
    match rows % multiple {
        0 => Some(rows),
        r => rows.checked_add(multiple - r),
    }
}

fn to_u32(field: &'static str, value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| FormatError::config(field, format!("{value} does not fit in 32 bits")))
}

impl FileHeader {
    /// Builds the header for `config`, padding the vocabulary to a multiple of 32.
    pub fn from_config(config: &ModelConfig, spec: &FormatSpec) -> Result<Self> {
        let padded_vocab = padded_row_count(config.vocab_size, QK4_0)
            .ok_or_else(|| FormatError::config("vocab_size", "overflows when padded"))?;

        let header = Self {
            magic: spec.magic,
            version: config.version,
            vocab_size: to_u32("vocab_size", padded_vocab)?,
            dim: to_u32("dim", config.dim)?,
            hidden_dim: to_u32("hidden_dim", config.hidden_dim)?,
            n_layers: to_u32("n_layers", config.n_layers)?,
            n_heads: to_u32("n_heads", config.n_heads)?,
            n_kv_heads: to_u32("n_kv_heads", config.n_kv_heads)?,
            max_seq_len: to_u32("max_seq_len", config.max_seq_len)?,
            rope_freq_base: config.rope_freq_base,
            rms_norm_eps: config.rms_norm_eps,
            vocab_size_unpadded: to_u32("vocab_size", config.vocab_size)?,
        };
        header.validate()?;
        Ok(header)
    }

    /// Packs the header into its 64-byte little-endian form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let (eps, unpadded) = if self.version >= 2 {
            (self.rms_norm_eps.to_bits(), self.vocab_size_unpadded)
        } else {
            (0, 0)
        };
        let raw = RawHeader {
            magic: self.magic.to_le(),
            version: self.version.to_le(),
            vocab_size: self.vocab_size.to_le(),
            dim: self.dim.to_le(),
            hidden_dim: self.hidden_dim.to_le(),
            n_layers: self.n_layers.to_le(),
            n_heads: self.n_heads.to_le(),
            n_kv_heads: self.n_kv_heads.to_le(),
            max_seq_len: self.max_seq_len.to_le(),
            rope_freq_base: self.rope_freq_base.to_bits().to_le(),
            ext_rms_norm_eps: eps.to_le(),
            ext_vocab_size_unpadded: unpadded.to_le(),
            reserved: [0; 4],
        };
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(bytemuck::bytes_of(&raw));
        out
    }

    /// Parses and validates the header at the start of `data`.
    pub fn from_bytes(data: &[u8], spec: &FormatSpec) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                needed: HEADER_SIZE as u64,
                actual: data.len() as u64,
            });
        }
        let raw: RawHeader = bytemuck::pod_read_unaligned(&data[..HEADER_SIZE]);

        let magic = u32::from_le(raw.magic);
        if magic != spec.magic {
            return Err(FormatError::InvalidMagic {
                found: magic,
                expected: spec.magic,
            });
        }
        let version = u32::from_le(raw.version);
        if !(MIN_VERSION..=VERSION).contains(&version) {
            return Err(FormatError::UnsupportedVersion(version));
        }
        if raw.reserved.iter().any(|&w| w != 0) {
            return Err(FormatError::config("reserved", "reserved words must be zero"));
        }

        let vocab_size = u32::from_le(raw.vocab_size);
        let (rms_norm_eps, vocab_size_unpadded) = if version >= 2 {
            (
                f32::from_bits(u32::from_le(raw.ext_rms_norm_eps)),
                u32::from_le(raw.ext_vocab_size_unpadded),
            )
        } else {
            if raw.ext_rms_norm_eps != 0 || raw.ext_vocab_size_unpadded != 0 {
                return Err(FormatError::config("reserved", "reserved words must be zero"));
            }
            (DEFAULT_RMS_NORM_EPS, vocab_size)
        };

        let header = Self {
            magic,
            version,
            vocab_size,
            dim: u32::from_le(raw.dim),
            hidden_dim: u32::from_le(raw.hidden_dim),
            n_layers: u32::from_le(raw.n_layers),
            n_heads: u32::from_le(raw.n_heads),
            n_kv_heads: u32::from_le(raw.n_kv_heads),
            max_seq_len: u32::from_le(raw.max_seq_len),
            rope_freq_base: f32::from_bits(u32::from_le(raw.rope_freq_base)),
            rms_norm_eps,
            vocab_size_unpadded,
        };
        header.validate()?;
        Ok(header)
    }

    /// Semantic checks shared by the writer and the loader.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_VERSION..=VERSION).contains(&self.version) {
            return Err(FormatError::UnsupportedVersion(self.version));
        }
        let nonzero = [
            ("vocab_size", self.vocab_size),
            ("dim", self.dim),
            ("hidden_dim", self.hidden_dim),
            ("n_layers", self.n_layers),
            ("n_heads", self.n_heads),
            ("n_kv_heads", self.n_kv_heads),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(FormatError::config(field, "must be nonzero"));
            }
        }
        let block = QK4_0 as u32;
        if self.dim % block != 0 {
            return Err(FormatError::config(
                "dim",
                format!("{} is not a multiple of {block}", self.dim),
            ));
        }
        if self.hidden_dim % block != 0 {
            return Err(FormatError::config(
                "hidden_dim",
                format!("{} is not a multiple of {block}", self.hidden_dim),
            ));
        }
        if self.dim % self.n_heads != 0 {
            return Err(FormatError::config(
                "n_heads",
                format!("{} does not divide dim {}", self.n_heads, self.dim),
            ));
        }
        if self.n_kv_heads > self.n_heads || self.n_heads % self.n_kv_heads != 0 {
            return Err(FormatError::config(
                "n_kv_heads",
                format!(
                    "{} must divide n_heads {}",
                    self.n_kv_heads, self.n_heads
                ),
            ));
        }
        if self.kv_dim() % QK4_0 != 0 {
            return Err(FormatError::config(
                "n_kv_heads",
                format!("kv_dim {} is not a multiple of {QK4_0}", self.kv_dim()),
            ));
        }
        if !self.rope_freq_base.is_finite() {
            return Err(FormatError::config("rope_freq_base", "must be finite"));
        }
        if self.version >= 2 {
            if !(self.rms_norm_eps.is_finite() && self.rms_norm_eps > 0.0) {
                return Err(FormatError::config("rms_norm_eps", "must be positive"));
            }
            if self.vocab_size_unpadded == 0 || self.vocab_size_unpadded > self.vocab_size {
                return Err(FormatError::config(
                    "vocab_size",
                    format!(
                        "unpadded size {} outside 1..={}",
                        self.vocab_size_unpadded, self.vocab_size
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn head_dim(&self) -> usize {
        (self.dim / self.n_heads) as usize
    }

    pub fn kv_dim(&self) -> usize {
        self.n_kv_heads as usize * self.head_dim()
    }
}

/// Packs `config` into the 64-byte header.
pub fn write_header(config: &ModelConfig, spec: &FormatSpec) -> Result<[u8; HEADER_SIZE]> {
    spec.validate()?;
    Ok(FileHeader::from_config(config, spec)?.to_bytes())
}
