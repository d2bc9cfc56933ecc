//! Load side of the container: validate once, then address by arithmetic.
//!
//! All checks (magic, version, dims, every region inside the data) happen in
//! [`LoadedModel::from_bytes`]. After that, tensor access is slicing.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use super::error::{FormatError, Result};
use super::format::FormatSpec;
use super::header::{FileHeader, HEADER_SIZE};
use super::layout::{LayoutPlan, Storage, TensorRegion, TensorSlot};
use crate::quant::{dequantize_rows, BlockQ4_0};

/// A validated model file over any byte container.
pub struct LoadedModel<B: AsRef<[u8]>> {
    data: B,
    header: FileHeader,
    plan: LayoutPlan,
}

/// Memory-mapped model file.
pub type MappedModel = LoadedModel<Mmap>;

impl LoadedModel<Mmap> {
    pub fn open(path: &Path, spec: &FormatSpec) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: read-only mapping; callers must not truncate or rewrite the
        // file while it is loaded.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_bytes(mmap, spec)
    }
}

impl<B: AsRef<[u8]>> LoadedModel<B> {
    pub fn from_bytes(data: B, spec: &FormatSpec) -> Result<Self> {
        let bytes = data.as_ref();
        let header = FileHeader::from_bytes(bytes, spec)?;
        let plan = LayoutPlan::new(&header, spec)?;

        let needed = plan
            .regions()
            .last()
            .map_or(HEADER_SIZE as u64, TensorRegion::end);
        if needed > bytes.len() as u64 {
            return Err(FormatError::Truncated {
                needed,
                actual: bytes.len() as u64,
            });
        }
        tracing::debug!(
            version = header.version,
            vocab = header.vocab_size,
            dim = header.dim,
            layers = header.n_layers,
            regions = plan.regions().len(),
            "model file validated"
        );
        Ok(Self { data, header, plan })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn plan(&self) -> &LayoutPlan {
        &self.plan
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Token ids at or above the unpadded vocabulary address zero rows.
    pub fn is_padding_token(&self, token: u32) -> bool {
        token >= self.header.vocab_size_unpadded
    }

    pub fn region(&self, slot: TensorSlot) -> Result<&TensorRegion> {
        self.plan
            .region(slot)
            .ok_or_else(|| FormatError::MissingTensor(slot.name()))
    }

    pub fn tensor_bytes(&self, region: &TensorRegion) -> Result<&[u8]> {
        let data = self.data.as_ref();
        let truncated = || FormatError::Truncated {
            needed: region.end(),
            actual: data.len() as u64,
        };
        let start = usize::try_from(region.offset).map_err(|_| truncated())?;
        let end = usize::try_from(region.end()).map_err(|_| truncated())?;
        data.get(start..end).ok_or_else(truncated)
    }

    /// Float32 contents of a full-precision region. Borrowed when the host is
    /// little-endian and the mapping is suitably aligned.
    pub fn read_f32(&self, region: &TensorRegion) -> Result<Cow<'_, [f32]>> {
        if region.storage != Storage::F32 {
            return Err(FormatError::shape(format!(
                "{} is {}, not f32",
                region.name(),
                region.storage
            )));
        }
        let bytes = self.tensor_bytes(region)?;
        if cfg!(target_endian = "little") {
            if let Ok(values) = bytemuck::try_cast_slice::<u8, f32>(bytes) {
                return Ok(Cow::Borrowed(values));
            }
        }
        Ok(Cow::Owned(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ))
    }

    /// The blocks of a quantized region, in row-major order.
    pub fn q4_0_blocks(&self, region: &TensorRegion) -> Result<&[BlockQ4_0]> {
        if region.storage != Storage::Q4_0 {
            return Err(FormatError::shape(format!(
                "{} is {}, not q4_0",
                region.name(),
                region.storage
            )));
        }
        Ok(bytemuck::cast_slice(self.tensor_bytes(region)?))
    }

    /// Any region as float32; quantized regions are expanded block by block.
    pub fn dequantize(&self, region: &TensorRegion) -> Result<Vec<f32>> {
        match region.storage {
            Storage::F32 => Ok(self.read_f32(region)?.into_owned()),
            Storage::Q4_0 => dequantize_rows(self.tensor_bytes(region)?),
        }
    }
}
