//! Write side of the container: header, padded tensor stream, whole-model encode.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use candle_core::Tensor;

use super::error::{FormatError, Result};
use super::format::FormatSpec;
use super::header::{FileHeader, HEADER_SIZE};
use super::layout::{LayoutPlan, Storage, TensorRegion};
use super::validation::{matvec_mse, reconstruction_mse};
use super::{EncodeConfig, ModelConfig};
use crate::quant::{quantize_rows, QK4_0};
use crate::source::WeightSource;
use crate::strategies::{create_strategy, ScaleStrategy};
use crate::utils::{le_bytes, normalize_f32_bytes, pad_rows, with_row_major_f32, ByteOrder};

const ZEROS: [u8; HEADER_SIZE] = [0; HEADER_SIZE];

/// Sequential writer that keeps every region on an alignment boundary.
///
/// The position is tracked here rather than queried from `W`, so any
/// `Write` works, including sinks that only count bytes.
pub struct ModelWriter<W: Write> {
    inner: W,
    spec: FormatSpec,
    pos: u64,
}

impl<W: Write> ModelWriter<W> {
    pub fn new(inner: W, spec: FormatSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            inner,
            spec,
            pos: 0,
        })
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    fn pad_to_alignment(&mut self) -> Result<()> {
        let padding = self.spec.padding_for(self.pos) as usize;
        // alignment divides HEADER_SIZE, so one ZEROS slice always suffices
        self.put(&ZEROS[..padding])
    }

    pub fn write_header(&mut self, header: &FileHeader) -> Result<()> {
        if self.pos != 0 {
            return Err(FormatError::config(
                "header",
                format!("must be written at offset 0, writer is at {}", self.pos),
            ));
        }
        if header.magic != self.spec.magic {
            return Err(FormatError::config(
                "magic",
                format!(
                    "header magic {:#010x} does not match writer magic {:#010x}",
                    header.magic, self.spec.magic
                ),
            ));
        }
        header.validate()?;
        tracing::debug!(?header, "writing header");
        self.put(&header.to_bytes())
    }

    /// Pads to the next boundary and writes `raw` verbatim. Returns the
    /// region's offset.
    ///
    /// Only the region start is checked here; the stream end is brought back
    /// onto a boundary by the next region's padding or by [`finish`](Self::finish).
    pub fn write_tensor(&mut self, raw: &[u8]) -> Result<u64> {
        self.pad_to_alignment()?;
        let offset = self.pos;
        self.spec.ensure_aligned(offset)?;
        self.put(raw)?;
        Ok(offset)
    }

    pub fn write_f32(&mut self, values: &[f32]) -> Result<u64> {
        self.write_tensor(&le_bytes(values))
    }

    /// Writes a raw float32 buffer of known byte order.
    pub fn write_f32_bytes(&mut self, name: &str, bytes: &[u8], order: ByteOrder) -> Result<u64> {
        let bytes = normalize_f32_bytes(bytes, order, name)?;
        self.write_tensor(&bytes)
    }

    /// Quantizes a row-major `[rows, cols]` matrix and writes its blocks.
    pub fn write_q4_0(
        &mut self,
        rows: usize,
        cols: usize,
        values: &[f32],
        strategy: &dyn ScaleStrategy,
    ) -> Result<u64> {
        let blocks = quantize_rows(rows, cols, values, strategy)?;
        self.write_tensor(&blocks)
    }

    /// Pads the tail to a boundary, flushes, and hands back the inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.pad_to_alignment()?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[derive(Debug)]
pub struct EncodeSummary {
    pub bytes_written: u64,
    pub full_precision_tensors: usize,
    pub quantized_tensors: usize,
    pub vocab_size: u32,
    pub vocab_size_unpadded: u32,
    pub total_time_seconds: f32,
    /// `(tensor, reconstruction MSE, mat-vec MSE)` when error measurement is on.
    pub mse_stats: Vec<(String, f32, f32)>,
}

fn encode_region<W: Write>(
    writer: &mut ModelWriter<W>,
    region: &TensorRegion,
    tensor: &Tensor,
    strategy: &dyn ScaleStrategy,
    mse_stats: Option<&mut Vec<(String, f32, f32)>>,
) -> Result<u64> {
    let name = region.name();
    with_row_major_f32(tensor, &name, |values| match region.storage {
        Storage::F32 => writer.write_f32(values),
        Storage::Q4_0 => {
            let (rows, cols) = (region.shape[0], region.shape[1]);
            let blocks = quantize_rows(rows, cols, values, strategy)?;
            if let Some(stats) = mse_stats {
                let direct = reconstruction_mse(values, &blocks)?;
                let matvec = matvec_mse(values, &blocks, cols)?;
                if direct > 1e-2 {
                    tracing::warn!(tensor = %name, mse = direct, "high reconstruction error");
                }
                stats.push((name.clone(), direct, matvec));
            }
            writer.write_tensor(&blocks)
        }
    })
}

/// Encodes a whole model in the fixed tensor order.
///
/// The header is derived from `config` (vocabulary padded to a multiple of
/// 32), then every region of the layout plan is loaded from `source`,
/// checked against the planned shape, encoded, and checked to land at its
/// planned offset.
pub fn encode_model<W, S>(
    out: W,
    config: &ModelConfig,
    source: &S,
    encode: &EncodeConfig,
    spec: &FormatSpec,
) -> Result<(W, EncodeSummary)>
where
    W: Write,
    S: WeightSource + ?Sized,
{
    let start_time = Instant::now();
    let header = FileHeader::from_config(config, spec)?;
    let plan = LayoutPlan::new(&header, spec)?;
    let strategy = create_strategy(encode.strategy_type);

    if header.vocab_size != header.vocab_size_unpadded {
        tracing::warn!(
            vocab_size = header.vocab_size_unpadded,
            padded = header.vocab_size,
            "vocab_size is not a multiple of {QK4_0}, padding rows"
        );
    }
    tracing::info!(
        source = source.name(),
        strategy = strategy.name(),
        regions = plan.regions().len(),
        file_size = plan.file_size(),
        "encoding model"
    );

    let mut writer = ModelWriter::new(out, *spec)?;
    writer.write_header(&header)?;

    let mut mse_stats = Vec::new();
    let (mut full, mut quantized) = (0, 0);
    for region in plan.regions() {
        let mut tensor = source.load(&region.slot)?;
        if region.slot.role.is_vocab_indexed() {
            tensor = pad_rows(&tensor, QK4_0)?.0;
        }
        if tensor.dims() != region.shape.as_slice() {
            return Err(FormatError::shape(format!(
                "{}: source shape {:?}, expected {:?}",
                region.name(),
                tensor.dims(),
                region.shape
            )));
        }

        let stats = encode.measure_error.then_some(&mut mse_stats);
        let offset = encode_region(&mut writer, region, &tensor, strategy.as_ref(), stats)?;
        if offset != region.offset {
            return Err(FormatError::AlignmentViolation {
                offset,
                alignment: spec.alignment,
            });
        }
        match region.storage {
            Storage::F32 => full += 1,
            Storage::Q4_0 => quantized += 1,
        }
        tracing::info!(
            tensor = %region.name(),
            storage = %region.storage,
            shape = ?region.shape,
            offset = format_args!("{:#010x}", region.offset),
            size = region.len,
            "wrote tensor"
        );
    }

    let bytes_written = {
        let end = writer.position();
        let tail = spec.padding_for(end);
        end + tail
    };
    let out = writer.finish()?;
    if bytes_written != plan.file_size() {
        return Err(FormatError::AlignmentViolation {
            offset: bytes_written,
            alignment: spec.alignment,
        });
    }

    Ok((
        out,
        EncodeSummary {
            bytes_written,
            full_precision_tensors: full,
            quantized_tensors: quantized,
            vocab_size: header.vocab_size,
            vocab_size_unpadded: header.vocab_size_unpadded,
            total_time_seconds: start_time.elapsed().as_secs_f32(),
            mse_stats,
        },
    ))
}

/// Encodes a model to `path`. On failure the partial file is removed and
/// the error returned.
pub fn write_model_file<S: WeightSource + ?Sized>(
    path: &Path,
    config: &ModelConfig,
    source: &S,
    encode: &EncodeConfig,
    spec: &FormatSpec,
) -> Result<EncodeSummary> {
    let result = File::create(path).map_err(FormatError::from).and_then(|file| {
        let (buffered, summary) = encode_model(BufWriter::new(file), config, source, encode, spec)?;
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(summary)
    });

    if let Err(err) = &result {
        tracing::warn!(path = %path.display(), error = %err, "encode failed, removing partial file");
        if let Err(rm) = fs::remove_file(path) {
            if rm.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %rm, "could not remove partial file");
            }
        }
    }
    result
}
