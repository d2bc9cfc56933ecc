//! Format constants and alignment arithmetic shared by writer and reader.

use super::error::{FormatError, Result};
use super::header::{HEADER_SIZE, MAGIC_QOR1};

/// Alignment unit for the header and every tensor region.
pub const ALIGNMENT: u64 = 64;

/// Immutable format parameters injected into both codec directions.
///
/// Writer and reader must be constructed from the same value; the file
/// itself carries only the magic, so any other drift is undetectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSpec {
    pub magic: u32,
    pub alignment: u64,
}

impl FormatSpec {
    pub const QOR1: FormatSpec = FormatSpec {
        magic: MAGIC_QOR1,
        alignment: ALIGNMENT,
    };

    /// Rejects alignments that would break the header-is-aligned invariant.
    pub fn validate(&self) -> Result<()> {
        let a = self.alignment;
        if a == 0 || !a.is_power_of_two() {
            return Err(FormatError::config(
                "alignment",
                format!("{a} is not a nonzero power of two"),
            ));
        }
        if (HEADER_SIZE as u64) % a != 0 {
            return Err(FormatError::config(
                "alignment",
                format!("{a} does not divide the {HEADER_SIZE}-byte header"),
            ));
        }
        Ok(())
    }

    /// `ceil(offset / alignment) * alignment`, or `None` on overflow.
    pub fn checked_next_aligned_offset(&self, offset: u64) -> Option<u64> {
        offset.div_ceil(self.alignment).checked_mul(self.alignment)
    }

    /// `ceil(offset / alignment) * alignment`.
    ///
    /// Saturates to the largest aligned `u64` for offsets within one
    /// alignment unit of `u64::MAX`; file offsets never get there.
    pub fn next_aligned_offset(&self, offset: u64) -> u64 {
        self.checked_next_aligned_offset(offset)
            .unwrap_or(u64::MAX - (u64::MAX % self.alignment))
    }

    /// Number of zero bytes needed to move `offset` onto a boundary.
    pub fn padding_for(&self, offset: u64) -> u64 {
        self.next_aligned_offset(offset) - offset
    }

    pub fn is_aligned(&self, offset: u64) -> bool {
        offset % self.alignment == 0
    }

    pub fn ensure_aligned(&self, offset: u64) -> Result<()> {
        if self.is_aligned(offset) {
            Ok(())
        } else {
            Err(FormatError::AlignmentViolation {
                offset,
                alignment: self.alignment,
            })
        }
    }
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self::QOR1
    }
}
