//! Contiguous block ranges on a device

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};

/// A range of blocks, `start` and `length` counted in `block_size` units
///
/// The end of the region, in blocks and in bytes, always fits in a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRegion")]
pub struct Region {
    start: u64,
    length: u64,
    block_size: u32,
}

/// Unchecked form of a saved region
#[derive(Deserialize)]
struct RawRegion {
    start: u64,
    length: u64,
    block_size: u32,
}

impl TryFrom<RawRegion> for Region {
    type Error = StorageError;

    fn try_from(raw: RawRegion) -> Result<Self> {
        Self::new(raw.start, raw.length, raw.block_size)
    }
}

impl Region {
    /// Create a region; the block size must not be zero
    pub fn new(start: u64, length: u64, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(StorageError::InvalidRegion(
                "block size must not be zero".to_string(),
            ));
        }
        start
            .checked_add(length)
            .and_then(|end| end.checked_mul(u64::from(block_size)))
            .ok_or_else(|| {
                StorageError::InvalidRegion(format!(
                    "region [{}, {}, {} B] overflows u64",
                    start, length, block_size
                ))
            })?;

        Ok(Self {
            start,
            length,
            block_size,
        })
    }

    /// Region starting at block 0 covering `bytes` (rounded down to whole blocks)
    pub fn from_bytes(bytes: u64, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(StorageError::InvalidRegion(
                "block size must not be zero".to_string(),
            ));
        }
        Self::new(0, bytes / u64::from(block_size), block_size)
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Last block of the region (inclusive)
    pub fn end(&self) -> Result<u64> {
        if self.is_empty() {
            return Err(StorageError::InvalidRegion(
                "empty region has no end".to_string(),
            ));
        }
        Ok(self.limit()? - 1)
    }

    /// Convert a block count of this region to bytes, saturating at `u64::MAX`
    pub fn to_bytes(&self, blocks: u64) -> u64 {
        blocks.saturating_mul(u64::from(self.block_size))
    }

    /// Size of the region in bytes
    pub fn size_bytes(&self) -> u64 {
        self.to_bytes(self.length)
    }

    /// Change the length so that the region covers `bytes`
    pub fn set_size_bytes(&mut self, bytes: u64) -> Result<()> {
        *self = Self::new(self.start, bytes / u64::from(self.block_size), self.block_size)?;
        Ok(())
    }

    /// True if `other` lies completely inside this region.
    ///
    /// Both regions must use the same block size.
    pub fn contains(&self, other: &Region) -> Result<bool> {
        self.assert_same_block_size(other)?;
        Ok(other.start >= self.start && other.limit()? <= self.limit()?)
    }

    /// True if the two regions share at least one block
    pub fn overlaps(&self, other: &Region) -> Result<bool> {
        self.assert_same_block_size(other)?;
        if self.is_empty() || other.is_empty() {
            return Ok(false);
        }
        Ok(self.start < other.limit()? && other.start < self.limit()?)
    }

    /// First block after the region
    fn limit(&self) -> Result<u64> {
        self.start
            .checked_add(self.length)
            .ok_or_else(|| StorageError::InvalidRegion(format!("region {} overflows u64", self)))
    }

    fn assert_same_block_size(&self, other: &Region) -> Result<()> {
        if self.block_size != other.block_size {
            return Err(StorageError::InvalidRegion(format!(
                "block sizes differ ({} vs {})",
                self.block_size, other.block_size
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {} B]",
            self.start, self.length, self.block_size
        )
    }
}
