//! Chunk geometry for resumable multi-chunk uploads.
//!
//! The first chunk request fixes the split for the whole session: the chunk
//! count is `max(2, round(size / target_chunk_size))` and every chunk except
//! the last must be exactly `chunk_size` bytes. A resume request for the
//! same checksum replays the identical geometry.

use serde::{Deserialize, Serialize};

/// The fixed split of a declared upload into chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkGeometry {
    /// Total declared size in bytes.
    pub total_size: u64,
    /// Size of every chunk except possibly the last.
    pub chunk_size: u64,
    /// Number of chunks.
    pub chunk_count: u32,
}

impl ChunkGeometry {
    /// Compute the geometry for a declared size and target chunk size.
    pub fn split(total_size: u64, target_chunk_size: u64) -> crate::Result<Self> {
        if total_size == 0 {
            return Err(crate::Error::InvalidSize(
                "declared size must be greater than zero".to_string(),
            ));
        }
        if target_chunk_size == 0 {
            return Err(crate::Error::Config(
                "target chunk size must be greater than zero".to_string(),
            ));
        }
        // Round half up, then floor at two chunks.
        let rounded = (total_size + target_chunk_size / 2) / target_chunk_size;
        let chunk_count = rounded.max(2);
        if chunk_count > u32::MAX as u64 || total_size < chunk_count {
            return Err(crate::Error::InvalidSize(format!(
                "size {} cannot be split into {} chunks",
                total_size, chunk_count
            )));
        }
        let chunk_size = total_size.div_ceil(chunk_count);
        Ok(Self {
            total_size,
            chunk_size,
            chunk_count: chunk_count as u32,
        })
    }

    /// Reconstruct a geometry recorded in a session row.
    pub fn from_parts(total_size: u64, chunk_size: u64, chunk_count: u32) -> Self {
        Self {
            total_size,
            chunk_size,
            chunk_count,
        }
    }

    /// Expected byte size of the chunk at `index`.
    pub fn expected_size(&self, index: u32) -> crate::Result<u64> {
        if index >= self.chunk_count {
            return Err(crate::Error::InvalidChunkIndex {
                index,
                total: self.chunk_count,
            });
        }
        if index == self.chunk_count - 1 {
            Ok(self.total_size - self.chunk_size * (self.chunk_count as u64 - 1))
        } else {
            Ok(self.chunk_size)
        }
    }

    /// Validate an arriving chunk's size against the geometry.
    pub fn check_chunk(&self, index: u32, actual: u64) -> crate::Result<()> {
        let expected = self.expected_size(index)?;
        if actual != expected {
            return Err(crate::Error::ChunkSizeMismatch {
                index,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_rounds_to_nearest() {
        // 250 / 100 rounds to 3 chunks (2.5 rounds up).
        let geo = ChunkGeometry::split(250, 100).unwrap();
        assert_eq!(geo.chunk_count, 3);
        assert_eq!(geo.chunk_size, 84);
        assert_eq!(geo.expected_size(2).unwrap(), 250 - 84 * 2);

        // 240 / 100 rounds down to 2 chunks.
        let geo = ChunkGeometry::split(240, 100).unwrap();
        assert_eq!(geo.chunk_count, 2);
        assert_eq!(geo.chunk_size, 120);
    }

    #[test]
    fn test_split_floors_at_two_chunks() {
        let geo = ChunkGeometry::split(10, 1000).unwrap();
        assert_eq!(geo.chunk_count, 2);
        assert_eq!(geo.chunk_size, 5);
    }

    #[test]
    fn test_split_rejects_zero_size() {
        assert!(ChunkGeometry::split(0, 100).is_err());
    }

    #[test]
    fn test_sizes_sum_to_total() {
        let geo = ChunkGeometry::split(600 * 1024 * 1024, 100 * 1024 * 1024).unwrap();
        assert_eq!(geo.chunk_count, 6);
        let sum: u64 = (0..geo.chunk_count)
            .map(|i| geo.expected_size(i).unwrap())
            .sum();
        assert_eq!(sum, geo.total_size);
    }

    #[test]
    fn test_check_chunk() {
        let geo = ChunkGeometry::split(250, 100).unwrap();
        geo.check_chunk(0, 84).unwrap();
        assert!(geo.check_chunk(0, 82).is_err());
        assert!(geo.check_chunk(5, 84).is_err());
    }
}
