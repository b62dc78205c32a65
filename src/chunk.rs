//! Cells: keys, geometry and decoded sample blocks.
//!
//! A cell of a multi-resolution dataset is addressed by a [`ChunkKey`] (timepoint, setup, pyramid level and flattened grid index).
//! The [`CellGeometry`] (dimensions and minimum corner) is derived from the request and is only needed to *produce* a cell, so it is not part of the key.

mod endianness;

pub use endianness::Endianness;

use bytes::Bytes;
use derive_more::Display;
use thiserror::Error;

/// The identity of a cell in a dataset.
///
/// Two keys with equal fields are interchangeable for caching, even if the geometry accompanying a request is re-derived independently.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
#[display("{timepoint}/{setup}/{level}/{index}")]
pub struct ChunkKey {
    /// The timepoint.
    pub timepoint: i32,
    /// The setup (e.g. channel or angle).
    pub setup: i32,
    /// The pyramid level.
    pub level: i32,
    /// The flattened index of the cell in the cell grid of the level.
    pub index: i64,
}

impl ChunkKey {
    /// Create a new chunk key.
    #[must_use]
    pub const fn new(timepoint: i32, setup: i32, level: i32, index: i64) -> Self {
        Self {
            timepoint,
            setup,
            level,
            index,
        }
    }
}

/// The dimensions and minimum corner of a cell, in samples of its pyramid level.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
#[display("{dimensions:?}@{min:?}")]
pub struct CellGeometry {
    /// The cell dimensions (x, y, z).
    pub dimensions: [u32; 3],
    /// The minimum corner (x, y, z).
    pub min: [i64; 3],
}

impl CellGeometry {
    /// Create a new cell geometry.
    #[must_use]
    pub const fn new(dimensions: [u32; 3], min: [i64; 3]) -> Self {
        Self { dimensions, min }
    }

    /// Return the number of samples in a cell with this geometry.
    ///
    /// Returns [`None`] if the count overflows a [`u64`].
    #[must_use]
    pub fn num_samples(&self) -> Option<u64> {
        self.dimensions
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(u64::from(d)))
    }
}

/// A [`ChunkBlock`] error.
#[derive(Debug, Error)]
pub enum ChunkBlockError {
    /// The number of samples does not match the geometry.
    #[error("got {0} samples, expected {1} for geometry {2}")]
    SampleCountMismatch(usize, u64, CellGeometry),
    /// The geometry has a sample count that cannot be represented.
    #[error("geometry {0} has too many samples")]
    GeometryOverflow(CellGeometry),
    /// Serialised samples must have an even number of bytes.
    #[error("got {0} bytes, expected a multiple of 2")]
    InvalidBytesLength(usize),
}

/// An immutable decoded cell: unsigned 16-bit samples plus the geometry used to produce them.
///
/// Samples are stored in x-fastest order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkBlock {
    samples: Vec<u16>,
    geometry: CellGeometry,
}

impl ChunkBlock {
    /// Create a new chunk block.
    ///
    /// # Errors
    /// Returns [`ChunkBlockError::SampleCountMismatch`] if the number of `samples` does not match `geometry`.
    pub fn new(samples: Vec<u16>, geometry: CellGeometry) -> Result<Self, ChunkBlockError> {
        let expected = geometry
            .num_samples()
            .ok_or(ChunkBlockError::GeometryOverflow(geometry))?;
        if samples.len() as u64 == expected {
            Ok(Self { samples, geometry })
        } else {
            Err(ChunkBlockError::SampleCountMismatch(
                samples.len(),
                expected,
                geometry,
            ))
        }
    }

    /// Create a chunk block with every sample set to `value`.
    ///
    /// # Errors
    /// Returns [`ChunkBlockError::GeometryOverflow`] if the geometry does not fit in memory.
    pub fn filled(geometry: CellGeometry, value: u16) -> Result<Self, ChunkBlockError> {
        let num_samples = geometry
            .num_samples()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(ChunkBlockError::GeometryOverflow(geometry))?;
        Ok(Self {
            samples: vec![value; num_samples],
            geometry,
        })
    }

    /// Decode a chunk block from serialised samples.
    ///
    /// # Errors
    /// Returns an error if `bytes` has an odd length or does not hold exactly the samples of `geometry`.
    pub fn from_bytes(
        bytes: &[u8],
        endianness: Endianness,
        geometry: CellGeometry,
    ) -> Result<Self, ChunkBlockError> {
        let samples = endianness
            .decode_u16(bytes)
            .ok_or(ChunkBlockError::InvalidBytesLength(bytes.len()))?;
        Self::new(samples, geometry)
    }

    /// Serialise the samples. The byte length is twice the sample count.
    #[must_use]
    pub fn to_bytes(&self, endianness: Endianness) -> Bytes {
        Bytes::from(endianness.encode_u16(&self.samples))
    }

    /// Return the samples.
    #[must_use]
    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// Return the geometry.
    #[must_use]
    pub fn geometry(&self) -> &CellGeometry {
        &self.geometry
    }

    /// Return the number of samples.
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Return the size of the decoded samples in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.samples.len() * std::mem::size_of::<u16>()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn chunk_key_identity_ignores_geometry() {
        let mut keys = HashSet::new();
        keys.insert(ChunkKey::new(0, 1, 2, 3));
        keys.insert(ChunkKey::new(0, 1, 2, 3));
        keys.insert(ChunkKey::new(0, 1, 2, 4));
        assert_eq!(keys.len(), 2);
        assert_eq!(ChunkKey::new(0, 1, 2, 3).to_string(), "0/1/2/3");
    }

    #[test]
    fn chunk_block_big_endian() {
        let geometry = CellGeometry::new([3, 1, 1], [0, 0, 0]);
        let block = ChunkBlock::new(vec![1, 256, 65535], geometry).unwrap();
        let bytes = block.to_bytes(Endianness::Big);
        assert_eq!(bytes.as_ref(), &[0x00, 0x01, 0x01, 0x00, 0xFF, 0xFF]);
        assert_eq!(bytes.len(), 2 * block.num_samples());

        let decoded = ChunkBlock::from_bytes(&bytes, Endianness::Big, geometry).unwrap();
        assert_eq!(decoded.samples(), &[1, 256, 65535]);
        assert_eq!(decoded, block);
    }

    #[test]
    fn chunk_block_sample_count_mismatch() {
        let geometry = CellGeometry::new([2, 2, 1], [0, 0, 0]);
        assert!(matches!(
            ChunkBlock::new(vec![0; 3], geometry),
            Err(ChunkBlockError::SampleCountMismatch(3, 4, _))
        ));
        assert!(matches!(
            ChunkBlock::from_bytes(&[0; 7], Endianness::Big, geometry),
            Err(ChunkBlockError::InvalidBytesLength(7))
        ));
    }

    #[test]
    fn chunk_block_filled() {
        let geometry = CellGeometry::new([2, 3, 4], [10, 20, 30]);
        let block = ChunkBlock::filled(geometry, 7).unwrap();
        assert_eq!(block.num_samples(), 24);
        assert_eq!(block.size_bytes(), 48);
        assert!(block.samples().iter().all(|&s| s == 7));
        assert_eq!(block.geometry().min, [10, 20, 30]);
    }

    #[test]
    fn cell_geometry_overflow() {
        let geometry = CellGeometry::new([u32::MAX, u32::MAX, u32::MAX], [0, 0, 0]);
        assert!(geometry.num_samples().is_none());
        assert!(ChunkBlock::filled(geometry, 0).is_err());
    }
}
