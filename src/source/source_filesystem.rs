use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use walkdir::WalkDir;

use crate::{
    chunk::{CellGeometry, ChunkBlock, ChunkKey, Endianness},
    chunk_cache::ChunkLoadError,
};

use super::{sidecar_path, ChunkSource, ChunkSourceError, ChunkSourceFactory};

/// The maximum number of samples in a cell.
const MAX_CELL_SAMPLES: u64 = 1 << 24;

/// A chunk source reading raw cells from the filesystem.
///
/// Cells are stored at `<base>.cells/<timepoint>/<setup>/<level>/<index>.cell` as big-endian `u16` samples.
/// A cell without a file is produced as a zero-filled block.
#[derive(Debug)]
pub struct FilesystemChunkSource {
    cells_path: PathBuf,
    metadata_json: String,
    size_bytes: u64,
}

impl FilesystemChunkSource {
    /// Open the dataset at `locator`.
    ///
    /// # Errors
    /// Returns a [`ChunkSourceError`] if the pyramid metadata `<base>.json` is missing or is not valid JSON.
    pub fn open(locator: &Path) -> Result<Self, ChunkSourceError> {
        let metadata_path = sidecar_path(locator, ".json");
        let metadata = match std::fs::read(&metadata_path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ChunkSourceError::NotFound(metadata_path));
            }
            Err(err) => return Err(err.into()),
        };
        let metadata: serde_json::Value =
            serde_json::from_slice(&metadata).map_err(|source| {
                ChunkSourceError::InvalidMetadata {
                    path: metadata_path.clone(),
                    source,
                }
            })?;

        let cells_path = sidecar_path(locator, ".cells");
        let size_bytes = WalkDir::new(&cells_path)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|metadata| metadata.len())
            .sum();

        Ok(Self {
            cells_path,
            metadata_json: metadata.to_string(),
            size_bytes,
        })
    }

    /// Maps a [`ChunkKey`] to the path of its cell file.
    #[must_use]
    pub fn key_to_fspath(&self, key: &ChunkKey) -> PathBuf {
        let mut path = self.cells_path.clone();
        path.push(key.timepoint.to_string());
        path.push(key.setup.to_string());
        path.push(key.level.to_string());
        path.push(format!("{}.cell", key.index));
        path
    }
}

impl ChunkSource for FilesystemChunkSource {
    fn produce(
        &self,
        key: &ChunkKey,
        geometry: &CellGeometry,
    ) -> Result<ChunkBlock, ChunkLoadError> {
        if key.timepoint < 0 || key.setup < 0 || key.level < 0 || key.index < 0 {
            return Err(ChunkLoadError::InvalidChunkKey(*key));
        }
        match geometry.num_samples() {
            Some(num_samples) if num_samples > 0 && num_samples <= MAX_CELL_SAMPLES => {}
            _ => return Err(ChunkLoadError::InvalidGeometry(*geometry)),
        }

        match std::fs::read(self.key_to_fspath(key)) {
            Ok(bytes) => Ok(ChunkBlock::from_bytes(&bytes, Endianness::Big, *geometry)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(ChunkBlock::filled(*geometry, 0)?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn metadata_json(&self) -> String {
        self.metadata_json.clone()
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Opens a [`FilesystemChunkSource`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemSourceFactory;

impl ChunkSourceFactory for FilesystemSourceFactory {
    fn open(&self, locator: &Path) -> Result<Arc<dyn ChunkSource>, ChunkSourceError> {
        Ok(Arc::new(FilesystemChunkSource::open(locator)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::write_test_dataset;

    #[test]
    fn filesystem_source_produce() {
        let dir = tempfile::tempdir().unwrap();
        let locator = write_test_dataset(dir.path(), "dataset");
        let source = FilesystemChunkSource::open(&locator).unwrap();

        let geometry = CellGeometry::new([3, 1, 1], [0, 0, 0]);
        let block = source.produce(&ChunkKey::new(0, 0, 0, 0), &geometry).unwrap();
        assert_eq!(block.samples(), &[1, 256, 65535]);

        // missing cells are filled
        let block = source.produce(&ChunkKey::new(0, 0, 0, 1), &geometry).unwrap();
        assert_eq!(block.samples(), &[0, 0, 0]);

        assert_eq!(source.size_bytes(), 6);
        let metadata: serde_json::Value = serde_json::from_str(&source.metadata_json()).unwrap();
        assert_eq!(metadata["numSetups"], 1);
    }

    #[test]
    fn filesystem_source_invalid_requests() {
        let dir = tempfile::tempdir().unwrap();
        let locator = write_test_dataset(dir.path(), "dataset");
        let source = FilesystemChunkSource::open(&locator).unwrap();

        // stored cell does not match the requested geometry
        let geometry = CellGeometry::new([2, 2, 1], [0, 0, 0]);
        assert!(matches!(
            source.produce(&ChunkKey::new(0, 0, 0, 0), &geometry),
            Err(ChunkLoadError::ChunkBlockError(_))
        ));

        let geometry = CellGeometry::new([0, 2, 1], [0, 0, 0]);
        assert!(matches!(
            source.produce(&ChunkKey::new(0, 0, 0, 0), &geometry),
            Err(ChunkLoadError::InvalidGeometry(_))
        ));

        let geometry = CellGeometry::new([3, 1, 1], [0, 0, 0]);
        assert!(matches!(
            source.produce(&ChunkKey::new(0, 0, 0, -1), &geometry),
            Err(ChunkLoadError::InvalidChunkKey(_))
        ));
    }

    #[test]
    fn filesystem_source_open_errors() {
        let dir = tempfile::tempdir().unwrap();
        let locator = dir.path().join("missing.xml");
        assert!(matches!(
            FilesystemChunkSource::open(&locator),
            Err(ChunkSourceError::NotFound(_))
        ));

        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        assert!(matches!(
            FilesystemSourceFactory.open(&dir.path().join("broken.xml")),
            Err(ChunkSourceError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn filesystem_source_key_to_fspath() {
        let dir = tempfile::tempdir().unwrap();
        let locator = write_test_dataset(dir.path(), "dataset");
        let source = FilesystemChunkSource::open(&locator).unwrap();
        assert_eq!(
            source.key_to_fspath(&ChunkKey::new(1, 2, 3, 45)),
            dir.path().join("dataset.cells/1/2/3/45.cell")
        );
    }
}
