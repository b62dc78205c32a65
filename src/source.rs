//! Dataset sources and the collaborators needed to deploy a dataset.
//!
//! A dataset is identified by a locator (the path of its XML descriptor).
//! Deploying a dataset uses four collaborators, bundled in [`DatasetServices`]:
//!  - a [`ChunkSourceFactory`] opens a [`ChunkSource`], which produces cells and the pyramid metadata,
//!  - a [`DescriptorBuilder`] rewrites the descriptor to point at this server,
//!  - a [`ThumbnailProducer`] renders a PNG thumbnail, and
//!  - a [`SettingsReader`] reads an optional viewer settings document.
//!
//! The filesystem implementations read sidecar files next to the locator `<base>.xml`:
//!
//! | File | Content |
//! |---|---|
//! | `<base>.json` | pyramid metadata (JSON) |
//! | `<base>.cells/<t>/<s>/<level>/<index>.cell` | raw big-endian `u16` samples of a cell |
//! | `<base>.settings.xml` | viewer settings |
//! | `<base>.png` | thumbnail |

mod source_descriptor;
mod source_filesystem;
mod source_sidecar;

pub use source_descriptor::RemoteDescriptorBuilder;
pub use source_filesystem::{FilesystemChunkSource, FilesystemSourceFactory};
pub use source_sidecar::{FilesystemSettingsReader, FilesystemThumbnailProducer};

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;

use crate::{
    chunk::{CellGeometry, ChunkBlock, ChunkKey},
    chunk_cache::ChunkLoadError,
};

/// A chunk source error.
#[derive(Debug, Error)]
pub enum ChunkSourceError {
    /// A required file does not exist.
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// The pyramid metadata could not be parsed.
    #[error("invalid pyramid metadata in {}: {source}", .path.display())]
    InvalidMetadata {
        /// The metadata path.
        path: PathBuf,
        /// The parse error.
        source: serde_json::Error,
    },
    /// The descriptor document is malformed.
    #[error("invalid descriptor {}: {1}", .0.display())]
    InvalidDescriptor(PathBuf, String),
}

/// Produces the cells of an open dataset.
pub trait ChunkSource: Send + Sync {
    /// Produce the cell identified by `key` with the request-derived `geometry`.
    ///
    /// # Errors
    /// Returns a [`ChunkLoadError`] if the geometry is invalid or the backing storage fails.
    fn produce(
        &self,
        key: &ChunkKey,
        geometry: &CellGeometry,
    ) -> Result<ChunkBlock, ChunkLoadError>;

    /// Return the pyramid metadata document (JSON) served for `p=init`.
    fn metadata_json(&self) -> String;

    /// Return the size of the backing storage in bytes.
    fn size_bytes(&self) -> u64;
}

/// Opens a [`ChunkSource`] from a locator.
pub trait ChunkSourceFactory: Send + Sync {
    /// Open the dataset at `locator`.
    ///
    /// # Errors
    /// Returns a [`ChunkSourceError`] if the dataset cannot be opened.
    fn open(&self, locator: &Path) -> Result<Arc<dyn ChunkSource>, ChunkSourceError>;
}

/// Builds the descriptor document served to clients.
pub trait DescriptorBuilder: Send + Sync {
    /// Build the descriptor of the dataset at `locator`, pointing its image loader at `dataset_url`.
    ///
    /// # Errors
    /// Returns a [`ChunkSourceError`] if the descriptor cannot be read or rewritten.
    fn build(&self, locator: &Path, dataset_url: &str) -> Result<String, ChunkSourceError>;
}

/// Renders a thumbnail of a dataset.
pub trait ThumbnailProducer: Send + Sync {
    /// Produce PNG bytes for the dataset at `locator`, or [`None`] if no thumbnail can be made.
    ///
    /// # Errors
    /// Returns a [`ChunkSourceError`] if rendering fails.
    fn produce(&self, locator: &Path) -> Result<Option<Vec<u8>>, ChunkSourceError>;
}

/// Reads the optional settings document of a dataset.
pub trait SettingsReader: Send + Sync {
    /// Read the settings document (XML) of the dataset at `locator`.
    fn read(&self, locator: &Path) -> Option<String>;
}

/// The collaborators used to deploy datasets.
#[derive(Clone)]
pub struct DatasetServices {
    /// Opens chunk sources.
    pub source_factory: Arc<dyn ChunkSourceFactory>,
    /// Builds descriptor documents.
    pub descriptor_builder: Arc<dyn DescriptorBuilder>,
    /// Produces thumbnails.
    pub thumbnail_producer: Arc<dyn ThumbnailProducer>,
    /// Reads settings documents.
    pub settings_reader: Arc<dyn SettingsReader>,
}

impl DatasetServices {
    /// The filesystem collaborators.
    #[must_use]
    pub fn filesystem() -> Self {
        Self {
            source_factory: Arc::new(FilesystemSourceFactory),
            descriptor_builder: Arc::new(RemoteDescriptorBuilder),
            thumbnail_producer: Arc::new(FilesystemThumbnailProducer),
            settings_reader: Arc::new(FilesystemSettingsReader),
        }
    }
}

impl Default for DatasetServices {
    fn default() -> Self {
        Self::filesystem()
    }
}

impl std::fmt::Debug for DatasetServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetServices").finish_non_exhaustive()
    }
}

/// Return the path of a sidecar file of the dataset at `locator`.
///
/// The `.xml` extension of the locator is replaced by `suffix`, e.g. `a/b.xml` with `.settings.xml` is `a/b.settings.xml`.
#[must_use]
pub fn sidecar_path(locator: &Path, suffix: &str) -> PathBuf {
    let base = if locator.extension().is_some_and(|extension| extension == "xml") {
        locator.with_extension("")
    } else {
        locator.to_path_buf()
    };
    let mut path = base.into_os_string();
    path.push(suffix);
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/data/drosophila.xml"), ".settings.xml"),
            PathBuf::from("/data/drosophila.settings.xml")
        );
        assert_eq!(
            sidecar_path(Path::new("/data/a.b.xml"), ".json"),
            PathBuf::from("/data/a.b.json")
        );
        assert_eq!(
            sidecar_path(Path::new("/data/raw"), ".cells"),
            PathBuf::from("/data/raw.cells")
        );
    }
}
