//! Deployed datasets.
//!
//! A [`DatasetEntry`] is created by [`Registry::deploy`](crate::registry::Registry::deploy) and lives until it is undeployed.
//! While active it holds an [`ActiveDataset`]: the open [`ChunkSource`], its [`ChunkCache`] and the documents produced at activation.
//! Requests clone the [`Arc<ActiveDataset>`] before doing any work, so deactivating an entry never releases a source under an in-flight request.
//! The source and cache are dropped when the last holder finishes.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use serde::Serialize;

use crate::{
    chunk::{CellGeometry, ChunkKey},
    chunk_cache::{ChunkCache, ChunkCacheCapacity, ChunkCacheResult},
    source::{ChunkSource, ChunkSourceError, DatasetServices},
};

/// Descriptive metadata of a dataset, supplied at deploy time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatasetMetadata {
    /// The category. Datasets are listed grouped by category.
    pub category: String,
    /// A free-form description.
    pub description: String,
    /// The sort index within a category, compared as a plain string.
    pub index: String,
}

/// The resources of an active dataset.
pub struct ActiveDataset {
    source: Arc<dyn ChunkSource>,
    cache: Arc<dyn ChunkCache>,
    descriptor_xml: String,
    metadata_json: String,
    settings_xml: Option<String>,
}

impl ActiveDataset {
    /// Open the source at `locator` and build the documents served for it.
    ///
    /// # Errors
    /// Returns a [`ChunkSourceError`] if the source cannot be opened or the descriptor cannot be built.
    pub fn open(
        locator: &Path,
        dataset_url: &str,
        services: &DatasetServices,
        cache_capacity: ChunkCacheCapacity,
    ) -> Result<Self, ChunkSourceError> {
        let source = services.source_factory.open(locator)?;
        let descriptor_xml = services.descriptor_builder.build(locator, dataset_url)?;
        let settings_xml = services.settings_reader.read(locator);
        Ok(Self {
            metadata_json: source.metadata_json(),
            source,
            cache: cache_capacity.build(),
            descriptor_xml,
            settings_xml,
        })
    }

    /// Retrieve the cell `key`, producing it with `geometry` on a cache miss.
    ///
    /// # Errors
    /// Returns the shared load error if the source fails to produce the cell.
    pub fn cell(&self, key: &ChunkKey, geometry: &CellGeometry) -> ChunkCacheResult {
        let source = &self.source;
        self.cache.get(key, &|key: &ChunkKey| source.produce(key, geometry))
    }

    /// The descriptor document (XML) pointing at this server.
    #[must_use]
    pub fn descriptor_xml(&self) -> &str {
        &self.descriptor_xml
    }

    /// The pyramid metadata document (JSON).
    #[must_use]
    pub fn metadata_json(&self) -> &str {
        &self.metadata_json
    }

    /// The settings document (XML), if the dataset has one.
    #[must_use]
    pub fn settings_xml(&self) -> Option<&str> {
        self.settings_xml.as_deref()
    }

    /// The size of the backing storage in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.source.size_bytes()
    }
}

impl std::fmt::Debug for ActiveDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveDataset")
            .field("cached_cells", &self.cache.len())
            .field("size_bytes", &self.source.size_bytes())
            .finish_non_exhaustive()
    }
}

/// A deployed dataset.
#[derive(Debug)]
pub struct DatasetEntry {
    name: String,
    locator: PathBuf,
    metadata: DatasetMetadata,
    dataset_url: String,
    thumbnail_path: PathBuf,
    sequence: u64,
    size_bytes: AtomicU64,
    active: RwLock<Option<Arc<ActiveDataset>>>,
}

impl DatasetEntry {
    /// Create a new inactive entry.
    ///
    /// `sequence` is the insertion order used to break ties when listing.
    #[must_use]
    pub fn new(
        name: String,
        locator: PathBuf,
        metadata: DatasetMetadata,
        dataset_url: String,
        thumbnail_path: PathBuf,
        sequence: u64,
    ) -> Self {
        Self {
            name,
            locator,
            metadata,
            dataset_url,
            thumbnail_path,
            sequence,
            size_bytes: AtomicU64::new(0),
            active: RwLock::new(None),
        }
    }

    /// The dataset name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The locator of the dataset source.
    #[must_use]
    pub fn locator(&self) -> &Path {
        &self.locator
    }

    /// The descriptive metadata.
    #[must_use]
    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    /// The insertion order of the entry in its registry.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The URL of the dataset, `<base_url>/<name>/`.
    #[must_use]
    pub fn dataset_url(&self) -> &str {
        &self.dataset_url
    }

    /// The URL of the thumbnail, the dataset URL followed by `png`.
    #[must_use]
    pub fn thumbnail_url(&self) -> String {
        format!("{}png", self.dataset_url)
    }

    /// The path the thumbnail is memoised to.
    #[must_use]
    pub fn thumbnail_path(&self) -> &Path {
        &self.thumbnail_path
    }

    /// The size of the backing storage in bytes, as of the last activation.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Returns true if the dataset is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.read().is_some()
    }

    /// Return the active resources, or [`None`] if the dataset is inactive.
    #[must_use]
    pub fn active(&self) -> Option<Arc<ActiveDataset>> {
        self.active.read().clone()
    }

    /// Install `active` unless the entry is already active.
    ///
    /// Returns true if `active` was installed.
    pub fn install(&self, active: ActiveDataset) -> bool {
        let mut guard = self.active.write();
        if guard.is_some() {
            return false;
        }
        self.size_bytes.store(active.size_bytes(), Ordering::Relaxed);
        *guard = Some(Arc::new(active));
        true
    }

    /// Open the source and make the dataset active.
    ///
    /// Returns false if the dataset was already active.
    ///
    /// # Errors
    /// Returns a [`ChunkSourceError`] if the source cannot be opened.
    pub fn activate(
        &self,
        services: &DatasetServices,
        cache_capacity: ChunkCacheCapacity,
    ) -> Result<bool, ChunkSourceError> {
        if self.is_active() {
            return Ok(false);
        }
        let active =
            ActiveDataset::open(&self.locator, &self.dataset_url, services, cache_capacity)?;
        Ok(self.install(active))
    }

    /// Release the active resources.
    ///
    /// In-flight requests keep their handle. Returns false if the dataset was already inactive.
    pub fn deactivate(&self) -> bool {
        self.active.write().take().is_some()
    }

    /// Write the thumbnail to [`thumbnail_path`](Self::thumbnail_path) unless it already exists.
    ///
    /// Failures are logged and leave the dataset without a thumbnail.
    pub fn memoise_thumbnail(&self, services: &DatasetServices) {
        if self.thumbnail_path.exists() {
            return;
        }
        match services.thumbnail_producer.produce(&self.locator) {
            Ok(Some(png)) => {
                if let Err(err) = std::fs::write(&self.thumbnail_path, png) {
                    tracing::warn!(dataset = %self.name, path = %self.thumbnail_path.display(), error = %err, "could not write thumbnail");
                }
            }
            Ok(None) => {
                tracing::debug!(dataset = %self.name, "no thumbnail");
            }
            Err(err) => {
                tracing::warn!(dataset = %self.name, error = %err, "could not produce thumbnail");
            }
        }
    }

    /// Read the memoised thumbnail, if the file exists.
    #[must_use]
    pub fn thumbnail(&self) -> Option<Vec<u8>> {
        std::fs::read(&self.thumbnail_path).ok()
    }

    /// The public description of the dataset.
    #[must_use]
    pub fn info(&self) -> DatasetInfo {
        DatasetInfo {
            id: self.name.clone(),
            category: self.metadata.category.clone(),
            description: self.metadata.description.clone(),
            index: self.metadata.index.clone(),
            thumbnail_url: self.thumbnail_url(),
            dataset_url: self.dataset_url.clone(),
        }
    }
}

/// The public description of a dataset, served by `/<name>/json` and `/json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInfo {
    /// The dataset name.
    pub id: String,
    /// The category.
    pub category: String,
    /// The description.
    pub description: String,
    /// The sort index.
    pub index: String,
    /// The thumbnail URL.
    pub thumbnail_url: String,
    /// The dataset URL.
    pub dataset_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{write_minimal_dataset, write_test_dataset, TEST_PNG};

    fn entry(dir: &Path, locator: PathBuf) -> DatasetEntry {
        DatasetEntry::new(
            "dataset".to_string(),
            locator,
            DatasetMetadata {
                category: "Fly".to_string(),
                description: "A fly".to_string(),
                index: "1".to_string(),
            },
            "http://localhost:8080/dataset/".to_string(),
            dir.join("thumbnails").join("dataset.png"),
            0,
        )
    }

    #[test]
    fn dataset_entry_activate_deactivate() {
        let dir = tempfile::tempdir().unwrap();
        let entry = entry(dir.path(), write_test_dataset(dir.path(), "dataset"));
        let services = DatasetServices::filesystem();
        assert!(!entry.is_active());

        assert!(entry.activate(&services, ChunkCacheCapacity::default()).unwrap());
        assert!(!entry.activate(&services, ChunkCacheCapacity::default()).unwrap());
        assert_eq!(entry.size_bytes(), 6);

        let active = entry.active().unwrap();
        assert!(active.descriptor_xml().contains("bdv.remote"));
        assert!(active.settings_xml().is_some());

        let geometry = CellGeometry::new([3, 1, 1], [0, 0, 0]);
        let block = active.cell(&ChunkKey::new(0, 0, 0, 0), &geometry).unwrap();
        assert_eq!(block.samples(), &[1, 256, 65535]);

        assert!(entry.deactivate());
        assert!(!entry.deactivate());
        assert!(entry.active().is_none());

        // the held handle is still usable
        let block = active.cell(&ChunkKey::new(0, 0, 0, 0), &geometry).unwrap();
        assert_eq!(block.samples(), &[1, 256, 65535]);
    }

    #[test]
    fn dataset_entry_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("thumbnails")).unwrap();
        let services = DatasetServices::filesystem();

        let entry = entry(dir.path(), write_test_dataset(dir.path(), "dataset"));
        assert!(entry.thumbnail().is_none());
        entry.memoise_thumbnail(&services);
        assert_eq!(entry.thumbnail().as_deref(), Some(TEST_PNG));

        // an existing thumbnail is never recreated
        std::fs::write(entry.thumbnail_path(), b"kept").unwrap();
        entry.memoise_thumbnail(&services);
        assert_eq!(entry.thumbnail().as_deref(), Some(b"kept".as_slice()));
    }

    #[test]
    fn dataset_entry_without_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("thumbnails")).unwrap();
        let services = DatasetServices::filesystem();
        let entry = entry(dir.path(), write_minimal_dataset(dir.path(), "dataset"));
        entry.memoise_thumbnail(&services);
        assert!(entry.thumbnail().is_none());
        entry.activate(&services, ChunkCacheCapacity::default()).unwrap();
        assert!(entry.active().unwrap().settings_xml().is_none());
    }

    #[test]
    fn dataset_info_json() {
        let dir = tempfile::tempdir().unwrap();
        let entry = entry(dir.path(), dir.path().join("dataset.xml"));
        let json = serde_json::to_value(entry.info()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "dataset",
                "category": "Fly",
                "description": "A fly",
                "index": "1",
                "thumbnailUrl": "http://localhost:8080/dataset/png",
                "datasetUrl": "http://localhost:8080/dataset/",
            })
        );
    }
}
