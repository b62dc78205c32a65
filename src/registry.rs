//! The registry of deployed datasets.
//!
//! The [`Registry`] maps dataset names to [`DatasetEntry`]s.
//! Lookups load an immutable snapshot of the map and never wait on writers.
//! Writers (deploy and undeploy) are serialised by a short lock and publish a new snapshot.
//! Opening a source happens before the lock is taken, so a slow deploy never delays other writers for long.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwap;
use itertools::Itertools;
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    chunk_cache::ChunkCacheCapacity,
    dataset::{DatasetEntry, DatasetMetadata},
    source::{ChunkSourceError, DatasetServices},
};

/// The context serving the list of all datasets.
pub const DATASET_LIST_CONTEXT_NAME: &str = "json";

/// The context serving administrative operations.
pub const MANAGER_CONTEXT_NAME: &str = "manager";

/// Names that cannot be used for datasets.
pub const RESERVED_CONTEXT_NAMES: [&str; 2] = [DATASET_LIST_CONTEXT_NAME, MANAGER_CONTEXT_NAME];

/// A registry error.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The name is reserved for a server context.
    #[error("{0} is a reserved name")]
    ReservedName(String),
    /// The name is empty, `.` or `..`, or contains a character other than ASCII letters, digits, `-`, `.`, `_` and `~`.
    #[error("invalid dataset name {0:?}")]
    InvalidName(String),
    /// A dataset with this name is already deployed.
    #[error("{0} already exists")]
    DuplicateName(String),
    /// The locator does not exist.
    #[error("dataset file {} not found", .0.display())]
    SourceNotFound(PathBuf),
    /// No dataset with this name is deployed.
    #[error("{0} not found")]
    NotFound(String),
    /// The dataset source could not be opened.
    #[error("could not open dataset {name}: {source}")]
    SourceOpen {
        /// The dataset name.
        name: String,
        /// The underlying error.
        #[source]
        source: ChunkSourceError,
    },
}

/// Options applied to every dataset of a [`Registry`].
#[derive(Clone, Debug)]
pub struct RegistryOptions {
    /// The base URL of the server, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// The directory thumbnails are memoised to.
    pub thumbnails_dir: PathBuf,
    /// The chunk cache capacity of each active dataset.
    pub cache_capacity: ChunkCacheCapacity,
}

type DatasetMap = HashMap<String, Arc<DatasetEntry>>;

/// The registry of deployed datasets.
pub struct Registry {
    datasets: ArcSwap<DatasetMap>,
    write_lock: Mutex<()>,
    sequence: AtomicU64,
    services: DatasetServices,
    options: RegistryOptions,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("datasets", &self.datasets.load().keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(services: DatasetServices, options: RegistryOptions) -> Self {
        Self {
            datasets: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
            sequence: AtomicU64::new(0),
            services,
            options,
        }
    }

    /// The registry options.
    #[must_use]
    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// The URL of dataset `name`.
    #[must_use]
    pub fn dataset_url(&self, name: &str) -> String {
        format!("{}/{name}/", self.options.base_url.trim_end_matches('/'))
    }

    /// Deploy the dataset at `locator` as `name` and make it active.
    ///
    /// # Errors
    /// Returns a [`RegistryError`] if
    ///  - `name` is reserved or cannot be used verbatim as a URL path segment,
    ///  - a dataset named `name` is already deployed,
    ///  - `locator` does not exist, or
    ///  - the dataset source cannot be opened.
    pub fn deploy(
        &self,
        name: &str,
        locator: &Path,
        metadata: DatasetMetadata,
    ) -> Result<Arc<DatasetEntry>, RegistryError> {
        validate_name(name)?;
        if self.datasets.load().contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        if !locator.exists() {
            return Err(RegistryError::SourceNotFound(locator.to_path_buf()));
        }

        let entry = Arc::new(DatasetEntry::new(
            name.to_string(),
            locator.to_path_buf(),
            metadata,
            self.dataset_url(name),
            self.options.thumbnails_dir.join(format!("{name}.png")),
            self.sequence.fetch_add(1, Ordering::Relaxed),
        ));
        entry
            .activate(&self.services, self.options.cache_capacity)
            .map_err(|source| RegistryError::SourceOpen {
                name: name.to_string(),
                source,
            })?;

        {
            let _guard = self.write_lock.lock();
            let datasets = self.datasets.load();
            if datasets.contains_key(name) {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
            let mut datasets = DatasetMap::clone(&datasets);
            datasets.insert(name.to_string(), entry.clone());
            self.datasets.store(Arc::new(datasets));
        }

        entry.memoise_thumbnail(&self.services);
        tracing::info!(dataset = %name, locator = %locator.display(), "deployed");
        Ok(entry)
    }

    /// Remove dataset `name` and release its resources.
    ///
    /// Requests already holding the dataset finish normally.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] if no dataset named `name` is deployed.
    pub fn undeploy(&self, name: &str) -> Result<Arc<DatasetEntry>, RegistryError> {
        let entry = {
            let _guard = self.write_lock.lock();
            let mut datasets = DatasetMap::clone(&self.datasets.load());
            let entry = datasets
                .remove(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            self.datasets.store(Arc::new(datasets));
            entry
        };
        entry.deactivate();
        tracing::info!(dataset = %name, "undeployed");
        Ok(entry)
    }

    /// Release the resources of dataset `name` while keeping it deployed.
    ///
    /// Returns false if the dataset was already inactive.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] if no dataset named `name` is deployed.
    pub fn deactivate(&self, name: &str) -> Result<bool, RegistryError> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let deactivated = entry.deactivate();
        if deactivated {
            tracing::info!(dataset = %name, "deactivated");
        }
        Ok(deactivated)
    }

    /// Reopen the source of dataset `name`.
    ///
    /// Returns false if the dataset was already active.
    /// If the dataset is undeployed while its source is being opened, the source is released again and the dataset is reported as not found.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] if no dataset named `name` is deployed, or [`RegistryError::SourceOpen`] if its source cannot be opened.
    pub fn activate(&self, name: &str) -> Result<bool, RegistryError> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let activated = entry
            .activate(&self.services, self.options.cache_capacity)
            .map_err(|source| RegistryError::SourceOpen {
                name: name.to_string(),
                source,
            })?;
        let deployed = {
            let _guard = self.write_lock.lock();
            self.lookup(name).is_some_and(|current| Arc::ptr_eq(&current, &entry))
        };
        if !deployed {
            entry.deactivate();
            return Err(RegistryError::NotFound(name.to_string()));
        }
        if activated {
            tracing::info!(dataset = %name, "activated");
        }
        Ok(activated)
    }

    /// Look up dataset `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<DatasetEntry>> {
        self.datasets.load().get(name).cloned()
    }

    /// List every deployed dataset.
    ///
    /// Datasets are sorted by category (case-insensitive), then by index (plain string comparison), then by deploy order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<DatasetEntry>> {
        self.datasets
            .load()
            .values()
            .cloned()
            .sorted_by(|a, b| compare_entries(a, b))
            .collect()
    }

    /// The number of deployed datasets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.datasets.load().len()
    }

    /// Returns true if no dataset is deployed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The total size of the deployed datasets in bytes.
    #[must_use]
    pub fn total_size_bytes(&self) -> u64 {
        self.datasets
            .load()
            .values()
            .map(|entry| entry.size_bytes())
            .sum()
    }
}

/// Dataset names are served verbatim as the first path segment, so they are restricted to unreserved URL characters.
fn validate_name(name: &str) -> Result<(), RegistryError> {
    let path_safe = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'));
    if RESERVED_CONTEXT_NAMES.contains(&name) {
        Err(RegistryError::ReservedName(name.to_string()))
    } else if !path_safe || matches!(name, "" | "." | "..") {
        Err(RegistryError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

fn compare_entries(a: &DatasetEntry, b: &DatasetEntry) -> CmpOrdering {
    a.metadata()
        .category
        .to_lowercase()
        .cmp(&b.metadata().category.to_lowercase())
        .then_with(|| a.metadata().index.cmp(&b.metadata().index))
        .then_with(|| a.sequence().cmp(&b.sequence()))
}
