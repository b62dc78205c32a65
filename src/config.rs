//! Server configuration options.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

use crate::{
    chunk_cache::ChunkCacheCapacity,
    stats::{DEFAULT_RING_CAPACITY, DEFAULT_SAMPLE_INTERVAL},
};

/// A configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The base URL is not an absolute `http` or `https` URL.
    #[error("invalid base URL {0:?}: {1}")]
    InvalidBaseUrl(String, String),
    /// The thumbnails directory could not be created.
    #[error("could not create a thumbnails directory: {0}")]
    ThumbnailsDirectory(#[from] std::io::Error),
    /// The traffic sampling interval is zero.
    #[error("the stats interval must be greater than zero")]
    ZeroStatsInterval,
}

/// Configuration options of the server.
///
/// # Network Options
///
/// ## Hostname
/// > default: `localhost`
///
/// The hostname the server binds to.
///
/// ## Port
/// > default: `8080`
///
/// The port the server listens on.
///
/// ## Base URL
/// > default: `http://<hostname>:<port>`
///
/// The URL clients reach the server at. Dataset URLs are `<base URL>/<name>/`.
/// Set this when the server runs behind a proxy.
///
/// # Dataset Options
///
/// ## Thumbnails Directory
/// > default: a new temporary directory
///
/// The directory dataset thumbnails are memoised to. It is created if it does not exist.
/// If it cannot be created or is not a directory, a temporary directory is used instead.
///
/// ## Chunk Cache Capacity
/// > default: [`ChunkCacheCapacity::Chunks`]`(4096)`
///
/// The capacity of the chunk cache of each active dataset.
///
/// # Administration Options
///
/// ## Manager Enabled
/// > default: [`false`]
///
/// If enabled, the `/manager` context is served.
///
/// ## Stats Interval
/// > default: `5s`
///
/// The traffic sampling interval. It must be greater than zero.
///
/// ## Stats Capacity
/// > default: `720`
///
/// The number of retained traffic samples.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    hostname: String,
    port: u16,
    base_url: Option<String>,
    thumbnails_dir: Option<PathBuf>,
    cache_capacity: ChunkCacheCapacity,
    manager_enabled: bool,
    stats_interval: Duration,
    stats_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 8080,
            base_url: None,
            thumbnails_dir: None,
            cache_capacity: ChunkCacheCapacity::default(),
            manager_enabled: false,
            stats_interval: DEFAULT_SAMPLE_INTERVAL,
            stats_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Get the [hostname](#hostname) configuration.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Set the [hostname](#hostname) configuration.
    pub fn set_hostname(&mut self, hostname: String) -> &mut Self {
        self.hostname = hostname;
        self
    }

    /// Get the [port](#port) configuration.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Set the [port](#port) configuration.
    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }

    /// Get the [base URL](#base-url) configuration.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.hostname, self.port))
    }

    /// Set the [base URL](#base-url) configuration.
    pub fn set_base_url(&mut self, base_url: Option<String>) -> &mut Self {
        self.base_url = base_url;
        self
    }

    /// Get the [thumbnails directory](#thumbnails-directory) configuration.
    #[must_use]
    pub fn thumbnails_dir(&self) -> Option<&Path> {
        self.thumbnails_dir.as_deref()
    }

    /// Set the [thumbnails directory](#thumbnails-directory) configuration.
    pub fn set_thumbnails_dir(&mut self, thumbnails_dir: Option<PathBuf>) -> &mut Self {
        self.thumbnails_dir = thumbnails_dir;
        self
    }

    /// Get the [chunk cache capacity](#chunk-cache-capacity) configuration.
    #[must_use]
    pub fn cache_capacity(&self) -> ChunkCacheCapacity {
        self.cache_capacity
    }

    /// Set the [chunk cache capacity](#chunk-cache-capacity) configuration.
    pub fn set_cache_capacity(&mut self, cache_capacity: ChunkCacheCapacity) -> &mut Self {
        self.cache_capacity = cache_capacity;
        self
    }

    /// Get the [manager enabled](#manager-enabled) configuration.
    #[must_use]
    pub fn manager_enabled(&self) -> bool {
        self.manager_enabled
    }

    /// Set the [manager enabled](#manager-enabled) configuration.
    pub fn set_manager_enabled(&mut self, manager_enabled: bool) -> &mut Self {
        self.manager_enabled = manager_enabled;
        self
    }

    /// Get the [stats interval](#stats-interval) configuration.
    #[must_use]
    pub fn stats_interval(&self) -> Duration {
        self.stats_interval
    }

    /// Set the [stats interval](#stats-interval) configuration.
    pub fn set_stats_interval(&mut self, stats_interval: Duration) -> &mut Self {
        self.stats_interval = stats_interval;
        self
    }

    /// Get the [stats capacity](#stats-capacity) configuration.
    #[must_use]
    pub fn stats_capacity(&self) -> usize {
        self.stats_capacity
    }

    /// Set the [stats capacity](#stats-capacity) configuration.
    pub fn set_stats_capacity(&mut self, stats_capacity: usize) -> &mut Self {
        self.stats_capacity = stats_capacity;
        self
    }

    /// Check the [base URL](#base-url) and return it without a trailing `/`.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidBaseUrl`] if the base URL is not an absolute `http` or `https` URL.
    pub fn validated_base_url(&self) -> Result<String, ConfigError> {
        let base_url = self.base_url();
        let parsed = url::Url::parse(&base_url)
            .map_err(|err| ConfigError::InvalidBaseUrl(base_url.clone(), err.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl(
                base_url,
                format!("unsupported scheme {}", parsed.scheme()),
            ));
        }
        Ok(base_url.trim_end_matches('/').to_string())
    }

    /// Check the [stats interval](#stats-interval).
    ///
    /// # Errors
    /// Returns [`ConfigError::ZeroStatsInterval`] if the interval is zero.
    pub fn validated_stats_interval(&self) -> Result<Duration, ConfigError> {
        if self.stats_interval.is_zero() {
            Err(ConfigError::ZeroStatsInterval)
        } else {
            Ok(self.stats_interval)
        }
    }

    /// Resolve the [thumbnails directory](#thumbnails-directory), creating it if needed.
    ///
    /// # Errors
    /// Returns [`ConfigError::ThumbnailsDirectory`] if neither the configured nor a temporary directory can be created.
    pub fn resolve_thumbnails_dir(&self) -> Result<ThumbnailsDirectory, ConfigError> {
        if let Some(path) = &self.thumbnails_dir {
            if path.is_dir() {
                return Ok(ThumbnailsDirectory::Path(absolute(path)));
            }
            if path.exists() {
                tracing::warn!(path = %path.display(), "thumbnails directory is not a directory, using a temporary directory");
            } else {
                match std::fs::create_dir_all(path) {
                    Ok(()) => return Ok(ThumbnailsDirectory::Path(absolute(path))),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "could not create thumbnails directory, using a temporary directory");
                    }
                }
            }
        }
        let temporary = tempfile::Builder::new().prefix("thumbnails").tempdir()?;
        Ok(ThumbnailsDirectory::Temporary(temporary))
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// A resolved thumbnails directory. A temporary directory is deleted when dropped.
#[derive(Debug)]
pub enum ThumbnailsDirectory {
    /// A configured directory.
    Path(PathBuf),
    /// A temporary directory.
    Temporary(tempfile::TempDir),
}

impl ThumbnailsDirectory {
    /// The directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Path(path) => path,
            Self::Temporary(temporary) => temporary.path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_base_url() {
        let mut config = ServerConfig::default();
        assert_eq!(config.base_url(), "http://localhost:8080");
        config.set_hostname("example.org".to_string()).set_port(9000);
        assert_eq!(config.validated_base_url().unwrap(), "http://example.org:9000");

        config.set_base_url(Some("https://proxy.example.org/bdv/".to_string()));
        assert_eq!(
            config.validated_base_url().unwrap(),
            "https://proxy.example.org/bdv"
        );

        config.set_base_url(Some("not a url".to_string()));
        assert!(matches!(
            config.validated_base_url(),
            Err(ConfigError::InvalidBaseUrl(..))
        ));
        config.set_base_url(Some("ftp://example.org".to_string()));
        assert!(config.validated_base_url().is_err());
    }

    #[test]
    fn config_stats_interval() {
        let mut config = ServerConfig::default();
        assert_eq!(
            config.validated_stats_interval().unwrap(),
            Duration::from_secs(5)
        );
        config.set_stats_interval(Duration::ZERO);
        assert!(matches!(
            config.validated_stats_interval(),
            Err(ConfigError::ZeroStatsInterval)
        ));
        config.set_stats_interval(Duration::from_millis(500));
        assert!(config.validated_stats_interval().is_ok());
    }

    #[test]
    fn config_thumbnails_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();

        let thumbnails = dir.path().join("a/b/thumbnails");
        config.set_thumbnails_dir(Some(thumbnails.clone()));
        let resolved = config.resolve_thumbnails_dir().unwrap();
        assert!(matches!(resolved, ThumbnailsDirectory::Path(_)));
        assert!(thumbnails.is_dir());

        // a file is not a directory
        let file = dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        config.set_thumbnails_dir(Some(file));
        let resolved = config.resolve_thumbnails_dir().unwrap();
        assert!(matches!(resolved, ThumbnailsDirectory::Temporary(_)));
        assert!(resolved.path().is_dir());

        config.set_thumbnails_dir(None);
        let resolved = config.resolve_thumbnails_dir().unwrap();
        let path = resolved.path().to_path_buf();
        assert!(path.is_dir());
        drop(resolved);
        assert!(!path.exists());
    }

    #[test]
    fn config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port(), 8080);
        assert!(!config.manager_enabled());
        assert_eq!(config.cache_capacity(), ChunkCacheCapacity::Chunks(4096));
        assert_eq!(config.stats_interval(), Duration::from_secs(5));
        assert_eq!(config.stats_capacity(), 720);
    }
}
