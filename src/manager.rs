//! Administrative operations.
//!
//! The manager is queried with an `op` parameter:
//!
//! | `op` | Parameters | Response |
//! |---|---|---|
//! | `deploy` | `ds`, `file`, optional `category`, `description`, `index` | text |
//! | `undeploy` | `ds` | text |
//! | `deactivate` | `ds` | text |
//! | `activate` | `ds` | text |
//! | `getDatasets` | | `{"data":[{"name","path"}]}` |
//! | `getServerInfo` | | [`ServerInfo`] |
//! | `getTrafficData` | `tf` | JSON array of `tf` byte rates, most recent last |

use std::{collections::HashMap, fmt::Write, path::PathBuf, sync::Arc};

use serde::Serialize;
use thiserror::Error;

use crate::{
    dataset::DatasetMetadata,
    registry::{Registry, RegistryError},
    stats::StatsCollector,
};

/// The content type of a text response.
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";
/// The content type of a JSON response.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A manager request error.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// A required parameter is missing.
    #[error("missing parameter {0}")]
    MissingParameter(&'static str),
    /// A parameter has an invalid value.
    #[error("invalid value {1:?} for parameter {0}")]
    InvalidParameter(&'static str, String),
    /// The operation is not known.
    #[error("unknown operation {0:?}")]
    UnknownOperation(String),
    /// More traffic samples were requested than are retained.
    #[error("requested {0} traffic samples, at most {1} are retained")]
    TimeframeTooLarge(usize, usize),
    /// A response could not be serialised.
    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),
}

/// A manager operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManagerOp {
    /// Deploy a dataset.
    Deploy {
        /// The dataset name.
        name: String,
        /// The dataset locator.
        file: PathBuf,
        /// The dataset metadata.
        metadata: DatasetMetadata,
    },
    /// Undeploy a dataset.
    Undeploy {
        /// The dataset name.
        name: String,
    },
    /// Deactivate a dataset.
    Deactivate {
        /// The dataset name.
        name: String,
    },
    /// Activate a dataset.
    Activate {
        /// The dataset name.
        name: String,
    },
    /// List the deployed datasets.
    GetDatasets,
    /// Report server counters.
    GetServerInfo,
    /// Report the most recent traffic samples.
    GetTrafficData {
        /// The number of samples.
        timeframe: usize,
    },
}

impl ManagerOp {
    /// Parse an operation from query parameters.
    ///
    /// # Errors
    /// Returns a [`ManagerError`] if `op` is missing or unknown, or a parameter of the operation is missing or invalid.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, ManagerError> {
        let get = |parameter: &'static str| {
            query
                .get(parameter)
                .cloned()
                .ok_or(ManagerError::MissingParameter(parameter))
        };
        let optional = |parameter: &str| query.get(parameter).cloned().unwrap_or_default();
        let op = get("op")?;
        Ok(match op.as_str() {
            "deploy" => Self::Deploy {
                name: get("ds")?,
                file: PathBuf::from(get("file")?),
                metadata: DatasetMetadata {
                    category: optional("category"),
                    description: optional("description"),
                    index: optional("index"),
                },
            },
            "undeploy" => Self::Undeploy { name: get("ds")? },
            "deactivate" => Self::Deactivate { name: get("ds")? },
            "activate" => Self::Activate { name: get("ds")? },
            "getDatasets" => Self::GetDatasets,
            "getServerInfo" => Self::GetServerInfo,
            "getTrafficData" => {
                let tf = get("tf")?;
                let timeframe = tf
                    .parse()
                    .map_err(|_| ManagerError::InvalidParameter("tf", tf))?;
                Self::GetTrafficData { timeframe }
            }
            _ => return Err(ManagerError::UnknownOperation(op)),
        })
    }
}

/// The outcome of a manager operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManagerStatus {
    /// The operation was carried out, or was a no-op.
    Ok,
    /// The operation was rejected.
    Rejected,
    /// The dataset does not exist.
    NotFound,
}

/// A manager response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerResponse {
    /// The outcome.
    pub status: ManagerStatus,
    /// The content type.
    pub content_type: &'static str,
    /// The body.
    pub body: String,
}

impl ManagerResponse {
    fn text(status: ManagerStatus, body: String) -> Self {
        Self {
            status,
            content_type: CONTENT_TYPE_TEXT,
            body,
        }
    }

    fn json(value: &impl Serialize) -> Result<Self, ManagerError> {
        Ok(Self {
            status: ManagerStatus::Ok,
            content_type: CONTENT_TYPE_JSON,
            body: serde_json::to_string(value)?,
        })
    }
}

/// Server counters reported by `getServerInfo`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// The number of deployed datasets.
    pub no_data_sets: usize,
    /// The total size of the deployed datasets, human readable.
    pub size_data_sets: String,
    /// The total size of the deployed datasets in bytes.
    pub size_data_sets_bytes: u64,
    /// The number of body bytes sent, human readable.
    pub bytes_sent: String,
    /// The number of body bytes sent.
    pub bytes_sent_bytes: u64,
    /// The response rate over the last sampling interval.
    pub msg_per_sec: f64,
    /// The number of requests in progress.
    pub open_connections: u64,
    /// The maximum number of requests in progress at once.
    pub max_open_connections: u64,
}

#[derive(Serialize)]
struct DatasetListItem {
    name: String,
    path: String,
}

#[derive(Serialize)]
struct DatasetList {
    data: Vec<DatasetListItem>,
}

/// Executes administrative operations.
#[derive(Clone, Debug)]
pub struct Manager {
    registry: Arc<Registry>,
    stats: Arc<StatsCollector>,
}

impl Manager {
    /// Create a manager of `registry` reporting from `stats`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, stats: Arc<StatsCollector>) -> Self {
        Self { registry, stats }
    }

    /// Execute `op`. May block while a dataset source is opened.
    ///
    /// Registry failures are reported in the response.
    ///
    /// # Errors
    /// Returns a [`ManagerError`] if the operation parameters are out of range.
    pub fn execute(&self, op: ManagerOp) -> Result<ManagerResponse, ManagerError> {
        use ManagerStatus as S;
        Ok(match op {
            ManagerOp::Deploy {
                name,
                file,
                metadata,
            } => match self.registry.deploy(&name, &file, metadata) {
                Ok(_) => ManagerResponse::text(S::Ok, format!("{name} registered.")),
                Err(RegistryError::DuplicateName(_)) => ManagerResponse::text(
                    S::Ok,
                    format!("{name} already exists. Not registered."),
                ),
                Err(err) => {
                    tracing::warn!(dataset = %name, error = %err, "deploy failed");
                    ManagerResponse::text(S::Rejected, format!("{err}. Not registered."))
                }
            },
            ManagerOp::Undeploy { name } => match self.registry.undeploy(&name) {
                Ok(_) => ManagerResponse::text(S::Ok, format!("{name} removed.")),
                Err(err) => registry_error(&err),
            },
            ManagerOp::Deactivate { name } => match self.registry.deactivate(&name) {
                Ok(true) => ManagerResponse::text(S::Ok, format!("{name} deactivated.")),
                Ok(false) => ManagerResponse::text(S::Ok, format!("{name} is already inactive.")),
                Err(err) => registry_error(&err),
            },
            ManagerOp::Activate { name } => match self.registry.activate(&name) {
                Ok(true) => ManagerResponse::text(S::Ok, format!("{name} activated.")),
                Ok(false) => ManagerResponse::text(S::Ok, format!("{name} is already active.")),
                Err(err) => registry_error(&err),
            },
            ManagerOp::GetDatasets => ManagerResponse::json(&self.datasets())?,
            ManagerOp::GetServerInfo => ManagerResponse::json(&self.server_info())?,
            ManagerOp::GetTrafficData { timeframe } => {
                let capacity = self.stats.capacity();
                if timeframe > capacity {
                    return Err(ManagerError::TimeframeTooLarge(timeframe, capacity));
                }
                ManagerResponse::json(&self.stats.traffic(timeframe))?
            }
        })
    }

    fn datasets(&self) -> DatasetList {
        DatasetList {
            data: self
                .registry
                .list()
                .iter()
                .map(|entry| DatasetListItem {
                    name: entry.name().to_string(),
                    path: entry.locator().display().to_string(),
                })
                .collect(),
        }
    }

    /// Collect the server counters.
    #[must_use]
    pub fn server_info(&self) -> ServerInfo {
        let size = self.registry.total_size_bytes();
        let counters = self.stats.counters();
        let bytes_sent = counters.bytes_total();
        ServerInfo {
            no_data_sets: self.registry.len(),
            size_data_sets: byte_size_string(size),
            size_data_sets_bytes: size,
            bytes_sent: byte_size_string(bytes_sent),
            bytes_sent_bytes: bytes_sent,
            msg_per_sec: self.stats.messages_per_second(),
            open_connections: counters.open_requests(),
            max_open_connections: counters.max_open_requests(),
        }
    }
}

fn registry_error(err: &RegistryError) -> ManagerResponse {
    let status = match err {
        RegistryError::NotFound(_) => ManagerStatus::NotFound,
        _ => ManagerStatus::Rejected,
    };
    ManagerResponse::text(status, format!("{err}."))
}

/// Format a byte count with 1024-based units and at most one decimal, e.g. `1.5 kB` or `1,023 B`.
///
/// Ties are rounded to even, so `1280` is `1.2 kB`. Returns `0` for a size of zero.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn byte_size_string(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    if size == 0 {
        return "0".to_string();
    }
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let tenths = (value * 10.0).round_ties_even() as u64;
    let mut formatted = group_thousands(tenths / 10);
    if tenths % 10 != 0 {
        let _ = write!(formatted, ".{}", tenths % 10);
    }
    format!("{formatted} {}", UNITS[unit])
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use super::*;
    use crate::{
        chunk_cache::ChunkCacheCapacity,
        registry::RegistryOptions,
        source::DatasetServices,
        test_util::write_test_dataset,
    };

    fn manager(dir: &Path) -> Manager {
        let thumbnails_dir = dir.join("thumbnails");
        std::fs::create_dir_all(&thumbnails_dir).unwrap();
        let registry = Registry::new(
            DatasetServices::filesystem(),
            RegistryOptions {
                base_url: "http://localhost:8080".to_string(),
                thumbnails_dir,
                cache_capacity: ChunkCacheCapacity::default(),
            },
        );
        Manager::new(
            Arc::new(registry),
            Arc::new(StatsCollector::new(Duration::from_secs(5), 8)),
        )
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn manager_op_from_query() {
        assert_eq!(
            ManagerOp::from_query(&query(&[
                ("op", "deploy"),
                ("ds", "fly"),
                ("file", "/data/fly.xml"),
                ("category", "Insects"),
            ]))
            .unwrap(),
            ManagerOp::Deploy {
                name: "fly".to_string(),
                file: PathBuf::from("/data/fly.xml"),
                metadata: DatasetMetadata {
                    category: "Insects".to_string(),
                    ..Default::default()
                },
            }
        );
        assert_eq!(
            ManagerOp::from_query(&query(&[("op", "getTrafficData"), ("tf", "12")])).unwrap(),
            ManagerOp::GetTrafficData { timeframe: 12 }
        );
        assert!(matches!(
            ManagerOp::from_query(&query(&[("op", "deploy"), ("ds", "fly")])),
            Err(ManagerError::MissingParameter("file"))
        ));
        assert!(matches!(
            ManagerOp::from_query(&query(&[("op", "getTrafficData"), ("tf", "-1")])),
            Err(ManagerError::InvalidParameter("tf", _))
        ));
        assert!(matches!(
            ManagerOp::from_query(&query(&[("op", "reboot")])),
            Err(ManagerError::UnknownOperation(_))
        ));
        assert!(matches!(
            ManagerOp::from_query(&query(&[])),
            Err(ManagerError::MissingParameter("op"))
        ));
    }

    #[test]
    fn manager_deploy_undeploy() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let locator = write_test_dataset(dir.path(), "dataset");
        let deploy = ManagerOp::Deploy {
            name: "fly".to_string(),
            file: locator.clone(),
            metadata: DatasetMetadata::default(),
        };

        let response = manager.execute(deploy.clone()).unwrap();
        assert_eq!(response.status, ManagerStatus::Ok);
        assert_eq!(response.body, "fly registered.");
        assert_eq!(
            manager.execute(deploy).unwrap().body,
            "fly already exists. Not registered."
        );

        let response = manager.execute(ManagerOp::GetDatasets).unwrap();
        let json: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(json["data"][0]["name"], "fly");
        assert_eq!(json["data"][0]["path"], locator.display().to_string());

        let undeploy = ManagerOp::Undeploy {
            name: "fly".to_string(),
        };
        assert_eq!(manager.execute(undeploy.clone()).unwrap().body, "fly removed.");
        let response = manager.execute(undeploy).unwrap();
        assert_eq!(response.status, ManagerStatus::NotFound);
        assert_eq!(response.body, "fly not found.");
    }

    #[test]
    fn manager_deploy_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let response = manager
            .execute(ManagerOp::Deploy {
                name: "json".to_string(),
                file: dir.path().join("x.xml"),
                metadata: DatasetMetadata::default(),
            })
            .unwrap();
        assert_eq!(response.status, ManagerStatus::Rejected);
        assert_eq!(response.body, "json is a reserved name. Not registered.");
    }

    #[test]
    fn manager_deactivate_activate() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let locator = write_test_dataset(dir.path(), "dataset");
        manager
            .execute(ManagerOp::Deploy {
                name: "fly".to_string(),
                file: locator,
                metadata: DatasetMetadata::default(),
            })
            .unwrap();
        let name = || "fly".to_string();
        assert_eq!(
            manager.execute(ManagerOp::Deactivate { name: name() }).unwrap().body,
            "fly deactivated."
        );
        assert_eq!(
            manager.execute(ManagerOp::Deactivate { name: name() }).unwrap().body,
            "fly is already inactive."
        );
        assert_eq!(
            manager.execute(ManagerOp::Activate { name: name() }).unwrap().body,
            "fly activated."
        );
        assert_eq!(
            manager.execute(ManagerOp::Activate { name: name() }).unwrap().body,
            "fly is already active."
        );
    }

    #[test]
    fn manager_server_info_and_traffic() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let locator = write_test_dataset(dir.path(), "dataset");
        manager
            .registry
            .deploy("fly", &locator, DatasetMetadata::default())
            .unwrap();
        manager.stats.counters().record_response(1536);

        let info = manager.server_info();
        assert_eq!(info.no_data_sets, 1);
        assert_eq!(info.size_data_sets, "6 B");
        assert_eq!(info.bytes_sent, "1.5 kB");
        assert_eq!(info.bytes_sent_bytes, 1536);
        let json: serde_json::Value = serde_json::from_str(
            &manager.execute(ManagerOp::GetServerInfo).unwrap().body,
        )
        .unwrap();
        assert_eq!(json["noDataSets"], 1);
        assert_eq!(json["maxOpenConnections"], 0);

        let response = manager
            .execute(ManagerOp::GetTrafficData { timeframe: 3 })
            .unwrap();
        assert_eq!(response.body, "[0,0,0]");
        assert!(matches!(
            manager.execute(ManagerOp::GetTrafficData { timeframe: 9 }),
            Err(ManagerError::TimeframeTooLarge(9, 8))
        ));
    }

    #[test]
    fn manager_byte_size_string() {
        assert_eq!(byte_size_string(0), "0");
        assert_eq!(byte_size_string(1), "1 B");
        assert_eq!(byte_size_string(1023), "1,023 B");
        assert_eq!(byte_size_string(1024), "1 kB");
        assert_eq!(byte_size_string(1536), "1.5 kB");
        assert_eq!(byte_size_string(1280), "1.2 kB");
        assert_eq!(byte_size_string(1792), "1.8 kB");
        assert_eq!(byte_size_string(2304), "2.2 kB");
        assert_eq!(byte_size_string(10 * 1024 * 1024 + 100 * 1024), "10.1 MB");
        assert_eq!(byte_size_string(3 * 1024 * 1024 * 1024), "3 GB");
        assert_eq!(byte_size_string(2048 * 1024_u64.pow(4)), "2,048 TB");
    }
}
