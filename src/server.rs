//! The HTTP server.
//!
//! Routes:
//!  - `/json`: the [`DatasetInfo`](crate::dataset::DatasetInfo) of every active dataset, keyed by name,
//!  - `/manager`: administrative operations, only if the manager is enabled, and
//!  - `/<name>[/<target>]`: the [`WireProtocol`] of dataset `<name>`.
//!
//! A dataset request without a response is answered with `404 Not Found` and an empty body.
//! Every response is counted by the [`StatsCollector`].

use std::{collections::HashMap, future::Future, sync::Arc};

use axum::{
    body::HttpBody,
    extract::{Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode, Uri},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;

use crate::{
    config::{ConfigError, ServerConfig, ThumbnailsDirectory},
    dataset_list::DatasetSpec,
    manager::{Manager, ManagerOp, ManagerStatus, CONTENT_TYPE_TEXT},
    protocol::{WireProtocol, CONTENT_TYPE_JSON},
    registry::{
        Registry, RegistryError, RegistryOptions, DATASET_LIST_CONTEXT_NAME, MANAGER_CONTEXT_NAME,
    },
    source::DatasetServices,
    stats::StatsCollector,
};

/// A server error.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration is invalid.
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
    /// A startup dataset could not be deployed.
    #[error(transparent)]
    RegistryError(#[from] RegistryError),
    /// The listener could not be bound.
    #[error("could not bind {addr}: {source}")]
    Bind {
        /// The address.
        addr: String,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The server failed while serving.
    #[error("server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// The state shared by the request handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The dataset registry.
    pub registry: Arc<Registry>,
    /// The dataset wire protocol.
    pub protocol: WireProtocol,
    /// The manager, if enabled.
    pub manager: Option<Manager>,
    /// The traffic statistics.
    pub stats: Arc<StatsCollector>,
}

impl AppState {
    /// Create the state of a server of `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, stats: Arc<StatsCollector>, manager_enabled: bool) -> Self {
        Self {
            protocol: WireProtocol::new(registry.clone()),
            manager: manager_enabled.then(|| Manager::new(registry.clone(), stats.clone())),
            registry,
            stats,
        }
    }
}

/// Build the router serving `state`.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new().route(
        &format!("/{DATASET_LIST_CONTEXT_NAME}"),
        get(dataset_list_handler),
    );
    if state.manager.is_some() {
        router = router.route(&format!("/{MANAGER_CONTEXT_NAME}"), get(manager_handler));
    }
    router
        .fallback(dataset_handler)
        .layer(from_fn_with_state(state.clone(), traffic_middleware))
        .with_state(state)
}

async fn traffic_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let counters = state.stats.counters();
    let _open = counters.open_request();
    let response = next.run(request).await;
    counters.record_response(response.body().size_hint().exact().unwrap_or(0));
    response
}

/// Split a request path into a dataset name and the target below it, e.g. `/fly/settings` into `fly` and `/settings`.
fn split_dataset_path(path: &str) -> (&str, &str) {
    let path = path.strip_prefix('/').unwrap_or(path);
    match path.find('/') {
        Some(position) => (&path[..position], &path[position..]),
        None => (path, ""),
    }
}

async fn dataset_handler(
    State(state): State<AppState>,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let (name, target) = split_dataset_path(uri.path());
    let (name, target) = (name.to_string(), target.to_string());
    let p = query.get("p").cloned();
    let protocol = state.protocol.clone();
    let response =
        tokio::task::spawn_blocking(move || protocol.handle(&name, &target, p.as_deref())).await;
    match response {
        Ok(Some(response)) => {
            ([(CONTENT_TYPE, response.content_type)], response.body).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            tracing::error!(error = %err, "dataset request task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn dataset_list_handler(State(state): State<AppState>) -> Response {
    let datasets: serde_json::Map<String, serde_json::Value> = state
        .registry
        .list()
        .iter()
        .filter(|entry| entry.is_active())
        .filter_map(|entry| {
            serde_json::to_value(entry.info())
                .ok()
                .map(|info| (entry.name().to_string(), info))
        })
        .collect();
    match serde_json::to_string_pretty(&datasets) {
        Ok(json) => ([(CONTENT_TYPE, CONTENT_TYPE_JSON)], json).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "could not serialise dataset list");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn manager_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(manager) = state.manager.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let op = match ManagerOp::from_query(&query) {
        Ok(op) => op,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, [(CONTENT_TYPE, CONTENT_TYPE_TEXT)], err.to_string())
                .into_response()
        }
    };
    tracing::info!(?op, "manager operation");
    match tokio::task::spawn_blocking(move || manager.execute(op)).await {
        Ok(Ok(response)) => {
            let status = match response.status {
                ManagerStatus::Ok => StatusCode::OK,
                ManagerStatus::Rejected => StatusCode::BAD_REQUEST,
                ManagerStatus::NotFound => StatusCode::NOT_FOUND,
            };
            (status, [(CONTENT_TYPE, response.content_type)], response.body).into_response()
        }
        Ok(Err(err)) => {
            (StatusCode::BAD_REQUEST, [(CONTENT_TYPE, CONTENT_TYPE_TEXT)], err.to_string())
                .into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "manager task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// A configured server.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    state: AppState,
    thumbnails_dir: ThumbnailsDirectory,
}

impl Server {
    /// Create a server with the filesystem dataset services.
    ///
    /// # Errors
    /// Returns a [`ServerError`] if the base URL or stats interval is invalid, or no thumbnails directory can be created.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        Self::with_services(config, DatasetServices::filesystem())
    }

    /// Create a server with custom dataset services.
    ///
    /// # Errors
    /// Returns a [`ServerError`] if the base URL or stats interval is invalid, or no thumbnails directory can be created.
    pub fn with_services(
        config: ServerConfig,
        services: DatasetServices,
    ) -> Result<Self, ServerError> {
        let base_url = config.validated_base_url()?;
        let stats_interval = config.validated_stats_interval()?;
        let thumbnails_dir = config.resolve_thumbnails_dir()?;
        let registry = Arc::new(Registry::new(
            services,
            RegistryOptions {
                base_url,
                thumbnails_dir: thumbnails_dir.path().to_path_buf(),
                cache_capacity: config.cache_capacity(),
            },
        ));
        let stats = Arc::new(StatsCollector::new(stats_interval, config.stats_capacity()));
        let state = AppState::new(registry, stats, config.manager_enabled());
        Ok(Self {
            config,
            state,
            thumbnails_dir,
        })
    }

    /// The dataset registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.state.registry
    }

    /// The traffic statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.state.stats
    }

    /// The resolved thumbnails directory.
    #[must_use]
    pub fn thumbnails_dir(&self) -> &ThumbnailsDirectory {
        &self.thumbnails_dir
    }

    /// Deploy `datasets`.
    ///
    /// # Errors
    /// Returns the [`RegistryError`] of the first dataset that cannot be deployed.
    pub fn deploy_all(&self, datasets: Vec<DatasetSpec>) -> Result<(), ServerError> {
        for dataset in datasets {
            self.state
                .registry
                .deploy(&dataset.name, &dataset.locator, dataset.metadata)?;
        }
        Ok(())
    }

    /// Build the router of this server.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind the configured address and serve until a shutdown signal is received.
    ///
    /// # Errors
    /// Returns a [`ServerError`] if the address cannot be bound or serving fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.hostname(), self.config.port());
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.run_with_listener(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` completes.
    ///
    /// # Errors
    /// Returns [`ServerError::Serve`] if serving fails.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let sampler = self.state.stats.clone().spawn();
        tracing::info!(
            addr = ?listener.local_addr().ok(),
            base_url = %self.state.registry.options().base_url,
            thumbnails = %self.thumbnails_dir.path().display(),
            datasets = self.state.registry.len(),
            manager = self.config.manager_enabled(),
            "bigdataserver starting"
        );
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve);
        sampler.abort();
        tracing::info!("bigdataserver stopped");
        result
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(error = %err, "could not register signal handlers, waiting for ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
}
