//! A web server for multi-resolution volumetric image datasets.
//!
//! `bigdataserver` serves large, pre-tiled image pyramids to remote viewers over HTTP, one cell (chunk) at a time.
//! Datasets can be deployed and undeployed while the server is running.
//!
//! ## Overview
//! - [`chunk`]: cell keys, geometry and decoded sample blocks.
//! - [`chunk_cache`]: bounded per-dataset caches with single-flight loading.
//! - [`source`]: the collaborators that open datasets, plus a filesystem implementation.
//! - [`dataset`] and [`registry`]: deployed datasets and the concurrent registry mapping names to them.
//! - [`protocol`]: the dataset wire protocol, independent of the HTTP framework.
//! - [`stats`] and [`manager`]: traffic sampling and administrative operations.
//! - [`server`]: the [axum](https://docs.rs/axum) server tying it together, configured by [`config::ServerConfig`].
//!
//! ## Example
//! ```rust,no_run
//! # use bigdataserver::{config::ServerConfig, dataset_list::DatasetSpec, server::Server};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = ServerConfig::default();
//! config.set_port(8080).set_manager_enabled(true);
//! let server = Server::new(config)?;
//! server.deploy_all(vec![DatasetSpec::new("drosophila", "/data/drosophila.xml")])?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Wire Protocol
//! | Path / query | Response |
//! |---|---|
//! | `/<name>` | descriptor document (`application/xml`) |
//! | `/<name>?p=init` | pyramid metadata (`application/json`) |
//! | `/<name>?p=cell/<index>/<t>/<s>/<level>/<dx>/<dy>/<dz>/<mx>/<my>/<mz>` | big-endian `u16` samples (`application/octet-stream`) |
//! | `/<name>/settings` | viewer settings (`application/xml`) |
//! | `/<name>/png` | thumbnail (`image/png`) |
//! | `/<name>/json` | dataset description |
//! | `/json` | descriptions of all active datasets |
//! | `/manager?op=...` | administrative operations, see [`manager`] |
//!
//! ## Licence
//! `bigdataserver` is licensed under either of
//!  - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//!  - the MIT license <http://opensource.org/licenses/MIT>, at your option.

#![warn(unused_variables)]
#![warn(dead_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::missing_panics_doc)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod chunk;
pub mod chunk_cache;
pub mod config;
pub mod dataset;
pub mod dataset_list;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod source;
pub mod stats;

#[cfg(test)]
mod test_util;
