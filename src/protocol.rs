//! The dataset wire protocol.
//!
//! A dataset request is a target (the path below `/<name>`) and an optional `p` query parameter:
//!
//! | Target | `p` | Response |
//! |---|---|---|
//! | `/settings` | | settings document (`application/xml`) |
//! | `/png` | | thumbnail (`image/png`) |
//! | `/json` | | [`DatasetInfo`](crate::dataset::DatasetInfo) (`application/json`) |
//! | | absent | descriptor document (`application/xml`) |
//! | | `init` | pyramid metadata (`application/json`) |
//! | | `cell/<index>/<t>/<s>/<level>/<dx>/<dy>/<dz>/<mx>/<my>/<mz>` | big-endian `u16` samples (`application/octet-stream`) |
//!
//! Anything else has no response.
//! The protocol is independent of the HTTP framework. [`WireProtocol::handle`] may block on a chunk load.

use std::{str::FromStr, sync::Arc};

use bytes::Bytes;

use crate::{
    chunk::{CellGeometry, ChunkKey, Endianness},
    registry::Registry,
};

/// The content type of a descriptor or settings document.
pub const CONTENT_TYPE_XML: &str = "application/xml";
/// The content type of a JSON document.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// The content type of cell samples.
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
/// The content type of a thumbnail.
pub const CONTENT_TYPE_PNG: &str = "image/png";

/// A parsed dataset request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatasetRequest {
    /// Fetch the settings document.
    Settings,
    /// Fetch the thumbnail.
    Thumbnail,
    /// Fetch the dataset description.
    Json,
    /// Fetch the descriptor document.
    Descriptor,
    /// Fetch the pyramid metadata.
    Init,
    /// Fetch a cell.
    Cell {
        /// The cell key.
        key: ChunkKey,
        /// The geometry to produce the cell with.
        geometry: CellGeometry,
    },
    /// A request with no response.
    Unsupported,
}

impl DatasetRequest {
    /// Parse a request from its `target` and `p` query parameter.
    #[must_use]
    pub fn parse(target: &str, p: Option<&str>) -> Self {
        match target {
            "/settings" => return Self::Settings,
            "/png" => return Self::Thumbnail,
            "/json" => return Self::Json,
            _ => {}
        }
        let Some(p) = p else {
            return Self::Descriptor;
        };
        let mut parts = p.split('/');
        match parts.next() {
            Some("init") => Self::Init,
            Some("cell") => parse_cell(parts).unwrap_or(Self::Unsupported),
            _ => Self::Unsupported,
        }
    }
}

fn parse_cell<'a>(mut parts: impl Iterator<Item = &'a str>) -> Option<DatasetRequest> {
    fn next<'a, T: FromStr>(parts: &mut impl Iterator<Item = &'a str>) -> Option<T> {
        parts.next()?.parse().ok()
    }
    let index = next(&mut parts)?;
    let timepoint = next(&mut parts)?;
    let setup = next(&mut parts)?;
    let level = next(&mut parts)?;
    let dimensions = [next(&mut parts)?, next(&mut parts)?, next(&mut parts)?];
    let min = [next(&mut parts)?, next(&mut parts)?, next(&mut parts)?];
    Some(DatasetRequest::Cell {
        key: ChunkKey::new(timepoint, setup, level, index),
        geometry: CellGeometry::new(dimensions, min),
    })
}

/// A response to a dataset request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolResponse {
    /// The content type.
    pub content_type: &'static str,
    /// The body.
    pub body: Bytes,
}

impl ProtocolResponse {
    fn new(content_type: &'static str, body: impl Into<Bytes>) -> Self {
        Self {
            content_type,
            body: body.into(),
        }
    }
}

/// Answers dataset requests from a [`Registry`].
#[derive(Clone, Debug)]
pub struct WireProtocol {
    registry: Arc<Registry>,
}

impl WireProtocol {
    /// Create a new wire protocol over `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Answer a request for dataset `name`.
    ///
    /// Returns [`None`] if the dataset is unknown or inactive, the request is unsupported, the requested document does not exist, or the cell fails to load.
    #[must_use]
    pub fn handle(&self, name: &str, target: &str, p: Option<&str>) -> Option<ProtocolResponse> {
        let entry = self.registry.lookup(name)?;
        let active = entry.active()?;
        match DatasetRequest::parse(target, p) {
            DatasetRequest::Settings => active
                .settings_xml()
                .map(|settings| ProtocolResponse::new(CONTENT_TYPE_XML, settings.to_string())),
            DatasetRequest::Thumbnail => entry
                .thumbnail()
                .map(|png| ProtocolResponse::new(CONTENT_TYPE_PNG, png)),
            DatasetRequest::Json => match serde_json::to_vec_pretty(&entry.info()) {
                Ok(json) => Some(ProtocolResponse::new(CONTENT_TYPE_JSON, json)),
                Err(err) => {
                    tracing::warn!(dataset = %name, error = %err, "could not serialise dataset info");
                    None
                }
            },
            DatasetRequest::Descriptor => Some(ProtocolResponse::new(
                CONTENT_TYPE_XML,
                active.descriptor_xml().to_string(),
            )),
            DatasetRequest::Init => Some(ProtocolResponse::new(
                CONTENT_TYPE_JSON,
                active.metadata_json().to_string(),
            )),
            DatasetRequest::Cell { key, geometry } => match active.cell(&key, &geometry) {
                Ok(block) => Some(ProtocolResponse::new(
                    CONTENT_TYPE_OCTET_STREAM,
                    block.to_bytes(Endianness::Big),
                )),
                Err(err) => {
                    tracing::warn!(dataset = %name, cell = %key, error = %err, "could not load cell");
                    None
                }
            },
            DatasetRequest::Unsupported => None,
        }
    }
}
