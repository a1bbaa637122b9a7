//! Download every feature from an ArcGIS feature-server layer.
//!
//! Feature servers cap how many records a single request may return
//! (`maxRecordCount`), so the layer is fetched by paging through ranges of
//! object ids. A page at the advertised cap can still time out server-side;
//! the server reports that as a JSON `error` body, and the page size is
//! halved until the first page comes back clean. After the download, the
//! feature set is checked against the id list and missing or duplicated ids
//! are logged.

use std::collections::HashMap;

use geojson::{Feature, FeatureCollection};
use log::{info, warn};
use reqwest::blocking::Client;
use serde_json::Value;

use crate::PipelineError;

/// The parts of an ArcGIS layer definition the downloader needs.
#[derive(Debug, Clone)]
pub struct LayerDefinition {
    pub object_id_field: String,
    pub max_record_count: usize,
}

pub struct FeatureServerClient {
    client: Client,
    base_url: String,
}

impl FeatureServerClient {
    /// Create a client for one layer URL, e.g.
    /// `https://services.arcgis.com/.../USA_Counties/FeatureServer/0/`.
    pub fn new(url: &str) -> Self {
        let base_url = if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{url}/")
        };
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn get_json(&self, suffix: &str, query: &[(&str, &str)]) -> Result<Value, PipelineError> {
        let response = self
            .client
            .get(format!("{}{suffix}", self.base_url))
            .query(query)
            .send()?;
        Ok(response.json()?)
    }

    /// Fetch the layer definition, which names the object-id column and the
    /// per-request record cap.
    pub fn layer_definition(&self) -> Result<LayerDefinition, PipelineError> {
        let definition = self.get_json("", &[("f", "pjson")])?;
        let object_id_field = definition
            .get("objectIdField")
            .and_then(Value::as_str)
            .unwrap_or("OBJECTID")
            .to_string();
        let max_record_count = definition
            .get("maxRecordCount")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                PipelineError::UnexpectedResponse(
                    "layer definition has no maxRecordCount".to_string(),
                )
            })? as usize;
        Ok(LayerDefinition {
            object_id_field,
            max_record_count,
        })
    }

    /// Fetch the full, sorted list of object ids in the layer.
    fn object_ids(&self, fid: &str) -> Result<Vec<i64>, PipelineError> {
        let where_clause = format!("{fid} is not null");
        let body = self.get_json(
            "query",
            &[
                ("f", "geojson"),
                ("returnIdsOnly", "true"),
                ("where", &where_clause),
            ],
        )?;
        extract_object_ids(&body).ok_or_else(|| {
            PipelineError::UnexpectedResponse("no objectIds in id-only query response".to_string())
        })
    }

    fn fetch_range(
        &self,
        fid: &str,
        out_fields: &str,
        start: i64,
        end: i64,
    ) -> Result<Value, PipelineError> {
        let where_clause = format!("{fid}>={start} and {fid}<={end}");
        self.get_json(
            "query",
            &[
                ("f", "geojson"),
                ("outFields", out_fields),
                ("where", &where_clause),
            ],
        )
    }

    /// Download the whole layer, optionally restricted to the given columns
    /// (the object-id column is always included).
    pub fn download(&self, columns: Option<&[String]>) -> Result<FeatureCollection, PipelineError> {
        let definition = self.layer_definition()?;
        let fid = definition.object_id_field.as_str();
        info!(
            "Layer uses id field `{fid}` and returns at most {} records per request.",
            definition.max_record_count
        );

        let ids = self.object_ids(fid)?;
        if ids.is_empty() {
            return Ok(empty_collection());
        }
        info!("Layer has {} features.", ids.len());

        let out_fields = out_fields(fid, columns);

        // Settle on a page size the server will actually answer.
        let mut block_size = definition.max_record_count.min(ids.len()).max(1);
        let mut features = vec![];
        loop {
            let body = self.fetch_range(fid, &out_fields, ids[0], ids[block_size - 1])?;
            if body.get("error").is_some() {
                match next_block_size(block_size) {
                    Some(smaller) => {
                        warn!(
                            "Server rejected a page of {block_size} records; retrying with {smaller}."
                        );
                        block_size = smaller;
                        continue;
                    }
                    None => {
                        return Err(PipelineError::UnexpectedResponse(format!(
                            "server rejected a minimal page: {body}"
                        )))
                    }
                }
            }
            features.extend(parse_features(body)?);
            break;
        }

        // The settled size is good for the remaining pages.
        let mut start_index = block_size;
        while start_index < ids.len() {
            let end_index = (start_index + block_size).min(ids.len());
            let body = self.fetch_range(fid, &out_fields, ids[start_index], ids[end_index - 1])?;
            if body.get("error").is_some() {
                return Err(PipelineError::UnexpectedResponse(format!(
                    "server rejected page {start_index}..{end_index}: {body}"
                )));
            }
            features.extend(parse_features(body)?);
            start_index = end_index;
        }

        verify_and_sort(&mut features, fid, &ids);
        info!("Downloaded {} features.", features.len());

        Ok(FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }
}

fn empty_collection() -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: vec![],
        foreign_members: None,
    }
}

/// Build the `outFields` parameter, always including the object-id column.
fn out_fields(fid: &str, columns: Option<&[String]>) -> String {
    match columns {
        None => "*".to_string(),
        Some(cols) if cols.iter().any(|c| c == fid) => cols.join(","),
        Some(cols) => {
            let mut all = vec![fid.to_string()];
            all.extend(cols.iter().cloned());
            all.join(",")
        }
    }
}

/// Shrink a rejected page size. Returns `None` once no smaller page exists.
fn next_block_size(block_size: usize) -> Option<usize> {
    let next = block_size / 2 + 1;
    (next < block_size).then_some(next)
}

/// Pull the object-id list out of an id-only query response. Servers differ
/// on whether the ids sit under `properties` or at the top level.
fn extract_object_ids(body: &Value) -> Option<Vec<i64>> {
    let ids = body
        .get("properties")
        .and_then(|properties| properties.get("objectIds"))
        .or_else(|| body.get("objectIds"))?
        .as_array()?;
    let mut ids: Vec<i64> = ids.iter().filter_map(Value::as_i64).collect();
    ids.sort_unstable();
    Some(ids)
}

fn parse_features(body: Value) -> Result<Vec<Feature>, PipelineError> {
    let collection: FeatureCollection = serde_json::from_value(body)?;
    Ok(collection.features)
}

fn feature_id(feature: &Feature, fid: &str) -> Option<i64> {
    feature
        .properties
        .as_ref()
        .and_then(|properties| properties.get(fid))
        .and_then(Value::as_i64)
}

/// Warn about ids that came back missing or more than once, and sort the
/// features by id.
fn verify_and_sort(features: &mut [Feature], fid: &str, ids: &[i64]) {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for feature in features.iter() {
        if let Some(id) = feature_id(feature, fid) {
            *counts.entry(id).or_insert(0) += 1;
        }
    }
    for id in ids {
        if !counts.contains_key(id) {
            warn!("ObjectID {id} is missing from the downloaded features.");
        }
    }
    for (id, count) in counts.iter().filter(|(_, count)| **count > 1) {
        warn!("ObjectID {id} was downloaded {count} times.");
    }
    features.sort_by_key(|feature| feature_id(feature, fid).unwrap_or(i64::MAX));
}
