use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// `GET /search` query parameters (§6.1).
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(rename = "minPrice")]
    pub min_price: Option<i64>,
    #[serde(rename = "maxPrice")]
    pub max_price: Option<i64>,
    #[serde(rename = "minBedrooms")]
    pub min_bedrooms: Option<f32>,
    #[serde(rename = "minBathrooms")]
    pub min_bathrooms: Option<f32>,
    #[serde(rename = "minLivingArea")]
    pub min_living_area: Option<f32>,
    #[serde(rename = "maxLivingArea")]
    pub max_living_area: Option<f32>,
    #[serde(rename = "propertyTypes")]
    pub property_types: Option<String>,
    #[serde(rename = "listingStatus")]
    pub listing_status: Option<String>,
    pub limit: Option<usize>,
    pub search_after: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryInfo {
    pub original_query: String,
    pub subqueries: Option<Vec<String>>,
    pub classification: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub properties: Vec<propsearch_core::model::PropertyResult>,
    pub total: usize,
    pub query_info: QueryInfo,
    pub search_after: Option<String>,
    pub has_more: bool,
    pub warnings: Vec<propsearch_core::analytics::Warning>,
}

/// Opaque `(sort_value, doc_id)` pagination cursor (§A4), base64-encoded so
/// it can round-trip through a URL query parameter without escaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAfterCursor {
    pub sort_value: f32,
    pub doc_id: String,
}

impl SearchAfterCursor {
    pub fn encode(&self) -> String {
        use base64::Engine;
        let json = serde_json::to_vec(self).unwrap_or_default();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(s: &str) -> Option<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// `POST /listings` and `PATCH /listings/{zpid}` bodies (§6.2).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateListingRequest {
    #[serde(flatten)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatchOptions {
    #[serde(default)]
    pub preserve_embeddings: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatchListingRequest {
    pub updates: serde_json::Value,
    #[serde(default)]
    pub options: PatchOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrudResponse {
    pub zpid: String,
    pub status: &'static str,
}

/// Required hard-filter keys recognized on `hard_filters` (§3.2), kept
/// here only as documentation for the CSV-parsing helpers in `handlers.rs`.
pub const RECOGNIZED_PROPERTY_TYPE_SEP: char = ',';

pub fn parse_csv_set(s: &Option<String>) -> BTreeSet<String> {
    s.as_ref()
        .map(|v| v.split(RECOGNIZED_PROPERTY_TYPE_SEP).map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect())
        .unwrap_or_default()
}
