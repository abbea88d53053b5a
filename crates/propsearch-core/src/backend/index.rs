//! C4 Index Schema Manager (§4.4, §6.4). Builds the index mapping for the
//! multi-vector listing document and decides idempotent create-vs-diagnose
//! behavior.

use serde_json::{json, Value};

use crate::model::VECTOR_DIM;

#[derive(Debug, Clone)]
pub struct VectorIndexParams {
    pub dim: usize,
    pub ef_construction: u32,
    pub m: u32,
}

impl Default for VectorIndexParams {
    fn default() -> Self {
        Self { dim: VECTOR_DIM, ef_construction: 128, m: 16 }
    }
}

#[derive(Debug, Clone)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Builds the OpenSearch-style index mapping: scalar fields per §3.1, a
/// `vector_text` dense vector (HNSW/cosine), and a `nested` `image_vectors`
/// field whose inner `vector` is itself a dense vector of the same
/// dimension and space, per §4.4/§6.4. Records `embedding_model_id` in
/// `mappings._meta` so a query-time client can detect a model mismatch
/// (I9, §7 "model-id mismatch") before trusting the kNN paths.
pub fn build_index_mapping(vector: &VectorIndexParams, bm25: &Bm25Params, embedding_model_id: &str) -> Value {
    json!({
        "settings": {
            "index": {
                "similarity": {
                    "default": {
                        "type": "BM25",
                        "k1": bm25.k1,
                        "b": bm25.b
                    }
                }
            }
        },
        "mappings": {
            "_meta": {
                "embedding_model_id": embedding_model_id
            },
            "properties": {
                "zpid": { "type": "keyword" },
                "listing_status": { "type": "keyword" },
                "sold_date": { "type": "date" },
                "listed_date": { "type": "date" },
                "indexed_at": { "type": "date" },
                "updated_at": { "type": "date" },

                "address": {
                    "properties": {
                        "street": { "type": "text" },
                        "city": { "type": "keyword" },
                        "state": { "type": "keyword" },
                        "zipcode": { "type": "keyword" }
                    }
                },
                "geo": { "type": "geo_point" },
                "city": { "type": "keyword" },
                "state": { "type": "keyword" },
                "zip_code": { "type": "keyword" },

                "property_type": { "type": "keyword" },

                "price": { "type": "long" },
                "bedrooms": { "type": "float" },
                "bathrooms": { "type": "float" },
                "living_area": { "type": "float" },
                "lot_size": { "type": "float" },

                "description": { "type": "text" },
                "visual_features_text": { "type": "text" },
                "architecture_style": { "type": "keyword" },
                "architecture_substyle": { "type": "keyword" },

                "feature_tags": { "type": "keyword" },
                "image_tags": { "type": "keyword" },

                "vector_text": {
                    "type": "dense_vector",
                    "dims": vector.dim,
                    "index": true,
                    "similarity": "cosine",
                    "index_options": {
                        "type": "hnsw",
                        "ef_construction": vector.ef_construction,
                        "m": vector.m
                    }
                },
                "image_vectors": {
                    "type": "nested",
                    "properties": {
                        "image_url": { "type": "keyword" },
                        "image_type": { "type": "keyword" },
                        "vector": {
                            "type": "dense_vector",
                            "dims": vector.dim,
                            "index": true,
                            "similarity": "cosine",
                            "index_options": {
                                "type": "hnsw",
                                "ef_construction": vector.ef_construction,
                                "m": vector.m
                            }
                        }
                    }
                },

                "has_valid_embeddings": { "type": "boolean" },
                "has_description": { "type": "boolean" }
            }
        }
    })
}

/// True if an existing mapping's vector fields are compatible with the
/// required parameters (same dimension; `ef_construction`/`m` may differ
/// without requiring reindex since those only affect search-time recall).
/// A dimension mismatch is the one incompatibility that must raise a
/// diagnostic error rather than silently proceeding (§4.4 "Idempotence").
pub fn mapping_is_compatible(existing: &Value, required_dim: usize) -> Result<(), String> {
    let existing_dim = existing
        .pointer("/mappings/properties/vector_text/dims")
        .and_then(|v| v.as_u64());
    match existing_dim {
        Some(d) if d as usize == required_dim => Ok(()),
        Some(d) => Err(format!(
            "existing index vector_text dimension {} incompatible with required {}",
            d, required_dim
        )),
        None => Err("existing index has no vector_text mapping".to_string()),
    }
}

/// Reads the embedding model id recorded in an index's `_meta` at create
/// time (§7, E5 "mixed-model protection"). `None` means either the index
/// predates this field or has no mapping at all; callers treat that the
/// same as a mismatch since the model identity can't be confirmed.
pub fn index_embedding_model_id(existing: &Value) -> Option<String> {
    existing
        .pointer("/mappings/_meta/embedding_model_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_has_bit_exact_hnsw_and_bm25_params() {
        let mapping = build_index_mapping(&VectorIndexParams::default(), &Bm25Params::default(), "propsearch-mm-v1");
        assert_eq!(mapping["mappings"]["properties"]["vector_text"]["dims"], json!(1024));
        assert_eq!(
            mapping["mappings"]["properties"]["vector_text"]["index_options"]["ef_construction"],
            json!(128)
        );
        assert_eq!(mapping["mappings"]["properties"]["vector_text"]["index_options"]["m"], json!(16));
        assert_eq!(mapping["settings"]["index"]["similarity"]["default"]["k1"], json!(1.2));
        assert_eq!(mapping["settings"]["index"]["similarity"]["default"]["b"], json!(0.75));
    }

    #[test]
    fn nested_image_vectors_share_dimension_with_text() {
        let mapping = build_index_mapping(&VectorIndexParams::default(), &Bm25Params::default(), "propsearch-mm-v1");
        assert_eq!(
            mapping["mappings"]["properties"]["image_vectors"]["properties"]["vector"]["dims"],
            json!(1024)
        );
    }

    #[test]
    fn mapping_records_embedding_model_id_in_meta() {
        let mapping = build_index_mapping(&VectorIndexParams::default(), &Bm25Params::default(), "propsearch-mm-v1");
        assert_eq!(index_embedding_model_id(&mapping), Some("propsearch-mm-v1".to_string()));
    }

    #[test]
    fn missing_meta_yields_none() {
        let existing = json!({"mappings": {"properties": {"vector_text": {"dims": 1024}}}});
        assert_eq!(index_embedding_model_id(&existing), None);
    }

    #[test]
    fn incompatible_dimension_is_rejected() {
        let existing = json!({"mappings": {"properties": {"vector_text": {"dims": 768}}}});
        assert!(mapping_is_compatible(&existing, 1024).is_err());
    }

    #[test]
    fn compatible_dimension_is_a_noop() {
        let existing = json!({"mappings": {"properties": {"vector_text": {"dims": 1024}}}});
        assert!(mapping_is_compatible(&existing, 1024).is_ok());
    }
}
