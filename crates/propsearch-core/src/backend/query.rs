//! C8 Retrieval Strategies (§4.8). Three query builders sharing a common
//! filter clause derived from constraints.

use serde_json::{json, Value};

use crate::model::Constraints;

/// Shared filter clause F (§4.8): hard filters plus, for the kNN paths,
/// `has_valid_embeddings = true` (I3).
pub fn build_filter(constraints: &Constraints, require_valid_embeddings: bool) -> Vec<Value> {
    let mut filters = Vec::new();
    let hf = &constraints.hard_filters;

    if hf.price_min.is_some() || hf.price_max.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(min) = hf.price_min {
            range.insert("gte".to_string(), json!(min));
        }
        if let Some(max) = hf.price_max {
            range.insert("lte".to_string(), json!(max));
        }
        filters.push(json!({ "range": { "price": range } }));
    }
    if hf.beds_min.is_some() || hf.beds_max.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(min) = hf.beds_min {
            range.insert("gte".to_string(), json!(min));
        }
        if let Some(max) = hf.beds_max {
            range.insert("lte".to_string(), json!(max));
        }
        filters.push(json!({ "range": { "bedrooms": range } }));
    }
    if hf.baths_min.is_some() || hf.baths_max.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(min) = hf.baths_min {
            range.insert("gte".to_string(), json!(min));
        }
        if let Some(max) = hf.baths_max {
            range.insert("lte".to_string(), json!(max));
        }
        filters.push(json!({ "range": { "bathrooms": range } }));
    }
    if hf.living_area_min.is_some() || hf.living_area_max.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(min) = hf.living_area_min {
            range.insert("gte".to_string(), json!(min));
        }
        if let Some(max) = hf.living_area_max {
            range.insert("lte".to_string(), json!(max));
        }
        filters.push(json!({ "range": { "living_area": range } }));
    }
    if !hf.property_types.is_empty() {
        filters.push(json!({ "terms": { "property_type": hf.property_types } }));
    }
    if !hf.status.is_empty() {
        filters.push(json!({ "terms": { "listing_status": hf.status } }));
    }
    if require_valid_embeddings {
        filters.push(json!({ "term": { "has_valid_embeddings": true } }));
    }
    filters
}

/// C8.1 BM25: `multi_match` `best_fields` with `tie_breaker=0.3` over the
/// field-boost table in §4.8.1, plus optional `should` term boosts on
/// `must_have` tags. Returns the top `3 * size` candidates (caller reads
/// `size` from the response).
pub fn build_bm25_query(query_text: &str, constraints: &Constraints, size: usize) -> Value {
    let filters = build_filter(constraints, false);
    let mut should: Vec<Value> = Vec::new();
    if !constraints.must_have.is_empty() {
        // Deterministic clause order (§9 Open Question #2): feature_tags before image_tags.
        should.push(json!({ "terms": { "feature_tags": constraints.must_have, "boost": 2.0 } }));
        should.push(json!({ "terms": { "image_tags": constraints.must_have, "boost": 1.5 } }));
    }

    json!({
        "size": size * 3,
        "query": {
            "bool": {
                "must": [{
                    "multi_match": {
                        "query": query_text,
                        "type": "best_fields",
                        "tie_breaker": 0.3,
                        "fields": [
                            "description^3.0",
                            "visual_features_text^2.5",
                            "feature_tags^2.0",
                            "image_tags^1.5",
                            "address^0.5"
                        ]
                    }
                }],
                "should": should,
                "filter": filters
            }
        }
    })
}

/// C8.2 kNN text: query the same multimodal query vector against
/// `vector_text`, `k = max(100, 3*size)`, under filter F with
/// `has_valid_embeddings = true`.
pub fn build_knn_text_query(query_vector: &[f32], constraints: &Constraints, size: usize) -> Value {
    let k = (3 * size).max(100);
    let filters = build_filter(constraints, true);
    json!({
        "size": k,
        "query": {
            "bool": {
                "must": [{
                    "knn": {
                        "vector_text": {
                            "vector": query_vector,
                            "k": k
                        }
                    }
                }],
                "filter": filters
            }
        }
    })
}

/// C8.3 kNN image: nested query over `image_vectors` with
/// `score_mode=max` so the best-matching image wins (§4.8.3); the SAME
/// query vector as text is used since both live in the unified
/// multimodal space (I9).
pub fn build_knn_image_query(query_vector: &[f32], constraints: &Constraints, size: usize) -> Value {
    let k = (3 * size).max(100);
    let filters = build_filter(constraints, true);
    json!({
        "size": k,
        "query": {
            "bool": {
                "must": [{
                    "nested": {
                        "path": "image_vectors",
                        "score_mode": "max",
                        "query": {
                            "knn": {
                                "image_vectors.vector": {
                                    "vector": query_vector,
                                    "k": k
                                }
                            }
                        }
                    }
                }],
                "filter": filters
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraints, HardFilters};

    #[test]
    fn bm25_query_returns_3x_size_candidates_and_tie_breaker() {
        let constraints = Constraints::default();
        let q = build_bm25_query("granite countertops", &constraints, 20);
        assert_eq!(q["size"], json!(60));
        assert_eq!(q["query"]["bool"]["must"][0]["multi_match"]["tie_breaker"], json!(0.3));
    }

    #[test]
    fn bm25_must_have_produces_should_clauses_in_fixed_order() {
        let mut constraints = Constraints::default();
        constraints.must_have.insert("pool".to_string());
        let q = build_bm25_query("pool house", &constraints, 10);
        let should = q["query"]["bool"]["should"].as_array().unwrap();
        assert_eq!(should[0]["terms"]["feature_tags"]["boost"], json!(2.0));
        assert_eq!(should[1]["terms"]["image_tags"]["boost"], json!(1.5));
    }

    #[test]
    fn knn_text_query_enforces_minimum_k_of_100() {
        let constraints = Constraints::default();
        let q = build_knn_text_query(&[0.1, 0.2], &constraints, 5);
        assert_eq!(q["size"], json!(100));
        assert_eq!(q["query"]["bool"]["must"][0]["knn"]["vector_text"]["k"], json!(100));
    }

    #[test]
    fn knn_queries_always_filter_on_valid_embeddings() {
        let constraints = Constraints::default();
        let q = build_knn_text_query(&[0.1], &constraints, 20);
        let filters = q["query"]["bool"]["filter"].as_array().unwrap();
        assert!(filters.iter().any(|f| f["term"]["has_valid_embeddings"] == json!(true)));
    }

    #[test]
    fn bm25_filter_does_not_require_valid_embeddings() {
        let constraints = Constraints::default();
        let q = build_bm25_query("text", &constraints, 20);
        let filters = q["query"]["bool"]["filter"].as_array().unwrap();
        assert!(!filters.iter().any(|f| f.get("term").map_or(false, |t| t.get("has_valid_embeddings").is_some())));
    }

    #[test]
    fn knn_image_query_uses_nested_score_mode_max() {
        let constraints = Constraints::default();
        let q = build_knn_image_query(&[0.1, 0.2], &constraints, 20);
        assert_eq!(q["query"]["bool"]["must"][0]["nested"]["score_mode"], json!("max"));
        assert_eq!(q["query"]["bool"]["must"][0]["nested"]["path"], json!("image_vectors"));
    }

    #[test]
    fn price_hard_filter_becomes_range_clause() {
        let mut constraints = Constraints::default();
        constraints.hard_filters = HardFilters { price_max: Some(500_000), ..Default::default() };
        let q = build_bm25_query("homes", &constraints, 20);
        let filters = q["query"]["bool"]["filter"].as_array().unwrap();
        assert!(filters.iter().any(|f| f["range"]["price"]["lte"] == json!(500_000)));
    }
}
