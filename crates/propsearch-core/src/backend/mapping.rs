//! Response mapping: turns a raw OpenSearch-style search response into the
//! ranked hit lists C10 fuses, and into the `Listing`/`PropertyResult` shape
//! returned to callers.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::fusion::RankedHit;
use crate::model::{Address, ImageType, ImageVector, Listing, ListingStatus};

/// Extracts `(doc_id, rank, score)` triples from a `hits.hits` array,
/// 1-based rank in arrival order (OpenSearch already returns hits sorted
/// by its own relevance for the strategy queried).
pub fn map_ranked_hits(response: &Value) -> Vec<RankedHit> {
    let hits = response
        .pointer("/hits/hits")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    hits.iter()
        .enumerate()
        .filter_map(|(idx, hit)| {
            let doc_id = hit.get("_id").and_then(|v| v.as_str())?.to_string();
            let score = hit.get("_score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
            Some(RankedHit { doc_id, rank: (idx + 1) as u32, score })
        })
        .collect()
}

fn parse_listing_status(s: &str) -> Option<ListingStatus> {
    match s {
        "for_sale" => Some(ListingStatus::ForSale),
        "sold" => Some(ListingStatus::Sold),
        "pending" => Some(ListingStatus::Pending),
        "under_contract" => Some(ListingStatus::UnderContract),
        "off_market" => Some(ListingStatus::OffMarket),
        "coming_soon" => Some(ListingStatus::ComingSoon),
        _ => None,
    }
}

fn parse_image_type(s: &str) -> ImageType {
    match s {
        "exterior" => ImageType::Exterior,
        "interior" => ImageType::Interior,
        "detail" => ImageType::Detail,
        "floorplan" => ImageType::Floorplan,
        "backyard" => ImageType::Backyard,
        _ => ImageType::Unknown,
    }
}

fn string_set(fields: &Value, key: &str) -> BTreeSet<String> {
    fields
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Reconstructs a `Listing` from a single `_source` document. Unknown or
/// missing fields fall back to the type's natural empty/`None` value rather
/// than erroring, since mapped-but-unpopulated fields are routine in a
/// partially-ingested index.
pub fn map_listing(source: &Value) -> Listing {
    let zpid = source.get("zpid").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    let address = source
        .get("address")
        .map(|a| Address {
            street: a.get("street").and_then(|v| v.as_str()).map(str::to_string),
            city: a.get("city").and_then(|v| v.as_str()).map(str::to_string),
            state: a.get("state").and_then(|v| v.as_str()).map(str::to_string),
            zipcode: a.get("zipcode").and_then(|v| v.as_str()).map(str::to_string),
        })
        .unwrap_or_default();

    let geo = source.get("geo").and_then(|g| {
        Some(crate::model::GeoPoint {
            lat: g.get("lat")?.as_f64()?,
            lon: g.get("lon")?.as_f64()?,
        })
    });

    let image_vectors = source
        .get("image_vectors")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|iv| ImageVector {
                    image_url: iv.get("image_url").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    image_type: iv
                        .get("image_type")
                        .and_then(|v| v.as_str())
                        .map(parse_image_type)
                        .unwrap_or_default(),
                    vector: iv
                        .get("vector")
                        .and_then(|v| v.as_array())
                        .map(|a| a.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let vector_text = source
        .get("vector_text")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
        .unwrap_or_default();

    Listing {
        zpid,
        listing_status: source.get("listing_status").and_then(|v| v.as_str()).and_then(parse_listing_status),
        sold_date: source.get("sold_date").and_then(|v| v.as_str()).map(str::to_string),
        listed_date: source.get("listed_date").and_then(|v| v.as_str()).map(str::to_string),
        indexed_at: source.get("indexed_at").and_then(|v| v.as_str()).map(str::to_string),
        updated_at: source.get("updated_at").and_then(|v| v.as_str()).map(str::to_string),
        address,
        geo,
        city: source.get("city").and_then(|v| v.as_str()).map(str::to_string),
        state: source.get("state").and_then(|v| v.as_str()).map(str::to_string),
        zip_code: source.get("zip_code").and_then(|v| v.as_str()).map(str::to_string),
        property_type: source.get("property_type").and_then(|v| v.as_str()).map(str::to_string),
        price: source.get("price").and_then(|v| v.as_i64()),
        bedrooms: source.get("bedrooms").and_then(|v| v.as_f64()).map(|f| f as f32),
        bathrooms: source.get("bathrooms").and_then(|v| v.as_f64()).map(|f| f as f32),
        living_area: source.get("living_area").and_then(|v| v.as_f64()).map(|f| f as f32),
        lot_size: source.get("lot_size").and_then(|v| v.as_f64()).map(|f| f as f32),
        description: source.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        visual_features_text: source
            .get("visual_features_text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        architecture_style: source.get("architecture_style").and_then(|v| v.as_str()).map(str::to_string),
        architecture_substyle: source.get("architecture_substyle").and_then(|v| v.as_str()).map(str::to_string),
        feature_tags: string_set(source, "feature_tags"),
        image_tags: string_set(source, "image_tags"),
        vector_text,
        image_vectors,
        has_valid_embeddings: source.get("has_valid_embeddings").and_then(|v| v.as_bool()).unwrap_or(false),
        has_description: source.get("has_description").and_then(|v| v.as_bool()).unwrap_or(false),
    }
}

/// Pulls `(doc_id, _source)` pairs out of a `hits.hits` array, for callers
/// that need the full document alongside its score.
pub fn map_sources(response: &Value) -> Vec<(String, Value)> {
    response
        .pointer("/hits/hits")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|hit| {
            let id = hit.get("_id").and_then(|v| v.as_str())?.to_string();
            let source = hit.get("_source").cloned().unwrap_or(Value::Null);
            Some((id, source))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_ranked_hits_with_one_based_rank() {
        let response = json!({
            "hits": { "hits": [
                { "_id": "a", "_score": 10.0 },
                { "_id": "b", "_score": 5.0 }
            ]}
        });
        let hits = map_ranked_hits(&response);
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[1].rank, 2);
        assert_eq!(hits[0].doc_id, "a");
    }

    #[test]
    fn missing_hits_array_yields_empty() {
        let response = json!({});
        assert!(map_ranked_hits(&response).is_empty());
    }

    #[test]
    fn maps_listing_scalar_and_tag_fields() {
        let source = json!({
            "zpid": "123",
            "price": 450000,
            "feature_tags": ["pool", "garage"],
            "has_valid_embeddings": true
        });
        let listing = map_listing(&source);
        assert_eq!(listing.zpid, "123");
        assert_eq!(listing.price, Some(450000));
        assert!(listing.feature_tags.contains("pool"));
        assert!(listing.has_valid_embeddings);
    }

    #[test]
    fn maps_listing_image_vectors() {
        let source = json!({
            "zpid": "1",
            "image_vectors": [
                { "image_url": "http://x/1.jpg", "image_type": "exterior", "vector": [0.1, 0.2] }
            ]
        });
        let listing = map_listing(&source);
        assert_eq!(listing.image_vectors.len(), 1);
        assert_eq!(listing.image_vectors[0].image_type, ImageType::Exterior);
        assert_eq!(listing.image_vectors[0].vector, vec![0.1, 0.2]);
    }
}
