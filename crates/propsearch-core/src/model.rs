use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Fixed embedding dimension for the single multimodal model (I9, I10).
pub const VECTOR_DIM: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    ForSale,
    Sold,
    Pending,
    UnderContract,
    OffMarket,
    ComingSoon,
}

impl ListingStatus {
    /// Snake-case wire form, matching the `#[serde(rename_all = "snake_case")]`
    /// representation used in hard filters and the query string (§6.1/§6.2).
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::ForSale => "for_sale",
            ListingStatus::Sold => "sold",
            ListingStatus::Pending => "pending",
            ListingStatus::UnderContract => "under_contract",
            ListingStatus::OffMarket => "off_market",
            ListingStatus::ComingSoon => "coming_soon",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Exterior,
    Interior,
    Detail,
    Floorplan,
    Backyard,
    Unknown,
}

impl Default for ImageType {
    fn default() -> Self {
        ImageType::Unknown
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zipcode: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// One embedded image belonging to a listing, in `image_vectors`.
///
/// Order matches `images` URL order at ingest time (I2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageVector {
    pub image_url: String,
    pub image_type: ImageType,
    pub vector: Vec<f32>,
}

/// The indexed document (§3.1). Uniquely identified by `zpid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub zpid: String,
    pub listing_status: Option<ListingStatus>,
    pub sold_date: Option<String>,
    pub listed_date: Option<String>,
    pub indexed_at: Option<String>,
    pub updated_at: Option<String>,

    pub address: Address,
    pub geo: Option<GeoPoint>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub property_type: Option<String>,

    pub price: Option<i64>,
    pub bedrooms: Option<f32>,
    pub bathrooms: Option<f32>,
    pub living_area: Option<f32>,
    pub lot_size: Option<f32>,

    pub description: String,
    pub visual_features_text: String,
    pub architecture_style: Option<String>,
    pub architecture_substyle: Option<String>,

    pub feature_tags: BTreeSet<String>,
    pub image_tags: BTreeSet<String>,

    pub vector_text: Vec<f32>,
    pub image_vectors: Vec<ImageVector>,

    pub has_valid_embeddings: bool,
    pub has_description: bool,
}

impl Listing {
    /// I3: documents without valid embeddings are excluded from kNN paths.
    pub fn eligible_for_knn(&self) -> bool {
        self.has_valid_embeddings
    }

    /// Union of curated and image-derived tags, used by tag boosting (C10).
    pub fn all_tags(&self) -> BTreeSet<String> {
        self.feature_tags
            .union(&self.image_tags)
            .cloned()
            .collect()
    }
}

/// Query-time structured object produced by Query Understanding (C6), §3.2.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    pub must_have: BTreeSet<String>,
    pub nice_to_have: BTreeSet<String>,
    pub hard_filters: HardFilters,
    pub architecture_style: Option<String>,
    pub proximity: Option<Proximity>,
    pub query_type: QueryType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardFilters {
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub beds_min: Option<f32>,
    pub beds_max: Option<f32>,
    pub baths_min: Option<f32>,
    pub baths_max: Option<f32>,
    pub living_area_min: Option<f32>,
    pub living_area_max: Option<f32>,
    pub property_types: BTreeSet<String>,
    pub status: BTreeSet<String>,
}

impl HardFilters {
    /// P2: every returned document must satisfy every hard filter.
    pub fn is_satisfied_by(&self, listing: &Listing) -> bool {
        if let Some(min) = self.price_min {
            if listing.price.map_or(true, |p| p < min) {
                return false;
            }
        }
        if let Some(max) = self.price_max {
            if listing.price.map_or(true, |p| p > max) {
                return false;
            }
        }
        if let Some(min) = self.beds_min {
            if listing.bedrooms.map_or(true, |b| b < min) {
                return false;
            }
        }
        if let Some(max) = self.beds_max {
            if listing.bedrooms.map_or(true, |b| b > max) {
                return false;
            }
        }
        if let Some(min) = self.baths_min {
            if listing.bathrooms.map_or(true, |b| b < min) {
                return false;
            }
        }
        if let Some(max) = self.baths_max {
            if listing.bathrooms.map_or(true, |b| b > max) {
                return false;
            }
        }
        if let Some(min) = self.living_area_min {
            if listing.living_area.map_or(true, |a| a < min) {
                return false;
            }
        }
        if let Some(max) = self.living_area_max {
            if listing.living_area.map_or(true, |a| a > max) {
                return false;
            }
        }
        if !self.property_types.is_empty() {
            let matches = listing
                .property_type
                .as_ref()
                .map_or(false, |pt| self.property_types.contains(pt));
            if !matches {
                return false;
            }
        }
        if !self.status.is_empty() {
            let matches = listing.listing_status.map_or(false, |s| self.status.contains(s.as_str()));
            if !matches {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proximity {
    pub poi_type: String,
    pub max_distance_km: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Color,
    Material,
    SpecificFeature,
    VisualStyle,
    Proximity,
    #[default]
    General,
}

/// Per-strategy and fused scores returned alongside each matched property (§6.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub bm25: Option<f32>,
    pub knn_text: Option<f32>,
    pub knn_image: Option<f32>,
    pub fused: f32,
    pub final_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyResult {
    pub zpid: String,
    pub listing: BTreeMap<String, serde_json::Value>,
    pub scores: ScoreBreakdown,
    pub matched_tags: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing_with(status: Option<ListingStatus>, price: Option<i64>, beds: Option<f32>) -> Listing {
        Listing {
            zpid: "z1".to_string(),
            listing_status: status,
            sold_date: None,
            listed_date: None,
            indexed_at: None,
            updated_at: None,
            address: Address::default(),
            geo: None,
            city: None,
            state: None,
            zip_code: None,
            property_type: None,
            price,
            bedrooms: beds,
            bathrooms: None,
            living_area: None,
            lot_size: None,
            description: String::new(),
            visual_features_text: String::new(),
            architecture_style: None,
            architecture_substyle: None,
            feature_tags: BTreeSet::new(),
            image_tags: BTreeSet::new(),
            vector_text: Vec::new(),
            image_vectors: Vec::new(),
            has_valid_embeddings: false,
            has_description: false,
        }
    }

    #[test]
    fn p2_status_filter_matches_snake_case_wire_form() {
        let mut hf = HardFilters::default();
        hf.status = ["for_sale".to_string()].into_iter().collect();
        let listing = listing_with(Some(ListingStatus::ForSale), None, None);
        assert!(hf.is_satisfied_by(&listing), "for_sale listing must satisfy a for_sale status filter");

        let sold = listing_with(Some(ListingStatus::Sold), None, None);
        assert!(!hf.is_satisfied_by(&sold));
    }

    #[test]
    fn p2_price_and_beds_bounds_are_enforced() {
        let mut hf = HardFilters::default();
        hf.price_max = Some(500_000);
        hf.beds_min = Some(3.0);
        assert!(hf.is_satisfied_by(&listing_with(None, Some(450_000), Some(3.0))));
        assert!(!hf.is_satisfied_by(&listing_with(None, Some(600_000), Some(3.0))));
        assert!(!hf.is_satisfied_by(&listing_with(None, Some(450_000), Some(2.0))));
        // Unknown numerics never satisfy a bound (null != "within range").
        assert!(!hf.is_satisfied_by(&listing_with(None, None, Some(3.0))));
    }
}
