//! C5 Ingestion Pipeline (§4.5). Turns one raw listing JSON into an
//! indexable `Listing`: field extraction, image URL resolution, per-image
//! enrichment through C1/C2/C3, tag aggregation, the visual-features
//! summary, and architecture-style majority vote. Bulk upsert (step 9) and
//! scheduling/resumability live in the ingestion binary; this module is the
//! pure-ish, independently testable core of the pipeline.

use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cache::EmbeddingCache;
use crate::embeddings::{ImageEmbedder, TextEmbedder};
use crate::error::Result;
use crate::model::{Address, GeoPoint, ImageType, ImageVector, Listing, ListingStatus};
use crate::vision::{self, BackoffPolicy, VisionAnalysis, VisionProvider};

/// Default per-listing concurrency bound for image enrichment (§5).
pub const DEFAULT_IMAGE_CONCURRENCY: usize = 8;

/// Target width images are resolved at, to control vision/embedding cost (§4.2, §4.5 step 2).
pub const TARGET_IMAGE_WIDTH_PX: u32 = 576;

fn parse_f64(v: Option<&Value>) -> Option<f64> {
    v.and_then(|v| v.as_f64()).or_else(|| v.and_then(|v| v.as_str()).and_then(|s| s.parse().ok()))
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

/// Step 1: field extraction. Normalizes ids, numerics, address, geo.
/// Missing numerics default to `None` (`null`), never to `0` (§4.5 step 1).
/// `livingArea` is read from the source's house-square-footage field only;
/// the caller MUST NOT pass a lot-area field here (I5).
pub fn extract_fields(raw: &Value) -> Listing {
    let zpid = raw
        .get("zpid")
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
        .unwrap_or_default();

    let listing_status = raw.get("listingStatus").and_then(|v| v.as_str()).and_then(parse_listing_status);

    let address = raw
        .get("address")
        .map(|a| Address {
            street: a.get("street").and_then(|v| v.as_str()).map(str::to_string),
            city: a.get("city").and_then(|v| v.as_str()).map(str::to_string),
            state: a.get("state").and_then(|v| v.as_str()).map(str::to_string),
            zipcode: a.get("zipcode").and_then(|v| v.as_str()).map(str::to_string),
        })
        .unwrap_or_default();

    let geo = raw.get("geo").or_else(|| raw.get("latLong")).and_then(|g| {
        Some(GeoPoint {
            lat: g.get("lat").or_else(|| g.get("latitude"))?.as_f64()?,
            lon: g.get("lon").or_else(|| g.get("longitude"))?.as_f64()?,
        })
    });

    let city = raw.get("city").and_then(|v| v.as_str()).map(str::to_string).or_else(|| address.city.clone());
    let state = raw.get("state").and_then(|v| v.as_str()).map(str::to_string).or_else(|| address.state.clone());
    let zip_code = raw
        .get("zipCode")
        .or_else(|| raw.get("zip_code"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| address.zipcode.clone());

    let price = raw.get("price").and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)));
    let bedrooms = parse_f64(raw.get("bedrooms")).map(|f| f as f32);
    let bathrooms = parse_f64(raw.get("bathrooms")).map(|f| f as f32);
    // I5: living area is interior sqft (`livingArea`), distinct from lot area
    // (`lotAreaValue`/`lotSize`). Never fall back from one to the other.
    let living_area = parse_f64(raw.get("livingArea")).map(|f| f as f32);
    let lot_size = parse_f64(raw.get("lotSize").or_else(|| raw.get("lotAreaValue"))).map(|f| f as f32);

    let property_type = raw
        .get("homeType")
        .or_else(|| raw.get("propertyType"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let description = raw.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    let feature_tags: BTreeSet<String> = raw
        .get("features")
        .or_else(|| raw.get("resoFacts"))
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|x| x.as_str()).map(normalize_tag).collect())
        .unwrap_or_default();

    Listing {
        zpid,
        listing_status,
        sold_date: raw.get("soldDate").and_then(|v| v.as_str()).map(str::to_string),
        listed_date: raw.get("listedDate").and_then(|v| v.as_str()).map(str::to_string),
        indexed_at: None,
        updated_at: None,
        address,
        geo,
        city,
        state,
        zip_code,
        property_type,
        price,
        bedrooms,
        bathrooms,
        living_area,
        lot_size,
        description,
        visual_features_text: String::new(),
        architecture_style: None,
        architecture_substyle: None,
        feature_tags,
        image_tags: BTreeSet::new(),
        vector_text: Vec::new(),
        image_vectors: Vec::new(),
        has_valid_embeddings: false,
        has_description: false,
    }
}

/// Lowercases and normalizes a tag token: spaces become underscores when
/// used as a match token (§4.5 step 5).
pub fn normalize_tag(s: &str) -> String {
    s.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Step 2: image URL resolution (§4.5 step 2). Preference order: carousel/
/// composable photo sets, then thumbnail, then responsive photos -- except
/// for vacant land (`photoCount=0`), where the responsive-photos fallback
/// is skipped because the source is known to include unrelated imagery
/// there. De-duplicates while preserving first occurrence.
pub fn resolve_image_urls(raw: &Value) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    let mut push_all = |arr: &[Value], urls: &mut Vec<String>, seen: &mut BTreeSet<String>| {
        for item in arr {
            let url = item
                .as_str()
                .map(str::to_string)
                .or_else(|| item.get("url").and_then(|v| v.as_str()).map(str::to_string))
                .or_else(|| item.get("mixedSources").and_then(|m| m.get("jpeg")).and_then(|j| j.as_array()).and_then(|a| a.last()).and_then(|l| l.get("url")).and_then(|v| v.as_str()).map(str::to_string));
            if let Some(url) = url {
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
    };

    if let Some(arr) = raw.get("carouselPhotos").or_else(|| raw.get("originalPhotos")).and_then(|v| v.as_array()) {
        push_all(arr, &mut urls, &mut seen);
    }
    if let Some(thumb) = raw.get("thumbnail").and_then(|v| v.as_str()) {
        if seen.insert(thumb.to_string()) {
            urls.push(thumb.to_string());
        }
    }

    let photo_count = raw.get("photoCount").and_then(|v| v.as_i64());
    let is_vacant_land = photo_count == Some(0);
    if !is_vacant_land {
        if let Some(arr) = raw.get("responsivePhotos").and_then(|v| v.as_array()) {
            push_all(arr, &mut urls, &mut seen);
        }
    }

    urls
}

/// Result of enriching one image (§4.5 step 4).
#[derive(Debug, Clone)]
pub struct EnrichedImage {
    pub url: String,
    pub image_type: ImageType,
    pub vector: Vec<f32>,
    pub analysis: VisionAnalysis,
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

/// Dependencies the per-image enrichment step needs: a cache (C1), an
/// image embedder and vision provider (C2/C3), a downloader, and the model
/// ids in force (I9).
pub struct ImageEnricher<C: EmbeddingCache> {
    pub cache: Arc<C>,
    pub image_embedder: Arc<dyn ImageEmbedder>,
    pub vision_provider: Arc<dyn VisionProvider>,
    pub model_id: String,
    pub backoff: BackoffPolicy,
    pub concurrency: usize,
}

impl<C: EmbeddingCache> ImageEnricher<C> {
    pub fn new(
        cache: Arc<C>,
        image_embedder: Arc<dyn ImageEmbedder>,
        vision_provider: Arc<dyn VisionProvider>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            image_embedder,
            vision_provider,
            model_id: model_id.into(),
            backoff: BackoffPolicy::default(),
            concurrency: DEFAULT_IMAGE_CONCURRENCY,
        }
    }

    /// Enriches one image: cache hit short-circuits both embedding and
    /// analysis; on miss, downloads bytes via `fetch`, computes both, and
    /// writes them atomically (I7). A download/provider failure here is
    /// isolated -- the caller treats it as "this image failed" and keeps
    /// going (§5 "per-image failures are isolated").
    async fn enrich_one<F, Fut>(&self, url: &str, fetch: &F) -> Option<EnrichedImage>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>>>,
    {
        match self.cache.get_image(url, &self.model_id).await {
            Ok(Some(rec)) => {
                let image_type = parse_image_type(&rec.analysis.image_type);
                return Some(EnrichedImage { url: url.to_string(), image_type, vector: rec.embedding, analysis: rec.analysis });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, url, "image cache read failed; falling through to compute");
            }
        }

        let bytes = match fetch(url.to_string()).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, url, "image download failed; skipping this image");
                return None;
            }
        };

        let vector = match self.image_embedder.embed(&bytes, &self.model_id).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, url, "image embedding failed; skipping this image");
                return None;
            }
        };

        let (analysis, raw_response) =
            vision::analyze_image(self.vision_provider.as_ref(), &bytes, &self.model_id, &self.backoff).await;

        if let Err(e) = self
            .cache
            .put_image(url, &bytes, vector.clone(), analysis.clone(), raw_response, &self.model_id, &self.model_id, 0.0, 0.0)
            .await
        {
            tracing::warn!(error = %e, url, "image cache write failed; continuing without caching this result");
        }

        Some(EnrichedImage { url: url.to_string(), image_type: parse_image_type(&analysis.image_type), vector, analysis })
    }

    /// Enriches every image URL with bounded concurrency (§5, default 8),
    /// preserving input order in the returned vector (I2) regardless of
    /// completion order.
    pub async fn enrich_all<F, Fut>(&self, urls: &[String], fetch: F) -> Vec<Option<EnrichedImage>>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<Vec<u8>>> + Send,
    {
        stream::iter(urls.iter().cloned().enumerate())
            .map(|(idx, url)| {
                let fetch = &fetch;
                async move { (idx, self.enrich_one(&url, fetch).await) }
            })
            .buffer_unordered(self.concurrency.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .fold(vec![None; urls.len()], |mut acc, (idx, result)| {
                acc[idx] = result;
                acc
            })
    }
}

/// Step 5: tag aggregation. Union of per-image `features`/`visual_features`
/// becomes `image_tags`; combined with source-structured features for the
/// full tag vocabulary used by BM25 and boosting (§4.10).
pub fn aggregate_image_tags(images: &[EnrichedImage]) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for img in images {
        for f in &img.analysis.features {
            tags.insert(normalize_tag(f));
        }
        for f in &img.analysis.visual_features {
            tags.insert(normalize_tag(f));
        }
        if let Some(color) = &img.analysis.exterior_color {
            if img.image_type == ImageType::Exterior {
                tags.insert(normalize_tag(&format!("{color}_exterior")));
            }
        }
    }
    tags
}

/// Step 6: visual-features summary (§4.5 step 6). A short human-readable
/// string used for BM25 matching and folded into the text embedding pass.
pub fn build_visual_features_summary(images: &[EnrichedImage]) -> String {
    let exterior = images.iter().find(|i| i.image_type == ImageType::Exterior);
    let style = exterior.and_then(|i| i.analysis.architecture_style.clone());
    let color = exterior.and_then(|i| i.analysis.exterior_color.clone());
    let materials: BTreeSet<String> = images
        .iter()
        .filter(|i| i.image_type == ImageType::Exterior)
        .flat_map(|i| i.analysis.materials.iter().cloned())
        .collect();

    let interior_tags: BTreeSet<String> = images
        .iter()
        .filter(|i| i.image_type == ImageType::Interior)
        .flat_map(|i| i.analysis.features.iter().chain(i.analysis.visual_features.iter()).cloned())
        .collect();

    let exterior_tags: BTreeSet<String> = images
        .iter()
        .filter(|i| i.image_type == ImageType::Exterior)
        .flat_map(|i| i.analysis.features.iter().chain(i.analysis.visual_features.iter()).cloned())
        .collect();
    let other_tags: BTreeSet<String> =
        aggregate_image_tags(images).difference(&interior_tags).cloned().collect::<BTreeSet<_>>().difference(&exterior_tags).cloned().collect();

    let mut parts = Vec::new();
    if style.is_some() || color.is_some() || !materials.is_empty() {
        let style_part = style.as_deref().unwrap_or("an unspecified");
        let color_part = color.as_deref().map(|c| format!("{c} ")).unwrap_or_default();
        let materials_part = if materials.is_empty() {
            String::new()
        } else {
            format!(" with {}", materials.iter().cloned().collect::<Vec<_>>().join(", "))
        };
        parts.push(format!("Exterior: {style_part} style {color_part}exterior{materials_part}."));
    }
    if !interior_tags.is_empty() {
        parts.push(format!("Interior features: {}.", interior_tags.iter().cloned().collect::<Vec<_>>().join(", ")));
    }
    if !other_tags.is_empty() {
        parts.push(format!("Property includes: {}.", other_tags.iter().cloned().collect::<Vec<_>>().join(", ")));
    }
    parts.join(" ")
}

/// Step 7: architecture style by majority vote across per-image
/// classifications, weighted toward `image_type=exterior`. First-image
/// weight is 1x (no extra boost at ingestion, §4.5 step 7); ties are
/// broken by earliest image.
pub fn choose_architecture_style(images: &[EnrichedImage]) -> (Option<String>, Option<String>) {
    let mut votes: Vec<(String, usize, usize)> = Vec::new(); // (style, weight, first_seen_index)

    for (idx, img) in images.iter().enumerate() {
        let Some(style) = &img.analysis.architecture_style else { continue };
        if style.is_empty() {
            continue;
        }
        let weight = if img.image_type == ImageType::Exterior { 2 } else { 1 };
        if let Some(entry) = votes.iter_mut().find(|(s, _, _)| s == style) {
            entry.1 += weight;
        } else {
            votes.push((style.clone(), weight, idx));
        }
    }

    votes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.2.cmp(&b.2)));
    let primary = votes.first().map(|(s, _, _)| s.clone());
    let substyle = votes.get(1).map(|(s, _, _)| s.clone());
    (primary, substyle)
}

/// Step 8/9 inputs bundled together: everything `assemble_document` needs
/// besides the raw listing and text embedding.
pub struct EnrichmentOutcome {
    pub images: Vec<EnrichedImage>,
    pub text_vector: Option<Vec<f32>>,
}

/// Step 8: document assembly, enforcing I1-I5. `has_valid_embeddings` is
/// true iff `vector_text` is non-zero-length and non-empty AND at least one
/// image vector exists (§3.1).
///
/// Failure semantics (§4.5): a listing fails if and only if text embedding
/// failed AND every image failed; returns `None` in that case. Otherwise
/// whatever succeeded is indexed.
pub fn assemble_document(mut listing: Listing, outcome: EnrichmentOutcome, now: &str) -> Option<Listing> {
    let text_failed = outcome.text_vector.is_none();
    let all_images_failed = outcome.images.is_empty();
    if text_failed && all_images_failed {
        return None;
    }

    listing.image_tags = aggregate_image_tags(&outcome.images);
    listing.visual_features_text = build_visual_features_summary(&outcome.images);
    let (style, substyle) = choose_architecture_style(&outcome.images);
    listing.architecture_style = style;
    listing.architecture_substyle = substyle;

    listing.image_vectors = outcome
        .images
        .iter()
        .map(|img| ImageVector { image_url: img.url.clone(), image_type: img.image_type, vector: img.vector.clone() })
        .collect();

    listing.vector_text = outcome.text_vector.unwrap_or_default();
    listing.has_description = !listing.description.trim().is_empty();

    let text_vector_present = !listing.vector_text.is_empty() && listing.vector_text.iter().any(|v| *v != 0.0);
    listing.has_valid_embeddings = text_vector_present && !listing.image_vectors.is_empty();

    listing.indexed_at = Some(now.to_string());
    listing.updated_at = Some(now.to_string());

    Some(listing)
}

/// Builds the text to embed (§4.5 step 3): description plus the visual-
/// features summary, once computed.
pub fn build_text_for_embedding(description: &str, visual_features_text: &str) -> String {
    let mut parts = Vec::new();
    if !description.trim().is_empty() {
        parts.push(description.trim().to_string());
    }
    if !visual_features_text.trim().is_empty() {
        parts.push(visual_features_text.trim().to_string());
    }
    parts.join(" ")
}

#[async_trait::async_trait]
pub trait TextEmbedderFailable: Send + Sync {
    async fn try_embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// Thin adapter so ingestion can treat "embedding failed" as `None`
/// (contributing to the all-strategies-failed check) rather than
/// propagating a hard error, matching §4.5's failure semantics.
pub struct FailableTextEmbedder<T: TextEmbedder> {
    pub inner: Arc<T>,
    pub model_id: String,
}

#[async_trait::async_trait]
impl<T: TextEmbedder> TextEmbedderFailable for FailableTextEmbedder<T> {
    async fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }
        match self.inner.embed(text, &self.model_id).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "text embedding failed for listing");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analysis(image_type: &str, style: Option<&str>, color: Option<&str>, features: Vec<&str>) -> VisionAnalysis {
        VisionAnalysis {
            image_type: image_type.to_string(),
            features: features.into_iter().map(str::to_string).collect(),
            architecture_style: style.map(str::to_string),
            exterior_color: color.map(str::to_string),
            materials: vec![],
            visual_features: vec![],
            room_type: None,
            confidence: "high".to_string(),
        }
    }

    fn enriched(url: &str, image_type: ImageType, analysis: VisionAnalysis) -> EnrichedImage {
        EnrichedImage { url: url.to_string(), image_type, vector: vec![0.1; 4], analysis }
    }

    #[test]
    fn i5_living_area_never_reads_lot_area_field() {
        let raw = json!({"zpid": "1", "livingArea": 1800.0, "lotSize": 9000.0});
        let listing = extract_fields(&raw);
        assert_eq!(listing.living_area, Some(1800.0));
        assert_eq!(listing.lot_size, Some(9000.0));
    }

    #[test]
    fn missing_numerics_default_to_none_not_zero() {
        let raw = json!({"zpid": "1"});
        let listing = extract_fields(&raw);
        assert_eq!(listing.price, None);
        assert_eq!(listing.bedrooms, None);
        assert_eq!(listing.living_area, None);
    }

    #[test]
    fn vacant_land_skips_responsive_photos_fallback() {
        let raw = json!({
            "photoCount": 0,
            "responsivePhotos": [{"url": "http://x/a.jpg"}],
        });
        let urls = resolve_image_urls(&raw);
        assert!(urls.is_empty());
    }

    #[test]
    fn image_urls_dedup_preserving_first_occurrence() {
        let raw = json!({
            "carouselPhotos": [{"url": "http://x/a.jpg"}, {"url": "http://x/b.jpg"}, {"url": "http://x/a.jpg"}],
        });
        let urls = resolve_image_urls(&raw);
        assert_eq!(urls, vec!["http://x/a.jpg".to_string(), "http://x/b.jpg".to_string()]);
    }

    #[test]
    fn architecture_style_majority_vote_weights_exterior_and_breaks_ties_by_order() {
        let images = vec![
            enriched("a", ImageType::Interior, analysis("interior", Some("craftsman"), None, vec![])),
            enriched("b", ImageType::Exterior, analysis("exterior", Some("modern"), Some("white"), vec![])),
            enriched("c", ImageType::Exterior, analysis("exterior", Some("craftsman"), None, vec![])),
        ];
        // craftsman: interior(1) + exterior(2) = 3; modern: exterior(2) = 2.
        let (style, _) = choose_architecture_style(&images);
        assert_eq!(style.as_deref(), Some("craftsman"));
    }

    #[test]
    fn tag_aggregation_includes_color_exterior_token_only_for_exterior_images() {
        let images = vec![
            enriched("a", ImageType::Exterior, analysis("exterior", None, Some("white"), vec!["pool"])),
            enriched("b", ImageType::Interior, analysis("interior", None, Some("white"), vec!["granite_countertops"])),
        ];
        let tags = aggregate_image_tags(&images);
        assert!(tags.contains("white_exterior"));
        assert!(!tags.contains("white_interior"));
        assert!(tags.contains("pool"));
        assert!(tags.contains("granite_countertops"));
    }

    #[test]
    fn assemble_document_fails_only_when_text_and_all_images_fail() {
        let listing = extract_fields(&json!({"zpid": "z1"}));
        let outcome = EnrichmentOutcome { images: vec![], text_vector: None };
        assert!(assemble_document(listing, outcome, "2026-01-01T00:00:00Z").is_none());
    }

    #[test]
    fn assemble_document_succeeds_with_only_images_when_text_embedding_failed() {
        let listing = extract_fields(&json!({"zpid": "z1"}));
        let images = vec![enriched("a", ImageType::Exterior, analysis("exterior", Some("modern"), Some("white"), vec!["pool"]))];
        let outcome = EnrichmentOutcome { images, text_vector: None };
        let doc = assemble_document(listing, outcome, "2026-01-01T00:00:00Z").unwrap();
        assert!(!doc.has_valid_embeddings, "text vector is empty so has_valid_embeddings must be false (I1)");
        assert_eq!(doc.image_vectors.len(), 1);
    }

    #[test]
    fn assemble_document_sets_has_valid_embeddings_when_both_present() {
        let listing = extract_fields(&json!({"zpid": "z1"}));
        let images = vec![enriched("a", ImageType::Exterior, analysis("exterior", Some("modern"), Some("white"), vec!["pool"]))];
        let outcome = EnrichmentOutcome { images, text_vector: Some(vec![0.2; 4]) };
        let doc = assemble_document(listing, outcome, "2026-01-01T00:00:00Z").unwrap();
        assert!(doc.has_valid_embeddings);
    }
}
