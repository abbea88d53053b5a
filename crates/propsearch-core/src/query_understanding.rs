//! C6 Query Understanding (§4.6). Natural-language query -> structured
//! `Constraints`. LLM primary path (caller-supplied), deterministic
//! rule-based fallback always available.

use regex::Regex;
use once_cell::sync::Lazy;
use std::collections::BTreeSet;

use crate::model::{Constraints, HardFilters, QueryType};
use crate::style;

static UNDER_PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)under\s*\$?\s*([\d,]+(?:\.\d+)?)\s*(k|m)?").unwrap());
static OVER_PRICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:over|above|at least)\s*\$?\s*([\d,]+(?:\.\d+)?)\s*(k|m)?").unwrap()
});
static BEDS_AT_LEAST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:at least|minimum|min)\s*(\d+)\s*bed(?:room)?s?").unwrap());
static BEDS_PLAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s*bed(?:room)?s?").unwrap());
static BATHS_AT_LEAST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:at least|minimum|min)\s*(\d+(?:\.\d+)?)\s*bath(?:room)?s?").unwrap());
static BATHS_PLAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*bath(?:room)?s?").unwrap());
static NEAR_POI: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)near\s+(?:a\s+|an\s+|the\s+)?([a-z_ ]+)").unwrap());

const COLORS: &[&str] = &["white", "black", "gray", "grey", "blue", "red", "green", "yellow", "brown", "beige", "tan"];
const MATERIALS: &[&str] = &["granite", "marble", "quartz", "hardwood", "brick", "stucco", "stone", "vinyl", "tile"];
const SPECIFIC_FEATURES: &[&str] = &["pool", "garage", "fireplace", "basement", "deck", "patio", "garden"];

fn parse_amount(num: &str, suffix: Option<&str>) -> Option<i64> {
    let cleaned: String = num.chars().filter(|c| *c != ',').collect();
    let base: f64 = cleaned.parse().ok()?;
    let multiplier = match suffix.map(|s| s.to_lowercase()).as_deref() {
        Some("k") => 1_000.0,
        Some("m") => 1_000_000.0,
        _ => 1.0,
    };
    Some((base * multiplier) as i64)
}

/// Deterministic rule-based fallback (§4.6), invoked directly or after an
/// LLM call fails/times out. Never hallucinates `must_have` tags for a
/// location-only query (critical rule, E3).
pub fn fallback_understand(query: &str) -> Constraints {
    let lower = query.to_lowercase();
    let mut hard_filters = HardFilters::default();
    let mut must_have: BTreeSet<String> = BTreeSet::new();

    if let Some(c) = UNDER_PRICE.captures(&lower) {
        hard_filters.price_max = parse_amount(&c[1], c.get(2).map(|m| m.as_str()));
    }
    if let Some(c) = OVER_PRICE.captures(&lower) {
        hard_filters.price_min = parse_amount(&c[1], c.get(2).map(|m| m.as_str()));
    }

    if let Some(c) = BEDS_AT_LEAST.captures(&lower) {
        hard_filters.beds_min = c[1].parse().ok();
    } else if let Some(c) = BEDS_PLAIN.captures(&lower) {
        hard_filters.beds_min = c[1].parse().ok();
    }

    if let Some(c) = BATHS_AT_LEAST.captures(&lower) {
        hard_filters.baths_min = c[1].parse().ok();
    } else if let Some(c) = BATHS_PLAIN.captures(&lower) {
        hard_filters.baths_min = c[1].parse().ok();
    }

    // Multi-word colloquialisms ("mid century modern") must be checked before
    // the single-token loop below, since a later token ("modern") could
    // otherwise shadow the more specific phrase match.
    let mut architecture_style = None;
    for phrase in ["mid century", "mid-century"] {
        if lower.contains(phrase) {
            if let Some(resolution) = style::resolve(phrase) {
                architecture_style = resolution.styles.into_iter().next();
                break;
            }
        }
    }
    if architecture_style.is_none() {
        for token in lower.split_whitespace() {
            if let Some(resolution) = style::resolve(token) {
                architecture_style = resolution.styles.into_iter().next();
                break;
            }
        }
    }

    let mut color_present = false;
    for color in COLORS {
        if lower.contains(color) {
            must_have.insert(format!("{}_exterior", color));
            color_present = true;
        }
    }

    let mut material_present = false;
    for material in MATERIALS {
        if lower.contains(material) {
            must_have.insert(format!("{}_countertops", material));
            material_present = true;
        }
    }

    let mut feature_present = false;
    for feature in SPECIFIC_FEATURES {
        if lower.contains(feature) {
            must_have.insert(feature.to_string());
            feature_present = true;
        }
    }

    let proximity = NEAR_POI.captures(&lower).map(|c| crate::model::Proximity {
        poi_type: c[1].trim().replace(' ', "_"),
        max_distance_km: None,
    });

    // Critical rule (§4.6): location-only queries must not hallucinate feature tags.
    let is_location_only = proximity.is_some() && !color_present && !material_present && !feature_present && architecture_style.is_none();
    if is_location_only {
        must_have.clear();
    }

    // Priority order per §4.6: color, then material, then style (visual_style
    // wins even when a specific-feature keyword like "pool" is also present,
    // per E2), then proximity, then specific feature, else general.
    let query_type = if color_present {
        QueryType::Color
    } else if material_present {
        QueryType::Material
    } else if architecture_style.is_some() {
        QueryType::VisualStyle
    } else if proximity.is_some() {
        QueryType::Proximity
    } else if feature_present {
        QueryType::SpecificFeature
    } else {
        QueryType::General
    };

    Constraints {
        must_have,
        nice_to_have: BTreeSet::new(),
        hard_filters,
        architecture_style,
        proximity,
        query_type,
    }
}

/// Primary LLM-backed path; the caller supplies a provider that turns the
/// raw query into a best-effort `Constraints` JSON, already normalized
/// (lowercase tags, style resolved). On any provider failure this falls
/// through to `fallback_understand`.
#[async_trait::async_trait]
pub trait QueryUnderstandingProvider: Send + Sync {
    async fn understand(&self, query: &str) -> crate::error::Result<Constraints>;
}

pub async fn understand<P: QueryUnderstandingProvider>(provider: &P, query: &str) -> Constraints {
    match provider.understand(query).await {
        Ok(mut constraints) => {
            normalize_constraints(&mut constraints);
            constraints
        }
        Err(e) => {
            tracing::warn!(error = %e, "query understanding provider failed; using deterministic fallback");
            fallback_understand(query)
        }
    }
}

fn normalize_constraints(constraints: &mut Constraints) {
    constraints.must_have = constraints.must_have.iter().map(|t| t.to_lowercase().replace(' ', "_")).collect();
    constraints.nice_to_have = constraints.nice_to_have.iter().map(|t| t.to_lowercase().replace(' ', "_")).collect();
    if let Some(style_input) = constraints.architecture_style.take() {
        constraints.architecture_style = style::resolve(&style_input).and_then(|r| r.styles.into_iter().next());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p11_fallback_for_pool_query() {
        let c = fallback_understand("3 bedroom house with pool under $500k");
        assert!(c.must_have.contains("pool"));
        assert_eq!(c.hard_filters.beds_min, Some(3.0));
        assert_eq!(c.hard_filters.price_max, Some(500_000));
        assert_eq!(c.query_type, QueryType::SpecificFeature);
    }

    #[test]
    fn e3_location_only_query_has_no_hallucinated_tags() {
        let c = fallback_understand("homes near grocery stores");
        assert!(c.must_have.is_empty());
        assert_eq!(c.query_type, QueryType::Proximity);
        assert_eq!(c.proximity.as_ref().unwrap().poi_type, "grocery_stores");
    }

    #[test]
    fn e1_color_and_material_query() {
        let c = fallback_understand("modern white house with granite countertops");
        assert!(c.must_have.contains("white_exterior"));
        assert!(c.must_have.contains("granite_countertops"));
        assert_eq!(c.query_type, QueryType::Color);
        assert_eq!(c.architecture_style.as_deref(), Some("modern"));
    }

    #[test]
    fn e2_mid_century_modern_with_pool() {
        let c = fallback_understand("mid century modern homes with pool");
        assert!(c.must_have.contains("pool"));
        assert_eq!(c.architecture_style.as_deref(), Some("mid_century_modern"));
        assert_eq!(c.query_type, QueryType::VisualStyle);
    }
}
