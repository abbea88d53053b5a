//! C7 Style Resolver (§4.7, §3.3). Maps colloquial style terms to the
//! supported-style closed set S, in fixed resolution order: exact, synonym,
//! family expansion, substring/partial, then an optional LLM fallback.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Exact,
    Synonym,
    Family,
    Partial,
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleResolution {
    pub styles: HashSet<String>,
    pub confidence: f64,
    pub method: ResolutionMethod,
}

/// Tier-1 (broad) supported styles.
pub static TIER1: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "modern",
        "craftsman",
        "ranch",
        "colonial",
        "victorian",
        "tudor",
        "mediterranean",
        "cape_cod",
        "farmhouse",
        "contemporary",
        "spanish",
        "georgian",
        "federal",
        "art_deco",
        "bungalow",
        "cottage",
        "prairie",
        "gothic_revival",
        "greek_revival",
        "italianate",
        "queen_anne",
        "shingle",
        "southwestern",
        "log",
        "a_frame",
        "split_level",
        "traditional",
        "transitional",
        "industrial",
        "minimalist",
    ]
});

/// Tier-2 (specific) supported styles, with their Tier-1 parent.
pub static TIER2: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("craftsman_bungalow", "craftsman"),
        ("victorian_queen_anne", "victorian"),
        ("mid_century_modern", "modern"),
        ("mid_century_ranch", "ranch"),
        ("california_ranch", "ranch"),
        ("raised_ranch", "ranch"),
        ("dutch_colonial", "colonial"),
        ("spanish_colonial", "colonial"),
        ("georgian_colonial", "colonial"),
        ("folk_victorian", "victorian"),
        ("stick_victorian", "victorian"),
        ("english_tudor", "tudor"),
        ("mediterranean_revival", "mediterranean"),
        ("spanish_mission", "spanish"),
        ("pueblo_revival", "southwestern"),
        ("modern_farmhouse", "farmhouse"),
        ("prairie_style", "prairie"),
        ("art_deco_revival", "art_deco"),
        ("contemporary_craftsman", "craftsman"),
        ("storybook_cottage", "cottage"),
        ("english_cottage", "cottage"),
        ("lake_cottage", "cottage"),
        ("shingle_style_revival", "shingle"),
        ("neo_georgian", "georgian"),
        ("neo_classical", "greek_revival"),
        ("international_style", "modern"),
        ("brutalist", "modern"),
        ("desert_modern", "modern"),
        ("split_foyer", "split_level"),
        ("transitional_farmhouse", "farmhouse"),
    ]
});

/// Synonym dictionary D: colloquial term -> subset of S.
pub static SYNONYMS: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("eichler", vec!["mid_century_modern"]);
    m.insert("mcm", vec!["mid_century_modern"]);
    m.insert("mid-century", vec!["mid_century_modern"]);
    m.insert("mid century", vec!["mid_century_modern"]);
    m.insert("mission", vec!["spanish_mission"]);
    m.insert("mission style", vec!["spanish_mission"]);
    m.insert("four square", vec!["craftsman_bungalow"]);
    m.insert("foursquare", vec!["craftsman_bungalow"]);
    m.insert("saltbox", vec!["colonial"]);
    m.insert("cape", vec!["cape_cod"]);
    m.insert("mcmansion", vec!["contemporary"]);
    m.insert("raised bungalow", vec!["raised_ranch"]);
    m.insert("storybook", vec!["storybook_cottage"]);
    m
});

/// Similarity map σ: (s1, s2) -> confidence, used for fallback expansion
/// between related supported styles.
pub static SIMILARITY: Lazy<HashMap<(&'static str, &'static str), f64>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(("mid_century_modern", "mid_century_ranch"), 0.8);
    m.insert(("mid_century_ranch", "mid_century_modern"), 0.8);
    m.insert(("craftsman", "craftsman_bungalow"), 0.9);
    m.insert(("craftsman_bungalow", "craftsman"), 0.9);
    m.insert(("victorian", "victorian_queen_anne"), 0.9);
    m.insert(("victorian_queen_anne", "victorian"), 0.9);
    m
});

fn all_styles() -> HashSet<&'static str> {
    let mut set: HashSet<&'static str> = TIER1.iter().copied().collect();
    set.extend(TIER2.iter().map(|(child, _)| *child));
    set
}

/// Family map F: Tier-1 style -> its Tier-2 children plus itself.
pub fn family_of(tier1: &str) -> Option<HashSet<String>> {
    if !TIER1.contains(&tier1) {
        return None;
    }
    let mut set = HashSet::new();
    set.insert(tier1.to_string());
    for (child, parent) in TIER2.iter() {
        if *parent == tier1 {
            set.insert(child.to_string());
        }
    }
    Some(set)
}

fn normalize(input: &str) -> String {
    input.trim().to_lowercase().replace('-', "_").replace(' ', "_")
}

/// Pure resolution over (input, S, D, F); the LLM fallback path is the only
/// non-pure step and is not performed by this function (see
/// `resolve_with_llm_fallback`).
pub fn resolve(user_input: &str) -> Option<StyleResolution> {
    let styles = all_styles();
    let normalized = normalize(user_input);

    // 1. Exact match in S.
    if styles.contains(normalized.as_str()) {
        return Some(StyleResolution {
            styles: [normalized].into_iter().collect(),
            confidence: 1.0,
            method: ResolutionMethod::Exact,
        });
    }

    // 2. Synonym dictionary D. Synonym keys are matched against the
    // original (space-preserving) lowercase form, since some entries
    // ("mid century", "four square") are multi-word colloquialisms.
    let lowered = user_input.trim().to_lowercase();
    if let Some(mapped) = SYNONYMS.get(lowered.as_str()).or_else(|| SYNONYMS.get(normalized.as_str())) {
        return Some(StyleResolution {
            styles: mapped.iter().map(|s| s.to_string()).collect(),
            confidence: 0.9,
            method: ResolutionMethod::Synonym,
        });
    }

    // 3. Family expansion F: input is a Tier-1 key.
    if let Some(family) = family_of(&normalized) {
        return Some(StyleResolution {
            styles: family,
            confidence: 0.85,
            method: ResolutionMethod::Family,
        });
    }

    // 4. Substring/partial match over S.
    let partial: HashSet<String> = styles
        .iter()
        .filter(|s| s.contains(normalized.as_str()) || normalized.contains(*s))
        .map(|s| s.to_string())
        .collect();
    if !partial.is_empty() {
        return Some(StyleResolution {
            styles: partial,
            confidence: 0.7,
            method: ResolutionMethod::Partial,
        });
    }

    None
}

/// Optional LLM-backed fallback, invoked only when steps 1-4 all miss.
#[async_trait::async_trait]
pub trait StyleLlmFallback: Send + Sync {
    async fn resolve(&self, user_input: &str) -> Option<(HashSet<String>, f64)>;
}

pub async fn resolve_with_llm_fallback<F: StyleLlmFallback>(
    user_input: &str,
    fallback: &F,
) -> Option<StyleResolution> {
    if let Some(resolution) = resolve(user_input) {
        return Some(resolution);
    }
    let (styles, confidence) = fallback.resolve(user_input).await?;
    Some(StyleResolution {
        styles,
        confidence,
        method: ResolutionMethod::Llm,
    })
}

/// Similarity-based fallback expansion (σ), used when a family match alone
/// doesn't capture a related style e.g. when judging whether two resolved
/// styles should be treated as equivalent for tag-boost purposes.
pub fn similarity(s1: &str, s2: &str) -> f64 {
    if s1 == s2 {
        return 1.0;
    }
    SIMILARITY.get(&(s1, s2)).copied().unwrap_or(0.0)
}

fn parent_of(s: &str) -> Option<String> {
    if TIER1.contains(&s) {
        Some(s.to_string())
    } else {
        TIER2.iter().find(|(child, _)| *child == s).map(|(_, p)| p.to_string())
    }
}

/// True if `candidate` belongs to the same Tier-1 family as `query_style`
/// (same style, sibling Tier-2 child, or shared Tier-1 parent).
pub fn same_family(query_style: &str, candidate: &str) -> bool {
    if query_style == candidate {
        return true;
    }
    match (parent_of(query_style), parent_of(candidate)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// True if `candidate` should be treated as matching `query_style` for
/// tag-boosting purposes (C10): identical style, Tier-1 family match, or a
/// recorded similarity-map relation (σ). This is the "family expansion"
/// used at match time, broader than the strict Tier-1 parent family
/// because σ also links related Tier-2 styles that fall under different
/// Tier-1 parents, e.g. `mid_century_ranch` under `mid_century_modern`
/// queries (E2).
pub fn style_matches(query_style: &str, candidate: &str) -> bool {
    same_family(query_style, candidate) || similarity(query_style, candidate) > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tier1_style_round_trips_exact() {
        for s in TIER1.iter() {
            let r = resolve(s).unwrap();
            assert_eq!(r.method, ResolutionMethod::Exact);
            assert_eq!(r.confidence, 1.0);
            assert_eq!(r.styles, [s.to_string()].into_iter().collect());
        }
    }

    #[test]
    fn every_tier2_style_round_trips_exact() {
        for (s, _) in TIER2.iter() {
            let r = resolve(s).unwrap();
            assert_eq!(r.method, ResolutionMethod::Exact);
        }
    }

    #[test]
    fn synonym_eichler_resolves_to_mid_century_modern() {
        let r = resolve("eichler").unwrap();
        assert_eq!(r.method, ResolutionMethod::Synonym);
        assert!(r.confidence >= 0.85);
        assert!(r.styles.contains("mid_century_modern"));
    }

    #[test]
    fn synonym_mcm_resolves_to_mid_century_modern() {
        let r = resolve("MCM").unwrap();
        assert!(r.styles.contains("mid_century_modern"));
    }

    #[test]
    fn tier1_key_expands_to_family() {
        let r = resolve("craftsman").unwrap();
        // exact match wins over family expansion since craftsman is itself in S
        assert_eq!(r.method, ResolutionMethod::Exact);
    }

    #[test]
    fn every_synonym_value_is_in_s() {
        let styles = all_styles();
        for values in SYNONYMS.values() {
            for v in values {
                assert!(styles.contains(v), "{} not in S", v);
            }
        }
    }

    #[test]
    fn every_family_key_is_in_s() {
        let styles = all_styles();
        for s in TIER1.iter() {
            assert!(styles.contains(s));
        }
    }

    #[test]
    fn unresolvable_input_returns_none_without_llm() {
        assert!(resolve("xyzzy_not_a_style").is_none());
    }

    #[test]
    fn mid_century_ranch_matches_mid_century_modern_via_similarity() {
        assert!(style_matches("mid_century_modern", "mid_century_ranch"));
        assert!(!style_matches("mid_century_modern", "tudor"));
    }

    #[test]
    fn craftsman_bungalow_matches_craftsman_via_family() {
        assert!(style_matches("craftsman", "craftsman_bungalow"));
    }
}
