//! C10 Fusion + Boosting (§4.10). Reciprocal Rank Fusion over the three
//! retrieval strategies, followed by a bounded multiplicative tag-match
//! boost. Pure, deterministic, CPU-only (§5).

use std::collections::{BTreeMap, BTreeSet};

use crate::weighting::RrfKValues;

/// One document's appearance in a single strategy's ranked output.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub doc_id: String,
    /// 1-based rank within this strategy's result list.
    pub rank: u32,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct FusedScore {
    pub doc_id: String,
    pub bm25_score: Option<f32>,
    pub knn_text_score: Option<f32>,
    pub knn_image_score: Option<f32>,
    pub rrf_score: f32,
    pub boost: f32,
    pub final_score: f32,
}

/// I11: deterministic given identical inputs; ties broken by doc id
/// ascending.
pub fn reciprocal_rank_fusion(
    bm25: &[RankedHit],
    knn_text: &[RankedHit],
    knn_image: &[RankedHit],
    k: RrfKValues,
) -> Vec<FusedScore> {
    let mut by_doc: BTreeMap<String, FusedScore> = BTreeMap::new();

    for hit in bm25 {
        let entry = by_doc.entry(hit.doc_id.clone()).or_insert_with(|| FusedScore {
            doc_id: hit.doc_id.clone(),
            ..Default::default()
        });
        entry.bm25_score = Some(hit.score);
        entry.rrf_score += 1.0 / (k.bm25 as f32 + hit.rank as f32);
    }
    for hit in knn_text {
        let entry = by_doc.entry(hit.doc_id.clone()).or_insert_with(|| FusedScore {
            doc_id: hit.doc_id.clone(),
            ..Default::default()
        });
        entry.knn_text_score = Some(hit.score);
        entry.rrf_score += 1.0 / (k.text as f32 + hit.rank as f32);
    }
    for hit in knn_image {
        let entry = by_doc.entry(hit.doc_id.clone()).or_insert_with(|| FusedScore {
            doc_id: hit.doc_id.clone(),
            ..Default::default()
        });
        entry.knn_image_score = Some(hit.score);
        entry.rrf_score += 1.0 / (k.img as f32 + hit.rank as f32);
    }

    let mut results: Vec<FusedScore> = by_doc.into_values().collect();
    results.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    results
}

/// Post-RRF multiplicative tag boost (§4.10). I12: strictly >= 1.0.
pub fn tag_boost(must_have: &BTreeSet<String>, tags: &BTreeSet<String>) -> f32 {
    if must_have.is_empty() {
        return 1.0;
    }
    let matched = must_have.intersection(tags).count();
    let r = matched as f32 / must_have.len() as f32;
    if r >= 1.0 {
        2.0
    } else if r >= 0.75 {
        1.5
    } else if r >= 0.5 {
        1.25
    } else {
        1.0
    }
}

/// Runs fusion then boosting, returning the top `size` results ordered by
/// final score descending, ties broken by doc id ascending (I11).
pub fn fuse_and_boost(
    bm25: &[RankedHit],
    knn_text: &[RankedHit],
    knn_image: &[RankedHit],
    k: RrfKValues,
    must_have: &BTreeSet<String>,
    tags_by_doc: &BTreeMap<String, BTreeSet<String>>,
    size: usize,
) -> Vec<FusedScore> {
    let mut fused = reciprocal_rank_fusion(bm25, knn_text, knn_image, k);
    for entry in fused.iter_mut() {
        let empty = BTreeSet::new();
        let tags = tags_by_doc.get(&entry.doc_id).unwrap_or(&empty);
        entry.boost = tag_boost(must_have, tags);
        entry.final_score = entry.rrf_score * entry.boost;
    }
    fused.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    fused.truncate(size);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc: &str, rank: u32, score: f32) -> RankedHit {
        RankedHit { doc_id: doc.to_string(), rank, score }
    }

    #[test]
    fn p7_rank_one_in_all_three_matches_closed_form() {
        let k = RrfKValues { bm25: 60, text: 60, img: 60 };
        let fused = reciprocal_rank_fusion(&[hit("a", 1, 10.0)], &[hit("a", 1, 0.9)], &[hit("a", 1, 0.8)], k);
        let expected = 1.0 / 61.0 + 1.0 / 61.0 + 1.0 / 61.0;
        assert!((fused[0].rrf_score - expected).abs() < 1e-6);
    }

    #[test]
    fn p1_determinism_same_inputs_same_ordering() {
        let k = RrfKValues::default();
        let bm25 = vec![hit("a", 1, 1.0), hit("b", 2, 0.5)];
        let text = vec![hit("b", 1, 0.9), hit("a", 2, 0.8)];
        let img: Vec<RankedHit> = vec![];
        let run1 = reciprocal_rank_fusion(&bm25, &text, &img, k);
        let run2 = reciprocal_rank_fusion(&bm25, &text, &img, k);
        let ids1: Vec<_> = run1.iter().map(|f| f.doc_id.clone()).collect();
        let ids2: Vec<_> = run2.iter().map(|f| f.doc_id.clone()).collect();
        assert_eq!(ids1, ids2);
    }

    #[test]
    fn i11_ties_broken_by_doc_id_ascending() {
        let k = RrfKValues::default();
        let bm25 = vec![hit("z", 1, 1.0), hit("a", 1, 1.0)];
        let fused = reciprocal_rank_fusion(&bm25, &[], &[], k);
        assert_eq!(fused[0].doc_id, "a");
        assert_eq!(fused[1].doc_id, "z");
    }

    #[test]
    fn i12_boost_bounds_and_perfect_match_caps_at_2() {
        let must: BTreeSet<String> = ["pool".to_string(), "garage".to_string()].into_iter().collect();
        let full: BTreeSet<String> = ["pool".to_string(), "garage".to_string()].into_iter().collect();
        assert_eq!(tag_boost(&must, &full), 2.0);

        let none: BTreeSet<String> = BTreeSet::new();
        assert_eq!(tag_boost(&must, &none), 1.0);

        let empty_must: BTreeSet<String> = BTreeSet::new();
        assert_eq!(tag_boost(&empty_must, &none), 1.0);
    }

    #[test]
    fn p5_tag_monotonicity_adding_matched_tag_does_not_lower_score() {
        let must_a: BTreeSet<String> = ["pool".to_string()].into_iter().collect();
        let must_b: BTreeSet<String> = ["pool".to_string(), "garage".to_string()].into_iter().collect();
        let tags: BTreeSet<String> = ["pool".to_string(), "garage".to_string()].into_iter().collect();
        // doc already has both tags; adding "garage" to must_have (which it has) must not lower its boost.
        assert!(tag_boost(&must_b, &tags) >= tag_boost(&must_a, &tags) || tag_boost(&must_b, &tags) == 2.0);
    }

    #[test]
    fn e3_no_must_have_yields_boost_one_for_all() {
        let must: BTreeSet<String> = BTreeSet::new();
        let tags: BTreeSet<String> = ["anything".to_string()].into_iter().collect();
        assert_eq!(tag_boost(&must, &tags), 1.0);
    }

    #[test]
    fn fuse_and_boost_truncates_to_requested_size() {
        let k = RrfKValues::default();
        let bm25 = vec![hit("a", 1, 1.0), hit("b", 2, 0.9), hit("c", 3, 0.8)];
        let must: BTreeSet<String> = BTreeSet::new();
        let tags_by_doc = BTreeMap::new();
        let results = fuse_and_boost(&bm25, &[], &[], k, &must, &tags_by_doc, 2);
        assert_eq!(results.len(), 2);
    }
}
