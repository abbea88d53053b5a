//! C9 Adaptive Weighting (§4.9). Query-type driven RRF k-values; lower k
//! means higher weight for that strategy.

use crate::model::{Constraints, QueryType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrfKValues {
    pub bm25: u32,
    pub text: u32,
    pub img: u32,
}

impl Default for RrfKValues {
    fn default() -> Self {
        Self { bm25: 60, text: 60, img: 60 }
    }
}

/// Rules applied in order, starting from the defaults (60, 60, 60). Only
/// `query_type` drives the choice (§9: "adaptive k-values, not adaptive
/// filters" - constraints do not otherwise affect weighting).
pub fn adaptive_k(constraints: &Constraints) -> RrfKValues {
    let mut k = RrfKValues::default();
    match constraints.query_type {
        QueryType::Color => {
            k.bm25 = 30;
            k.img = 120;
        }
        QueryType::Material => {
            k.bm25 = 42;
            k.text = 45;
        }
        QueryType::VisualStyle => {
            k.img = 40;
            k.text = 45;
        }
        QueryType::SpecificFeature | QueryType::Proximity | QueryType::General => {}
    }
    k
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Constraints;

    fn with_type(qt: QueryType) -> Constraints {
        Constraints {
            query_type: qt,
            ..Default::default()
        }
    }

    #[test]
    fn e1_color_query_yields_30_60_120() {
        let k = adaptive_k(&with_type(QueryType::Color));
        assert_eq!(k, RrfKValues { bm25: 30, text: 60, img: 120 });
    }

    #[test]
    fn e2_visual_style_query_yields_60_45_40() {
        let k = adaptive_k(&with_type(QueryType::VisualStyle));
        assert_eq!(k, RrfKValues { bm25: 60, text: 45, img: 40 });
    }

    #[test]
    fn material_query_yields_42_45_60() {
        let k = adaptive_k(&with_type(QueryType::Material));
        assert_eq!(k, RrfKValues { bm25: 42, text: 45, img: 60 });
    }

    #[test]
    fn specific_feature_and_general_are_balanced_defaults() {
        assert_eq!(adaptive_k(&with_type(QueryType::SpecificFeature)), RrfKValues::default());
        assert_eq!(adaptive_k(&with_type(QueryType::General)), RrfKValues::default());
    }
}
