//! C2 Vision Analyzer (§4.2). Classifies one image (type, feature tags,
//! architecture style, materials, colors) via a multimodal LLM behind a
//! deterministic JSON contract. Never raises to the caller: on repeated
//! failure it returns the minimal "unknown" response.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionAnalysis {
    pub image_type: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub architecture_style: Option<String>,
    #[serde(default)]
    pub exterior_color: Option<String>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub visual_features: Vec<String>,
    #[serde(default)]
    pub room_type: Option<String>,
    pub confidence: String,
}

impl VisionAnalysis {
    pub fn unknown() -> Self {
        Self {
            image_type: "unknown".to_string(),
            features: vec![],
            architecture_style: None,
            exterior_color: None,
            materials: vec![],
            visual_features: vec![],
            room_type: None,
            confidence: "low".to_string(),
        }
    }

    fn lowercased(mut self) -> Self {
        self.image_type = self.image_type.to_lowercase();
        self.features = self.features.into_iter().map(|s| s.to_lowercase()).collect();
        self.architecture_style = self.architecture_style.map(|s| s.to_lowercase());
        self.exterior_color = self.exterior_color.map(|s| s.to_lowercase());
        self.materials = self.materials.into_iter().map(|s| s.to_lowercase()).collect();
        self.visual_features = self.visual_features.into_iter().map(|s| s.to_lowercase()).collect();
        self.room_type = self.room_type.map(|s| s.to_lowercase());
        self.confidence = self.confidence.to_lowercase();
        self
    }
}

/// Strips a ```json fence (or a bare ``` fence) if present, returning the
/// inner JSON text. The prompt asks for bare JSON but models frequently
/// wrap it anyway.
fn strip_json_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim().strip_suffix("```").map(str::trim).unwrap_or(rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim().strip_suffix("```").map(str::trim).unwrap_or(rest.trim())
    } else {
        trimmed
    }
}

/// Parses the model's raw text response into the deterministic schema.
/// Never fails: falls back to `VisionAnalysis::unknown()` on parse failure,
/// per §4.2.
pub fn parse_vision_response(raw: &str) -> VisionAnalysis {
    let candidate = strip_json_fence(raw);
    match serde_json::from_str::<VisionAnalysis>(candidate) {
        Ok(analysis) => analysis.lowercased(),
        Err(e) => {
            tracing::warn!(error = %e, raw_preview = %raw.chars().take(200).collect::<String>(), "vision response parse failure; returning minimal analysis");
            VisionAnalysis::unknown()
        }
    }
}

pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base.saturating_mul(1u32 << attempt.min(16));
        scaled.min(self.cap)
    }
}

/// Abstract multimodal vision call, fronted by the embedding cache (C1) at
/// the call site in the ingestion pipeline.
#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    /// Raw completion call; returns the model's raw text response.
    async fn complete(&self, image_bytes: &[u8], model_id: &str) -> Result<String>;
}

/// Runs `provider.complete` with exponential backoff on transient failures,
/// never propagating an error to the caller: exhaustion yields the minimal
/// unknown analysis with the raw (possibly empty) response preserved for
/// diagnostics.
pub async fn analyze_image<P: VisionProvider>(
    provider: &P,
    image_bytes: &[u8],
    model_id: &str,
    policy: &BackoffPolicy,
) -> (VisionAnalysis, String) {
    let mut attempt = 0;
    loop {
        match provider.complete(image_bytes, model_id).await {
            Ok(raw) => return (parse_vision_response(&raw), raw),
            Err(e) if attempt + 1 < policy.max_attempts => {
                tracing::warn!(error = %e, attempt, "vision provider call failed; backing off");
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempts = attempt + 1, "vision provider exhausted retries; returning unknown analysis");
                return (VisionAnalysis::unknown(), String::new());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json_and_lowercases_fields() {
        let raw = r#"{"image_type":"EXTERIOR","features":["POOL"],"architecture_style":"Craftsman","materials":["Brick"],"visual_features":[],"confidence":"HIGH"}"#;
        let analysis = parse_vision_response(raw);
        assert_eq!(analysis.image_type, "exterior");
        assert_eq!(analysis.features, vec!["pool"]);
        assert_eq!(analysis.architecture_style.as_deref(), Some("craftsman"));
        assert_eq!(analysis.confidence, "high");
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"image_type\":\"interior\",\"confidence\":\"low\"}\n```";
        let analysis = parse_vision_response(raw);
        assert_eq!(analysis.image_type, "interior");
    }

    #[test]
    fn falls_back_to_unknown_on_garbage() {
        let analysis = parse_vision_response("not json at all");
        assert_eq!(analysis.image_type, "unknown");
        assert!(analysis.features.is_empty());
        assert_eq!(analysis.confidence, "low");
    }

    #[test]
    fn backoff_caps_at_configured_maximum() {
        let policy = BackoffPolicy::default();
        let delay = policy.delay_for_attempt(10);
        assert_eq!(delay, policy.cap);
    }
}
